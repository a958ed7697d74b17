use anyhow::{Context, Result};
use awaitdb::{
    invoke, Arg, Database, DbError, Engine, Factory, IndexParams, OpenOptions, StoreParams, Value,
    Wrapped,
};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info_span};

/// A database description plus the calls to make against it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub database: String,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub stores: Vec<StoreSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    pub name: String,
    #[serde(default)]
    pub key_path: Option<serde_json::Value>,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    pub name: String,
    pub key_path: serde_json::Value,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub multi_entry: bool,
}

/// One reflective call on the connection, e.g. `{"op": "get", "args": ["kv", "a"]}`.
#[derive(Debug, Deserialize)]
pub struct Step {
    pub op: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// What one step produced.
#[derive(Debug)]
pub struct StepReport {
    pub index: usize,
    pub op: String,
    pub outcome: std::result::Result<Value, DbError>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read script '{}'", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid script '{}'", path.display()))
    }

    /// Open the database, creating missing stores in the upgrade, then run
    /// every step in order. A failing step is reported, not fatal.
    pub fn run(self) -> Result<Vec<StepReport>> {
        let span = info_span!("script", database = %self.database);
        let _guard = span.enter();

        let engine = Engine::new();
        let factory = Factory::new(&engine);
        let db = self.open(&engine, &factory)?;

        let mut reports = Vec::with_capacity(self.steps.len());
        let target = Wrapped::Database(db.clone());
        for (index, step) in self.steps.into_iter().enumerate() {
            debug!(index, op = %step.op, "running step");
            let args = step
                .args
                .into_iter()
                .map(|arg| Arg::Value(Value::from(arg)))
                .collect();
            let outcome = invoke(&target, &step.op, args)
                .and_then(|outcome| engine.block_on(outcome.settle()));
            reports.push(StepReport {
                index,
                op: step.op,
                outcome,
            });
        }
        db.close();
        engine.settle()?;
        Ok(reports)
    }

    fn open(&self, engine: &Engine, factory: &Factory) -> Result<Database> {
        let stores: Vec<(String, StoreParams, Vec<(String, Value, IndexParams)>)> = self
            .stores
            .iter()
            .map(|store| {
                let mut params = StoreParams::new().auto_increment(store.auto_increment);
                params.key_path = store
                    .key_path
                    .clone()
                    .map(Value::from)
                    .and_then(|path| key_path(&path));
                let indexes = store
                    .indexes
                    .iter()
                    .map(|index| {
                        let params = IndexParams::new()
                            .unique(index.unique)
                            .multi_entry(index.multi_entry);
                        (index.name.clone(), Value::from(index.key_path.clone()), params)
                    })
                    .collect();
                (store.name.clone(), params, indexes)
            })
            .collect();

        let mut options = OpenOptions::new().upgrade(move |db, _, tx| {
            for (name, params, indexes) in stores {
                let store = if db.object_store_names().contains(&name) {
                    tx.object_store(&name)?
                } else {
                    db.create_object_store(&name, params)?
                };
                for (index, path, params) in indexes {
                    if store.index_names().contains(&index) {
                        continue;
                    }
                    let path = key_path(&path).ok_or_else(|| {
                        DbError::DataError(format!("index '{}' has an invalid key path", index))
                    })?;
                    store.create_index(&index, path, params)?;
                }
            }
            Ok(())
        });
        options.version = self.version;

        let open = factory.open(&self.database, options)?;
        Ok(engine.block_on(open)?)
    }
}

fn key_path(value: &Value) -> Option<awaitdb::KeyPath> {
    match value {
        Value::Text(path) => Some(awaitdb::KeyPath::Single(path.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(awaitdb::KeyPath::Multi),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(text: &str) -> Script {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_run_reports_each_step() {
        let reports = script(
            r#"{
                "database": "demo",
                "stores": [
                    { "name": "people", "keyPath": "id",
                      "indexes": [{ "name": "by_name", "keyPath": "name" }] }
                ],
                "steps": [
                    { "op": "put", "args": ["people", { "id": 1, "name": "Ada" }] },
                    { "op": "getFromIndex", "args": ["people", "by_name", "Ada"] },
                    { "op": "add", "args": ["people", { "id": 1, "name": "Bob" }] },
                    { "op": "count", "args": ["people"] },
                    { "op": "explode" }
                ]
            }"#,
        )
        .run()
        .unwrap();

        assert_eq!(reports.len(), 5);
        assert_eq!(reports[0].outcome.as_ref().unwrap(), &Value::from(1));
        assert_eq!(
            reports[1].outcome.as_ref().unwrap().field("name"),
            Some(&Value::from("Ada"))
        );
        assert!(matches!(reports[2].outcome, Err(DbError::ConstraintViolation(_))));
        assert_eq!(reports[3].outcome.as_ref().unwrap(), &Value::from(1));
        assert!(matches!(reports[4].outcome, Err(DbError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_missing_store_fails_the_step_only() {
        let reports = script(r#"{ "database": "demo", "steps": [{ "op": "get", "args": ["nope", 1] }] }"#)
            .run()
            .unwrap();
        assert!(matches!(reports[0].outcome, Err(DbError::NotFound(_))));
    }
}
