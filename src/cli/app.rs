use super::script::{Script, StepReport};
use anyhow::Result;
use awaitdb::dispatch::OPERATIONS;
use awaitdb::Value;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "awaitdb")]
#[command(about = "Run scripted calls against the future-based object store layer")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a JSON script against a fresh in-memory engine
    Run {
        script: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// List every operation the dispatcher knows and how it is classified
    Ops,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Plain,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { script, format } => {
            let reports = Script::load(&script)?.run()?;
            for report in &reports {
                println!("{}", render(report, format)?);
            }
            Ok(())
        }
        Command::Ops => {
            for spec in OPERATIONS {
                let writes = if spec.writes { " (writes)" } else { "" };
                println!(
                    "{:<12} {:<22} {}{}",
                    spec.kind.to_string(),
                    spec.name,
                    spec.class,
                    writes
                );
            }
            Ok(())
        }
    }
}

fn render(report: &StepReport, format: Format) -> Result<String> {
    match format {
        Format::Json => {
            let body = match &report.outcome {
                Ok(value) => serde_json::json!({
                    "step": report.index,
                    "op": report.op,
                    "result": serde_json::Value::from(value.clone()),
                }),
                Err(error) => serde_json::json!({
                    "step": report.index,
                    "op": report.op,
                    "error": { "name": error.name(), "message": error.to_string() },
                }),
            };
            Ok(serde_json::to_string(&body)?)
        }
        Format::Plain => Ok(match &report.outcome {
            Ok(Value::Null) => format!("{} {}", report.index, report.op),
            Ok(value) => format!("{} {} -> {}", report.index, report.op, value),
            Err(error) => format!("{} {} !! {}: {}", report.index, report.op, error.name(), error),
        }),
    }
}
