use crate::core::{KeyPath, Result};
use crate::engine::VersionChangeEvent;
use crate::facade::{Database, Transaction};
use std::fmt;

/// Old and new version passed to upgrade, blocked and blocking callbacks.
pub type VersionChange = VersionChangeEvent;

pub type UpgradeCallback = Box<dyn FnOnce(&Database, VersionChange, &Transaction) -> Result<()>>;
pub type VersionChangeCallback = Box<dyn FnMut(VersionChange)>;
pub type TerminatedCallback = Box<dyn FnOnce()>;

/// Options for [`Factory::open`](super::Factory::open)
///
/// ```ignore
/// let db = factory.open("app", OpenOptions::new()
///     .version(2)
///     .upgrade(|db, change, _tx| {
///         if change.old_version < 1 {
///             db.create_object_store("kv", StoreParams::new())?;
///         }
///         Ok(())
///     }))?;
/// ```
#[derive(Default)]
pub struct OpenOptions {
    /// Requested version; `None` opens the current one (1 for a new database)
    pub version: Option<u32>,

    /// Runs inside the version change transaction; `Err` aborts the upgrade
    pub upgrade: Option<UpgradeCallback>,

    /// Other connections kept the upgrade waiting
    pub blocked: Option<VersionChangeCallback>,

    /// This connection is keeping a newer open or a deletion waiting
    pub blocking: Option<VersionChangeCallback>,

    /// The engine closed this connection
    pub terminated: Option<TerminatedCallback>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested version
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the upgrade callback
    pub fn upgrade<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Database, VersionChange, &Transaction) -> Result<()> + 'static,
    {
        self.upgrade = Some(Box::new(callback));
        self
    }

    /// Set the blocked callback
    pub fn blocked<F>(mut self, callback: F) -> Self
    where
        F: FnMut(VersionChange) + 'static,
    {
        self.blocked = Some(Box::new(callback));
        self
    }

    /// Set the blocking callback
    pub fn blocking<F>(mut self, callback: F) -> Self
    where
        F: FnMut(VersionChange) + 'static,
    {
        self.blocking = Some(Box::new(callback));
        self
    }

    /// Set the terminated callback
    pub fn terminated<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        self.terminated = Some(Box::new(callback));
        self
    }

    /// Validate options
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.version == Some(0) {
            return Err("version must be at least 1".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("version", &self.version)
            .field("upgrade", &self.upgrade.is_some())
            .field("blocked", &self.blocked.is_some())
            .field("blocking", &self.blocking.is_some())
            .field("terminated", &self.terminated.is_some())
            .finish()
    }
}

/// Options for [`Factory::delete`](super::Factory::delete)
#[derive(Default)]
pub struct DeleteOptions {
    /// Open connections kept the deletion waiting
    pub blocked: Option<VersionChangeCallback>,
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the blocked callback
    pub fn blocked<F>(mut self, callback: F) -> Self
    where
        F: FnMut(VersionChange) + 'static,
    {
        self.blocked = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for DeleteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteOptions")
            .field("blocked", &self.blocked.is_some())
            .finish()
    }
}

/// Object store creation parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreParams {
    /// In-line key path; `None` means keys are passed explicitly
    pub key_path: Option<KeyPath>,

    /// Generate keys from a per-store counter
    pub auto_increment: bool,
}

impl StoreParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key path
    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Enable the key generator
    pub fn auto_increment(mut self, enabled: bool) -> Self {
        self.auto_increment = enabled;
        self
    }
}

/// Index creation parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexParams {
    /// Reject two records with the same index key
    pub unique: bool,

    /// Index every element of an array key separately
    pub multi_entry: bool,
}

impl IndexParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set uniqueness
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Set multi-entry indexing
    pub fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }
}

/// Identity cache tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Inserts between two sweeps of dead entries
    pub sweep_threshold: usize,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self { sweep_threshold: 256 }
    }

    /// Set the sweep threshold
    pub fn sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold;
        self
    }

    /// Effective threshold; zero is treated as one (sweep on every insert)
    pub(crate) fn threshold(&self) -> usize {
        self.sweep_threshold.max(1)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_options_builder() {
        let options = OpenOptions::new()
            .version(3)
            .blocked(|_| {})
            .terminated(|| {});
        assert_eq!(options.version, Some(3));
        assert!(options.blocked.is_some());
        assert!(options.blocking.is_none());
        assert!(options.terminated.is_some());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_version_zero() {
        assert!(OpenOptions::new().version(0).validate().is_err());
    }

    #[test]
    fn test_store_params_builder() {
        let params = StoreParams::new().key_path("id").auto_increment(true);
        assert_eq!(params.key_path, Some(KeyPath::from("id")));
        assert!(params.auto_increment);
        assert_eq!(StoreParams::new().key_path, None);
    }

    #[test]
    fn test_cache_config_threshold() {
        assert_eq!(CacheConfig::default().sweep_threshold, 256);
        assert_eq!(CacheConfig::new().sweep_threshold(0).threshold(), 1);
    }
}
