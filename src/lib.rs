// RegStore - embeddable single-file hierarchical key/value store
// Core library module

pub mod error;
pub mod storage;

pub use error::{DbError, Result};
pub use storage::hive::{Hive, HiveConfig, OpenFlags, SelectFlags};

/// Library version, exposed for diagnostics and file-format compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level configuration for opening a store.
///
/// This is intentionally thin: `HiveConfig` (see [`storage::hive`]) carries the
/// knobs the storage engine itself needs; this wrapper exists for callers that
/// want a single place to stash the file path alongside engine tuning.
#[derive(Debug, Clone)]
pub struct Config {
    pub path: String,
    pub hive: HiveConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: "./data.hive".to_string(),
            hive: HiveConfig::default(),
        }
    }
}
