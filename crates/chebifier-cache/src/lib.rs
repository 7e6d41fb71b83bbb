use std::path::PathBuf;

use thiserror::Error;

pub mod batch;
pub mod cache;
pub mod config_file;
pub mod mock;
pub mod predictor;
pub mod snapshot;

// Re-export for convenience
pub use batch::{BatchPlan, CachedPredictor, cached_batch};
pub use cache::{CacheKey, CacheStats, DEFAULT_MAX_SIZE, PredictionCache};
pub use predictor::{FnPredictor, PredictError, PredictFuture, Predictor};
pub use snapshot::{SnapshotEntry, SnapshotError, SnapshotFormat, read_snapshot};

/// Errors raised when a cache or a cached predictor is built with arguments
/// that break its contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache capacity must be at least 1")]
    ZeroCapacity,
    #[error("predictor has no model name; cannot key cached predictions")]
    MissingModelName,
}

/// Runtime configuration for a [`PredictionCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of `(smiles, model)` entries kept in memory.
    pub max_size: usize,
    /// Snapshot location. `None` disables persistence entirely.
    pub persist_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            persist_path: None,
        }
    }
}

impl CacheConfig {
    /// Build a runtime config from an on-disk config file, falling back to
    /// defaults for anything it leaves unset.
    pub fn from_file(file: &config_file::ConfigFile) -> Self {
        let section = file.cache.as_ref();
        Self {
            max_size: section
                .and_then(|c| c.max_size)
                .unwrap_or(DEFAULT_MAX_SIZE),
            persist_path: section
                .and_then(|c| c.persist_path.as_ref())
                .map(PathBuf::from),
        }
    }
}
