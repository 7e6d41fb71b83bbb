//! Bounded LRU cache for per-molecule, per-model predictions.
//!
//! Entries are keyed by `(smiles, model)` so one cache can be shared by every
//! model of an ensemble. Capacity is a hard limit: an insertion that would
//! exceed it first evicts the least-recently-used entry. Both a successful
//! [`get`](PredictionCache::get) and any [`insert`](PredictionCache::insert)
//! count as a use.
//!
//! A single [`Mutex`] guards the LRU map together with the hit/miss counters
//! and is only held for the map operation itself. Snapshot I/O
//! ([`save`](PredictionCache::save), [`load`](PredictionCache::load),
//! [`clear`](PredictionCache::clear)) is serialized by a second mutex and
//! never blocks lookups while touching the disk.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::snapshot::{SnapshotEntry, SnapshotError, SnapshotFormat, remove_snapshot};
use crate::{CacheConfig, CacheError};

/// Default capacity, matching the process-wide cache the predictors share.
pub const DEFAULT_MAX_SIZE: usize = 100;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(DEFAULT_MAX_SIZE) {
    Some(n) => n,
    None => panic!("DEFAULT_MAX_SIZE must be non-zero"),
};

/// Cache key: SMILES string + model name.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub struct CacheKey {
    pub smiles: String,
    pub model: String,
}

impl CacheKey {
    pub fn new(smiles: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            smiles: smiles.into(),
            model: model.into(),
        }
    }
}

/// Hit/miss counters. Only [`PredictionCache::clear`] resets them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups served from the cache (0.0 before any lookup).
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }
}

struct Inner<V> {
    entries: LruCache<CacheKey, V>,
    hits: u64,
    misses: u64,
}

/// Thread-safe, optionally persistent LRU cache of `(smiles, model) → V`.
///
/// Share it between predictors by wrapping it in an `Arc`; see
/// [`CachedPredictor`](crate::CachedPredictor).
///
/// `V` is the prediction itself. It must not have an "absent" state of its
/// own: see [`insert`](PredictionCache::insert).
pub struct PredictionCache<V> {
    inner: Mutex<Inner<V>>,
    /// Serializes save/load/clear against each other.
    snapshot_lock: Mutex<()>,
    capacity: NonZeroUsize,
    persist_path: Option<PathBuf>,
}

impl<V: Clone> Default for PredictionCache<V> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<V: Clone> PredictionCache<V> {
    /// Create an in-memory-only cache holding at most `max_size` entries.
    pub fn new(max_size: usize) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(max_size).ok_or(CacheError::ZeroCapacity)?;
        Ok(Self::with_capacity(capacity))
    }

    /// Create an in-memory-only cache with an already validated capacity.
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            snapshot_lock: Mutex::new(()),
            capacity,
            persist_path: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, ()> {
        self.snapshot_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up the cached prediction of `model` for `smiles`.
    ///
    /// A hit marks the entry most-recently-used and counts as a hit; a miss
    /// only bumps the miss counter.
    pub fn get(&self, smiles: &str, model: &str) -> Option<V> {
        let key = CacheKey::new(smiles, model);
        let mut inner = self.lock();
        match inner.entries.get(&key).cloned() {
            Some(value) => {
                inner.hits += 1;
                tracing::trace!(model, smiles, "cache hit");
                Some(value)
            }
            None => {
                inner.misses += 1;
                tracing::trace!(model, smiles, "cache miss");
                None
            }
        }
    }

    /// Store a prediction, overwriting any previous value for the same key.
    ///
    /// The entry becomes most-recently-used. If the key is new and the cache
    /// is full, the least-recently-used entry is evicted first.
    ///
    /// `value` is always stored. Absence is expressed by not inserting, so
    /// `V` itself must not encode "no prediction" (`Option<_>`, a JSON
    /// `null`); such a value would be cached and served as a hit.
    pub fn insert(&self, smiles: &str, model: &str, value: V) {
        let key = CacheKey::new(smiles, model);
        let mut inner = self.lock();
        let replacing = inner.entries.contains(&key);
        tracing::trace!(model, smiles, replacing, "cache insert");
        if let Some((evicted, _)) = inner.entries.push(key, value)
            && !replacing
        {
            tracing::debug!(
                model = evicted.model.as_str(),
                smiles = evicted.smiles.as_str(),
                "cache full, evicted least recently used entry"
            );
        }
    }

    /// Whether an entry exists, without touching recency or counters.
    pub fn contains(&self, smiles: &str, model: &str) -> bool {
        self.lock().entries.contains(&CacheKey::new(smiles, model))
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Whether this cache has a snapshot location.
    pub fn has_persistence(&self) -> bool {
        self.persist_path.is_some()
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Copy of all entries, least-recently-used first.
    fn snapshot_entries(&self) -> Vec<SnapshotEntry<V>> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .rev()
            .map(|(key, value)| SnapshotEntry {
                smiles: key.smiles.clone(),
                model: key.model.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

impl<V: Clone + Serialize + DeserializeOwned> PredictionCache<V> {
    /// Open a persistent cache whose snapshot lives at `path`.
    ///
    /// An existing, non-empty snapshot is loaded as the initial contents. A
    /// snapshot that cannot be read is logged and the cache starts empty.
    pub fn open(max_size: usize, path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let mut cache = Self::new(max_size)?;
        cache.persist_path = Some(path.into());
        // Failures are already logged by load(); an unreadable snapshot means
        // starting empty.
        let _ = cache.load();
        Ok(cache)
    }

    /// Build a cache from runtime configuration: persistent when a snapshot
    /// path is configured, in-memory otherwise.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        match &config.persist_path {
            Some(path) => Self::open(config.max_size, path),
            None => Self::new(config.max_size),
        }
    }

    /// Write every entry to the snapshot location.
    ///
    /// Returns the number of entries written (0 when persistence is
    /// disabled). On failure the in-memory cache is untouched and the error
    /// is logged as well as returned.
    pub fn save(&self) -> Result<usize, SnapshotError> {
        let Some(path) = self.persist_path.as_deref() else {
            return Ok(0);
        };
        let _io = self.lock_snapshot();
        self.save_locked(path)
    }

    fn save_locked(&self, path: &Path) -> Result<usize, SnapshotError> {
        let entries = self.snapshot_entries();
        match SnapshotFormat::for_path(path).write(path, &entries) {
            Ok(()) => {
                tracing::info!(
                    path = %path.display(),
                    entries = entries.len(),
                    "saved prediction cache snapshot"
                );
                Ok(entries.len())
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to save prediction cache snapshot"
                );
                Err(e)
            }
        }
    }

    /// Replace the in-memory entries with the snapshot's contents.
    ///
    /// Returns the number of entries now cached (0 when persistence is
    /// disabled or there is no snapshot yet). A malformed snapshot is logged,
    /// returned as an error, and leaves the current entries in place. When
    /// the snapshot holds more entries than the capacity, the most recently
    /// used ones win. Hit/miss counters are not touched.
    pub fn load(&self) -> Result<usize, SnapshotError> {
        let Some(path) = self.persist_path.as_deref() else {
            return Ok(0);
        };
        let _io = self.lock_snapshot();

        let entries = match SnapshotFormat::for_path(path).read::<V>(path) {
            Ok(Some(entries)) => entries,
            Ok(None) => return Ok(0),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "ignoring unreadable prediction cache snapshot"
                );
                return Err(e);
            }
        };

        let mut restored = LruCache::new(self.capacity);
        for entry in entries {
            restored.push(CacheKey::new(entry.smiles, entry.model), entry.value);
        }
        let loaded = restored.len();
        self.lock().entries = restored;

        tracing::info!(
            path = %path.display(),
            entries = loaded,
            "loaded prediction cache snapshot"
        );
        Ok(loaded)
    }

    /// Drop every entry, reset the counters and delete the snapshot file.
    ///
    /// The current state is saved right before it is discarded, so the
    /// snapshot file exists briefly and is then removed.
    pub fn clear(&self) {
        let _io = self.lock_snapshot();
        if let Some(path) = self.persist_path.as_deref() {
            let _ = self.save_locked(path);
        }

        {
            let mut inner = self.lock();
            inner.entries.clear();
            inner.hits = 0;
            inner.misses = 0;
        }

        if let Some(path) = self.persist_path.as_deref()
            && let Err(e) = remove_snapshot(path)
        {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to remove prediction cache snapshot"
            );
        }
    }
}

impl<V> fmt::Debug for PredictionCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("PredictionCache")
            .field("entries", &inner.entries.len())
            .field("capacity", &self.capacity)
            .field("hits", &inner.hits)
            .field("misses", &inner.misses)
            .field("persist_path", &self.persist_path)
            .finish()
    }
}
