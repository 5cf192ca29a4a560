//! Series registry: one chunk ring per series id.
//!
//! The registry is the producer/consumer entry point of the cache. It creates
//! rings lazily on first push, serializes writers per series so each ring
//! sees at most one concurrent [`ChunkRing::push`], and routes queries to the
//! right ring. Rejected samples are counted and logged here; the ring itself
//! stays silent.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tscache::config::CacheConfig;
//! use tscache::registry::SeriesRegistry;
//! use tscache::sink::ChunkSlots;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let slots = Arc::new(ChunkSlots::new());
//! let registry = SeriesRegistry::new(CacheConfig::new(60, 3)?, slots.clone());
//!
//! registry.push("cpu.idle{host=web1}", 0, 97.5)?;
//! registry.push("cpu.idle{host=web1}", 65, 96.0)?;
//!
//! let samples: Vec<_> = registry.query("cpu.idle{host=web1}", 0, 120).collect();
//! assert_eq!(samples, vec![(0, 97.5), (65, 96.0)]);
//! assert_eq!(slots.pending(), 1); // the t0=0 chunk was closed on rotation
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::{PushError, Result};
use crate::iter::RangeIter;
use crate::ring::{ChunkRing, PushOutcome};
use crate::sink::ChunkSink;

/// Counters of registry activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Series currently tracked.
    pub series: usize,
    /// Push calls received, accepted or not.
    pub pushes: u64,
    /// Samples dropped because their bucket was older than the current one.
    pub stale_samples: u64,
    /// Pushes rejected because the current chunk was already closed.
    pub closed_chunk_rejections: u64,
    /// Chunk rotations.
    pub rotations: u64,
    /// Rotations that overwrote an old chunk.
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    pushes: AtomicU64,
    stale_samples: AtomicU64,
    closed_chunk_rejections: AtomicU64,
    rotations: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug)]
struct SeriesEntry {
    ring: Arc<ChunkRing>,
    /// Serializes writers of this series.
    writer: Mutex<()>,
}

/// Maps series ids to their chunk rings.
///
/// # Thread Safety
///
/// All methods take `&self` and may be called from any number of threads.
/// Pushes to the same series are serialized; pushes to different series and
/// all reads proceed in parallel.
pub struct SeriesRegistry {
    config: CacheConfig,
    sink: Arc<dyn ChunkSink>,
    series: RwLock<HashMap<String, Arc<SeriesEntry>>>,
    counters: Counters,
}

impl SeriesRegistry {
    /// Creates an empty registry. Every ring is built from `config` and hands
    /// closed chunks to `sink`.
    pub fn new(config: CacheConfig, sink: Arc<dyn ChunkSink>) -> Self {
        Self {
            config,
            sink,
            series: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Returns the ring for `series_id`, creating it if needed.
    ///
    /// The returned ring's [`ChunkRing::push`] is not serialized against
    /// [`SeriesRegistry::push`]; write through the registry unless the caller
    /// already guarantees a single writer.
    pub fn get_or_create(&self, series_id: &str) -> Arc<ChunkRing> {
        Arc::clone(&self.entry_or_create(series_id).ring)
    }

    /// Returns the ring for `series_id`, if tracked.
    pub fn ring(&self, series_id: &str) -> Option<Arc<ChunkRing>> {
        self.read_series().get(series_id).map(|entry| Arc::clone(&entry.ring))
    }

    /// Pushes one sample into the ring of `series_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::StaleSample`] for late samples and
    /// [`PushError::ChunkClosed`] when the current chunk was already closed,
    /// both wrapped in [`CacheError::Push`](crate::error::CacheError::Push).
    pub fn push(&self, series_id: &str, timestamp: u32, value: f64) -> Result<PushOutcome> {
        loop {
            let entry = self.entry_or_create(series_id);
            let _writer = entry.writer.lock().unwrap_or_else(PoisonError::into_inner);
            // A concurrent remove may have unlinked and closed this ring while
            // we waited; writing into it would lose the sample.
            if self.is_linked(series_id, &entry) {
                return self.push_locked(&entry.ring, series_id, timestamp, value);
            }
        }
    }

    /// Pushes into `ring` and records the outcome. Caller holds the writer lock.
    fn push_locked(&self, ring: &ChunkRing, series_id: &str, timestamp: u32, value: f64) -> Result<PushOutcome> {
        self.counters.pushes.fetch_add(1, Ordering::Relaxed);
        match ring.push(timestamp, value) {
            Ok(outcome) => {
                if let PushOutcome::Rotated { evicted } = outcome {
                    self.counters.rotations.fetch_add(1, Ordering::Relaxed);
                    if evicted {
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(outcome)
            }
            Err(err @ PushError::StaleSample { .. }) => {
                self.counters.stale_samples.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(series_id, timestamp, "dropping stale sample: {err}");
                Err(err.into())
            }
            Err(err @ PushError::ChunkClosed(_)) => {
                self.counters.closed_chunk_rejections.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(series_id, timestamp, "rejected sample: {err}");
                Err(err.into())
            }
        }
    }

    /// Returns the retained samples of `series_id` in `[from, to)`.
    ///
    /// Unknown series give an empty result. See [`ChunkRing::get`] for the
    /// `u32::MAX` limit.
    pub fn query(&self, series_id: &str, from: u32, to: u32) -> RangeIter {
        match self.ring(series_id) {
            Some(ring) => ring.get(from, to),
            None => RangeIter::empty(),
        }
    }

    /// Returns `(oldest, newest)` retained timestamps of `series_id`.
    pub fn info(&self, series_id: &str) -> Option<(u32, u32)> {
        self.ring(series_id).map(|ring| ring.get_info())
    }

    /// Returns the status word of `series_id`.
    pub fn flag(&self, series_id: &str) -> Option<u32> {
        self.ring(series_id).map(|ring| ring.flag())
    }

    /// Sets the status word of `series_id`. Returns `false` if untracked.
    pub fn set_flag(&self, series_id: &str, flag: u32) -> bool {
        match self.ring(series_id) {
            Some(ring) => {
                ring.set_flag(flag);
                true
            }
            None => false,
        }
    }

    /// Stops tracking `series_id`.
    ///
    /// The open chunk is closed and handed to the sink first, so no accepted
    /// sample is lost to persistence. Returns `false` if untracked.
    pub fn remove(&self, series_id: &str) -> bool {
        let Some(entry) = self.write_series().remove(series_id) else {
            return false;
        };

        let _writer = entry.writer.lock().unwrap_or_else(PoisonError::into_inner);
        entry.ring.close();
        tracing::info!(series_id, "series removed");
        true
    }

    /// Tracked series ids, sorted.
    pub fn series_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_series().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of tracked series.
    pub fn len(&self) -> usize {
        self.read_series().len()
    }

    /// Whether no series is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configuration shared by every ring.
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            series: self.len(),
            pushes: self.counters.pushes.load(Ordering::Relaxed),
            stale_samples: self.counters.stale_samples.load(Ordering::Relaxed),
            closed_chunk_rejections: self.counters.closed_chunk_rejections.load(Ordering::Relaxed),
            rotations: self.counters.rotations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    fn is_linked(&self, series_id: &str, entry: &Arc<SeriesEntry>) -> bool {
        self.read_series()
            .get(series_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    fn entry_or_create(&self, series_id: &str) -> Arc<SeriesEntry> {
        if let Some(entry) = self.read_series().get(series_id) {
            return Arc::clone(entry);
        }

        let mut series = self.write_series();
        // Another thread may have created it between the two locks.
        if let Some(entry) = series.get(series_id) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(SeriesEntry {
            ring: Arc::new(ChunkRing::new(series_id, self.config, Arc::clone(&self.sink))),
            writer: Mutex::new(()),
        });
        series.insert(series_id.to_string(), Arc::clone(&entry));
        tracing::info!(series_id, "series created");
        entry
    }

    fn read_series(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SeriesEntry>>> {
        self.series.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_series(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SeriesEntry>>> {
        self.series.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SeriesRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesRegistry")
            .field("config", &self.config)
            .field("series", &self.len())
            .finish_non_exhaustive()
    }
}
