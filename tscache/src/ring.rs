//! Per-series chunk ring.
//!
//! A [`ChunkRing`] holds the last `num_chunks` non-empty time buckets of one
//! series in a fixed-capacity circular array of chunk slots. It decides which
//! chunk a sample belongs to, rotates to a new chunk when a sample's bucket
//! moves past the current one, and answers range queries by locating the
//! first and last slot that can hold matching samples.
//!
//! # Design
//!
//! - Bucket: `t0 = ts - ts % span_seconds`
//! - Slots read in time order start at `current_pos + 1` (wrapping) and end
//!   at `current_pos`; their `t0` values strictly increase
//! - A ring below capacity appends; a full ring overwrites the slot after
//!   `current_pos` (eviction by overwrite)
//! - One rotation per push, even across many empty buckets: the ring tracks
//!   the last N non-empty buckets, not the last N spans
//! - Late samples whose bucket precedes the current one are rejected
//!
//! # Thread Safety
//!
//! Reads (`get`, `get_info`, `flag`) share the ring lock, `set_flag` takes it
//! exclusively. [`ChunkRing::push`] expects **at most one concurrent writer
//! per ring**; serializing writers is the caller's job (see
//! [`SeriesRegistry`](crate::registry::SeriesRegistry)). Builds with
//! `debug_assertions` panic when two pushes overlap on one ring.
//!
//! Slots hold `Arc<Chunk>`. Overwriting a slot only drops the ring's handle,
//! so an iterator still reading an evicted chunk keeps it alive.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicBool, Ordering};

use crate::chunk::{Chunk, ChunkBounds};
use crate::config::CacheConfig;
use crate::error::PushError;
use crate::iter::RangeIter;
use crate::sink::ChunkSink;

/// What a successful push did to the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The sample went into the current chunk.
    Appended,
    /// The ring was empty; its first chunk was created.
    Started,
    /// The ring rotated to a new chunk.
    Rotated {
        /// Whether an old chunk was overwritten because the ring was full.
        evicted: bool,
    },
}

/// Fixed-capacity circular buffer of chunks for one series.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tscache::config::CacheConfig;
/// use tscache::ring::ChunkRing;
/// use tscache::sink::NullSink;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ring = ChunkRing::new("cpu.idle", CacheConfig::new(60, 3)?, Arc::new(NullSink));
///
/// ring.push(0, 1.0)?;
/// ring.push(30, 2.0)?;
/// ring.push(65, 3.0)?;
///
/// let samples: Vec<_> = ring.get(0, 120).collect();
/// assert_eq!(samples, vec![(0, 1.0), (30, 2.0), (65, 3.0)]);
/// assert_eq!(ring.get_info(), (0, 65));
/// # Ok(())
/// # }
/// ```
pub struct ChunkRing {
    series_id: Arc<str>,
    config: CacheConfig,
    sink: Arc<dyn ChunkSink>,
    state: RwLock<RingState>,
    #[cfg(debug_assertions)]
    writer: AtomicBool,
}

#[derive(Debug, Default)]
struct RingState {
    chunks: Vec<Arc<Chunk>>,
    current_pos: usize,
    flag: u32,
}

impl RingState {
    fn current(&self) -> Option<&Arc<Chunk>> {
        self.chunks.get(self.current_pos)
    }

    /// Physical index of the oldest slot. Requires a non-empty ring.
    ///
    /// Below capacity `current_pos == len - 1`, so this is slot 0.
    fn oldest_pos(&self) -> usize {
        (self.current_pos + 1) % self.chunks.len()
    }

    /// Slot at `offset` in time order, 0 being the oldest.
    fn slot(&self, offset: usize) -> &Arc<Chunk> {
        &self.chunks[(self.oldest_pos() + offset) % self.chunks.len()]
    }
}

impl ChunkRing {
    /// Creates an empty ring for `series_id`.
    ///
    /// Closed chunks are handed to `sink` on rotation.
    pub fn new(series_id: impl Into<Arc<str>>, config: CacheConfig, sink: Arc<dyn ChunkSink>) -> Self {
        Self {
            series_id: series_id.into(),
            config,
            sink,
            state: RwLock::new(RingState {
                chunks: Vec::with_capacity(config.num_chunks()),
                ..RingState::default()
            }),
            #[cfg(debug_assertions)]
            writer: AtomicBool::new(false),
        }
    }

    /// Pushes one sample into the chunk for its bucket.
    ///
    /// Same bucket as the current chunk appends to it. A newer bucket closes
    /// the current chunk, hands it to the sink, and starts a new chunk in the
    /// next slot. An older bucket is rejected without touching the ring.
    ///
    /// # Errors
    ///
    /// - [`PushError::StaleSample`] if the sample's bucket precedes the
    ///   current chunk's bucket.
    /// - [`PushError::ChunkClosed`] if the current chunk was already closed
    ///   (after [`ChunkRing::close`], or a writer-contract violation).
    ///
    /// # Panics
    ///
    /// With `debug_assertions`, panics if another push or close is running on
    /// this ring at the same time.
    pub fn push(&self, timestamp: u32, value: f64) -> Result<PushOutcome, PushError> {
        #[cfg(debug_assertions)]
        let _writer = WriterGuard::enter(&self.writer);

        let t0 = self.config.bucket_start(timestamp);

        {
            let state = self.read_state();
            if let Some(current) = state.current() {
                let current_t0 = current.t0();
                if t0 == current_t0 {
                    current.push(timestamp, value)?;
                    return Ok(PushOutcome::Appended);
                }
                if t0 < current_t0 {
                    return Err(PushError::StaleSample {
                        timestamp,
                        bucket: t0,
                        current_bucket: current_t0,
                    });
                }
            }
        }

        // New bucket. The chunk gets its first sample before any reader can
        // see it, so the exclusive section is only the slot install.
        let chunk = Arc::new(Chunk::new(t0));
        chunk.push(timestamp, value)?;

        let (outcome, closed) = {
            let mut state = self.write_state();
            self.install(&mut state, chunk)
        };

        if let Some(closed) = closed {
            self.sink.accept(&self.series_id, closed);
        }
        Ok(outcome)
    }

    /// Rotates to `chunk`, returning the previous chunk if this closed it.
    fn install(&self, state: &mut RingState, chunk: Arc<Chunk>) -> (PushOutcome, Option<Arc<Chunk>>) {
        let Some(current) = state.current().cloned() else {
            state.chunks.push(chunk);
            state.current_pos = 0;
            return (PushOutcome::Started, None);
        };

        let closed = if current.is_closed() {
            None
        } else {
            current.finish_sync();
            Some(current)
        };

        let pos = (state.current_pos + 1) % self.config.num_chunks();
        let evicted = if state.chunks.len() < self.config.num_chunks() {
            debug_assert_eq!(pos, state.chunks.len());
            state.chunks.push(chunk);
            false
        } else {
            state.chunks[pos] = chunk;
            true
        };
        state.current_pos = pos;

        (PushOutcome::Rotated { evicted }, closed)
    }

    /// Returns the retained samples with `from <= ts < to`, oldest first.
    ///
    /// The result is empty, never an error, when:
    ///
    /// - `from >= to`
    /// - the ring holds no chunk
    /// - `from` is at or past the end of the current bucket (not written yet)
    /// - `to` is at or before the oldest retained sample (already evicted;
    ///   fall back to the durable store)
    /// - the whole range falls between two retained buckets
    ///
    /// Chunk handles are taken under the ring lock; the returned iterator
    /// can be drained after it is released.
    ///
    /// `to` is exclusive, so a sample stamped `u32::MAX` is stored and shows
    /// up in [`ChunkRing::get_info`] and in closed chunks handed to the sink,
    /// but no range query returns it.
    pub fn get(&self, from: u32, to: u32) -> RangeIter {
        if from >= to {
            return RangeIter::empty();
        }

        let state = self.read_state();
        let len = state.chunks.len();
        let Some(newest) = state.current() else {
            return RangeIter::empty();
        };

        if u64::from(from) >= self.config.bucket_end(newest.t0()) {
            return RangeIter::empty();
        }
        if to <= state.slot(0).first_ts() {
            return RangeIter::empty();
        }

        // First slot whose bucket ends after `from`. The current slot always
        // qualifies, so the scan stops at `len - 1` at the latest.
        let mut start = 0;
        while start < len - 1 && u64::from(from) >= self.config.bucket_end(state.slot(start).t0()) {
            start += 1;
        }

        // Last slot whose bucket starts before `to`. The oldest slot starts
        // at or before its first sample, which is before `to`.
        let mut end = len - 1;
        while end > 0 && to <= state.slot(end).t0() {
            end -= 1;
        }

        if start > end {
            return RangeIter::empty();
        }

        let chunks = (start..=end).map(|offset| state.slot(offset).iter()).collect();
        RangeIter::new(chunks, from, to)
    }

    /// Returns `(oldest, newest)` retained timestamps, or `(0, 0)` when empty.
    ///
    /// Oldest is the first sample of the slot after the current one
    /// (wrapping); newest is the most recent sample of the current chunk.
    pub fn get_info(&self) -> (u32, u32) {
        let state = self.read_state();
        let Some(newest) = state.current() else {
            return (0, 0);
        };
        (state.slot(0).first_ts(), newest.last_ts())
    }

    /// Returns the opaque status word.
    pub fn flag(&self) -> u32 {
        self.read_state().flag
    }

    /// Replaces the opaque status word.
    pub fn set_flag(&self, flag: u32) {
        self.write_state().flag = flag;
    }

    /// Closes the current chunk and hands it to the sink.
    ///
    /// Used when the series stops being tracked, so the last open chunk still
    /// reaches persistence. Later pushes into the same bucket fail with
    /// [`PushError::ChunkClosed`]; pushes into a newer bucket rotate as usual.
    /// Returns `false` if there was no open chunk.
    ///
    /// # Panics
    ///
    /// With `debug_assertions`, panics if a push is running on this ring at
    /// the same time.
    pub fn close(&self) -> bool {
        #[cfg(debug_assertions)]
        let _writer = WriterGuard::enter(&self.writer);

        let current = {
            let state = self.read_state();
            match state.current() {
                Some(current) if !current.is_closed() => Arc::clone(current),
                _ => return false,
            }
        };

        current.finish_sync();
        self.sink.accept(&self.series_id, current);
        true
    }

    /// Series this ring belongs to.
    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    /// Configuration the ring was built with.
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.read_state().chunks.len()
    }

    /// Whether no sample was ever pushed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of slots.
    pub fn capacity(&self) -> usize {
        self.config.num_chunks()
    }

    /// Physical index of the current slot.
    pub fn current_pos(&self) -> usize {
        self.read_state().current_pos
    }

    /// Bounds of every retained chunk, oldest first.
    pub fn chunk_bounds(&self) -> Vec<ChunkBounds> {
        let state = self.read_state();
        (0..state.chunks.len()).map(|offset| state.slot(offset).bounds()).collect()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ChunkRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read_state();
        f.debug_struct("ChunkRing")
            .field("series_id", &self.series_id)
            .field("config", &self.config)
            .field("len", &state.chunks.len())
            .field("current_pos", &state.current_pos)
            .field("flag", &state.flag)
            .finish_non_exhaustive()
    }
}

/// Non-reentrant marker held for the duration of one write.
#[cfg(debug_assertions)]
struct WriterGuard<'a>(&'a AtomicBool);

#[cfg(debug_assertions)]
impl<'a> WriterGuard<'a> {
    fn enter(active: &'a AtomicBool) -> Self {
        assert!(
            !active.swap(true, Ordering::Acquire),
            "concurrent writers on one chunk ring"
        );
        Self(active)
    }
}

#[cfg(debug_assertions)]
impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
