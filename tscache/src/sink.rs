//! Downstream handoff for closed chunks.
//!
//! When a ring rotates away from a chunk it closes the chunk and calls
//! [`ChunkSink::accept`] with the series id. The call is fire-and-forget: the
//! ring ignores the outcome and must never block on persistence, so
//! implementations only enqueue.
//!
//! Three sinks ship with the crate:
//!
//! - [`NullSink`] drops everything.
//! - [`ChunkSlots`] keeps per-series queues that a persistence worker drains.
//! - [`ChannelSink`] forwards chunks to another thread over a channel.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use crate::chunk::Chunk;

/// Receiver of chunks that have just been closed.
pub trait ChunkSink: Send + Sync {
    /// Takes ownership of a reference to a closed chunk of `series_id`.
    ///
    /// Failure handling (retry, drop) is the sink's business.
    fn accept(&self, series_id: &str, chunk: Arc<Chunk>);
}

/// Sink that discards closed chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ChunkSink for NullSink {
    fn accept(&self, _series_id: &str, _chunk: Arc<Chunk>) {}
}

/// Per-series queues of closed chunks awaiting persistence.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tscache::chunk::Chunk;
/// use tscache::sink::{ChunkSink, ChunkSlots};
///
/// let slots = ChunkSlots::new();
/// let chunk = Arc::new(Chunk::new(0));
/// chunk.finish_sync();
/// slots.accept("cpu.idle", chunk);
///
/// assert_eq!(slots.pending(), 1);
/// assert_eq!(slots.pop_all("cpu.idle").len(), 1);
/// assert_eq!(slots.pending(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ChunkSlots {
    slots: Mutex<HashMap<String, Vec<Arc<Chunk>>>>,
}

impl ChunkSlots {
    /// Creates an empty slot table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every queued chunk of one series, oldest first.
    pub fn pop_all(&self, series_id: &str) -> Vec<Arc<Chunk>> {
        self.lock().remove(series_id).unwrap_or_default()
    }

    /// Removes and returns every queued chunk of every series.
    pub fn drain(&self) -> Vec<(String, Vec<Arc<Chunk>>)> {
        self.lock().drain().collect()
    }

    /// Total number of queued chunks across all series.
    pub fn pending(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Series ids with at least one queued chunk.
    pub fn series_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Arc<Chunk>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChunkSink for ChunkSlots {
    fn accept(&self, series_id: &str, chunk: Arc<Chunk>) {
        self.lock().entry(series_id.to_string()).or_default().push(chunk);
    }
}

/// A closed chunk in flight to a [`ChannelSink`] receiver.
#[derive(Debug)]
pub struct ClosedChunk {
    /// Series the chunk belongs to.
    pub series_id: String,
    /// The closed chunk.
    pub chunk: Arc<Chunk>,
}

/// Sink forwarding closed chunks over an unbounded channel.
///
/// Sending never blocks. Once the receiver is dropped, chunks are discarded.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<ClosedChunk>,
}

impl ChannelSink {
    /// Creates a sink and the receiving end a persistence thread reads from.
    pub fn new() -> (Self, Receiver<ClosedChunk>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ChunkSink for ChannelSink {
    fn accept(&self, series_id: &str, chunk: Arc<Chunk>) {
        // A dropped receiver means nobody persists any more; losing the chunk
        // is acceptable for a cache.
        let _ = self.tx.send(ClosedChunk {
            series_id: series_id.to_string(),
            chunk,
        });
    }
}
