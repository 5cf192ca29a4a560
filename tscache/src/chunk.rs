//! A single time bucket of samples for one series.
//!
//! A [`Chunk`] is created by the ring when a new bucket is needed, appended to
//! by exactly one writer while open, closed once on rotation, and read-only
//! from then on. Chunks are shared through `Arc` so that a chunk evicted from
//! its ring slot stays alive for as long as an iterator still reads it.
//!
//! Samples are kept in the compact byte format of [`crate::encoding`]. The
//! buffer sits behind a short-lived per-chunk lock: the writer holds it for
//! one append, readers hold it for one decode step.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::encoding::SampleEncoder;
use crate::error::ChunkError;
use crate::iter::ChunkIter;

/// Storage for one series within one bucket.
///
/// # Thread Safety
///
/// `push` and `finish_sync` are meant for the series' single writer. Any
/// number of readers may call the accessors or [`Chunk::iter`] concurrently;
/// an iterator created while the chunk is open yields the prefix that was
/// present at creation time.
#[derive(Debug)]
pub struct Chunk {
    t0: u32,
    data: RwLock<ChunkData>,
}

#[derive(Debug)]
pub(crate) struct ChunkData {
    pub(crate) buf: Vec<u8>,
    pub(crate) count: usize,
    encoder: SampleEncoder,
    first_ts: u32,
    last_ts: u32,
    closed: bool,
}

/// Bounds and state of a chunk, as read under one lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    /// Bucket start.
    pub t0: u32,
    /// Timestamp of the first sample, or 0 when empty.
    pub first_ts: u32,
    /// Timestamp of the most recent sample, or 0 when empty.
    pub last_ts: u32,
    /// Number of samples stored.
    pub len: usize,
    /// Whether the chunk has been finalized.
    pub closed: bool,
}

impl Chunk {
    /// Creates an empty, open chunk for the bucket starting at `t0`.
    pub fn new(t0: u32) -> Self {
        Self {
            t0,
            data: RwLock::new(ChunkData {
                buf: Vec::new(),
                count: 0,
                encoder: SampleEncoder::new(t0),
                first_ts: 0,
                last_ts: 0,
                closed: false,
            }),
        }
    }

    /// Appends a sample.
    ///
    /// Timestamps are stored exactly as given and in push order; routing only
    /// this bucket's timestamps here is the ring's job.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Closed`] once [`Chunk::finish_sync`] has run.
    pub fn push(&self, timestamp: u32, value: f64) -> Result<(), ChunkError> {
        let mut data = self.write();
        if data.closed {
            return Err(ChunkError::Closed { t0: self.t0 });
        }

        let ChunkData {
            buf,
            encoder,
            count,
            first_ts,
            last_ts,
            ..
        } = &mut *data;
        encoder.encode(timestamp, value, buf);

        if *count == 0 {
            *first_ts = timestamp;
        }
        *count += 1;
        *last_ts = timestamp;
        Ok(())
    }

    /// Closes the chunk. No further pushes are accepted.
    ///
    /// Callers close a chunk at most once, when rotating away from it.
    pub fn finish_sync(&self) {
        let mut data = self.write();
        debug_assert!(!data.closed, "chunk t0={} finished twice", self.t0);
        data.closed = true;
        data.buf.shrink_to_fit();
    }

    /// Returns an iterator over the samples present now, in append order.
    ///
    /// Each call starts a fresh pass; on a closed chunk every call yields the
    /// same sequence.
    pub fn iter(self: &Arc<Self>) -> ChunkIter {
        let (end, count) = {
            let data = self.read();
            (data.buf.len(), data.count)
        };
        ChunkIter::new(Arc::clone(self), end, count)
    }

    /// Bucket start timestamp.
    pub fn t0(&self) -> u32 {
        self.t0
    }

    /// Timestamp of the first sample, or 0 when empty.
    pub fn first_ts(&self) -> u32 {
        self.read().first_ts
    }

    /// Timestamp of the most recently pushed sample, or 0 when empty.
    pub fn last_ts(&self) -> u32 {
        self.read().last_ts
    }

    /// Whether [`Chunk::finish_sync`] has been called.
    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    /// Number of samples stored.
    pub fn len(&self) -> usize {
        self.read().count
    }

    /// Whether no sample has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the encoded sample data in bytes.
    pub fn encoded_len(&self) -> usize {
        self.read().buf.len()
    }

    /// Reads all bounds under a single lock acquisition.
    pub fn bounds(&self) -> ChunkBounds {
        let data = self.read();
        ChunkBounds {
            t0: self.t0,
            first_ts: data.first_ts,
            last_ts: data.last_ts,
            len: data.count,
            closed: data.closed,
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ChunkData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChunkData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}
