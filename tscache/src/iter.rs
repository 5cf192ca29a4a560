//! Read-side iterators over chunk samples.
//!
//! - [`ChunkIter`] walks one chunk's samples in append order. It owns an
//!   `Arc` to the chunk, so it can be drained after the ring lock is released
//!   and after the chunk has been evicted from its slot.
//! - [`RangeIter`] concatenates chunk iterators oldest to newest and keeps
//!   only samples inside a half-open `[from, to)` range. It is what
//!   [`ChunkRing::get`](crate::ring::ChunkRing::get) returns.
//!
//! Both are forward-only. Re-scanning a chunk means calling
//! [`Chunk::iter`](crate::chunk::Chunk::iter) again.

use std::sync::Arc;
use std::vec;

use crate::chunk::Chunk;
use crate::encoding::SampleDecoder;

/// Cursor over the samples a chunk held when the cursor was created.
#[derive(Debug)]
pub struct ChunkIter {
    chunk: Arc<Chunk>,
    decoder: SampleDecoder,
    offset: usize,
    end: usize,
    remaining: usize,
}

impl ChunkIter {
    pub(crate) fn new(chunk: Arc<Chunk>, end: usize, count: usize) -> Self {
        let decoder = SampleDecoder::new(chunk.t0());
        Self {
            chunk,
            decoder,
            offset: 0,
            end,
            remaining: count,
        }
    }

    /// The chunk this iterator reads.
    pub fn chunk(&self) -> &Arc<Chunk> {
        &self.chunk
    }
}

impl Iterator for ChunkIter {
    type Item = (u32, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let data = self.chunk.read();
        // The buffer only grows while open and never changes once closed, so
        // the captured prefix is always still there.
        let decoded = self.decoder.decode(&data.buf[self.offset..self.end]);
        drop(data);

        match decoded {
            Some((sample, used)) => {
                self.offset += used;
                self.remaining -= 1;
                Some(sample)
            }
            None => {
                self.remaining = 0;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Merged cursor over several chunks, bounded to `[from, to)`.
///
/// Chunks are consumed fully one after the other in the order given, which
/// the ring computes oldest to newest.
#[derive(Debug)]
pub struct RangeIter {
    chunks: vec::IntoIter<ChunkIter>,
    current: Option<ChunkIter>,
    from: u32,
    to: u32,
}

impl RangeIter {
    /// Creates a merged iterator over `chunks`, keeping samples with
    /// `from <= ts < to`.
    pub fn new(chunks: Vec<ChunkIter>, from: u32, to: u32) -> Self {
        let mut chunks = chunks.into_iter();
        let current = chunks.next();
        Self {
            chunks,
            current,
            from,
            to,
        }
    }

    /// The empty result.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, 0)
    }

    /// Number of chunks not yet fully consumed.
    pub fn chunks_remaining(&self) -> usize {
        self.chunks.len() + usize::from(self.current.is_some())
    }

    /// Collects all remaining samples into a vector.
    pub fn collect_all(self) -> Vec<(u32, f64)> {
        self.collect()
    }
}

impl Iterator for RangeIter {
    type Item = (u32, f64);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(iter) = self.current.as_mut() {
            for (ts, value) in iter.by_ref() {
                if ts >= self.from && ts < self.to {
                    return Some((ts, value));
                }
            }
            self.current = self.chunks.next();
        }
        None
    }
}
