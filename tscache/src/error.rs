//! Error types for the tscache sample cache.
//!
//! Empty query results are not errors and never appear here. Everything in
//! this module is returned to the immediate caller; the cache itself never
//! retries or logs on the error path.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all tscache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Error pushing a sample into a series ring.
    #[error("push error: {0}")]
    Push(#[from] PushError),

    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by a [`Chunk`](crate::chunk::Chunk).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// The chunk was already finalized and accepts no further samples.
    ///
    /// Seeing this means a write raced a rotation upstream of the cache.
    #[error("push to closed chunk (t0 {t0})")]
    Closed {
        /// Bucket start of the closed chunk.
        t0: u32,
    },
}

/// Errors raised by [`ChunkRing::push`](crate::ring::ChunkRing::push).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// The current chunk is closed.
    #[error(transparent)]
    ChunkClosed(#[from] ChunkError),

    /// The sample's bucket is older than the ring's current bucket.
    ///
    /// Late data is dropped, not buffered. Callers may count it but need not
    /// act on it.
    #[error("sample @{timestamp} falls in bucket {bucket}, older than current bucket {current_bucket}")]
    StaleSample {
        /// Timestamp of the rejected sample.
        timestamp: u32,
        /// Bucket start the sample maps to.
        bucket: u32,
        /// Bucket start of the ring's current chunk.
        current_bucket: u32,
    },
}

impl PushError {
    /// Returns `true` for late-arriving data rejected by bucket.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleSample { .. })
    }
}

/// Errors raised while building or loading a [`CacheConfig`](crate::config::CacheConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Bucket span must be at least one second.
    #[error("span_seconds must be > 0")]
    ZeroSpan,

    /// A ring needs at least one slot.
    #[error("num_chunks must be > 0")]
    ZeroChunks,

    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`CacheConfig`](crate::config::CacheConfig).
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, CacheError>`.
pub type Result<T> = std::result::Result<T, CacheError>;
