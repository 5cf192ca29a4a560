//! Cache configuration.
//!
//! A [`CacheConfig`] fixes the bucket width and ring capacity for every ring
//! built from it. Both values are immutable for the lifetime of a ring;
//! changing them means building new rings (existing data is not re-bucketed).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default bucket width: ten minutes.
pub const DEFAULT_SPAN_SECONDS: u32 = 600;

/// Default ring capacity: six non-empty buckets.
pub const DEFAULT_NUM_CHUNKS: usize = 6;

/// Bucket width and ring capacity shared by all rings of a cache.
///
/// Only [`CacheConfig::new`], [`CacheConfig::load`] and `Default` build one,
/// so every value in circulation has a non-zero span and capacity.
///
/// # Example
///
/// ```rust
/// use tscache::config::CacheConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = CacheConfig::new(60, 3)?;
/// assert_eq!(config.bucket_start(125), 120);
/// # Ok(())
/// # }
/// ```
///
/// Fields cannot be set directly, so a zero span cannot reach a ring:
///
/// ```compile_fail
/// use tscache::config::CacheConfig;
///
/// let config = CacheConfig { span_seconds: 0, num_chunks: 3 };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    span_seconds: u32,
    num_chunks: usize,
}

/// On-disk shape of a [`CacheConfig`], validated before use.
#[derive(Deserialize)]
struct ConfigFile {
    span_seconds: u32,
    num_chunks: usize,
}

impl CacheConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either value is zero.
    pub fn new(span_seconds: u32, num_chunks: usize) -> Result<Self> {
        let config = Self {
            span_seconds,
            num_chunks,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.span_seconds == 0 {
            return Err(ConfigError::ZeroSpan.into());
        }
        if self.num_chunks == 0 {
            return Err(ConfigError::ZeroChunks.into());
        }
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// ```json
    /// { "span_seconds": 600, "num_chunks": 6 }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: ConfigFile = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::new(file.span_seconds, file.num_chunks)
    }

    /// Returns a copy with the given overrides applied and re-validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an override is zero.
    pub fn with_overrides(self, span_seconds: Option<u32>, num_chunks: Option<usize>) -> Result<Self> {
        Self::new(
            span_seconds.unwrap_or(self.span_seconds),
            num_chunks.unwrap_or(self.num_chunks),
        )
    }

    /// Width of one chunk bucket, in seconds.
    pub fn span_seconds(&self) -> u32 {
        self.span_seconds
    }

    /// Number of chunk slots per series ring.
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Aligns a timestamp down to the start of its bucket.
    #[inline]
    pub fn bucket_start(&self, timestamp: u32) -> u32 {
        timestamp - timestamp % self.span_seconds
    }

    /// Exclusive end of the bucket starting at `t0`, widened so it cannot
    /// overflow near `u32::MAX`.
    #[inline]
    pub fn bucket_end(&self, t0: u32) -> u64 {
        u64::from(t0) + u64::from(self.span_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            span_seconds: DEFAULT_SPAN_SECONDS,
            num_chunks: DEFAULT_NUM_CHUNKS,
        }
    }
}
