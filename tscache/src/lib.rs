//! # tscache
//!
//! In-process cache for the recent history of time series.
//!
//! tscache absorbs a continuous stream of `(timestamp, value)` samples per
//! series and answers "all samples between `from` and `to`" for the most
//! recent buckets, without touching a database on the write path. It is the
//! hot-path layer in front of durable storage: chunks that fall out of the
//! active bucket are handed to a sink, and queries that reach past the cached
//! window are expected to fall back to the durable store.
//!
//! ## Key Properties
//!
//! - Fixed memory bound per series: at most `num_chunks` buckets are retained
//! - O(1) writes; late samples from an older bucket are dropped, not buffered
//! - Range queries scan at most `num_chunks` slots, no binary search
//! - Readers never block on persistence and can drain results after eviction
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tscache::{CacheConfig, ChunkSlots, SeriesRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 60 second buckets, 3 buckets per series
//! let config = CacheConfig::new(60, 3)?;
//! let slots = Arc::new(ChunkSlots::new());
//! let cache = SeriesRegistry::new(config, slots.clone());
//!
//! cache.push("mem.used", 0, 1.0)?;
//! cache.push("mem.used", 30, 2.0)?;
//! cache.push("mem.used", 65, 3.0)?;
//! cache.push("mem.used", 190, 4.0)?;
//! cache.push("mem.used", 250, 5.0)?; // evicts the t0=0 bucket
//!
//! assert_eq!(cache.info("mem.used"), Some((65, 250)));
//! assert_eq!(cache.query("mem.used", 0, 50).count(), 0);
//!
//! for (timestamp, value) in cache.query("mem.used", 60, 300) {
//!     println!("{timestamp}: {value}");
//! }
//!
//! // Closed chunks wait here for a persistence worker.
//! assert_eq!(slots.pop_all("mem.used").len(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`SeriesRegistry`]: series id to ring, per-series writer serialization
//! - [`ChunkRing`]: fixed-capacity circular array of chunks for one series
//! - [`Chunk`]: one bucket of samples, open until rotation, then read-only
//! - [`RangeIter`]: merged, range-bounded iterator returned by queries
//! - [`ChunkSink`]: receiver of closed chunks
//!
//! ## Modules
//!
//! - [`registry`]: series tracking, producer and consumer entry points
//! - [`ring`]: chunk ring rotation and range lookup
//! - [`chunk`]: per-bucket sample storage
//! - [`encoding`]: compact append-only sample format
//! - [`iter`]: chunk and merged iterators
//! - [`sink`]: closed-chunk handoff
//! - [`config`]: bucket span and ring capacity
//! - [`error`]: error types

pub mod chunk;
pub mod config;
pub mod encoding;
pub mod error;
pub mod iter;
pub mod registry;
pub mod ring;
pub mod sink;

// Re-export primary API types at crate root for convenience.
pub use chunk::{Chunk, ChunkBounds};
pub use config::CacheConfig;
pub use error::{CacheError, ChunkError, ConfigError, PushError, Result};
pub use iter::{ChunkIter, RangeIter};
pub use registry::{RegistryStats, SeriesRegistry};
pub use ring::{ChunkRing, PushOutcome};
pub use sink::{ChannelSink, ChunkSink, ChunkSlots, ClosedChunk, NullSink};
