//! Stripestore - Erasure-Coded Virtual File Store
//!
//! Byte-addressable files whose contents are erasure-coded and spread block
//! by block over a pluggable key-value backend. Up to the code's correction
//! bound of blocks may be lost per stripe, and lost blocks can be repaired.
//!
//! # Architecture
//!
//! ```text
//! FileEncoderDecoder ──► ErasureCode (Null / XOR / Reed-Solomon / Regenerating)
//!        │
//!        ▼
//!    BlockStore (write buffers, LRU + negative cache)
//!        │
//!        ▼
//!  StorageBackend (memory / directory / sharded cluster)
//! ```
//!
//! # Modules
//!
//! - [`ec`] - Erasure codes and read-set planning
//! - [`file`] - File layer: layout, read/write, repair
//! - [`storage`] - Block store and backends
//! - [`config`] - YAML configuration
//! - [`metrics`] - Block store counters
//! - [`error`] - Error types

pub mod config;
pub mod ec;
pub mod error;
pub mod file;
pub mod metrics;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use ec::{CodeConfig, CodeKind, ErasureCode};
pub use error::{Error, Result};
pub use file::{FileEncoderDecoder, RepairReport, RepairSummary, StripeLayout};
pub use metrics::StoreMetrics;
pub use storage::{
    BlockKey, BlockStore, FileMetadata, LocalDirBackend, MemoryBackend, ShardedMemoryBackend,
    StorageBackend, StoreConfig,
};
