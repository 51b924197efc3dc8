//! Storage Module
//!
//! Block storage beneath the file layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      BlockStore                      │
//! │  ┌──────────────┐ ┌─────────────┐ ┌───────────────┐  │
//! │  │ write buffers│ │  LRU cache  │ │ negative cache│  │
//! │  │ (1/position) │ │ (containers)│ │  (missing)    │  │
//! │  └──────────────┘ └─────────────┘ └───────────────┘  │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ Arc<dyn StorageBackend>
//!        ┌───────────────────┼────────────────────┐
//!        ▼                   ▼                    ▼
//!  MemoryBackend      LocalDirBackend    ShardedMemoryBackend
//! ```
//!
//! Symbols of the same stripe position are aggregated into containers, so a
//! backend only ever sees whole containers and per-file metadata.

pub mod block_store;
pub mod container;
pub mod local_dir;
pub mod memory;
pub mod metadata;
pub mod sharded;
pub mod slots;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use block_store::{BlockStore, StoreConfig};
pub use container::BlocksContainer;
pub use local_dir::LocalDirBackend;
pub use memory::MemoryBackend;
pub use metadata::{BlockKey, FileMetadata};
pub use sharded::ShardedMemoryBackend;
pub use slots::{key_hash_slot, PositionSlotLayout, SlotTagTable};

/// Key-value capability a backend must provide.
///
/// Absence is `Ok(None)` / `Ok(false)`; transport failures are errors.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Metadata of a file, if it exists
    async fn get_file_metadata(&self, path: &str) -> Result<Option<FileMetadata>>;

    /// Create or replace the metadata of a file
    async fn set_file_metadata(&self, path: &str, metadata: &FileMetadata) -> Result<()>;

    /// Every path with stored metadata
    async fn file_paths(&self) -> Result<Vec<String>>;

    /// Serialized container at `index`
    async fn retrieve_aggregated_blocks(&self, index: u64) -> Result<Option<Bytes>>;

    /// Store a serialized container at `index`
    async fn store_aggregated_blocks(&self, index: u64, payload: Bytes) -> Result<()>;

    /// Whether a container exists, without fetching it
    async fn is_aggregated_block_available(&self, index: u64) -> Result<bool>;

    /// Highest container index already stored, for resuming key counters
    async fn highest_container_index(&self) -> Result<Option<u64>> {
        Ok(None)
    }

    /// Re-discover the backend topology after failures
    async fn refresh_topology(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Backend statistics. May block on I/O for persistent backends; call it
    /// from `spawn_blocking` inside async code.
    fn stats(&self) -> BackendStats;
}

/// Backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Containers stored
    pub container_count: u64,
    /// Total container bytes stored
    pub total_bytes: u64,
    /// Files with metadata
    pub file_count: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
}
