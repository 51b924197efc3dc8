//! In-Memory Backend
//!
//! Process-local backend for tests and the interactive CLI. Uses DashMap for
//! lock-free concurrent access.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{BackendStats, FileMetadata, StorageBackend};
use crate::error::{Error, Result};

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    /// Container index -> serialized container
    containers: DashMap<u64, Bytes>,
    /// Path -> metadata
    metadata: DashMap<String, FileMetadata>,
    /// Statistics
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    disconnected: AtomicBool,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a container, simulating data loss
    pub fn remove_container(&self, index: u64) -> bool {
        match self.containers.remove(&index) {
            Some((_, payload)) => {
                self.total_bytes
                    .fetch_sub(payload.len() as u64, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Indices of all stored containers, unordered
    pub fn container_indices(&self) -> Vec<u64> {
        self.containers.iter().map(|entry| *entry.key()).collect()
    }

    fn check_connected(&self) -> Result<()> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(Error::BackendTransport("backend disconnected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get_file_metadata(&self, path: &str) -> Result<Option<FileMetadata>> {
        self.check_connected()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.metadata.get(path).map(|m| m.clone()))
    }

    async fn set_file_metadata(&self, path: &str, metadata: &FileMetadata) -> Result<()> {
        self.check_connected()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.metadata.insert(path.to_string(), metadata.clone());
        Ok(())
    }

    async fn file_paths(&self) -> Result<Vec<String>> {
        self.check_connected()?;
        let mut paths: Vec<String> = self.metadata.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        Ok(paths)
    }

    async fn retrieve_aggregated_blocks(&self, index: u64) -> Result<Option<Bytes>> {
        self.check_connected()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.containers.get(&index).map(|p| p.clone()))
    }

    async fn store_aggregated_blocks(&self, index: u64, payload: Bytes) -> Result<()> {
        self.check_connected()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        let size = payload.len() as u64;
        match self.containers.insert(index, payload) {
            Some(old) => {
                let old_size = old.len() as u64;
                if size > old_size {
                    self.total_bytes.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.total_bytes.fetch_sub(old_size - size, Ordering::Relaxed);
                }
            }
            None => {
                self.total_bytes.fetch_add(size, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn is_aggregated_block_available(&self, index: u64) -> Result<bool> {
        self.check_connected()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.containers.contains_key(&index))
    }

    async fn highest_container_index(&self) -> Result<Option<u64>> {
        Ok(self.containers.iter().map(|e| *e.key()).max())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::Release);
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            container_count: self.containers.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            file_count: self.metadata.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}
