//! Sharded Memory Backend
//!
//! In-process simulation of a hash-slot cluster. Nodes own contiguous slot
//! ranges and containers are addressed through a `PositionSlotLayout`, so
//! with as many nodes as stripe positions, each node serves exactly one
//! position. Nodes can be failed (their data is lost and calls error out) and
//! restored empty.
//!
//! File metadata is replicated on every node and survives node failures.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{info, warn};

use super::slots::{key_hash_slot, PositionSlotLayout, SlotTagTable, SLOT_COUNT};
use super::{BackendStats, FileMetadata, StorageBackend};
use crate::error::{Error, Result};

#[derive(Default)]
struct Node {
    containers: DashMap<String, Bytes>,
    failed: AtomicBool,
}

/// Cluster of in-memory nodes addressed by hash slot
pub struct ShardedMemoryBackend {
    nodes: Vec<Node>,
    layout: PositionSlotLayout,
    metadata: DashMap<String, FileMetadata>,
    reads: AtomicU64,
    writes: AtomicU64,
    topology_refreshes: AtomicU64,
}

impl ShardedMemoryBackend {
    /// Create a cluster of `node_count` nodes for stripes of `total_size`.
    pub fn new(node_count: usize, total_size: usize, tags: Arc<SlotTagTable>) -> Result<Self> {
        if node_count == 0 || node_count > SLOT_COUNT {
            return Err(Error::Config(format!("invalid node count {}", node_count)));
        }
        Ok(Self {
            nodes: (0..node_count).map(|_| Node::default()).collect(),
            layout: PositionSlotLayout::new(total_size, tags)?,
            metadata: DashMap::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            topology_refreshes: AtomicU64::new(0),
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node owning a slot
    pub fn node_of_slot(&self, slot: usize) -> usize {
        slot * self.nodes.len() / SLOT_COUNT
    }

    /// Node holding a container
    pub fn node_of_container(&self, index: u64) -> usize {
        self.node_of_slot(self.layout.slot_of(index))
    }

    /// Lose every container of a node and fail further calls to it
    pub fn fail_node(&self, node: usize) {
        if let Some(n) = self.nodes.get(node) {
            n.failed.store(true, Ordering::Release);
            n.containers.clear();
            warn!("Node {} failed", node);
        }
    }

    /// Bring a failed node back, empty
    pub fn restore_node(&self, node: usize) {
        if let Some(n) = self.nodes.get(node) {
            n.failed.store(false, Ordering::Release);
            info!("Node {} restored", node);
        }
    }

    pub fn topology_refreshes(&self) -> u64 {
        self.topology_refreshes.load(Ordering::Relaxed)
    }

    fn route(&self, index: u64) -> Result<(String, &Node)> {
        let key = self.layout.key_of(index);
        let node_index = self.node_of_slot(key_hash_slot(key.as_bytes()));
        let node = &self.nodes[node_index];
        if node.failed.load(Ordering::Acquire) {
            return Err(Error::BackendTransport(format!(
                "node {} unreachable for {}",
                node_index, key
            )));
        }
        Ok((key, node))
    }
}

#[async_trait]
impl StorageBackend for ShardedMemoryBackend {
    async fn get_file_metadata(&self, path: &str) -> Result<Option<FileMetadata>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.metadata.get(path).map(|m| m.clone()))
    }

    async fn set_file_metadata(&self, path: &str, metadata: &FileMetadata) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.metadata.insert(path.to_string(), metadata.clone());
        Ok(())
    }

    async fn file_paths(&self) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self.metadata.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        Ok(paths)
    }

    async fn retrieve_aggregated_blocks(&self, index: u64) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let (key, node) = self.route(index)?;
        Ok(node.containers.get(&key).map(|p| p.clone()))
    }

    async fn store_aggregated_blocks(&self, index: u64, payload: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let (key, node) = self.route(index)?;
        node.containers.insert(key, payload);
        Ok(())
    }

    async fn is_aggregated_block_available(&self, index: u64) -> Result<bool> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let (key, node) = self.route(index)?;
        Ok(node.containers.contains_key(&key))
    }

    async fn highest_container_index(&self) -> Result<Option<u64>> {
        Ok(self
            .nodes
            .iter()
            .flat_map(|node| {
                node.containers
                    .iter()
                    .filter_map(|e| PositionSlotLayout::index_of(e.key()))
                    .collect::<Vec<_>>()
            })
            .max())
    }

    async fn refresh_topology(&self) -> Result<()> {
        self.topology_refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        let (container_count, total_bytes) = self.nodes.iter().fold((0u64, 0u64), |acc, node| {
            node.containers.iter().fold(acc, |(count, bytes), e| {
                (count + 1, bytes + e.value().len() as u64)
            })
        });
        BackendStats {
            container_count,
            total_bytes,
            file_count: self.metadata.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlockStore, StoreConfig};
    use std::sync::OnceLock;

    fn tags() -> Arc<SlotTagTable> {
        static TABLE: OnceLock<Arc<SlotTagTable>> = OnceLock::new();
        TABLE
            .get_or_init(|| Arc::new(SlotTagTable::generate().unwrap()))
            .clone()
    }

    #[test]
    fn test_one_node_per_position() {
        let backend = ShardedMemoryBackend::new(8, 8, tags()).unwrap();
        for index in 0..500u64 {
            assert_eq!(backend.node_of_container(index), (index % 8) as usize);
        }
    }

    #[tokio::test]
    async fn test_failed_node_loses_one_position() {
        let backend = Arc::new(ShardedMemoryBackend::new(8, 8, tags()).unwrap());
        let config = StoreConfig {
            read_size: 16,
            ..Default::default()
        };
        let store = BlockStore::open(backend.clone(), 8, config).await.unwrap();

        let mut keys = Vec::new();
        for round in 0..6u8 {
            for position in 0..8 {
                keys.push(store.store_block(round ^ position as u8, position).await.unwrap());
            }
        }
        store.flush_all().await.unwrap();
        assert!(backend.stats().container_count >= 8);

        backend.fail_node(3);
        store.clear_read_cache().await.unwrap();
        assert_eq!(backend.topology_refreshes(), 1);

        let available = store.availability(&keys).await.unwrap();
        for (key, available) in keys.iter().zip(available) {
            assert_eq!(available, store.position_of(*key) != 3);
        }

        // Writes to a failed node fail, reads elsewhere still succeed
        assert!(backend.store_aggregated_blocks(3, Bytes::new()).await.is_err());
        assert_eq!(store.retrieve_block(keys[0]).await.unwrap(), Some(0));

        backend.restore_node(3);
        assert!(!backend.is_aggregated_block_available(3).await.unwrap());
    }

    #[tokio::test]
    async fn test_highest_container_index() {
        let backend = ShardedMemoryBackend::new(3, 4, tags()).unwrap();
        assert_eq!(backend.highest_container_index().await.unwrap(), None);
        backend.store_aggregated_blocks(9, Bytes::from_static(b"x")).await.unwrap();
        backend.store_aggregated_blocks(2, Bytes::from_static(b"y")).await.unwrap();
        assert_eq!(backend.highest_container_index().await.unwrap(), Some(9));
        assert_eq!(backend.stats().total_bytes, 2);
    }
}
