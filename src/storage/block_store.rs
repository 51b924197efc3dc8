//! Block Store
//!
//! Buffering and caching layer shared by every backend.
//!
//! # Key Allocation
//!
//! Each stripe position owns one write buffer and one key counter. Position
//! `p` starts at key `p × buffer_size`, so container `i` only ever holds
//! symbols of position `i mod total_size`:
//!
//! ```text
//! container:  0      1      2    ...  T-1    T      T+1  ...
//! position:   0      1      2    ...  T-1    0      1    ...
//! ```
//!
//! When a buffer fills, its counter jumps a whole generation ahead
//! (`index × buffer_size + total_size × buffer_size`).
//!
//! # Read Path
//!
//! negative cache → LRU container cache → backend. Backend absence is
//! remembered in the negative cache; transport failures and timeouts degrade
//! to "unavailable" without being remembered.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{join_all, try_join_all};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{BlockKey, BlocksContainer, FileMetadata, StorageBackend};
use crate::error::{Error, Result};
use crate::metrics::StoreMetrics;

/// Bytes requested by a typical FUSE read, the default aggregation target
pub const DEFAULT_READ_SIZE: usize = 128 * 1024 + 20;

/// Default number of containers kept in the read cache
pub const DEFAULT_CACHE_SIZE: usize = 50;

// =============================================================================
// Configuration
// =============================================================================

/// Block store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Symbols per stripe generation; `buffer_size = ceil(read_size / total_size)`
    pub read_size: usize,
    /// Containers kept in the LRU read cache
    pub cache_size: usize,
    /// Time budget of a single backend call
    pub io_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_size: DEFAULT_READ_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            io_timeout_ms: 30_000,
        }
    }
}

impl StoreConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

// =============================================================================
// Block Store
// =============================================================================

struct StoreState {
    buffers: Vec<BlocksContainer>,
    counters: Vec<u64>,
    cache: LruCache<u64, Arc<BlocksContainer>>,
    missing: HashSet<u64>,
}

impl StoreState {
    /// Symbol of `key` if it still sits in a write buffer
    fn pending_symbol(&self, key: BlockKey, position: usize, buffer_size: usize) -> Option<u8> {
        let buffered_index = self.counters[position] / buffer_size as u64;
        if key.container_index(buffer_size) == buffered_index {
            self.buffers[position].get(key.slot(buffer_size))
        } else {
            None
        }
    }

    /// Take the buffer of `position` and advance its counter a generation.
    fn take_buffer(&mut self, position: usize, buffer_size: usize, total_size: usize) -> (u64, BlocksContainer) {
        let bs = buffer_size as u64;
        let index = self.counters[position] / bs;
        self.counters[position] = index * bs + total_size as u64 * bs;
        let full = std::mem::replace(&mut self.buffers[position], BlocksContainer::new(buffer_size));
        (index, full)
    }
}

/// Reusable buffering and caching wrapper around a `StorageBackend`
pub struct BlockStore {
    backend: Arc<dyn StorageBackend>,
    config: StoreConfig,
    total_size: usize,
    buffer_size: usize,
    state: Mutex<StoreState>,
    metrics: Arc<StoreMetrics>,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("total_size", &self.total_size)
            .field("buffer_size", &self.buffer_size)
            .field("config", &self.config)
            .finish()
    }
}

impl BlockStore {
    /// Open a store for stripes of `total_size` positions.
    ///
    /// Counters resume one generation past the backend's highest stored
    /// container, so fresh keys never collide with persisted ones.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        total_size: usize,
        config: StoreConfig,
    ) -> Result<Self> {
        if total_size == 0 {
            return Err(Error::Config("total_size must be greater than 0".to_string()));
        }
        if config.read_size == 0 {
            return Err(Error::Config("read_size must be greater than 0".to_string()));
        }

        let buffer_size = config.read_size.div_ceil(total_size);
        let cache_capacity = NonZeroUsize::new(config.cache_size.max(1))
            .ok_or_else(|| Error::Internal("cache capacity is zero".to_string()))?;

        let mut store = Self {
            backend,
            config,
            total_size,
            buffer_size,
            state: Mutex::new(StoreState {
                buffers: (0..total_size).map(|_| BlocksContainer::new(buffer_size)).collect(),
                counters: vec![0; total_size],
                cache: LruCache::new(cache_capacity),
                missing: HashSet::new(),
            }),
            metrics: Arc::new(StoreMetrics::new()),
        };

        let backend = store.backend.clone();
        let generation = match store
            .timed("scan", backend.highest_container_index())
            .await?
        {
            Some(highest) => highest / total_size as u64 + 1,
            None => 0,
        };
        let bs = buffer_size as u64;
        for (position, counter) in store.state.get_mut().counters.iter_mut().enumerate() {
            *counter = (generation * total_size as u64 + position as u64) * bs;
        }

        debug!(
            "Opened block store: total_size={}, buffer_size={}, generation={}",
            total_size, buffer_size, generation
        );
        Ok(store)
    }

    /// Interleave width
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Symbols per container
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<StoreMetrics> {
        self.metrics.clone()
    }

    /// Stripe position a key was stored for
    pub fn position_of(&self, key: BlockKey) -> usize {
        key.position(self.buffer_size, self.total_size)
    }

    /// Stripe position served by a container
    pub fn position_of_container(&self, index: u64) -> usize {
        (index % self.total_size as u64) as usize
    }

    async fn timed<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.io_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::BackendTimeout {
                operation: operation.to_string(),
                timeout_ms: self.config.io_timeout_ms,
            }),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Buffer a symbol for `position` and return its key.
    ///
    /// Filling the buffer stores the container; a store failure fails the call.
    pub async fn store_block(&self, value: u8, position: usize) -> Result<BlockKey> {
        if position >= self.total_size {
            return Err(Error::InvalidPosition {
                position,
                total_size: self.total_size,
            });
        }

        let (key, full) = {
            let mut state = self.state.lock();
            let key = BlockKey(state.counters[position]);
            state.buffers[position].push(value);
            if state.buffers[position].is_full() {
                let full = state.take_buffer(position, self.buffer_size, self.total_size);
                (key, Some(full))
            } else {
                state.counters[position] += 1;
                (key, None)
            }
        };

        if let Some((index, container)) = full {
            self.put_container(index, container).await?;
        }
        Ok(key)
    }

    /// Store every partially filled buffer.
    #[instrument(skip(self))]
    pub async fn flush_all(&self) -> Result<()> {
        let pending: Vec<(u64, BlocksContainer)> = {
            let mut state = self.state.lock();
            let positions: Vec<usize> = (0..self.total_size)
                .filter(|&p| !state.buffers[p].is_empty())
                .collect();
            positions
                .into_iter()
                .map(|p| state.take_buffer(p, self.buffer_size, self.total_size))
                .collect()
        };

        if pending.is_empty() {
            return Ok(());
        }
        debug!("Flushing {} partial containers", pending.len());
        try_join_all(
            pending
                .into_iter()
                .map(|(index, container)| self.put_container(index, container)),
        )
        .await?;
        self.metrics.record_flush();
        Ok(())
    }

    async fn put_container(&self, index: u64, container: BlocksContainer) -> Result<()> {
        let payload = container.encode();
        let result = self
            .timed("store", self.backend.store_aggregated_blocks(index, payload))
            .await;
        if let Err(e) = result {
            self.metrics.record_backend_failure();
            warn!("Failed to store container {}: {}", index, e);
            return Err(e);
        }

        self.state.lock().missing.remove(&index);
        self.metrics.record_container_stored();
        debug!("Stored container {} ({} symbols)", index, container.len());
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Container at `index`, or `None` when it cannot be obtained.
    async fn load_container(&self, index: u64) -> Option<Arc<BlocksContainer>> {
        {
            let mut state = self.state.lock();
            if state.missing.contains(&index) {
                self.metrics.record_negative_hit();
                return None;
            }
            if let Some(container) = state.cache.get(&index) {
                self.metrics.record_cache_hit();
                return Some(container.clone());
            }
        }
        self.metrics.record_cache_miss();

        let started = Instant::now();
        let fetched = self
            .timed("retrieve", self.backend.retrieve_aggregated_blocks(index))
            .await;
        match fetched {
            Ok(Some(payload)) => {
                self.metrics.record_container_fetched(started.elapsed());
                match BlocksContainer::decode(index, &payload) {
                    Ok(container) => {
                        let container = Arc::new(container);
                        self.state.lock().cache.put(index, container.clone());
                        Some(container)
                    }
                    Err(e) => {
                        warn!("Treating container {} as unavailable: {}", index, e);
                        None
                    }
                }
            }
            Ok(None) => {
                self.state.lock().missing.insert(index);
                None
            }
            Err(e) => {
                self.metrics.record_backend_failure();
                warn!("Container {} unavailable: {}", index, e);
                None
            }
        }
    }

    /// Retrieve one symbol
    pub async fn retrieve_block(&self, key: BlockKey) -> Result<Option<u8>> {
        Ok(self.retrieve_blocks(&[key]).await?.pop().flatten())
    }

    /// Retrieve several symbols, fetching each distinct container once and
    /// the containers concurrently.
    pub async fn retrieve_blocks(&self, keys: &[BlockKey]) -> Result<Vec<Option<u8>>> {
        let mut values: Vec<Option<u8>> = vec![None; keys.len()];
        let mut to_fetch: Vec<u64> = Vec::new();
        {
            let state = self.state.lock();
            for (value, &key) in values.iter_mut().zip(keys) {
                *value = state.pending_symbol(key, self.position_of(key), self.buffer_size);
                let index = key.container_index(self.buffer_size);
                if value.is_none() && !to_fetch.contains(&index) {
                    to_fetch.push(index);
                }
            }
        }

        let fetched = join_all(to_fetch.iter().map(|&index| self.load_container(index))).await;
        let containers: HashMap<u64, Arc<BlocksContainer>> = to_fetch
            .into_iter()
            .zip(fetched)
            .filter_map(|(index, container)| container.map(|c| (index, c)))
            .collect();

        for (value, &key) in values.iter_mut().zip(keys) {
            if value.is_none() {
                *value = containers
                    .get(&key.container_index(self.buffer_size))
                    .and_then(|c| c.get(key.slot(self.buffer_size)));
            }
        }
        Ok(values)
    }

    /// Whether a key can currently be retrieved
    pub async fn is_block_available(&self, key: BlockKey) -> Result<bool> {
        Ok(self.availability(&[key]).await?.first().copied().unwrap_or(false))
    }

    /// Availability of several keys, without fetching container payloads.
    pub async fn availability(&self, keys: &[BlockKey]) -> Result<Vec<bool>> {
        let mut known: Vec<Option<bool>> = vec![None; keys.len()];
        let mut unchecked: Vec<u64> = Vec::new();
        {
            let state = self.state.lock();
            for (slot, &key) in known.iter_mut().zip(keys) {
                let index = key.container_index(self.buffer_size);
                *slot = if state
                    .pending_symbol(key, self.position_of(key), self.buffer_size)
                    .is_some()
                {
                    Some(true)
                } else if state.missing.contains(&index) {
                    self.metrics.record_negative_hit();
                    Some(false)
                } else if let Some(container) = state.cache.peek(&index) {
                    Some(container.get(key.slot(self.buffer_size)).is_some())
                } else {
                    None
                };
                if slot.is_none() && !unchecked.contains(&index) {
                    unchecked.push(index);
                }
            }
        }

        let checked = join_all(unchecked.iter().map(|&index| self.check_container(index))).await;
        let checked: HashMap<u64, bool> = unchecked.into_iter().zip(checked).collect();

        Ok(known
            .into_iter()
            .zip(keys)
            .map(|(known, key)| {
                known.unwrap_or_else(|| {
                    checked
                        .get(&key.container_index(self.buffer_size))
                        .copied()
                        .unwrap_or(false)
                })
            })
            .collect())
    }

    async fn check_container(&self, index: u64) -> bool {
        let checked = self
            .timed("availability", self.backend.is_aggregated_block_available(index))
            .await;
        match checked {
            Ok(true) => true,
            Ok(false) => {
                self.state.lock().missing.insert(index);
                false
            }
            Err(e) => {
                self.metrics.record_backend_failure();
                warn!("Container {} unavailable: {}", index, e);
                false
            }
        }
    }

    /// Forget cached containers and known-missing containers, then let the
    /// backend re-discover its topology.
    pub async fn clear_read_cache(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.cache.clear();
            state.missing.clear();
        }
        self.timed("refresh", self.backend.refresh_topology()).await
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub async fn get_file_metadata(&self, path: &str) -> Result<Option<FileMetadata>> {
        self.timed("get metadata", self.backend.get_file_metadata(path))
            .await
    }

    pub async fn set_file_metadata(&self, path: &str, metadata: &FileMetadata) -> Result<()> {
        self.timed("set metadata", self.backend.set_file_metadata(path, metadata))
            .await
    }

    pub async fn file_paths(&self) -> Result<Vec<String>> {
        self.timed("list", self.backend.file_paths()).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.backend.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BackendStats, MemoryBackend};
    use async_trait::async_trait;
    use bytes::Bytes;

    fn small_config() -> StoreConfig {
        StoreConfig {
            read_size: 8,
            cache_size: 50,
            io_timeout_ms: 1_000,
        }
    }

    async fn open(backend: Arc<MemoryBackend>, total_size: usize, config: StoreConfig) -> BlockStore {
        BlockStore::open(backend, total_size, config).await.unwrap()
    }

    #[tokio::test]
    async fn test_buffer_size() {
        let store = open(Arc::new(MemoryBackend::new()), 14, StoreConfig::default()).await;
        assert_eq!(store.buffer_size(), (128 * 1024 + 20usize).div_ceil(14));
        assert_eq!(store.total_size(), 14);
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let backend = Arc::new(MemoryBackend::new());
        let store = open(backend.clone(), 2, small_config()).await;
        assert_eq!(store.buffer_size(), 4);

        let mut keys = Vec::new();
        for i in 0..16u8 {
            let position = (i % 2) as usize;
            let key = store.store_block(i * 3, position).await.unwrap();
            assert_eq!(store.position_of(key), position);
            keys.push(key);
        }
        assert_eq!(keys[0], BlockKey(0));
        assert_eq!(keys[1], BlockKey(4));
        // Full containers were stored as they filled
        assert_eq!(backend.stats().container_count, 4);

        store.flush_all().await.unwrap();
        store.clear_read_cache().await.unwrap();

        for (i, &key) in keys.iter().enumerate() {
            assert_eq!(store.retrieve_block(key).await.unwrap(), Some(i as u8 * 3));
        }
        let batch = store.retrieve_blocks(&keys).await.unwrap();
        assert!(batch.iter().enumerate().all(|(i, v)| *v == Some(i as u8 * 3)));
    }

    #[tokio::test]
    async fn test_counter_skips_a_generation() {
        let store = open(Arc::new(MemoryBackend::new()), 3, small_config()).await;
        // buffer_size = ceil(8 / 3) = 3
        let keys: Vec<BlockKey> = {
            let mut keys = Vec::new();
            for _ in 0..4 {
                keys.push(store.store_block(1, 2).await.unwrap());
            }
            keys
        };
        assert_eq!(keys, vec![BlockKey(6), BlockKey(7), BlockKey(8), BlockKey(15)]);
        assert_eq!(store.position_of_container(5), 2);
    }

    #[tokio::test]
    async fn test_pending_blocks_are_readable() {
        let store = open(Arc::new(MemoryBackend::new()), 2, small_config()).await;
        let key = store.store_block(42, 1).await.unwrap();
        assert!(store.is_block_available(key).await.unwrap());
        assert_eq!(store.retrieve_block(key).await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_absent_key_is_negative_cached() {
        let store = open(Arc::new(MemoryBackend::new()), 2, small_config()).await;
        let key = BlockKey(400);
        assert_eq!(store.retrieve_block(key).await.unwrap(), None);
        assert!(!store.is_block_available(key).await.unwrap());
        assert!(store.metrics().negative_hits() >= 1);

        store.clear_read_cache().await.unwrap();
        assert!(!store.is_block_available(key).await.unwrap());
    }

    #[tokio::test]
    async fn test_availability_matches_retrieval() {
        let backend = Arc::new(MemoryBackend::new());
        let store = open(backend.clone(), 2, small_config()).await;
        let mut keys = Vec::new();
        for i in 0..8u8 {
            keys.push(store.store_block(i, (i % 2) as usize).await.unwrap());
        }
        store.flush_all().await.unwrap();
        backend.remove_container(keys[1].container_index(store.buffer_size()));
        store.clear_read_cache().await.unwrap();

        let available = store.availability(&keys).await.unwrap();
        let values = store.retrieve_blocks(&keys).await.unwrap();
        for (available, value) in available.iter().zip(&values) {
            assert_eq!(*available, value.is_some());
        }
        assert!(!available[1]);
        assert!(available[0]);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let backend = Arc::new(MemoryBackend::new());
        let config = StoreConfig {
            cache_size: 1,
            ..small_config()
        };
        let store = open(backend, 2, config).await;
        let a = store.store_block(1, 0).await.unwrap();
        let b = store.store_block(2, 1).await.unwrap();
        store.flush_all().await.unwrap();

        store.retrieve_block(a).await.unwrap();
        store.retrieve_block(a).await.unwrap();
        assert_eq!(store.metrics().cache_hits(), 1);

        store.retrieve_block(b).await.unwrap();
        store.retrieve_block(a).await.unwrap();
        assert_eq!(store.metrics().cache_misses(), 3);
    }

    #[tokio::test]
    async fn test_metadata_pass_through() {
        let store = open(Arc::new(MemoryBackend::new()), 2, small_config()).await;
        assert!(store.get_file_metadata("f").await.unwrap().is_none());
        let metadata = FileMetadata {
            contents_size: 3,
            block_keys: vec![Some(BlockKey(0)), None],
        };
        store.set_file_metadata("f", &metadata).await.unwrap();
        assert_eq!(store.get_file_metadata("f").await.unwrap(), Some(metadata));
        assert_eq!(store.file_paths().await.unwrap(), vec!["f"]);
    }

    #[tokio::test]
    async fn test_counters_resume_after_reopen() {
        let backend = Arc::new(MemoryBackend::new());
        let first = open(backend.clone(), 2, small_config()).await;
        let old = first.store_block(9, 1).await.unwrap();
        first.flush_all().await.unwrap();

        let second = open(backend, 2, small_config()).await;
        let fresh = second.store_block(7, 1).await.unwrap();
        assert_ne!(old, fresh);
        assert_eq!(second.position_of(fresh), 1);
        assert_eq!(second.retrieve_block(old).await.unwrap(), Some(9));
    }

    /// Backend whose container operations always fail
    struct BrokenBackend;

    #[async_trait]
    impl StorageBackend for BrokenBackend {
        async fn get_file_metadata(&self, _path: &str) -> Result<Option<FileMetadata>> {
            Ok(None)
        }
        async fn set_file_metadata(&self, _path: &str, _metadata: &FileMetadata) -> Result<()> {
            Ok(())
        }
        async fn file_paths(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn retrieve_aggregated_blocks(&self, _index: u64) -> Result<Option<Bytes>> {
            Err(Error::BackendTransport("connection reset".into()))
        }
        async fn store_aggregated_blocks(&self, _index: u64, _payload: Bytes) -> Result<()> {
            Err(Error::BackendTransport("connection reset".into()))
        }
        async fn is_aggregated_block_available(&self, _index: u64) -> Result<bool> {
            Err(Error::BackendTransport("connection reset".into()))
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        fn stats(&self) -> BackendStats {
            BackendStats::default()
        }
    }

    #[tokio::test]
    async fn test_transport_failures() {
        let store = BlockStore::open(Arc::new(BrokenBackend), 2, small_config())
            .await
            .unwrap();

        // Reads degrade to unavailable
        assert!(!store.is_block_available(BlockKey(0)).await.unwrap());
        assert_eq!(store.retrieve_block(BlockKey(0)).await.unwrap(), None);
        assert_eq!(store.metrics().negative_hits(), 0);

        // Writes fail once a container must be stored
        store.store_block(1, 0).await.unwrap();
        let err = store.flush_all().await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.metrics().backend_failures() >= 3);
    }

    #[tokio::test]
    async fn test_invalid_position() {
        let store = open(Arc::new(MemoryBackend::new()), 2, small_config()).await;
        let err = store.store_block(0, 2).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPosition { position: 2, total_size: 2 }));
    }
}
