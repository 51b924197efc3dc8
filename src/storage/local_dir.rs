//! Local Directory Backend
//!
//! Persistent backend storing one file per container and one JSON document
//! per file metadata:
//!
//! ```text
//! <root>/blocks/<index>
//! <root>/metadata/<url-encoded path>.json
//! ```
//!
//! Files are written to a temporary name and renamed into place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use super::{BackendStats, FileMetadata, StorageBackend};
use crate::error::{Error, Result};

const BLOCKS_DIR: &str = "blocks";
const METADATA_DIR: &str = "metadata";
const METADATA_EXT: &str = ".json";
const TMP_EXT: &str = ".tmp";

/// Directory-backed storage backend
pub struct LocalDirBackend {
    root: PathBuf,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl LocalDirBackend {
    /// Open (and create if needed) a backend rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOCKS_DIR)).await?;
        fs::create_dir_all(root.join(METADATA_DIR)).await?;
        debug!("Opened directory backend at {}", root.display());
        Ok(Self {
            root,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    fn block_path(&self, index: u64) -> PathBuf {
        self.root.join(BLOCKS_DIR).join(index.to_string())
    }

    fn metadata_path(&self, path: &str) -> PathBuf {
        self.root
            .join(METADATA_DIR)
            .join(format!("{}{}", urlencoding::encode(path), METADATA_EXT))
    }

    async fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
        let mut tmp = target.as_os_str().to_owned();
        tmp.push(TMP_EXT);
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, target).await?;
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of the regular entries in a subdirectory, temporaries excluded
    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(self.root.join(dir)).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(TMP_EXT) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl StorageBackend for LocalDirBackend {
    async fn get_file_metadata(&self, path: &str) -> Result<Option<FileMetadata>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        match Self::read_optional(&self.metadata_path(path)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn set_file_metadata(&self, path: &str, metadata: &FileMetadata) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_vec(metadata)?;
        Self::write_atomic(&self.metadata_path(path), &json).await
    }

    async fn file_paths(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for name in self.list(METADATA_DIR).await? {
            let Some(encoded) = name.strip_suffix(METADATA_EXT) else {
                continue;
            };
            let path = urlencoding::decode(encoded)
                .map_err(|e| Error::Internal(format!("bad metadata file name {}: {}", name, e)))?;
            paths.push(path.into_owned());
        }
        paths.sort();
        Ok(paths)
    }

    async fn retrieve_aggregated_blocks(&self, index: u64) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(Self::read_optional(&self.block_path(index))
            .await?
            .map(Bytes::from))
    }

    async fn store_aggregated_blocks(&self, index: u64, payload: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        Self::write_atomic(&self.block_path(index), &payload).await
    }

    async fn is_aggregated_block_available(&self, index: u64) -> Result<bool> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(fs::try_exists(self.block_path(index)).await?)
    }

    async fn highest_container_index(&self) -> Result<Option<u64>> {
        Ok(self
            .list(BLOCKS_DIR)
            .await?
            .iter()
            .filter_map(|name| name.parse::<u64>().ok())
            .max())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Walks both directories with blocking `std::fs` calls.
    fn stats(&self) -> BackendStats {
        let count_entries = |dir: &str| -> (u64, u64) {
            std::fs::read_dir(self.root.join(dir))
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter_map(|e| e.metadata().ok())
                        .filter(|m| m.is_file())
                        .fold((0, 0), |(count, bytes), m| (count + 1, bytes + m.len()))
                })
                .unwrap_or((0, 0))
        };
        let (container_count, total_bytes) = count_entries(BLOCKS_DIR);
        let (file_count, _) = count_entries(METADATA_DIR);

        BackendStats {
            container_count,
            total_bytes,
            file_count,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}
