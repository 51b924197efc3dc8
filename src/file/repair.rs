//! File Repair
//!
//! Rebuilds lost blocks of a file stripe by stripe. Only erased positions
//! are rewritten; containers are append-only, so recovered symbols get fresh
//! keys and the metadata is updated to point at them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::encoder_decoder::FileEncoderDecoder;
use crate::error::Result;
use crate::storage::FileMetadata;

/// Outcome of repairing one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Stripes that had at least one erased position
    pub stripes_repaired: usize,
    /// Blocks re-stored
    pub blocks_restored: usize,
}

/// Outcome of repairing every file
#[derive(Debug, Clone, Serialize)]
pub struct RepairSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Files that were checked successfully, with what was repaired
    pub repaired: Vec<(String, RepairReport)>,
    /// Files that could not be repaired, with the reason
    pub failed: Vec<(String, String)>,
}

impl RepairSummary {
    /// Blocks re-stored across all files
    pub fn blocks_restored(&self) -> usize {
        self.repaired.iter().map(|(_, r)| r.blocks_restored).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl FileEncoderDecoder {
    /// Rebuild every erased block of a file.
    ///
    /// An unrecoverable stripe aborts the file; stripes repaired before it are
    /// still persisted.
    #[instrument(skip(self))]
    pub async fn repair_file(&self, path: &str) -> Result<RepairReport> {
        let Some(mut metadata) = self.store.get_file_metadata(path).await? else {
            return Ok(RepairReport::default());
        };

        let mut report = RepairReport::default();
        let outcome = self.repair_stripes(path, &mut metadata, &mut report).await;

        if report.blocks_restored > 0 {
            self.store.flush_all().await?;
            self.store.set_file_metadata(path, &metadata).await?;
        }
        outcome?;

        if report.blocks_restored > 0 {
            info!(
                "Repaired {}: {} blocks in {} stripes",
                path, report.blocks_restored, report.stripes_repaired
            );
        }
        Ok(report)
    }

    async fn repair_stripes(
        &self,
        path: &str,
        metadata: &mut FileMetadata,
        report: &mut RepairReport,
    ) -> Result<()> {
        let total = self.layout.total_size();
        let key_count = self.layout.next_boundary(metadata.contents_size());

        for boundary in (0..key_count).step_by(total) {
            let keys = metadata.stripe_keys(path, boundary, total)?.to_vec();
            let stripe = self.read_stripe(&keys, &[]).await?;
            if stripe.erased.is_empty() {
                continue;
            }

            let slots = metadata.stripe_keys_mut(path, boundary, total)?;
            for &position in &stripe.erased {
                let key = self
                    .store
                    .store_block(stripe.values[position], position)
                    .await?;
                slots[position] = Some(key);
            }

            debug!(
                "Restored positions {:?} of stripe {}",
                stripe.erased,
                boundary / total
            );
            report.stripes_repaired += 1;
            report.blocks_restored += stripe.erased.len();
        }
        Ok(())
    }

    /// Repair every file in the store. Failures are collected per file.
    #[instrument(skip(self))]
    pub async fn repair_all_files(&self) -> Result<RepairSummary> {
        let started_at = Utc::now();
        let paths = self.store.file_paths().await?;

        let mut repaired = Vec::new();
        let mut failed = Vec::new();
        for path in paths {
            match self.repair_file(&path).await {
                Ok(report) => repaired.push((path, report)),
                Err(e) => {
                    warn!("Could not repair {}: {}", path, e);
                    failed.push((path, e.to_string()));
                }
            }
        }

        let summary = RepairSummary {
            started_at,
            finished_at: Utc::now(),
            repaired,
            failed,
        };
        info!(
            "Repaired {} blocks over {} files, {} failed",
            summary.blocks_restored(),
            summary.repaired.len(),
            summary.failed.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::ec::{CodeConfig, CodeKind};
    use crate::file::FileEncoderDecoder;
    use crate::storage::{MemoryBackend, StorageBackend, StoreConfig};

    async fn xor_layer() -> (Arc<MemoryBackend>, FileEncoderDecoder) {
        let backend = Arc::new(MemoryBackend::new());
        let code = CodeConfig {
            kind: CodeKind::Xor,
            stripe_size: 4,
            parity_size: 1,
            local_degree: 1,
        }
        .build()
        .unwrap();
        let config = StoreConfig {
            read_size: 10,
            ..Default::default()
        };
        let layer = FileEncoderDecoder::new(code, backend.clone(), config)
            .await
            .unwrap();
        (backend, layer)
    }

    #[tokio::test]
    async fn test_healthy_file_needs_no_repair() {
        let (_, layer) = xor_layer().await;
        layer.write_file("f", 0, b"abcdefgh").await.unwrap();
        let report = layer.repair_file("f").await.unwrap();
        assert_eq!(report.blocks_restored, 0);
        assert_eq!(layer.repair_file("missing").await.unwrap().stripes_repaired, 0);
    }

    #[tokio::test]
    async fn test_repair_restores_lost_block() {
        let (backend, layer) = xor_layer().await;
        layer.write_file("f", 0, b"abcdefgh").await.unwrap();

        let before = backend.get_file_metadata("f").await.unwrap().unwrap();
        let lost = before.block_keys()[2].unwrap();
        backend.remove_container(lost.container_index(layer.store().buffer_size()));
        layer.clear_read_cache().await.unwrap();

        let report = layer.repair_file("f").await.unwrap();
        assert!(report.blocks_restored >= 1);

        let after = backend.get_file_metadata("f").await.unwrap().unwrap();
        assert_ne!(after.block_keys()[2], Some(lost));
        assert_eq!(after.block_keys()[0], before.block_keys()[0]);

        layer.clear_read_cache().await.unwrap();
        assert!(layer.repair_file("f").await.unwrap().blocks_restored == 0);
        assert_eq!(layer.read_to_end("f").await.unwrap(), b"abcdefgh");
    }

    #[tokio::test]
    async fn test_repair_all_isolates_failures() {
        let (backend, layer) = xor_layer().await;
        layer.write_file("good", 0, b"1234").await.unwrap();
        layer.write_file("bad", 0, b"5678").await.unwrap();

        let bad = backend.get_file_metadata("bad").await.unwrap().unwrap();
        let buffer_size = layer.store().buffer_size();
        for key in bad.block_keys()[1..3].iter().flatten() {
            backend.remove_container(key.container_index(buffer_size));
        }
        layer.clear_read_cache().await.unwrap();

        let summary = layer.repair_all_files().await.unwrap();
        assert!(!summary.is_clean());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "bad");
        assert_eq!(summary.repaired.len(), 1);
        assert!(summary.finished_at >= summary.started_at);
    }
}
