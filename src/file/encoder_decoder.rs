//! File Encoder/Decoder
//!
//! Byte-addressable files on top of a `BlockStore`. Every stripe of
//! `stripe_size` content bytes is encoded into `total_size` symbols, each
//! stored as its own block.
//!
//! # Stripe Read
//!
//! ```text
//! keys ──► availability ──► erased ──► plan read set ──► fetch ──► decode
//!                              ▲                           │
//!                              └──── vanished blocks ◄─────┘
//! ```
//!
//! Writes are read-modify-write per stripe: uncovered bytes that exist in the
//! file are read back (decoding if needed), the stripe is re-encoded and all
//! of its symbols are stored under fresh keys.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::layout::{StripeLayout, StripeSpan};
use crate::ec::{locations_not_to_read, ErasureCode};
use crate::error::{Error, Result};
use crate::storage::{BlockKey, BlockStore, FileMetadata, StorageBackend, StoreConfig};

/// Symbols of one stripe after reading and decoding
#[derive(Debug)]
pub(super) struct StripeRead {
    /// All positions; only fetched and decoded ones are meaningful
    pub values: Vec<u8>,
    /// Positions that were unavailable and got decoded
    pub erased: Vec<usize>,
}

/// Erasure-coded file layer
pub struct FileEncoderDecoder {
    pub(super) code: Arc<dyn ErasureCode>,
    pub(super) store: BlockStore,
    pub(super) layout: StripeLayout,
}

impl std::fmt::Debug for FileEncoderDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEncoderDecoder")
            .field("code", &self.code)
            .field("store", &self.store)
            .finish()
    }
}

impl FileEncoderDecoder {
    /// Bind a code to a backend. The store is sized for the code's stripes.
    pub async fn new(
        code: Arc<dyn ErasureCode>,
        backend: Arc<dyn StorageBackend>,
        config: StoreConfig,
    ) -> Result<Self> {
        let layout = StripeLayout::new(code.stripe_size(), code.parity_size());
        let store = BlockStore::open(backend, code.total_size(), config).await?;
        info!(
            "File layer ready: {:?}, buffer_size={}",
            code,
            store.buffer_size()
        );
        Ok(Self {
            code,
            store,
            layout,
        })
    }

    pub fn code(&self) -> &Arc<dyn ErasureCode> {
        &self.code
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn layout(&self) -> StripeLayout {
        self.layout
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Read up to `out.len()` bytes at `offset`. Returns the number of bytes
    /// read, 0 past the end or for a missing file.
    #[instrument(skip(self, out), fields(size = out.len()))]
    pub async fn read_file(&self, path: &str, offset: u64, out: &mut [u8]) -> Result<usize> {
        let Some(metadata) = self.store.get_file_metadata(path).await? else {
            return Ok(0);
        };
        let contents_size = metadata.contents_size();
        if offset >= contents_size {
            return Ok(0);
        }
        let len = (out.len() as u64).min(contents_size - offset) as usize;
        if len == 0 {
            return Ok(0);
        }

        let parity = self.layout.parity_size();
        let total = self.layout.total_size();
        for span in self.layout.spans(offset, offset + len as u64) {
            let keys = metadata.stripe_keys(path, span.boundary, total)?;
            let wanted: Vec<usize> = span.data_range().map(|d| parity + d).collect();
            let stripe = self.read_stripe(keys, &wanted).await?;

            let dst = (span.file_offset + span.data_start as u64 - offset) as usize;
            out[dst..dst + span.len()]
                .copy_from_slice(&stripe.values[parity + span.data_start..parity + span.data_end]);
        }

        debug!("Read {} bytes of {} at {}", len, path, offset);
        Ok(len)
    }

    /// Whole contents of a file
    pub async fn read_to_end(&self, path: &str) -> Result<Vec<u8>> {
        let mut contents = vec![0u8; self.size_of_file(path).await? as usize];
        let read = self.read_file(path, 0, &mut contents).await?;
        contents.truncate(read);
        Ok(contents)
    }

    /// Read one stripe so that every position in `wanted` is known.
    ///
    /// Absent keys and unavailable blocks are erased. With any erasure the
    /// code's read set is fetched too and every erased position is decoded,
    /// so repair can pass an empty `wanted`.
    pub(super) async fn read_stripe(&self, keys: &[Option<BlockKey>], wanted: &[usize]) -> Result<StripeRead> {
        let total = self.layout.total_size();
        let mut values = vec![0u8; total];

        // Never written: sparse hole
        if keys.iter().all(Option::is_none) {
            return Ok(StripeRead {
                values,
                erased: Vec::new(),
            });
        }

        let present: Vec<(usize, BlockKey)> = keys
            .iter()
            .enumerate()
            .filter_map(|(p, key)| key.map(|k| (p, k)))
            .collect();
        let present_keys: Vec<BlockKey> = present.iter().map(|&(_, k)| k).collect();
        let available = self.store.availability(&present_keys).await?;

        let mut readable = vec![false; total];
        for (&(position, _), ok) in present.iter().zip(available) {
            readable[position] = ok;
        }
        let mut erased: Vec<usize> = (0..total).filter(|&p| !readable[p]).collect();

        loop {
            let to_read = if erased.is_empty() {
                Vec::new()
            } else {
                self.code.locations_to_read_for_decode(&erased)?
            };

            let mut fetch: Vec<usize> = to_read
                .iter()
                .chain(wanted)
                .copied()
                .filter(|p| !erased.contains(p))
                .collect();
            fetch.sort_unstable();
            fetch.dedup();

            let fetch_keys = fetch
                .iter()
                .map(|&p| {
                    keys[p].ok_or_else(|| Error::Internal(format!("position {} has no key", p)))
                })
                .collect::<Result<Vec<_>>>()?;
            let fetched = self.store.retrieve_blocks(&fetch_keys).await?;

            let vanished: Vec<usize> = fetch
                .iter()
                .zip(&fetched)
                .filter(|(_, value)| value.is_none())
                .map(|(&p, _)| p)
                .collect();
            if !vanished.is_empty() {
                debug!("Blocks at {:?} vanished, re-planning stripe", vanished);
                erased.extend(vanished);
                erased.sort_unstable();
                continue;
            }

            for (&p, value) in fetch.iter().zip(fetched) {
                values[p] = value.unwrap_or_default();
            }

            if !erased.is_empty() {
                let not_to_read = locations_not_to_read(total, &to_read);
                let mut recovered = vec![0u8; erased.len()];
                self.code
                    .decode(&values, &erased, &mut recovered, &to_read, &not_to_read)?;
                for (&p, value) in erased.iter().zip(recovered) {
                    values[p] = value;
                }
                debug!("Decoded {} erased positions from {:?}", erased.len(), to_read);
            }

            return Ok(StripeRead { values, erased });
        }
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Write `contents` at `offset`, growing the file if needed.
    #[instrument(skip(self, contents), fields(size = contents.len()))]
    pub async fn write_file(&self, path: &str, offset: u64, contents: &[u8]) -> Result<()> {
        let too_large = || Error::FileTooLarge {
            path: path.to_string(),
            offset,
            len: contents.len(),
        };
        let end = offset
            .checked_add(contents.len() as u64)
            .ok_or_else(too_large)?;

        let mut metadata = self
            .store
            .get_file_metadata(path)
            .await?
            .unwrap_or_default();
        let old_size = metadata.contents_size();
        let new_size = end.max(old_size);
        let key_count = self
            .layout
            .checked_next_boundary(new_size)
            .ok_or_else(too_large)?;
        metadata.grow_keys(key_count);

        // Stale bytes may follow the old end inside its stripe. A non-empty
        // write into that same stripe re-encodes it anyway.
        let stripe_size = self.layout.stripe_size();
        if offset > old_size && self.layout.lower_bytes_to_drop(old_size) != 0 {
            let tail = self.layout.spans(old_size, old_size + 1)[0];
            if contents.is_empty() || tail.boundary != self.layout.previous_boundary(offset) {
                let span = StripeSpan {
                    data_end: stripe_size,
                    ..tail
                };
                let zeros = vec![0u8; span.len()];
                self.write_stripe(path, &mut metadata, span, old_size, &zeros)
                    .await?;
            }
        }

        for span in self.layout.spans(offset, end) {
            let src = (span.file_offset + span.data_start as u64 - offset) as usize;
            self.write_stripe(path, &mut metadata, span, old_size, &contents[src..src + span.len()])
                .await?;
        }

        metadata.contents_size = new_size;
        self.store.flush_all().await?;
        self.store.set_file_metadata(path, &metadata).await?;

        info!(
            "Wrote {} bytes to {} at {} (size {} -> {})",
            contents.len(),
            path,
            offset,
            old_size,
            new_size
        );
        Ok(())
    }

    /// Re-encode one stripe with `source` over the span's data range.
    async fn write_stripe(
        &self,
        path: &str,
        metadata: &mut FileMetadata,
        span: StripeSpan,
        old_size: u64,
        source: &[u8],
    ) -> Result<()> {
        let stripe_size = self.layout.stripe_size();
        let parity_size = self.layout.parity_size();
        let total = self.layout.total_size();

        let mut data = vec![0u8; stripe_size];
        let keys = metadata.stripe_keys(path, span.boundary, total)?.to_vec();

        let preserved: Vec<usize> = (0..span.data_start)
            .chain(span.data_end..stripe_size)
            .filter(|&d| span.file_offset + (d as u64) < old_size)
            .collect();
        if !preserved.is_empty() && keys.iter().any(Option::is_some) {
            let wanted: Vec<usize> = preserved.iter().map(|&d| parity_size + d).collect();
            let values = self.preserved_symbols(path, &keys, &wanted).await?;
            for &d in &preserved {
                data[d] = values[parity_size + d];
            }
        }
        data[span.data_range()].copy_from_slice(source);

        let mut parity = vec![0u8; parity_size];
        self.code.encode(&data, &mut parity)?;

        let mut new_keys = Vec::with_capacity(total);
        for (position, &value) in parity.iter().chain(data.iter()).enumerate() {
            new_keys.push(Some(self.store.store_block(value, position).await?));
        }
        metadata
            .stripe_keys_mut(path, span.boundary, total)?
            .copy_from_slice(&new_keys);

        debug!("Encoded stripe {} of {}", span.boundary / total, path);
        Ok(())
    }

    /// Stripe values for preserved positions. Unrecoverable positions read
    /// as zero so writes always go through.
    async fn preserved_symbols(
        &self,
        path: &str,
        keys: &[Option<BlockKey>],
        wanted: &[usize],
    ) -> Result<Vec<u8>> {
        match self.read_stripe(keys, wanted).await {
            Ok(stripe) => Ok(stripe.values),
            Err(e) if e.is_unrecoverable_stripe() => {
                warn!("Zero-filling unrecoverable bytes of {}: {}", path, e);
                let mut values = vec![0u8; self.layout.total_size()];
                let present: Vec<(usize, BlockKey)> = wanted
                    .iter()
                    .filter_map(|&p| keys[p].map(|k| (p, k)))
                    .collect();
                let present_keys: Vec<BlockKey> = present.iter().map(|&(_, k)| k).collect();
                let fetched = self.store.retrieve_blocks(&present_keys).await?;
                for (&(p, _), value) in present.iter().zip(fetched) {
                    values[p] = value.unwrap_or_default();
                }
                Ok(values)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Size
    // =========================================================================

    /// Logical size of a file, 0 if it does not exist
    pub async fn size_of_file(&self, path: &str) -> Result<u64> {
        Ok(self
            .store
            .get_file_metadata(path)
            .await?
            .map(|m| m.contents_size())
            .unwrap_or(0))
    }

    /// Shrink a file to at most `size` bytes. Blocks stay in the backend.
    #[instrument(skip(self))]
    pub async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let Some(mut metadata) = self.store.get_file_metadata(path).await? else {
            return Ok(());
        };
        let new_size = metadata.contents_size().min(size);
        metadata.contents_size = new_size;
        metadata
            .block_keys
            .truncate(self.layout.next_boundary(new_size));
        self.store.set_file_metadata(path, &metadata).await?;
        info!("Truncated {} to {} bytes", path, new_size);
        Ok(())
    }

    // =========================================================================
    // Store Pass-Through
    // =========================================================================

    /// Forget cached blocks and refresh the backend topology
    pub async fn clear_read_cache(&self) -> Result<()> {
        self.store.clear_read_cache().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.store.disconnect().await
    }
}
