//! Reed-Solomon Code
//!
//! `k + m` code over GF(2^8) using the `reed-solomon-erasure` crate. Each
//! symbol is handed to the library as a one-byte shard.
//!
//! The library orders shards `[data][parity]` while stripes are laid out
//! `[parity][data]`; `shard_index` converts between the two.

use std::sync::Arc;

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::debug;

use crate::ec::{check_encode_lengths, check_positions, too_many, ErasureCode};
use crate::error::{Error, Result};

/// Reed-Solomon erasure code
pub struct ReedSolomonCode {
    /// Reed-Solomon codec instance
    rs: Arc<ReedSolomon>,
    /// Number of data symbols (k)
    stripe_size: usize,
    /// Number of parity symbols (m)
    parity_size: usize,
}

impl std::fmt::Debug for ReedSolomonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReedSolomonCode")
            .field("stripe_size", &self.stripe_size)
            .field("parity_size", &self.parity_size)
            .finish()
    }
}

impl ReedSolomonCode {
    /// Create a new code with the specified k+m configuration
    pub fn new(stripe_size: usize, parity_size: usize) -> Result<Self> {
        if stripe_size == 0 {
            return Err(Error::InvalidEcConfig(
                "stripe_size must be greater than 0".to_string(),
            ));
        }
        if parity_size == 0 {
            return Err(Error::InvalidEcConfig(
                "parity_size must be greater than 0".to_string(),
            ));
        }

        let rs = ReedSolomon::new(stripe_size, parity_size).map_err(|e| {
            Error::InvalidEcConfig(format!("Failed to create Reed-Solomon codec: {}", e))
        })?;

        Ok(Self {
            rs: Arc::new(rs),
            stripe_size,
            parity_size,
        })
    }

    /// Library shard index of a stripe position
    fn shard_index(&self, position: usize) -> usize {
        if position < self.parity_size {
            self.stripe_size + position
        } else {
            position - self.parity_size
        }
    }
}

impl ErasureCode for ReedSolomonCode {
    fn stripe_size(&self) -> usize {
        self.stripe_size
    }

    fn parity_size(&self) -> usize {
        self.parity_size
    }

    fn encode(&self, data: &[u8], parity: &mut [u8]) -> Result<()> {
        check_encode_lengths(self, data, parity)?;

        let mut shards: Vec<Vec<u8>> = data
            .iter()
            .map(|&b| vec![b])
            .chain((0..self.parity_size).map(|_| vec![0u8]))
            .collect();

        self.rs
            .encode(&mut shards)
            .map_err(|e| Error::EcEncodingFailed(format!("Reed-Solomon encoding failed: {}", e)))?;

        for (slot, shard) in parity.iter_mut().zip(&shards[self.stripe_size..]) {
            *slot = shard[0];
        }
        Ok(())
    }

    fn decode(
        &self,
        buffer: &[u8],
        erased: &[usize],
        erased_values: &mut [u8],
        to_read: &[usize],
        _not_to_read: &[usize],
    ) -> Result<()> {
        if erased.is_empty() {
            return Ok(());
        }
        check_positions(self, erased)?;
        check_positions(self, to_read)?;

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; self.total_size()];
        for &position in to_read.iter().filter(|p| !erased.contains(*p)) {
            shards[self.shard_index(position)] = Some(vec![buffer[position]]);
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.stripe_size {
            return Err(too_many(self, self.total_size() - available));
        }

        self.rs
            .reconstruct(&mut shards)
            .map_err(|_| too_many(self, erased.len()))?;

        for (value, &position) in erased_values.iter_mut().zip(erased) {
            *value = shards[self.shard_index(position)]
                .as_ref()
                .map(|shard| shard[0])
                .ok_or_else(|| too_many(self, erased.len()))?;
        }

        debug!(
            "Reconstructed {} symbols from {}/{} available",
            erased.len(),
            available,
            self.total_size()
        );
        Ok(())
    }

    fn locations_to_read_for_decode(&self, erased: &[usize]) -> Result<Vec<usize>> {
        check_positions(self, erased)?;

        let mut is_erased = vec![false; self.total_size()];
        for &position in erased {
            is_erased[position] = true;
        }
        let erased_count = is_erased.iter().filter(|&&e| e).count();
        if erased_count > self.parity_size {
            return Err(too_many(self, erased_count));
        }

        // Prefer data symbols, they are needed by readers anyway
        let data = self.parity_size..self.total_size();
        let parity = 0..self.parity_size;
        let mut locations: Vec<usize> = data
            .chain(parity)
            .filter(|&p| !is_erased[p])
            .take(self.stripe_size)
            .collect();
        locations.sort_unstable();
        Ok(locations)
    }
}
