//! Null Code
//!
//! Stores data symbols only. Useful to measure the cost of the other codes.

use crate::ec::{check_encode_lengths, check_positions, too_many, ErasureCode};
use crate::error::{Error, Result};

/// Code without any parity
#[derive(Debug, Clone)]
pub struct NullCode {
    stripe_size: usize,
}

impl NullCode {
    pub fn new(stripe_size: usize) -> Result<Self> {
        if stripe_size == 0 {
            return Err(Error::InvalidEcConfig(
                "stripe_size must be greater than 0".to_string(),
            ));
        }
        Ok(Self { stripe_size })
    }
}

impl ErasureCode for NullCode {
    fn stripe_size(&self) -> usize {
        self.stripe_size
    }

    fn parity_size(&self) -> usize {
        0
    }

    fn encode(&self, data: &[u8], parity: &mut [u8]) -> Result<()> {
        check_encode_lengths(self, data, parity)
    }

    fn decode(
        &self,
        _buffer: &[u8],
        erased: &[usize],
        _erased_values: &mut [u8],
        _to_read: &[usize],
        _not_to_read: &[usize],
    ) -> Result<()> {
        if erased.is_empty() {
            Ok(())
        } else {
            Err(too_many(self, erased.len()))
        }
    }

    fn locations_to_read_for_decode(&self, erased: &[usize]) -> Result<Vec<usize>> {
        check_positions(self, erased)?;
        if !erased.is_empty() {
            return Err(too_many(self, erased.len()));
        }
        Ok((0..self.stripe_size).collect())
    }
}
