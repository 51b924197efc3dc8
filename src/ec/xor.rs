//! XOR Code
//!
//! Single parity symbol equal to the XOR of all data symbols. Any one erased
//! position is the XOR of every other position.

use crate::ec::{check_encode_lengths, check_positions, too_many, ErasureCode};
use crate::error::{Error, Result};

/// Single-parity XOR code
#[derive(Debug, Clone)]
pub struct XorCode {
    stripe_size: usize,
}

impl XorCode {
    /// Create a new XOR code. `parity_size` must be 1.
    pub fn new(stripe_size: usize, parity_size: usize) -> Result<Self> {
        if stripe_size == 0 {
            return Err(Error::InvalidEcConfig(
                "stripe_size must be greater than 0".to_string(),
            ));
        }
        if parity_size != 1 {
            return Err(Error::InvalidEcConfig(format!(
                "XOR code supports exactly one parity symbol, got {}",
                parity_size
            )));
        }
        Ok(Self { stripe_size })
    }
}

impl ErasureCode for XorCode {
    fn stripe_size(&self) -> usize {
        self.stripe_size
    }

    fn parity_size(&self) -> usize {
        1
    }

    fn encode(&self, data: &[u8], parity: &mut [u8]) -> Result<()> {
        check_encode_lengths(self, data, parity)?;
        parity[0] = data.iter().fold(0, |acc, b| acc ^ b);
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
        match erased {
            [] => Ok(()),
            [missing] => {
                let needed = self.total_size() - 1;
                let read = to_read.iter().filter(|&&p| p != *missing).count();
                if read < needed {
                    return Err(too_many(self, erased.len()));
                }
                erased_values[0] = to_read
                    .iter()
                    .filter(|&&p| p != *missing)
                    .fold(0, |acc, &p| acc ^ buffer[p]);
                Ok(())
            }
            _ => Err(too_many(self, erased.len())),
        }
    }

    fn locations_to_read_for_decode(&self, erased: &[usize]) -> Result<Vec<usize>> {
        check_positions(self, erased)?;
        match erased {
            [] | [0] => Ok((1..self.total_size()).collect()),
            [missing] => Ok((0..self.total_size()).filter(|p| p != missing).collect()),
            _ => Err(too_many(self, erased.len())),
        }
    }
}
