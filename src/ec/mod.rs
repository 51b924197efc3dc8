//! Erasure Coding Module
//!
//! Byte-symbol erasure codes used by the file layer to protect each stripe.
//!
//! # Stripe Layout
//!
//! ```text
//! position:  0 ........ parity_size-1 | parity_size ........ total_size-1
//!            [   parity symbols       ][        data symbols          ]
//! ```
//!
//! # Components
//!
//! - **Null** (`null.rs`): no redundancy, used as a baseline.
//! - **XOR** (`xor.rs`): single parity, any one erasure.
//! - **Reed-Solomon** (`reed_solomon.rs`): `k + m` code backed by the
//!   `reed-solomon-erasure` crate, any `m` erasures.
//! - **Simple Regenerating** (`regenerating.rs`): locally repairable code
//!   where a single erasure is rebuilt from its local group only.
//!
//! Every code separates *planning* (`locations_to_read_for_decode`) from
//! *decoding*, so callers only fetch the symbols a decode actually needs.

pub mod null;
pub mod reed_solomon;
pub mod regenerating;
pub mod xor;

#[cfg(test)]
mod proptest;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use null::NullCode;
pub use reed_solomon::ReedSolomonCode;
pub use regenerating::SimpleRegeneratingCode;
pub use xor::XorCode;

/// Bits per symbol. Only byte symbols are supported.
pub const SYMBOL_SIZE: usize = 8;

// =============================================================================
// Erasure Code Contract
// =============================================================================

/// Algebraic contract shared by all codes.
///
/// Positions `[0, parity_size)` hold parity and `[parity_size, total_size)`
/// hold data.
pub trait ErasureCode: Send + Sync + fmt::Debug {
    /// Number of data symbols per stripe
    fn stripe_size(&self) -> usize;

    /// Number of parity symbols per stripe
    fn parity_size(&self) -> usize;

    /// Bits per symbol
    fn symbol_size(&self) -> usize {
        SYMBOL_SIZE
    }

    /// Interleave width
    fn total_size(&self) -> usize {
        self.stripe_size() + self.parity_size()
    }

    /// Number of erasures per stripe that are always recoverable
    fn correction_bound(&self) -> usize {
        self.parity_size()
    }

    /// Compute `parity_size` parity symbols from `stripe_size` data symbols.
    fn encode(&self, data: &[u8], parity: &mut [u8]) -> Result<()>;

    /// Recover the values of `erased` into `erased_values`, in the same order.
    ///
    /// `buffer` spans all `total_size` positions but only the entries listed
    /// in `to_read` are populated; `not_to_read` must not be looked at.
    fn decode(
        &self,
        buffer: &[u8],
        erased: &[usize],
        erased_values: &mut [u8],
        to_read: &[usize],
        not_to_read: &[usize],
    ) -> Result<()>;

    /// Sorted set of surviving positions needed to rebuild every erased one.
    fn locations_to_read_for_decode(&self, erased: &[usize]) -> Result<Vec<usize>>;
}

/// Positions in `[0, total)` that are not part of `to_read`.
pub fn locations_not_to_read(total: usize, to_read: &[usize]) -> Vec<usize> {
    let mut read = vec![false; total];
    for &p in to_read {
        if p < total {
            read[p] = true;
        }
    }
    (0..total).filter(|&p| !read[p]).collect()
}

/// Validate an erased-location list against a code's interleave width.
pub(crate) fn check_positions(code: &dyn ErasureCode, positions: &[usize]) -> Result<()> {
    let total_size = code.total_size();
    match positions.iter().find(|&&p| p >= total_size) {
        Some(&position) => Err(Error::InvalidPosition {
            position,
            total_size,
        }),
        None => Ok(()),
    }
}

/// Validate buffer lengths passed to `encode`.
pub(crate) fn check_encode_lengths(code: &dyn ErasureCode, data: &[u8], parity: &[u8]) -> Result<()> {
    if data.len() != code.stripe_size() || parity.len() != code.parity_size() {
        return Err(Error::EcEncodingFailed(format!(
            "Expected {}+{} symbols, got {}+{}",
            code.stripe_size(),
            code.parity_size(),
            data.len(),
            parity.len()
        )));
    }
    Ok(())
}

pub(crate) fn too_many(code: &dyn ErasureCode, erased: usize) -> Error {
    Error::TooManyErasedLocations {
        erased,
        correctable: code.correction_bound(),
    }
}

// =============================================================================
// Configuration / Factory
// =============================================================================

/// Which code to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CodeKind {
    Null,
    Xor,
    ReedSolomon,
    SimpleRegenerating,
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeKind::Null => write!(f, "null"),
            CodeKind::Xor => write!(f, "xor"),
            CodeKind::ReedSolomon => write!(f, "reed-solomon"),
            CodeKind::SimpleRegenerating => write!(f, "simple-regenerating"),
        }
    }
}

/// Parameters of an erasure code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeConfig {
    /// Code variant
    pub kind: CodeKind,
    /// Data symbols per stripe
    pub stripe_size: usize,
    /// Parity symbols per stripe
    pub parity_size: usize,
    /// Data symbols per local group (simple regenerating only)
    pub local_degree: usize,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            kind: CodeKind::ReedSolomon,
            stripe_size: 10,
            parity_size: 4,
            local_degree: 5,
        }
    }
}

impl CodeConfig {
    /// Build the configured code.
    pub fn build(&self) -> Result<Arc<dyn ErasureCode>> {
        let code: Arc<dyn ErasureCode> = match self.kind {
            CodeKind::Null => Arc::new(NullCode::new(self.stripe_size)?),
            CodeKind::Xor => Arc::new(XorCode::new(self.stripe_size, self.parity_size)?),
            CodeKind::ReedSolomon => {
                Arc::new(ReedSolomonCode::new(self.stripe_size, self.parity_size)?)
            }
            CodeKind::SimpleRegenerating => Arc::new(SimpleRegeneratingCode::new(
                self.stripe_size,
                self.parity_size,
                self.local_degree,
            )?),
        };
        Ok(code)
    }
}
