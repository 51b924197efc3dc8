//! File Module
//!
//! Erasure-coded files over a block store.
//!
//! - **Layout** (`layout.rs`): byte offset ↔ block-key boundary arithmetic.
//! - **Encoder/Decoder** (`encoder_decoder.rs`): read, write, truncate.
//! - **Repair** (`repair.rs`): rebuild lost blocks per file or store-wide.

pub mod encoder_decoder;
pub mod layout;
pub mod repair;

pub use encoder_decoder::FileEncoderDecoder;
pub use layout::{StripeLayout, StripeSpan, MAX_BLOCK_KEYS};
pub use repair::{RepairReport, RepairSummary};
