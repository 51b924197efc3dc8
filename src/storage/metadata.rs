//! File Metadata
//!
//! Per-file record kept next to the blocks: the logical size and the ordered
//! block keys, laid out stripe by stripe as
//!
//! ```text
//! [stripe 0 parity][stripe 0 data][stripe 1 parity][stripe 1 data] ...
//! ```
//!
//! The last stripe may carry padding symbols so every stripe is complete.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Block Key
// =============================================================================

/// Identifier of one stored symbol.
///
/// `key / buffer_size` is the container index, `key % buffer_size` the slot
/// inside the container, and the container index modulo `total_size` the
/// stripe position the symbol was stored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockKey(pub u64);

impl BlockKey {
    pub fn new(key: u64) -> Self {
        Self(key)
    }

    pub fn container_index(self, buffer_size: usize) -> u64 {
        self.0 / buffer_size as u64
    }

    pub fn slot(self, buffer_size: usize) -> usize {
        (self.0 % buffer_size as u64) as usize
    }

    /// Stripe position, derivable from the key alone
    pub fn position(self, buffer_size: usize, total_size: usize) -> usize {
        (self.container_index(buffer_size) % total_size as u64) as usize
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// File Metadata
// =============================================================================

/// Metadata stored in the backend in parallel to blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Size of the file as seen by the user
    pub contents_size: u64,
    /// Ordered block keys; `None` until the stripe is written
    pub block_keys: Vec<Option<BlockKey>>,
}

impl FileMetadata {
    /// Metadata of an empty file
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents_size(&self) -> u64 {
        self.contents_size
    }

    pub fn block_keys(&self) -> &[Option<BlockKey>] {
        &self.block_keys
    }

    /// Grow the key list with absent keys up to `len` entries
    pub fn grow_keys(&mut self, len: usize) {
        if self.block_keys.len() < len {
            self.block_keys.resize(len, None);
        }
    }

    /// Keys of the stripe starting at `boundary`.
    ///
    /// A short key list is an invariant violation, never patched up.
    pub fn stripe_keys(&self, path: &str, boundary: usize, total_size: usize) -> Result<&[Option<BlockKey>]> {
        self.block_keys
            .get(boundary..boundary + total_size)
            .ok_or_else(|| Error::MetadataInconsistent {
                path: path.to_string(),
                reason: format!(
                    "{} block keys cannot hold stripe at {} (contents size {})",
                    self.block_keys.len(),
                    boundary,
                    self.contents_size
                ),
            })
    }

    /// Mutable keys of the stripe starting at `boundary`
    pub fn stripe_keys_mut(
        &mut self,
        path: &str,
        boundary: usize,
        total_size: usize,
    ) -> Result<&mut [Option<BlockKey>]> {
        let len = self.block_keys.len();
        let contents_size = self.contents_size;
        self.block_keys
            .get_mut(boundary..boundary + total_size)
            .ok_or_else(|| Error::MetadataInconsistent {
                path: path.to_string(),
                reason: format!(
                    "{} block keys cannot hold stripe at {} (contents size {})",
                    len, boundary, contents_size
                ),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_key_layout() {
        let buffer_size = 100;
        let total_size = 3;
        let key = BlockKey::new(742);
        assert_eq!(key.container_index(buffer_size), 7);
        assert_eq!(key.slot(buffer_size), 42);
        assert_eq!(key.position(buffer_size, total_size), 1);
    }

    #[test]
    fn test_grow_and_slice() {
        let mut metadata = FileMetadata::new();
        metadata.grow_keys(6);
        assert_eq!(metadata.block_keys().len(), 6);
        assert!(metadata.block_keys().iter().all(Option::is_none));

        metadata.stripe_keys_mut("f", 3, 3).unwrap()[0] = Some(BlockKey(5));
        assert_eq!(metadata.stripe_keys("f", 3, 3).unwrap()[0], Some(BlockKey(5)));

        // growing never shrinks
        metadata.grow_keys(2);
        assert_eq!(metadata.block_keys().len(), 6);
    }

    #[test]
    fn test_short_key_list_is_inconsistent() {
        let metadata = FileMetadata {
            contents_size: 20,
            block_keys: vec![None; 3],
        };
        let err = metadata.stripe_keys("a/b", 3, 3).unwrap_err();
        assert!(matches!(err, Error::MetadataInconsistent { .. }));
    }

    #[test]
    fn test_json_round_trip() {
        let metadata = FileMetadata {
            contents_size: 291_643_824,
            block_keys: vec![Some(BlockKey(1)), None, Some(BlockKey(u64::MAX))],
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("null"));
        let back: FileMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }
}
