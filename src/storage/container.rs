//! Blocks Container
//!
//! Fixed-capacity aggregation of same-position symbols, stored in the backend
//! as one payload instead of one round-trip per symbol.
//!
//! # Wire Format
//!
//! ```text
//! [capacity: u32 LE][count: u32 LE][count × symbol: u8]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const HEADER_LEN: usize = 8;

/// Ordered, bounded sequence of symbols
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocksContainer {
    capacity: usize,
    symbols: Vec<u8>,
}

impl BlocksContainer {
    /// Create an empty container
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            symbols: Vec::with_capacity(capacity),
        }
    }

    /// Declared capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored symbols
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.symbols.len() >= self.capacity
    }

    /// Symbol at `slot`, if it was stored
    pub fn get(&self, slot: usize) -> Option<u8> {
        self.symbols.get(slot).copied()
    }

    /// Append a symbol. Returns false if the container is already full.
    pub fn push(&mut self, symbol: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.symbols.push(symbol);
        true
    }

    /// Serialize to the wire format
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.symbols.len());
        buf.put_u32_le(self.capacity as u32);
        buf.put_u32_le(self.symbols.len() as u32);
        buf.put_slice(&self.symbols);
        buf.freeze()
    }

    /// Deserialize from the wire format. `index` is only used in errors.
    pub fn decode(index: u64, mut payload: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptContainer { index, reason };

        if payload.len() < HEADER_LEN {
            return Err(corrupt(format!("payload of {} bytes has no header", payload.len())));
        }
        let capacity = payload.get_u32_le() as usize;
        let count = payload.get_u32_le() as usize;

        if count > capacity {
            return Err(corrupt(format!("count {} exceeds capacity {}", count, capacity)));
        }
        if payload.remaining() != count {
            return Err(corrupt(format!(
                "expected {} symbols, found {} bytes",
                count,
                payload.remaining()
            )));
        }

        Ok(Self {
            capacity,
            symbols: payload.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_until_full() {
        let mut container = BlocksContainer::new(3);
        assert!(container.is_empty());
        assert!(container.push(1));
        assert!(container.push(2));
        assert!(!container.is_full());
        assert!(container.push(3));
        assert!(container.is_full());
        assert!(!container.push(4));
        assert_eq!(container.len(), 3);
        assert_eq!(container.get(1), Some(2));
        assert_eq!(container.get(3), None);
    }

    #[test]
    fn test_wire_layout() {
        let mut container = BlocksContainer::new(4);
        container.push(0xAA);
        container.push(0x01);

        let payload = container.encode();
        assert_eq!(&payload[..], &[4, 0, 0, 0, 2, 0, 0, 0, 0xAA, 0x01]);

        let decoded = BlocksContainer::decode(7, &payload).unwrap();
        assert_eq!(decoded, container);
        assert_eq!(decoded.capacity(), 4);
    }

    #[test]
    fn test_partial_container_keeps_capacity() {
        let decoded = BlocksContainer::decode(0, &BlocksContainer::new(9).encode()).unwrap();
        assert_eq!(decoded.capacity(), 9);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_rejects_corruption() {
        assert!(BlocksContainer::decode(1, &[1, 0, 0]).is_err());
        // count > capacity
        assert!(BlocksContainer::decode(1, &[1, 0, 0, 0, 2, 0, 0, 0, 5, 6]).is_err());
        // truncated body
        assert!(BlocksContainer::decode(1, &[4, 0, 0, 0, 2, 0, 0, 0, 5]).is_err());
        // trailing bytes
        let err = BlocksContainer::decode(3, &[4, 0, 0, 0, 1, 0, 0, 0, 5, 6]).unwrap_err();
        assert!(matches!(err, Error::CorruptContainer { index: 3, .. }));
    }
}
