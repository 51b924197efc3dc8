//! Cluster Hash Slots
//!
//! Key layout that pins every container of a stripe position to its own
//! range of cluster hash slots, so losing one node loses at most one position
//! per stripe.
//!
//! # Slot Space
//!
//! Keys hash to one of 16384 slots with CRC16/XMODEM. Only the text inside
//! the first non-empty `{...}` is hashed when present, which lets a key pick
//! its slot through a prefix tag:
//!
//! ```text
//! slot_delta = 16384 / total_size
//!
//! | position 0      | position 1      | ... | position T-1    |
//! 0            delta             2·delta               T·delta
//!
//! slot(index) = position(index) × slot_delta + xxh3(index) mod slot_delta
//! key(index)  = "{" + tag(slot) + "}blocks/" + index
//! ```

use std::io::BufRead;
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};

/// Number of cluster hash slots
pub const SLOT_COUNT: usize = 16384;

const BLOCKS_PREFIX: &str = "blocks/";
const TAG_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_TAG_LEN: usize = 5;

/// CRC16/XMODEM (poly 0x1021, init 0)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Cluster slot of a key, honoring `{tag}` hash tags
pub fn key_hash_slot(key: &[u8]) -> usize {
    let hashed = key
        .iter()
        .position(|&b| b == b'{')
        .and_then(|open| {
            let rest = &key[open + 1..];
            rest.iter()
                .position(|&b| b == b'}')
                .filter(|&close| close > 0)
                .map(|close| &rest[..close])
        })
        .unwrap_or(key);
    crc16(hashed) as usize % SLOT_COUNT
}

// =============================================================================
// Slot Tag Table
// =============================================================================

/// For every slot, a short tag whose hash lands on that slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTagTable {
    tags: Vec<String>,
}

impl SlotTagTable {
    /// Build the table by enumerating short alphanumeric tags
    pub fn generate() -> Result<Self> {
        let mut tags: Vec<Option<String>> = vec![None; SLOT_COUNT];
        let mut remaining = SLOT_COUNT;

        'outer: for len in 1..=MAX_TAG_LEN {
            let mut digits = vec![0usize; len];
            loop {
                let candidate: Vec<u8> = digits.iter().map(|&d| TAG_ALPHABET[d]).collect();
                let slot = crc16(&candidate) as usize % SLOT_COUNT;
                if tags[slot].is_none() {
                    tags[slot] = Some(String::from_utf8_lossy(&candidate).into_owned());
                    remaining -= 1;
                    if remaining == 0 {
                        break 'outer;
                    }
                }

                // odometer increment
                let mut i = len;
                loop {
                    if i == 0 {
                        continue 'outer;
                    }
                    i -= 1;
                    digits[i] += 1;
                    if digits[i] < TAG_ALPHABET.len() {
                        break;
                    }
                    digits[i] = 0;
                }
            }
        }

        let tags = tags
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Internal(format!("{} slots left without a tag", remaining)))?;
        Ok(Self { tags })
    }

    /// Load a table with one tag per line, line `n` being the tag of slot `n`.
    /// Braces around tags are accepted.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut tags = Vec::with_capacity(SLOT_COUNT);
        for (slot, line) in reader.lines().enumerate() {
            let line = line?;
            let tag = line.trim().trim_start_matches('{').trim_end_matches('}');
            if tag.is_empty() {
                return Err(Error::Config(format!("empty tag for slot {}", slot)));
            }
            let actual = crc16(tag.as_bytes()) as usize % SLOT_COUNT;
            if actual != slot {
                return Err(Error::Config(format!(
                    "tag {:?} on line {} hashes to slot {}",
                    tag,
                    slot + 1,
                    actual
                )));
            }
            tags.push(tag.to_string());
        }

        if tags.len() != SLOT_COUNT {
            return Err(Error::Config(format!(
                "slot table has {} entries, expected {}",
                tags.len(),
                SLOT_COUNT
            )));
        }
        Ok(Self { tags })
    }

    /// Tag of a slot
    pub fn tag(&self, slot: usize) -> &str {
        &self.tags[slot % SLOT_COUNT]
    }
}

// =============================================================================
// Position Slot Layout
// =============================================================================

/// Maps container indices to keys inside their position's slot range
#[derive(Debug, Clone)]
pub struct PositionSlotLayout {
    total_size: usize,
    slot_delta: usize,
    tags: Arc<SlotTagTable>,
}

impl PositionSlotLayout {
    pub fn new(total_size: usize, tags: Arc<SlotTagTable>) -> Result<Self> {
        if total_size == 0 || total_size > SLOT_COUNT {
            return Err(Error::Config(format!(
                "total_size {} does not fit the slot space",
                total_size
            )));
        }
        Ok(Self {
            total_size,
            slot_delta: SLOT_COUNT / total_size,
            tags,
        })
    }

    pub fn slot_delta(&self) -> usize {
        self.slot_delta
    }

    /// Slot a container lands on
    pub fn slot_of(&self, index: u64) -> usize {
        let position = (index % self.total_size as u64) as usize;
        let offset = (xxh3_64(&index.to_le_bytes()) % self.slot_delta as u64) as usize;
        position * self.slot_delta + offset
    }

    /// Backend key of a container
    pub fn key_of(&self, index: u64) -> String {
        format!("{{{}}}{}{}", self.tags.tag(self.slot_of(index)), BLOCKS_PREFIX, index)
    }

    /// Container index encoded in a key produced by `key_of`
    pub fn index_of(key: &str) -> Option<u64> {
        let (_, index) = key.split_once(BLOCKS_PREFIX)?;
        index.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::OnceLock;

    fn table() -> Arc<SlotTagTable> {
        static TABLE: OnceLock<Arc<SlotTagTable>> = OnceLock::new();
        TABLE
            .get_or_init(|| Arc::new(SlotTagTable::generate().unwrap()))
            .clone()
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(key_hash_slot(b"foo"), 12182);
    }

    #[test]
    fn test_hash_tags() {
        assert_eq!(key_hash_slot(b"{user1000}.following"), key_hash_slot(b"user1000"));
        assert_eq!(key_hash_slot(b"foo{bar}{zap}"), key_hash_slot(b"bar"));
        // empty tag hashes the whole key
        assert_eq!(key_hash_slot(b"foo{}{bar}"), crc16(b"foo{}{bar}") as usize % SLOT_COUNT);
        assert_eq!(key_hash_slot(b"foo{bar"), key_hash_slot(b"foo{bar"));
    }

    #[test]
    fn test_generated_table_covers_every_slot() {
        let table = table();
        for slot in [0, 1, 777, 8191, SLOT_COUNT - 1] {
            let key = format!("{{{}}}anything", table.tag(slot));
            assert_eq!(key_hash_slot(key.as_bytes()), slot);
        }
    }

    #[test]
    fn test_from_reader() {
        let text: String = (0..SLOT_COUNT)
            .map(|slot| format!("{{{}}}\n", table().tag(slot)))
            .collect();
        let loaded = SlotTagTable::from_reader(Cursor::new(text)).unwrap();
        assert_eq!(&loaded, table().as_ref());

        assert!(SlotTagTable::from_reader(Cursor::new("a\nb\n")).is_err());
    }

    #[test]
    fn test_layout_keeps_positions_apart() {
        let layout = PositionSlotLayout::new(14, table()).unwrap();
        assert_eq!(layout.slot_delta(), 1170);

        for index in 0..200u64 {
            let key = layout.key_of(index);
            let slot = key_hash_slot(key.as_bytes());
            assert_eq!(slot, layout.slot_of(index));
            assert_eq!(slot / layout.slot_delta(), (index % 14) as usize);
            assert_eq!(PositionSlotLayout::index_of(&key), Some(index));
        }
    }
}
