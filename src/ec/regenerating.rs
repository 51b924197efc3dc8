//! Simple Regenerating Code
//!
//! Locally repairable code: the data symbols are split into groups of
//! `local_degree` symbols, each group carries one XOR parity, and the
//! remaining parity budget holds Reed-Solomon parities over all data.
//!
//! ```text
//! [ local parities | RS parities | data group 0 | data group 1 | ... ]
//! ```
//!
//! A single erasure inside a group is rebuilt from the rest of the group, so
//! repairs read `local_degree` symbols instead of `stripe_size`. Anything the
//! groups cannot fix falls back to the Reed-Solomon parities, after which the
//! missing local parities are recomputed from their groups.
//!
//! Planning and decoding share one recovery closure (`propagate`): the
//! planner runs it symbolically to shrink the read set, the decoder runs it on
//! real values.

use std::sync::Arc;

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::ec::{check_encode_lengths, check_positions, too_many, ErasureCode};
use crate::error::{Error, Result};

/// Locally repairable code with XOR groups and Reed-Solomon global parities
pub struct SimpleRegeneratingCode {
    rs: Arc<ReedSolomon>,
    stripe_size: usize,
    parity_size: usize,
    local_degree: usize,
    groups: usize,
}

impl std::fmt::Debug for SimpleRegeneratingCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleRegeneratingCode")
            .field("stripe_size", &self.stripe_size)
            .field("parity_size", &self.parity_size)
            .field("local_degree", &self.local_degree)
            .field("groups", &self.groups)
            .finish()
    }
}

impl SimpleRegeneratingCode {
    /// Create a new code.
    ///
    /// `parity_size` must leave room for at least one Reed-Solomon parity
    /// after the `ceil(stripe_size / local_degree)` local parities.
    pub fn new(stripe_size: usize, parity_size: usize, local_degree: usize) -> Result<Self> {
        if stripe_size == 0 || local_degree == 0 {
            return Err(Error::InvalidEcConfig(
                "stripe_size and local_degree must be greater than 0".to_string(),
            ));
        }
        let groups = stripe_size.div_ceil(local_degree);
        if parity_size <= groups {
            return Err(Error::InvalidEcConfig(format!(
                "parity_size {} must exceed the {} local parities",
                parity_size, groups
            )));
        }

        let rs = ReedSolomon::new(stripe_size, parity_size - groups).map_err(|e| {
            Error::InvalidEcConfig(format!("Failed to create Reed-Solomon codec: {}", e))
        })?;

        Ok(Self {
            rs: Arc::new(rs),
            stripe_size,
            parity_size,
            local_degree,
            groups,
        })
    }

    /// Number of local groups
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Number of Reed-Solomon parities
    pub fn global_parities(&self) -> usize {
        self.parity_size - self.groups
    }

    /// Data positions of a local group
    fn group_data(&self, group: usize) -> std::ops::Range<usize> {
        let start = group * self.local_degree;
        let end = (start + self.local_degree).min(self.stripe_size);
        (self.parity_size + start)..(self.parity_size + end)
    }

    /// Local parity position followed by the group's data positions
    fn group_members(&self, group: usize) -> impl Iterator<Item = usize> {
        std::iter::once(group).chain(self.group_data(group))
    }

    /// Positions covered by the Reed-Solomon code, in library shard order
    fn global_positions(&self) -> impl Iterator<Item = usize> {
        (self.parity_size..self.total_size()).chain(self.groups..self.parity_size)
    }

    /// Fill in unknown positions until every target is known or nothing
    /// more can be derived. With `symbolic`, values are placeholders.
    fn propagate(&self, values: &mut [Option<u8>], targets: &[usize], symbolic: bool) -> Result<()> {
        loop {
            if targets.iter().all(|&t| values[t].is_some()) {
                return Ok(());
            }
            let mut progress = false;

            for group in 0..self.groups {
                let mut missing = self.group_members(group).filter(|&p| values[p].is_none());
                let (Some(only), None) = (missing.next(), missing.next()) else {
                    continue;
                };
                let xor = self
                    .group_members(group)
                    .filter(|&p| p != only)
                    .fold(0u8, |acc, p| acc ^ values[p].unwrap_or(0));
                values[only] = Some(xor);
                progress = true;
            }

            let global: Vec<usize> = self.global_positions().collect();
            let known = global.iter().filter(|&&p| values[p].is_some()).count();
            if known < global.len() && known >= self.stripe_size {
                if symbolic {
                    for &p in &global {
                        values[p].get_or_insert(0);
                    }
                } else {
                    let mut shards: Vec<Option<Vec<u8>>> =
                        global.iter().map(|&p| values[p].map(|v| vec![v])).collect();
                    self.rs
                        .reconstruct(&mut shards)
                        .map_err(|_| too_many(self, global.len() - known))?;
                    for (&p, shard) in global.iter().zip(shards) {
                        if let Some(shard) = shard {
                            values[p] = Some(shard[0]);
                        }
                    }
                }
                progress = true;
            }

            if !progress {
                return Ok(());
            }
        }
    }

    fn recoverable_from(&self, readable: &[bool], erased: &[usize]) -> bool {
        let mut values: Vec<Option<u8>> = readable.iter().map(|&r| r.then_some(0)).collect();
        self.propagate(&mut values, erased, true).is_ok()
            && erased.iter().all(|&p| values[p].is_some())
    }
}

impl ErasureCode for SimpleRegeneratingCode {
    fn stripe_size(&self) -> usize {
        self.stripe_size
    }

    fn parity_size(&self) -> usize {
        self.parity_size
    }

    fn correction_bound(&self) -> usize {
        self.global_parities()
    }

    fn encode(&self, data: &[u8], parity: &mut [u8]) -> Result<()> {
        check_encode_lengths(self, data, parity)?;

        for group in 0..self.groups {
            parity[group] = self
                .group_data(group)
                .fold(0u8, |acc, p| acc ^ data[p - self.parity_size]);
        }

        let mut shards: Vec<Vec<u8>> = data
            .iter()
            .map(|&b| vec![b])
            .chain((0..self.global_parities()).map(|_| vec![0u8]))
            .collect();
        self.rs
            .encode(&mut shards)
            .map_err(|e| Error::EcEncodingFailed(format!("Reed-Solomon encoding failed: {}", e)))?;

        for (slot, shard) in parity[self.groups..]
            .iter_mut()
            .zip(&shards[self.stripe_size..])
        {
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

        let mut values: Vec<Option<u8>> = vec![None; self.total_size()];
        for &p in to_read.iter().filter(|p| !erased.contains(*p)) {
            values[p] = Some(buffer[p]);
        }

        self.propagate(&mut values, erased, false)?;

        for (slot, &p) in erased_values.iter_mut().zip(erased) {
            *slot = values[p].ok_or_else(|| too_many(self, erased.len()))?;
        }
        Ok(())
    }

    fn locations_to_read_for_decode(&self, erased: &[usize]) -> Result<Vec<usize>> {
        check_positions(self, erased)?;
        if erased.is_empty() {
            return Ok((self.parity_size..self.total_size()).collect());
        }

        let mut readable = vec![true; self.total_size()];
        for &p in erased {
            readable[p] = false;
        }
        if !self.recoverable_from(&readable, erased) {
            let count = readable.iter().filter(|&&r| !r).count();
            return Err(too_many(self, count));
        }

        // Drop global parities first, then local parities, then data
        let drop_order = (self.groups..self.parity_size)
            .chain(0..self.groups)
            .chain(self.parity_size..self.total_size());
        for candidate in drop_order {
            if !readable[candidate] {
                continue;
            }
            readable[candidate] = false;
            if !self.recoverable_from(&readable, erased) {
                readable[candidate] = true;
            }
        }

        Ok((0..self.total_size()).filter(|&p| readable[p]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::locations_not_to_read;

    fn stripe(code: &SimpleRegeneratingCode, data: &[u8]) -> Vec<u8> {
        let mut parity = vec![0u8; code.parity_size()];
        code.encode(data, &mut parity).unwrap();
        parity.into_iter().chain(data.iter().copied()).collect()
    }

    fn decode(code: &SimpleRegeneratingCode, full: &[u8], erased: &[usize]) -> Result<Vec<u8>> {
        let to_read = code.locations_to_read_for_decode(erased)?;
        let mut buffer = vec![0u8; full.len()];
        for &p in &to_read {
            buffer[p] = full[p];
        }
        let mut out = vec![0u8; erased.len()];
        code.decode(
            &buffer,
            erased,
            &mut out,
            &to_read,
            &locations_not_to_read(full.len(), &to_read),
        )?;
        Ok(out)
    }

    #[test]
    fn test_layout() {
        let code = SimpleRegeneratingCode::new(10, 6, 5).unwrap();
        assert_eq!(code.groups(), 2);
        assert_eq!(code.global_parities(), 4);
        assert_eq!(code.correction_bound(), 4);
        assert_eq!(code.group_data(0), 6..11);
        assert_eq!(code.group_data(1), 11..16);
    }

    #[test]
    fn test_invalid_config() {
        assert!(SimpleRegeneratingCode::new(10, 2, 5).is_err());
        assert!(SimpleRegeneratingCode::new(10, 6, 0).is_err());
        assert!(SimpleRegeneratingCode::new(0, 6, 5).is_err());
    }

    #[test]
    fn test_local_parity_is_group_xor() {
        let code = SimpleRegeneratingCode::new(4, 3, 2).unwrap();
        let full = stripe(&code, &[1, 2, 4, 8]);
        assert_eq!(full[0], 1 ^ 2);
        assert_eq!(full[1], 4 ^ 8);
    }

    #[test]
    fn test_single_erasure_reads_only_its_group() {
        let code = SimpleRegeneratingCode::new(10, 6, 5).unwrap();
        let locations = code.locations_to_read_for_decode(&[7]).unwrap();
        assert_eq!(locations, vec![0, 6, 8, 9, 10]);

        let data: Vec<u8> = (0..10).map(|i| 200 - i * 11).collect();
        let full = stripe(&code, &data);
        assert_eq!(decode(&code, &full, &[7]).unwrap(), vec![full[7]]);
    }

    #[test]
    fn test_double_erasure_in_group_uses_global_parities() {
        let code = SimpleRegeneratingCode::new(10, 6, 5).unwrap();
        let data: Vec<u8> = (0..10u32).map(|i| (i * 31 + 3) as u8).collect();
        let full = stripe(&code, &data);

        let erased = [6, 8];
        let locations = code.locations_to_read_for_decode(&erased).unwrap();
        assert_eq!(locations.len(), 10);
        assert_eq!(
            decode(&code, &full, &erased).unwrap(),
            vec![full[6], full[8]]
        );
    }

    #[test]
    fn test_any_four_erasures_recover() {
        let code = SimpleRegeneratingCode::new(10, 6, 5).unwrap();
        let data: Vec<u8> = (0..10).map(|i| (i * 97 + 13) as u8).collect();
        let full = stripe(&code, &data);

        for erased in [[0, 1, 2, 3], [6, 7, 8, 9], [0, 6, 11, 15], [4, 5, 10, 12]] {
            let expected: Vec<u8> = erased.iter().map(|&p| full[p]).collect();
            assert_eq!(decode(&code, &full, &erased).unwrap(), expected);
        }
    }

    #[test]
    fn test_five_erasures_in_one_group_fail() {
        let code = SimpleRegeneratingCode::new(10, 6, 5).unwrap();
        let err = code
            .locations_to_read_for_decode(&[6, 7, 8, 9, 10])
            .unwrap_err();
        assert!(err.is_unrecoverable_stripe());
    }
}
