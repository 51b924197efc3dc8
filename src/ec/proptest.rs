//! Property-Based Tests for Erasure Coding
//!
//! # Test Properties
//!
//! 1. **Fault Tolerance**: any `correction_bound` erasures are recoverable
//! 2. **Read Set Sufficiency**: decoding only ever needs the planned positions
//! 3. **Overflow Detection**: more than `parity_size` erasures always fail
//! 4. **Determinism**: same data always produces the same parity

#![cfg(test)]

use proptest::prelude::*;

use super::{locations_not_to_read, CodeConfig, CodeKind, ErasureCode};

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for generating code configurations of every kind.
fn code_strategy() -> impl Strategy<Value = CodeConfig> {
    prop_oneof![
        (1usize..=8).prop_map(|k| CodeConfig {
            kind: CodeKind::Xor,
            stripe_size: k,
            parity_size: 1,
            local_degree: 1,
        }),
        (1usize..=10, 1usize..=4).prop_map(|(k, m)| CodeConfig {
            kind: CodeKind::ReedSolomon,
            stripe_size: k,
            parity_size: m,
            local_degree: 1,
        }),
        (2usize..=10, 1usize..=3, 2usize..=5).prop_map(|(k, rs, degree)| CodeConfig {
            kind: CodeKind::SimpleRegenerating,
            stripe_size: k,
            parity_size: k.div_ceil(degree) + rs,
            local_degree: degree,
        }),
    ]
}

/// Encode `data` and lay the stripe out as `[parity][data]`.
fn full_stripe(code: &dyn ErasureCode, data: &[u8]) -> Vec<u8> {
    let mut parity = vec![0u8; code.parity_size()];
    code.encode(data, &mut parity).unwrap();
    parity.into_iter().chain(data.iter().copied()).collect()
}

/// Pick `count` distinct positions out of `total` using `seed` values.
fn pick_erasures(total: usize, count: usize, seed: &[usize]) -> Vec<usize> {
    let mut pool: Vec<usize> = (0..total).collect();
    let mut erased = Vec::with_capacity(count);
    for (i, s) in seed.iter().take(count).enumerate() {
        let idx = s % (total - i);
        erased.push(pool.swap_remove(idx));
    }
    erased
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: any erasure pattern within the correction bound decodes.
    #[test]
    fn prop_recovers_within_bound(
        config in code_strategy(),
        data in prop::collection::vec(any::<u8>(), 10),
        seed in prop::collection::vec(any::<usize>(), 16),
        count in 0usize..=4,
    ) {
        let code = config.build()?;
        let data = &data[..code.stripe_size()];
        let stripe = full_stripe(code.as_ref(), data);
        let count = count.min(code.correction_bound());
        let erased = pick_erasures(code.total_size(), count, &seed);

        let to_read = code.locations_to_read_for_decode(&erased)?;
        prop_assert!(to_read.iter().all(|p| !erased.contains(p)));

        // Only planned positions are populated
        let mut buffer = vec![0u8; code.total_size()];
        for &p in &to_read {
            buffer[p] = stripe[p];
        }
        let mut recovered = vec![0u8; erased.len()];
        let not_to_read = locations_not_to_read(code.total_size(), &to_read);
        code.decode(&buffer, &erased, &mut recovered, &to_read, &not_to_read)?;

        let expected: Vec<u8> = erased.iter().map(|&p| stripe[p]).collect();
        prop_assert_eq!(recovered, expected, "config {:?}, erased {:?}", config, erased);
    }

    /// Property: more erasures than parity symbols can never be planned.
    #[test]
    fn prop_rejects_beyond_parity(
        config in code_strategy(),
        seed in prop::collection::vec(any::<usize>(), 16),
    ) {
        let code = config.build()?;
        let count = code.parity_size() + 1;
        prop_assume!(count <= code.total_size());
        let erased = pick_erasures(code.total_size(), count, &seed);

        let result = code.locations_to_read_for_decode(&erased);
        prop_assert!(result.unwrap_err().is_unrecoverable_stripe());
    }

    /// Property: encoding is deterministic.
    #[test]
    fn prop_encode_deterministic(
        config in code_strategy(),
        data in prop::collection::vec(any::<u8>(), 10),
    ) {
        let code = config.build()?;
        let data = &data[..code.stripe_size()];
        prop_assert_eq!(full_stripe(code.as_ref(), data), full_stripe(code.as_ref(), data));
    }
}
