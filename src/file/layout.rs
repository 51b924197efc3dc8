//! Stripe Layout
//!
//! Boundary arithmetic between byte offsets in a file and indices in its
//! block-key list. Each stripe covers `stripe_size` bytes of contents and
//! `total_size` keys:
//!
//! ```text
//! bytes:  [0 ......... k)[k ........ 2k)[2k ...
//! keys:   [0 ... T)      [T ... 2T)     [2T ...
//! ```

use std::ops::Range;

/// Largest block-key list a single file may carry
pub const MAX_BLOCK_KEYS: usize = 1 << 27;

/// One stripe touched by a byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeSpan {
    /// Index of the stripe's first key
    pub boundary: usize,
    /// Offset of the stripe's first byte in the file
    pub file_offset: u64,
    /// Data bytes of the stripe inside the requested range
    pub data_start: usize,
    pub data_end: usize,
}

impl StripeSpan {
    pub fn data_range(&self) -> Range<usize> {
        self.data_start..self.data_end
    }

    pub fn len(&self) -> usize {
        self.data_end - self.data_start
    }

    pub fn is_empty(&self) -> bool {
        self.data_end == self.data_start
    }
}

/// Boundary arithmetic for one code geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeLayout {
    stripe_size: usize,
    total_size: usize,
}

impl StripeLayout {
    pub fn new(stripe_size: usize, parity_size: usize) -> Self {
        Self {
            stripe_size,
            total_size: stripe_size + parity_size,
        }
    }

    pub fn stripe_size(&self) -> usize {
        self.stripe_size
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn parity_size(&self) -> usize {
        self.total_size - self.stripe_size
    }

    /// First key index after the stripe containing byte `i - 1`
    pub fn next_boundary(&self, i: u64) -> usize {
        i.div_ceil(self.stripe_size as u64) as usize * self.total_size
    }

    /// `next_boundary(i)`, or `None` when it overflows or exceeds
    /// `MAX_BLOCK_KEYS`
    pub fn checked_next_boundary(&self, i: u64) -> Option<usize> {
        let stripes = usize::try_from(i.div_ceil(self.stripe_size as u64)).ok()?;
        stripes
            .checked_mul(self.total_size)
            .filter(|&keys| keys <= MAX_BLOCK_KEYS)
    }

    /// First key index of the stripe containing byte `i`
    pub fn previous_boundary(&self, i: u64) -> usize {
        (i / self.stripe_size as u64) as usize * self.total_size
    }

    /// Bytes of the stripe containing `i` that precede `i`
    pub fn lower_bytes_to_drop(&self, i: u64) -> usize {
        (i % self.stripe_size as u64) as usize
    }

    /// Bytes of the last stripe that follow an exclusive end `i`
    pub fn higher_bytes_to_drop(&self, i: u64) -> usize {
        let k = self.stripe_size as u64;
        if i == 0 {
            self.stripe_size
        } else if i % k == 0 {
            0
        } else {
            (k - i % k) as usize
        }
    }

    /// File offset of the first byte of the stripe starting at `boundary`
    pub fn stripe_offset(&self, boundary: usize) -> u64 {
        (boundary / self.total_size) as u64 * self.stripe_size as u64
    }

    /// Stripes touched by `[offset, end)`, in increasing order
    pub fn spans(&self, offset: u64, end: u64) -> Vec<StripeSpan> {
        if end <= offset {
            return Vec::new();
        }
        let first = self.previous_boundary(offset);
        let last = self.previous_boundary(end - 1);

        (first..=last)
            .step_by(self.total_size)
            .map(|boundary| {
                let data_start = if boundary == first {
                    self.lower_bytes_to_drop(offset)
                } else {
                    0
                };
                let data_end = if boundary == last {
                    self.stripe_size - self.higher_bytes_to_drop(end)
                } else {
                    self.stripe_size
                };
                StripeSpan {
                    boundary,
                    file_offset: self.stripe_offset(boundary),
                    data_start,
                    data_end,
                }
            })
            .collect()
    }
}
