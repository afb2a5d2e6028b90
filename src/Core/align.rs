// Alignment helpers for the ring's offset arithmetic.

use snafu::ensure;

use crate::error::{self, Result};

/// Smallest alignment the ring accepts; every header field is a `u32`.
pub const MIN_ALIGNMENT: u32 = 4;

/// Largest alignment that still fits the 5-bit field of the control block flags.
pub const MAX_ALIGNMENT: u32 = 128;

/// A validated power-of-two alignment in `MIN_ALIGNMENT..=MAX_ALIGNMENT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Alignment(u32);

impl Alignment {
    pub const DEFAULT: Alignment = Alignment(MIN_ALIGNMENT);

    pub fn new(value: u32) -> Result<Self> {
        ensure!(
            value.is_power_of_two() && (MIN_ALIGNMENT..=MAX_ALIGNMENT).contains(&value),
            error::InvalidArgumentSnafu {
                detail: format!(
                    "alignment {} must be a power of two between {} and {}",
                    value, MIN_ALIGNMENT, MAX_ALIGNMENT
                ),
            }
        );
        Ok(Self(value))
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn log2(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Inverse of [`Alignment::log2`], used when decoding the flags byte.
    pub fn from_log2(shift: u32) -> Result<Self> {
        ensure!(
            shift < u32::BITS,
            error::InvalidArgumentSnafu {
                detail: format!("alignment shift {} out of range", shift),
            }
        );
        Self::new(1u32 << shift)
    }

    #[inline]
    pub const fn aligned_size(self, n: u32) -> u32 {
        aligned_size(n, self.0)
    }

    /// Wide variant for payload lengths that may not fit `u32` once padded.
    #[inline]
    pub const fn aligned_size_u64(self, n: u64) -> u64 {
        let a = self.0 as u64;
        n + ((a - (n % a)) % a)
    }

    #[inline]
    pub const fn align_down(self, n: usize) -> usize {
        n & !(self.0 as usize - 1)
    }

    #[inline]
    pub fn is_aligned_ptr(self, ptr: *const u8) -> bool {
        (ptr as usize) % self.0 as usize == 0
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Rounds `n` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two; `n + ((A - n % A) % A)` is kept in
/// this form so it also reads as the padding added after a payload.
#[inline]
pub const fn aligned_size(n: u32, alignment: u32) -> u32 {
    n + ((alignment - (n % alignment)) % alignment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_alignment() {
        assert_eq!(aligned_size(0, 4), 0);
        assert_eq!(aligned_size(1, 4), 4);
        assert_eq!(aligned_size(4, 4), 4);
        assert_eq!(aligned_size(5, 4), 8);
        assert_eq!(aligned_size(20, 8), 24);
        assert_eq!(aligned_size(129, 64), 192);
    }

    #[test]
    fn rejects_bad_alignments() {
        assert!(Alignment::new(0).is_err());
        assert!(Alignment::new(2).is_err());
        assert!(Alignment::new(12).is_err());
        assert!(Alignment::new(256).is_err());
        assert_eq!(Alignment::new(16).unwrap().get(), 16);
    }

    #[test]
    fn log2_round_trips() {
        for value in [4u32, 8, 16, 32, 64, 128] {
            let alignment = Alignment::new(value).unwrap();
            assert_eq!(Alignment::from_log2(alignment.log2()).unwrap(), alignment);
        }
    }

    #[test]
    fn align_down_truncates() {
        let alignment = Alignment::new(8).unwrap();
        assert_eq!(alignment.align_down(108), 104);
        assert_eq!(alignment.align_down(128), 128);
    }
}
