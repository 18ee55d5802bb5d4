use crate::hash::Hash256;
use primitive_types::U256;

/// Per-block difficulty: `max(1, 2^256 / lowBits128(hash))`, where the low
/// 128 bits are the little-endian integer at bytes 0..16 of the full hash.
///
/// A zero low half maps to the maximum representable difficulty; the
/// division by `U256::MAX` approximates the untruncated `2^256` numerator.
pub fn block_diff(hash: &Hash256) -> U256 {
    let bytes = hash.as_bytes();
    let mut le = [0u8; 16];
    le.copy_from_slice(&bytes[..16]);
    let low = u128::from_le_bytes(le);
    if low == 0 {
        return U256::MAX;
    }
    let diff = U256::MAX / U256::from(low);
    diff.max(U256::one())
}

/// Orders difficulty candidates: higher cumulative difficulty wins, ties
/// broken by the lexicographically smaller low hash.
pub fn better_candidate(
    diff_a: U256,
    hashlow_a: &Hash256,
    diff_b: U256,
    hashlow_b: &Hash256,
) -> bool {
    diff_a > diff_b || (diff_a == diff_b && hashlow_a < hashlow_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_low_half_is_max() {
        let mut bytes = [0u8; 32];
        bytes[20] = 0xAB;
        assert_eq!(block_diff(&Hash256::from_bytes(bytes)), U256::MAX);
    }

    #[test]
    fn difficulty_never_below_one() {
        let hash = Hash256::from_bytes([0xFFu8; 32]);
        assert!(block_diff(&hash) >= U256::one());
    }

    #[test]
    fn smaller_low_half_means_higher_difficulty() {
        let mut hard = [0u8; 32];
        hard[0] = 1; // low half = 1
        let mut easy = [0u8; 32];
        easy[..16].fill(0xFF);
        assert!(block_diff(&Hash256::from_bytes(hard)) > block_diff(&Hash256::from_bytes(easy)));
    }

    #[test]
    fn tie_break_prefers_smaller_hash() {
        let a = Hash256::from_le_u64([0, 1, 0, 0]);
        let b = Hash256::from_le_u64([0, 2, 0, 0]);
        let d = U256::from(10u64);
        assert!(better_candidate(d, &a, d, &b));
        assert!(!better_candidate(d, &b, d, &a));
        assert!(better_candidate(U256::from(11u64), &b, d, &a));
    }
}
