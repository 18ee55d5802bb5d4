use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// Number of base units per whole XDAG (a binary fixed point, 2^32).
pub const UNITS_PER_XDAG: u64 = 1 << 32;

/// A currency amount in 2^-32 XDAG base units.
///
/// Addition saturates, subtraction is checked; the ledger never wraps and
/// never goes negative.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct XAmount(u64);

impl XAmount {
    pub const ZERO: XAmount = XAmount(0);

    pub const fn from_raw(units: u64) -> Self {
        Self(units)
    }

    /// A whole number of XDAG.
    pub const fn of_xdag(xdag: u32) -> Self {
        Self((xdag as u64) << 32)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, rhs: XAmount) -> XAmount {
        XAmount(self.0.saturating_add(rhs.0))
    }

    pub fn checked_sub(self, rhs: XAmount) -> Option<XAmount> {
        self.0.checked_sub(rhs.0).map(XAmount)
    }

    /// Halves the amount `n` times, rounding down; zero once shifted out.
    pub fn halved(self, n: u64) -> XAmount {
        if n >= 64 {
            XAmount::ZERO
        } else {
            XAmount(self.0 >> n)
        }
    }

    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl Sum for XAmount {
    fn sum<I: Iterator<Item = XAmount>>(iter: I) -> Self {
        iter.fold(XAmount::ZERO, XAmount::saturating_add)
    }
}

impl fmt::Display for XAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 >> 32;
        let frac = self.0 & 0xffff_ffff;
        // scale the binary fraction to nine decimal places
        let nanos = (frac * 1_000_000_000) >> 32;
        write!(f, "{}.{:09}", whole, nanos)
    }
}

impl fmt::Debug for XAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XAmount({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_xdag_conversion() {
        assert_eq!(XAmount::of_xdag(1).raw(), UNITS_PER_XDAG);
        assert_eq!(XAmount::of_xdag(1024).raw(), 1024 * UNITS_PER_XDAG);
    }

    #[test]
    fn addition_saturates() {
        let max = XAmount::from_raw(u64::MAX);
        assert_eq!(max.saturating_add(XAmount::of_xdag(1)), max);
    }

    #[test]
    fn subtraction_is_checked() {
        let a = XAmount::of_xdag(2);
        let b = XAmount::of_xdag(3);
        assert_eq!(b.checked_sub(a), Some(XAmount::of_xdag(1)));
        assert_eq!(a.checked_sub(b), None);
    }

    #[test]
    fn le_bytes_roundtrip() {
        let a = XAmount::from_raw(0x0102_0304_0506_0708);
        assert_eq!(XAmount::from_le_bytes(a.to_le_bytes()), a);
    }

    #[test]
    fn display_fixed_point() {
        assert_eq!(XAmount::of_xdag(1024).to_string(), "1024.000000000");
        assert_eq!(XAmount::from_raw(1 << 31).to_string(), "0.500000000");
    }

    #[test]
    fn halving_rounds_down() {
        let base = XAmount::of_xdag(1024);
        assert_eq!(base.halved(1), XAmount::of_xdag(512));
        assert_eq!(XAmount::from_raw(3).halved(1), XAmount::from_raw(1));
        assert_eq!(base.halved(64), XAmount::ZERO);
    }
}
