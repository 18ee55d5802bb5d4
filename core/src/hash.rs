use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash as StdHash;

pub const HASH_SIZE: usize = 32;

/// A 256-bit block identifier.
///
/// Two views coexist: the full hash, whose first 8 bytes carry the block's
/// transport tag, and the low hash returned by [`Hash256::low`] with those
/// 8 bytes zeroed. Only the low hash identifies a block in the store.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The canonical store key: the full hash with the 8-byte tag zeroed.
    pub fn low(&self) -> Hash256 {
        let mut out = self.0;
        out[..8].fill(0);
        Hash256(out)
    }

    /// Whether the tag bytes are already zeroed.
    pub fn is_low(&self) -> bool {
        self.0[..8].iter().all(|b| *b == 0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// The 24-byte tail shared by the full and low views; link fields carry
    /// exactly these bytes.
    pub fn tail(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out.copy_from_slice(&self.0[8..]);
        out
    }

    /// Rebuilds a low hash from a link field's 24-byte tail.
    pub fn from_tail(tail: &[u8; 24]) -> Hash256 {
        let mut out = [0u8; 32];
        out[8..].copy_from_slice(tail);
        Hash256(out)
    }

    pub fn try_from_slice(slice: &[u8]) -> Result<Self, std::array::TryFromSliceError> {
        let array: [u8; 32] = slice.try_into()?;
        Ok(Self(array))
    }

    /// Constructs a hash from four little-endian u64 words (test fixtures).
    pub const fn from_le_u64(parts: [u64; 4]) -> Self {
        let mut bytes = [0u8; 32];
        let mut i = 0;
        while i < 4 {
            let le = parts[i].to_le_bytes();
            let mut j = 0;
            while j < 8 {
                bytes[i * 8 + j] = le[j];
                j += 1;
            }
            i += 1;
        }
        Self(bytes)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }
}

impl From<Hash256> for [u8; 32] {
    fn from(h: Hash256) -> Self {
        h.0
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(self.0))
    }
}

impl StdHash for Hash256 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // the tail word is uniformly distributed; enough for table hashing
        let mut le = [0u8; 8];
        le.copy_from_slice(&self.0[24..32]);
        u64::from_le_bytes(le).hash(state);
    }
}
