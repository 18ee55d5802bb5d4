use crate::amount::XAmount;
use crate::hash::Hash256;

/// Width of one block field slot.
pub const FIELD_SIZE: usize = 32;

/// Number of field slots in a block.
pub const FIELD_COUNT: usize = 16;

/// The 4-bit tag describing how one 32-byte slot is interpreted.
///
/// Tags occupy the block's packed `type` word, nibble `i` tagging slot `i`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Nonce = 0x0,
    Header = 0x1,
    InputLink = 0x2,
    OutputLink = 0x3,
    SignIn = 0x4,
    SignOut = 0x5,
    PublicKeyEven = 0x6,
    PublicKeyOdd = 0x7,
    Remark = 0x8,
    Reserved = 0x9,
}

impl FieldType {
    pub fn from_nibble(nibble: u8) -> Option<FieldType> {
        match nibble {
            0x0 => Some(FieldType::Nonce),
            0x1 => Some(FieldType::Header),
            0x2 => Some(FieldType::InputLink),
            0x3 => Some(FieldType::OutputLink),
            0x4 => Some(FieldType::SignIn),
            0x5 => Some(FieldType::SignOut),
            0x6 => Some(FieldType::PublicKeyEven),
            0x7 => Some(FieldType::PublicKeyOdd),
            0x8 => Some(FieldType::Remark),
            0x9 => Some(FieldType::Reserved),
            _ => None,
        }
    }

    pub fn nibble(self) -> u8 {
        self as u8
    }
}

/// A link slot: the low-hash tail of the referenced block plus the amount
/// moved along the edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkField {
    /// Low hash of the referenced block (tag bytes zero).
    pub link: Hash256,
    pub amount: XAmount,
}

impl LinkField {
    pub fn new(link: Hash256, amount: XAmount) -> Self {
        Self {
            link: link.low(),
            amount,
        }
    }

    pub fn encode(&self) -> [u8; FIELD_SIZE] {
        let mut out = [0u8; FIELD_SIZE];
        out[..24].copy_from_slice(&self.link.tail());
        out[24..].copy_from_slice(&self.amount.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; FIELD_SIZE]) -> Self {
        let mut tail = [0u8; 24];
        tail.copy_from_slice(&bytes[..24]);
        let mut amount = [0u8; 8];
        amount.copy_from_slice(&bytes[24..]);
        Self {
            link: Hash256::from_tail(&tail),
            amount: XAmount::from_le_bytes(amount),
        }
    }
}

/// A public-key slot: the x coordinate, with the parity carried by the
/// field-type nibble.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKeyField {
    pub x: [u8; 32],
    pub odd: bool,
}

impl PublicKeyField {
    /// The 33-byte compressed encoding expected by signature recovery.
    pub fn compressed(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = if self.odd { 0x03 } else { 0x02 };
        out[1..].copy_from_slice(&self.x);
        out
    }

    pub fn field_type(&self) -> FieldType {
        if self.odd {
            FieldType::PublicKeyOdd
        } else {
            FieldType::PublicKeyEven
        }
    }
}

/// Pads a remark to the fixed slot width. Longer input is truncated.
pub fn pad_remark(remark: &[u8]) -> [u8; FIELD_SIZE] {
    let mut out = [0u8; FIELD_SIZE];
    let n = remark.len().min(FIELD_SIZE);
    out[..n].copy_from_slice(&remark[..n]);
    out
}
