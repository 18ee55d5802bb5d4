use crate::amount::XAmount;
use crate::hash::Hash256;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle and role bits carried by [`BlockInfo`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockFlags(u32);

impl BlockFlags {
    /// Elected onto the main chain; earns coinbase.
    pub const MAIN: BlockFlags = BlockFlags(0x01);
    /// On the canonical spine (genesis carries this without MAIN).
    pub const MAIN_CHAIN: BlockFlags = BlockFlags(0x02);
    /// Balances updated; participates in queries.
    pub const APPLIED: BlockFlags = BlockFlags(0x04);
    /// Fee-settled under some main block (`ref` names it).
    pub const MAIN_REF: BlockFlags = BlockFlags(0x08);
    /// Minted by this node.
    pub const OUR: BlockFlags = BlockFlags(0x20);
    /// Candidate freshly admitted in the open epoch.
    pub const EXTRA: BlockFlags = BlockFlags(0x40);
    /// Carries a remark field.
    pub const REMARK: BlockFlags = BlockFlags(0x80);
    /// Persisted to the store.
    pub const SAVED: BlockFlags = BlockFlags(0x100);
    /// Current best candidate for the next main block.
    pub const PRETOP: BlockFlags = BlockFlags(0x200);
    /// Reverted off the main chain by a reorg.
    pub const UNWIND: BlockFlags = BlockFlags(0x400);

    pub const fn empty() -> BlockFlags {
        BlockFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> BlockFlags {
        BlockFlags(bits)
    }

    pub fn contains(self, other: BlockFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BlockFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BlockFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for BlockFlags {
    type Output = BlockFlags;
    fn bitor(self, rhs: BlockFlags) -> BlockFlags {
        BlockFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for BlockFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockFlags({:#x})", self.0)
    }
}

/// Metadata derived for every stored block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Main-chain height; zero for every non-main block.
    pub height: u64,
    /// Cumulative difficulty along the maximum-difficulty ancestor path.
    pub difficulty: U256,
    /// Main block this block's fee settled under, once MAIN_REF is set.
    pub ref_link: Option<Hash256>,
    /// Predecessor along the maximum-difficulty path.
    pub max_diff_link: Option<Hash256>,
    pub fee: XAmount,
    pub hash: Hash256,
    pub hashlow: Hash256,
    /// Current balance of the address this block represents.
    pub amount: XAmount,
    pub timestamp: u64,
    pub flags: BlockFlags,
    pub remark: Option<[u8; 32]>,
}

impl BlockInfo {
    pub fn is_applied(&self) -> bool {
        self.flags.contains(BlockFlags::APPLIED)
    }

    pub fn is_main(&self) -> bool {
        self.flags.contains(BlockFlags::MAIN)
    }

    pub fn on_main_chain(&self) -> bool {
        self.flags.contains(BlockFlags::MAIN_CHAIN)
    }

    pub fn epoch(&self) -> u64 {
        self.timestamp / 1_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_set_and_clear() {
        let mut flags = BlockFlags::empty();
        flags.insert(BlockFlags::APPLIED | BlockFlags::SAVED);
        assert!(flags.contains(BlockFlags::APPLIED));
        assert!(flags.contains(BlockFlags::SAVED));
        assert!(!flags.contains(BlockFlags::MAIN));
        flags.remove(BlockFlags::SAVED);
        assert!(!flags.contains(BlockFlags::SAVED));
        assert!(flags.contains(BlockFlags::APPLIED));
    }

    #[test]
    fn contains_requires_all_bits() {
        let flags = BlockFlags::MAIN | BlockFlags::MAIN_CHAIN;
        assert!(flags.contains(BlockFlags::MAIN));
        assert!(!BlockFlags::MAIN.contains(flags));
    }

    #[test]
    fn info_bincode_roundtrip() {
        let info = BlockInfo {
            height: 5,
            difficulty: U256::from(123456u64),
            ref_link: Some(Hash256::from_le_u64([0, 1, 2, 3])),
            max_diff_link: None,
            fee: XAmount::of_xdag(1),
            hash: Hash256::from_le_u64([9, 9, 9, 9]),
            hashlow: Hash256::from_le_u64([0, 9, 9, 9]),
            amount: XAmount::of_xdag(1024),
            timestamp: 123_456_789,
            flags: BlockFlags::MAIN | BlockFlags::MAIN_CHAIN | BlockFlags::APPLIED,
            remark: Some([7u8; 32]),
        };
        let bytes = bincode::serialize(&info).unwrap();
        let back: BlockInfo = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, info);
    }
}
