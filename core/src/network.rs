use crate::block::{Block, BlockBuilder};

/// Wire protocol version advertised in the handshake.
pub const PROTOCOL_VERSION: u16 = 1;

/// The chain a node participates in. Network ids are wire-visible and
/// mismatches end the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl Network {
    pub fn id(self) -> u32 {
        match self {
            Network::Mainnet => 1,
            Network::Testnet => 2,
            Network::Devnet => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Devnet => "dev",
        }
    }

    pub fn from_name(name: &str) -> Option<Network> {
        match name {
            "main" | "mainnet" => Some(Network::Mainnet),
            "test" | "testnet" => Some(Network::Testnet),
            "dev" | "devnet" => Some(Network::Devnet),
            _ => None,
        }
    }

    /// Fixed timestamp of the network's first epoch.
    pub fn genesis_timestamp(self) -> u64 {
        match self {
            Network::Mainnet => 1_515_225_600_000,
            Network::Testnet => 1_515_225_601_000,
            Network::Devnet => 1_000,
        }
    }

    /// The deterministic genesis block. Header-only apart from a remark
    /// naming the network; the zero transport tag keeps the hash stable.
    pub fn genesis_block(self) -> Block {
        let remark = match self {
            Network::Mainnet => &b"xdag main genesis"[..],
            Network::Testnet => &b"xdag test genesis"[..],
            Network::Devnet => &b"xdag dev genesis"[..],
        };
        BlockBuilder::new(self.genesis_timestamp())
            .transport(0)
            .remark(remark)
            .build()
            .expect("genesis composition is static")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_and_stable() {
        assert_eq!(Network::Mainnet.id(), 1);
        assert_eq!(Network::Testnet.id(), 2);
        assert_eq!(Network::Devnet.id(), 3);
    }

    #[test]
    fn name_roundtrip() {
        for net in [Network::Mainnet, Network::Testnet, Network::Devnet] {
            assert_eq!(Network::from_name(net.name()), Some(net));
        }
        assert_eq!(Network::from_name("regtest"), None);
    }

    #[test]
    fn genesis_is_deterministic_and_distinct() {
        assert_eq!(
            Network::Mainnet.genesis_block().hash(),
            Network::Mainnet.genesis_block().hash()
        );
        assert_ne!(
            Network::Mainnet.genesis_block().hash(),
            Network::Testnet.genesis_block().hash()
        );
    }
}
