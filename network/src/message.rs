use crate::errors::{NetError, NetResult};
use primitive_types::U256;
use xdag_core::{Block, Hash256, XdagStats, BLOCK_SIZE};

/// Stable opcode ids. 0x01 carries both HELLO and WORLD (direction decides),
/// 0x02 both PING and PONG (nonce matching decides).
pub mod opcodes {
    pub const DISCONNECT: u8 = 0x00;
    pub const HANDSHAKE: u8 = 0x01;
    pub const PING: u8 = 0x02;
    pub const GET_STATS: u8 = 0x03;
    pub const STATS: u8 = 0x04;
    pub const MAIN_BLOCK: u8 = 0x10;
    pub const GET_MAIN_BLOCK: u8 = 0x11;
    pub const MAIN_BLOCK_HEADER: u8 = 0x12;
    pub const GET_MAIN_BLOCK_HEADER: u8 = 0x13;
    pub const NEW_BLOCK: u8 = 0x20;
}

/// Why a connection is being dropped. Ids are wire-stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    Timeout = 0,
    BadProtocol = 1,
    BadNetwork = 2,
    DuplicatedPeerId = 3,
    MessageQueueFull = 4,
    AlreadyConnected = 5,
    InvalidHandshake = 6,
    UnexpectedMessage = 7,
}

impl DisconnectReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> NetResult<DisconnectReason> {
        Ok(match code {
            0 => DisconnectReason::Timeout,
            1 => DisconnectReason::BadProtocol,
            2 => DisconnectReason::BadNetwork,
            3 => DisconnectReason::DuplicatedPeerId,
            4 => DisconnectReason::MessageQueueFull,
            5 => DisconnectReason::AlreadyConnected,
            6 => DisconnectReason::InvalidHandshake,
            7 => DisconnectReason::UnexpectedMessage,
            other => return Err(NetError::UnknownReason(other)),
        })
    }
}

/// HELLO/WORLD payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub network_id: u32,
    pub version: u16,
    pub tip_hashlow: Hash256,
    pub listen_port: u16,
    pub node_id: [u8; 20],
}

/// Main-block summary served during sync: enough to decide whether the full
/// block must be fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MainBlockHeader {
    pub height: u64,
    pub hashlow: Hash256,
    pub timestamp: u64,
}

/// One wire message per opcode; dispatch is a match, not a class hierarchy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Disconnect { reason: DisconnectReason },
    Handshake(Handshake),
    Ping { nonce: u64 },
    GetStats,
    Stats(XdagStats),
    MainBlock(Block),
    GetMainBlock { hashlow: Hash256 },
    MainBlockHeader(MainBlockHeader),
    GetMainBlockHeader { height: u64 },
    NewBlock(Block),
}

impl Message {
    pub fn opcode(&self) -> u8 {
        match self {
            Message::Disconnect { .. } => opcodes::DISCONNECT,
            Message::Handshake(_) => opcodes::HANDSHAKE,
            Message::Ping { .. } => opcodes::PING,
            Message::GetStats => opcodes::GET_STATS,
            Message::Stats(_) => opcodes::STATS,
            Message::MainBlock(_) => opcodes::MAIN_BLOCK,
            Message::GetMainBlock { .. } => opcodes::GET_MAIN_BLOCK,
            Message::MainBlockHeader(_) => opcodes::MAIN_BLOCK_HEADER,
            Message::GetMainBlockHeader { .. } => opcodes::GET_MAIN_BLOCK_HEADER,
            Message::NewBlock(_) => opcodes::NEW_BLOCK,
        }
    }

    /// Position-encoded body; integers are big-endian like the frame length.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut w = BodyWriter::new();
        match self {
            Message::Disconnect { reason } => w.u8(reason.code()),
            Message::Handshake(h) => {
                w.u32(h.network_id);
                w.u16(h.version);
                w.bytes(h.tip_hashlow.as_ref());
                w.u16(h.listen_port);
                w.bytes(&h.node_id);
            }
            Message::Ping { nonce } => w.u64(*nonce),
            Message::GetStats => {}
            Message::Stats(s) => {
                w.u64(s.nblocks);
                w.u64(s.total_nblocks);
                w.u64(s.nmain);
                w.u64(s.total_nmain);
                let mut diff = [0u8; 32];
                s.tip_diff.to_big_endian(&mut diff);
                w.bytes(&diff);
                w.bytes(s.tip_hashlow.as_ref());
            }
            Message::MainBlock(block) | Message::NewBlock(block) => w.bytes(&block.encode()),
            Message::GetMainBlock { hashlow } => w.bytes(hashlow.as_ref()),
            Message::MainBlockHeader(h) => {
                w.u64(h.height);
                w.bytes(h.hashlow.as_ref());
                w.u64(h.timestamp);
            }
            Message::GetMainBlockHeader { height } => w.u64(*height),
        }
        w.finish()
    }

    pub fn decode(opcode: u8, body: &[u8]) -> NetResult<Message> {
        let mut r = BodyReader::new(opcode, body);
        let msg = match opcode {
            opcodes::DISCONNECT => Message::Disconnect {
                reason: DisconnectReason::from_code(r.u8()?)?,
            },
            opcodes::HANDSHAKE => Message::Handshake(Handshake {
                network_id: r.u32()?,
                version: r.u16()?,
                tip_hashlow: r.hash()?,
                listen_port: r.u16()?,
                node_id: r.array::<20>()?,
            }),
            opcodes::PING => Message::Ping { nonce: r.u64()? },
            opcodes::GET_STATS => Message::GetStats,
            opcodes::STATS => Message::Stats(XdagStats {
                nblocks: r.u64()?,
                total_nblocks: r.u64()?,
                nmain: r.u64()?,
                total_nmain: r.u64()?,
                tip_diff: U256::from_big_endian(&r.array::<32>()?),
                tip_hashlow: r.hash()?,
            }),
            opcodes::MAIN_BLOCK => Message::MainBlock(r.block()?),
            opcodes::GET_MAIN_BLOCK => Message::GetMainBlock { hashlow: r.hash()? },
            opcodes::MAIN_BLOCK_HEADER => Message::MainBlockHeader(MainBlockHeader {
                height: r.u64()?,
                hashlow: r.hash()?,
                timestamp: r.u64()?,
            }),
            opcodes::GET_MAIN_BLOCK_HEADER => Message::GetMainBlockHeader { height: r.u64()? },
            opcodes::NEW_BLOCK => Message::NewBlock(r.block()?),
            other => return Err(NetError::UnknownOpcode(other)),
        };
        r.expect_end()?;
        Ok(msg)
    }
}

struct BodyWriter {
    buf: Vec<u8>,
}

impl BodyWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct BodyReader<'a> {
    opcode: u8,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(opcode: u8, buf: &'a [u8]) -> Self {
        Self { opcode, buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> NetResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(NetError::TruncatedBody {
                opcode: self.opcode,
                len: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> NetResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> NetResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    fn u32(&mut self) -> NetResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> NetResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn array<const N: usize>(&mut self) -> NetResult<[u8; N]> {
        Ok(self.take(N)?.try_into().expect("N bytes"))
    }

    fn hash(&mut self) -> NetResult<Hash256> {
        Ok(Hash256::from_bytes(self.array::<32>()?))
    }

    fn block(&mut self) -> NetResult<Block> {
        Ok(Block::decode(self.take(BLOCK_SIZE)?)?)
    }

    fn expect_end(&self) -> NetResult<()> {
        if self.pos != self.buf.len() {
            return Err(NetError::TruncatedBody {
                opcode: self.opcode,
                len: self.buf.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdag_core::{BlockBuilder, XAmount};

    fn sample_block() -> Block {
        BlockBuilder::new(42_000)
            .output(Hash256::from_le_u64([0, 5, 6, 7]), XAmount::of_xdag(3))
            .fee(XAmount::ZERO)
            .remark(b"wire test")
            .build()
            .unwrap()
    }

    fn roundtrip(msg: Message) {
        let body = msg.encode_body();
        let back = Message::decode(msg.opcode(), &body).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn every_opcode_roundtrips() {
        roundtrip(Message::Disconnect {
            reason: DisconnectReason::MessageQueueFull,
        });
        roundtrip(Message::Handshake(Handshake {
            network_id: 1,
            version: 1,
            tip_hashlow: Hash256::from_le_u64([0, 1, 2, 3]),
            listen_port: 13_579,
            node_id: [0xAB; 20],
        }));
        roundtrip(Message::Ping { nonce: 0xDEAD_BEEF });
        roundtrip(Message::GetStats);
        roundtrip(Message::Stats(XdagStats {
            nblocks: 100,
            total_nblocks: 150,
            nmain: 40,
            total_nmain: 60,
            tip_diff: U256::from(987_654_321u64),
            tip_hashlow: Hash256::from_le_u64([0, 9, 8, 7]),
        }));
        roundtrip(Message::MainBlock(sample_block()));
        roundtrip(Message::GetMainBlock {
            hashlow: Hash256::from_le_u64([0, 4, 4, 4]),
        });
        roundtrip(Message::MainBlockHeader(MainBlockHeader {
            height: 77,
            hashlow: Hash256::from_le_u64([0, 7, 7, 7]),
            timestamp: 77_000,
        }));
        roundtrip(Message::GetMainBlockHeader { height: 78 });
        roundtrip(Message::NewBlock(sample_block()));
    }

    #[test]
    fn disconnect_reason_ids_are_stable() {
        let expected: [(DisconnectReason, u8); 8] = [
            (DisconnectReason::Timeout, 0),
            (DisconnectReason::BadProtocol, 1),
            (DisconnectReason::BadNetwork, 2),
            (DisconnectReason::DuplicatedPeerId, 3),
            (DisconnectReason::MessageQueueFull, 4),
            (DisconnectReason::AlreadyConnected, 5),
            (DisconnectReason::InvalidHandshake, 6),
            (DisconnectReason::UnexpectedMessage, 7),
        ];
        for (reason, code) in expected {
            assert_eq!(reason.code(), code);
            assert_eq!(DisconnectReason::from_code(code).unwrap(), reason);
        }
        assert!(DisconnectReason::from_code(8).is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut body = Message::Ping { nonce: 1 }.encode_body();
        body.push(0);
        assert!(matches!(
            Message::decode(opcodes::PING, &body),
            Err(NetError::TruncatedBody { .. })
        ));
    }

    #[test]
    fn truncated_handshake_is_rejected() {
        let body = Message::Handshake(Handshake {
            network_id: 1,
            version: 1,
            tip_hashlow: Hash256::ZERO,
            listen_port: 1,
            node_id: [0; 20],
        })
        .encode_body();
        assert!(matches!(
            Message::decode(opcodes::HANDSHAKE, &body[..body.len() - 1]),
            Err(NetError::TruncatedBody { .. })
        ));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(matches!(
            Message::decode(0x7F, &[]),
            Err(NetError::UnknownOpcode(0x7F))
        ));
    }
}
