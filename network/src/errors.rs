use thiserror::Error;
use xdag_core::BlockError;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("truncated body for opcode {opcode:#04x} ({len} bytes)")]
    TruncatedBody { opcode: u8, len: usize },

    #[error("unknown disconnect reason {0}")]
    UnknownReason(u8),

    #[error("embedded block is malformed: {0}")]
    BadBlock(#[from] BlockError),
}

pub type NetResult<T> = Result<T, NetError>;
