use crate::amount::XAmount;
use thiserror::Error;

/// Rejection causes for a block that can never become valid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("block must be exactly 512 bytes, got {0}")]
    WrongSize(usize),

    #[error("slot 0 is not a header field")]
    MissingHeader,

    #[error("header field outside slot 0")]
    StrayHeader,

    #[error("more than one nonce field")]
    MultipleNonce,

    #[error("more than one remark field")]
    MultipleRemark,

    #[error("unrecognised field type nibble {0:#x}")]
    UnknownFieldType(u8),

    #[error("signature field without its second half")]
    DanglingSignature,

    #[error("timestamp {timestamp} is more than {max_drift_ms} ms ahead of local clock {now}")]
    TimestampInFuture {
        timestamp: u64,
        now: u64,
        max_drift_ms: u64,
    },

    #[error("link timestamp does not precede the referring block")]
    LinkNotOlder,

    #[error("input signature does not recover the linked public key")]
    InvalidSignature,

    #[error("output signature present without a public-key field")]
    MissingPublicKey,

    #[error("insufficient funds: need {needed}, balance {available}")]
    InsufficientFunds {
        needed: XAmount,
        available: XAmount,
    },

    #[error("declared outputs exceed inputs")]
    OutputsExceedInputs,

    #[error("declared fee {declared} does not match inputs minus outputs {computed}")]
    FeeMismatch {
        declared: XAmount,
        computed: XAmount,
    },

    #[error("amount arithmetic overflow")]
    AmountOverflow,

    #[error("fields exceed the 16-slot budget")]
    TooManyFields,
}
