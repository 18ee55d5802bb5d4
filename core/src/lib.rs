//! Core types of the XDAG ledger: the 512-byte block and its field codec,
//! fixed-point amounts, derived block metadata, difficulty arithmetic and
//! per-network genesis parameters.

pub mod amount;
pub mod block;
pub mod difficulty;
pub mod errors;
pub mod field;
pub mod hash;
pub mod info;
pub mod network;
pub mod stats;

pub use amount::{XAmount, UNITS_PER_XDAG};
pub use block::{Block, BlockBuilder, Field, BLOCK_SIZE, MAX_TIMESTAMP_DRIFT_MS};
pub use errors::BlockError;
pub use field::{FieldType, LinkField, PublicKeyField, FIELD_COUNT, FIELD_SIZE};
pub use hash::{Hash256, HASH_SIZE};
pub use info::{BlockFlags, BlockInfo};
pub use network::{Network, PROTOCOL_VERSION};
pub use stats::XdagStats;
