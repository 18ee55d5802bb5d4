//! DAG consensus engine: block admission, orphan management, main-chain
//! election with difficulty-weighted reorganisation, and coinbase settlement.

pub mod chain;
pub mod election;
pub mod errors;
pub mod orphans;
pub mod reward;

pub use chain::{Dagchain, ImportResult};
pub use errors::{ChainError, ChainResult};
pub use orphans::{OrphanPool, ORPHAN_TTL_MS};
pub use reward::{main_block_reward, supply_at, HALVING_PERIOD, INITIAL_SCHEDULE_LEN};
