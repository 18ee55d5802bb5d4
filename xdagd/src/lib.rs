//! The XDAG node daemon: CLI, per-network configuration, sync controller and
//! the wiring that connects storage, consensus and the peer-to-peer plane.

pub mod cli;
pub mod config;
pub mod errors;
pub mod node;
pub mod sync;

pub use config::Config;
pub use errors::{NodeError, NodeResult};
pub use node::Node;
pub use sync::{SyncConfig, SyncController, SyncState};
