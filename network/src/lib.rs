//! P2P message plane: wire framing, the per-opcode message union, the
//! bounded priority-aware per-peer queue, the shared tick scheduler and the
//! peer-session state machine.

pub mod errors;
pub mod frame;
pub mod message;
pub mod peer;
pub mod queue;
pub mod scheduler;

pub use errors::{NetError, NetResult};
pub use frame::{read_frame, write_frame, MAX_FRAME_SIZE};
pub use message::{DisconnectReason, Handshake, MainBlockHeader, Message};
pub use peer::{PeerSession, SessionAction, SessionConfig, SessionState};
pub use queue::{MessageQueue, QueueConfig, QueueState, TcpTransport, Transport};
pub use scheduler::{TaskHandle, TickScheduler};
