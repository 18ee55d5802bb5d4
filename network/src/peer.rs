use crate::message::{DisconnectReason, Handshake, Message};
use tracing::debug;
use xdag_core::Hash256;

pub const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
pub const PING_INTERVAL_MS: u64 = 15_000;
pub const MAX_MISSED_PONGS: usize = 2;

/// Local identity advertised during the handshake.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub network_id: u32,
    pub version: u16,
    pub listen_port: u16,
    pub node_id: [u8; 20],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Inbound connection waiting for the remote HELLO.
    AwaitHello,
    /// Outbound connection that sent HELLO and waits for WORLD.
    AwaitWorld,
    Active,
    Closed,
}

/// What the session asks its owner to do. The state machine performs no I/O
/// itself; the node routes `Send` through the peer's message queue.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionAction {
    Send(Message),
    /// Send `DISCONNECT(reason)` and tear the connection down.
    Close(DisconnectReason),
    /// The remote ended the session; tear down without replying.
    Teardown(DisconnectReason),
    /// Handshake completed; the owner checks for duplicate peer ids.
    Established(Handshake),
    /// A post-handshake message for the sync/consensus layers.
    Forward(Message),
}

/// Per-peer handshake and liveness state machine.
///
/// HELLO and WORLD share an opcode; the role taken at construction decides
/// which one this side expects. Likewise 0x02 is a PONG when its nonce
/// matches an outstanding ping and a PING to be echoed otherwise.
pub struct PeerSession {
    config: SessionConfig,
    state: SessionState,
    created_at_ms: u64,
    last_ping_at_ms: u64,
    pending_pongs: Vec<u64>,
    next_nonce: u64,
    remote: Option<Handshake>,
}

impl PeerSession {
    /// Inbound role: wait for the remote HELLO.
    pub fn inbound(config: SessionConfig, now_ms: u64) -> Self {
        Self {
            config,
            state: SessionState::AwaitHello,
            created_at_ms: now_ms,
            last_ping_at_ms: now_ms,
            pending_pongs: Vec::new(),
            next_nonce: 1,
            remote: None,
        }
    }

    /// Outbound role: emit our HELLO immediately.
    pub fn outbound(
        config: SessionConfig,
        now_ms: u64,
        tip_hashlow: Hash256,
    ) -> (Self, Vec<SessionAction>) {
        let hello = Message::Handshake(Handshake {
            network_id: config.network_id,
            version: config.version,
            tip_hashlow,
            listen_port: config.listen_port,
            node_id: config.node_id,
        });
        let session = Self {
            config,
            state: SessionState::AwaitWorld,
            created_at_ms: now_ms,
            last_ping_at_ms: now_ms,
            pending_pongs: Vec::new(),
            next_nonce: 1,
            remote: None,
        };
        (session, vec![SessionAction::Send(hello)])
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote(&self) -> Option<&Handshake> {
        self.remote.as_ref()
    }

    /// Marks the session closed; further events are ignored.
    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn on_message(
        &mut self,
        msg: Message,
        now_ms: u64,
        tip_hashlow: Hash256,
    ) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        match msg {
            Message::Disconnect { reason } => {
                debug!(?reason, "remote closed the session");
                self.state = SessionState::Closed;
                vec![SessionAction::Teardown(reason)]
            }
            Message::Handshake(handshake) => self.on_handshake(handshake, tip_hashlow),
            Message::Ping { nonce } => {
                if self.state != SessionState::Active {
                    return self.close_with(DisconnectReason::UnexpectedMessage);
                }
                if let Some(pos) = self.pending_pongs.iter().position(|n| *n == nonce) {
                    // the echo of one of our pings
                    self.pending_pongs.remove(pos);
                    self.last_ping_at_ms = now_ms;
                    Vec::new()
                } else {
                    vec![SessionAction::Send(Message::Ping { nonce })]
                }
            }
            other => {
                if self.state == SessionState::Active {
                    vec![SessionAction::Forward(other)]
                } else {
                    self.close_with(DisconnectReason::UnexpectedMessage)
                }
            }
        }
    }

    fn on_handshake(&mut self, handshake: Handshake, tip_hashlow: Hash256) -> Vec<SessionAction> {
        match self.state {
            SessionState::AwaitHello | SessionState::AwaitWorld => {
                if handshake.network_id != self.config.network_id {
                    return self.close_with(DisconnectReason::BadNetwork);
                }
                if handshake.version != self.config.version {
                    return self.close_with(DisconnectReason::BadProtocol);
                }
                if handshake.node_id == self.config.node_id {
                    // connected to ourselves
                    return self.close_with(DisconnectReason::DuplicatedPeerId);
                }
                let was_await_hello = self.state == SessionState::AwaitHello;
                self.state = SessionState::Active;
                self.remote = Some(handshake.clone());
                let mut actions = Vec::new();
                if was_await_hello {
                    actions.push(SessionAction::Send(Message::Handshake(Handshake {
                        network_id: self.config.network_id,
                        version: self.config.version,
                        tip_hashlow,
                        listen_port: self.config.listen_port,
                        node_id: self.config.node_id,
                    })));
                }
                actions.push(SessionAction::Established(handshake));
                actions
            }
            SessionState::Active => self.close_with(DisconnectReason::InvalidHandshake),
            SessionState::Closed => Vec::new(),
        }
    }

    /// Liveness tick: handshake deadline before Active, ping cadence and
    /// missed-pong accounting after.
    pub fn on_tick(&mut self, now_ms: u64) -> Vec<SessionAction> {
        match self.state {
            SessionState::Closed => Vec::new(),
            SessionState::AwaitHello | SessionState::AwaitWorld => {
                if now_ms.saturating_sub(self.created_at_ms) >= HANDSHAKE_TIMEOUT_MS {
                    self.close_with(DisconnectReason::Timeout)
                } else {
                    Vec::new()
                }
            }
            SessionState::Active => {
                if self.pending_pongs.len() >= MAX_MISSED_PONGS {
                    return self.close_with(DisconnectReason::Timeout);
                }
                if now_ms.saturating_sub(self.last_ping_at_ms) >= PING_INTERVAL_MS {
                    let nonce = self.next_nonce;
                    self.next_nonce += 1;
                    self.pending_pongs.push(nonce);
                    self.last_ping_at_ms = now_ms;
                    vec![SessionAction::Send(Message::Ping { nonce })]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn close_with(&mut self, reason: DisconnectReason) -> Vec<SessionAction> {
        self.state = SessionState::Closed;
        vec![SessionAction::Close(reason)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(node_id: u8) -> SessionConfig {
        SessionConfig {
            network_id: 3,
            version: 1,
            listen_port: 7_777,
            node_id: [node_id; 20],
        }
    }

    fn tip() -> Hash256 {
        Hash256::from_le_u64([0, 1, 2, 3])
    }

    fn remote_hello(network_id: u32, version: u16, node_id: u8) -> Message {
        Message::Handshake(Handshake {
            network_id,
            version,
            tip_hashlow: tip(),
            listen_port: 8_888,
            node_id: [node_id; 20],
        })
    }

    #[test]
    fn inbound_handshake_replies_world() {
        let mut session = PeerSession::inbound(config(1), 0);
        let actions = session.on_message(remote_hello(3, 1, 2), 10, tip());
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(actions.len(), 2);
        match &actions[0] {
            SessionAction::Send(Message::Handshake(world)) => {
                assert_eq!(world.network_id, 3);
                assert_eq!(world.node_id, [1; 20]);
            }
            other => panic!("expected WORLD reply, got {other:?}"),
        }
        assert!(matches!(actions[1], SessionAction::Established(_)));
    }

    #[test]
    fn outbound_handshake_completes_on_world() {
        let (mut session, actions) = PeerSession::outbound(config(1), 0, tip());
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SessionAction::Send(Message::Handshake(_))));
        assert_eq!(session.state(), SessionState::AwaitWorld);

        let actions = session.on_message(remote_hello(3, 1, 2), 10, tip());
        assert_eq!(session.state(), SessionState::Active);
        // no reply to a WORLD
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SessionAction::Established(_)));
    }

    #[test]
    fn network_mismatch_closes_with_bad_network() {
        let mut session = PeerSession::inbound(config(1), 0);
        let actions = session.on_message(remote_hello(9, 1, 2), 10, tip());
        assert_eq!(actions, vec![SessionAction::Close(DisconnectReason::BadNetwork)]);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn version_mismatch_closes_with_bad_protocol() {
        let mut session = PeerSession::inbound(config(1), 0);
        let actions = session.on_message(remote_hello(3, 9, 2), 10, tip());
        assert_eq!(actions, vec![SessionAction::Close(DisconnectReason::BadProtocol)]);
    }

    #[test]
    fn self_connection_closes_with_duplicated_peer_id() {
        let mut session = PeerSession::inbound(config(1), 0);
        let actions = session.on_message(remote_hello(3, 1, 1), 10, tip());
        assert_eq!(
            actions,
            vec![SessionAction::Close(DisconnectReason::DuplicatedPeerId)]
        );
    }

    #[test]
    fn message_before_handshake_is_unexpected() {
        let mut session = PeerSession::inbound(config(1), 0);
        let actions = session.on_message(Message::GetStats, 10, tip());
        assert_eq!(
            actions,
            vec![SessionAction::Close(DisconnectReason::UnexpectedMessage)]
        );
    }

    #[test]
    fn second_handshake_is_invalid() {
        let mut session = PeerSession::inbound(config(1), 0);
        session.on_message(remote_hello(3, 1, 2), 10, tip());
        let actions = session.on_message(remote_hello(3, 1, 2), 20, tip());
        assert_eq!(
            actions,
            vec![SessionAction::Close(DisconnectReason::InvalidHandshake)]
        );
    }

    #[test]
    fn handshake_deadline_enforced() {
        let mut session = PeerSession::inbound(config(1), 0);
        assert!(session.on_tick(HANDSHAKE_TIMEOUT_MS - 1).is_empty());
        let actions = session.on_tick(HANDSHAKE_TIMEOUT_MS);
        assert_eq!(actions, vec![SessionAction::Close(DisconnectReason::Timeout)]);
    }

    fn active_session() -> PeerSession {
        let mut session = PeerSession::inbound(config(1), 0);
        session.on_message(remote_hello(3, 1, 2), 10, tip());
        assert_eq!(session.state(), SessionState::Active);
        session
    }

    #[test]
    fn ping_cadence_and_pong_matching() {
        let mut session = active_session();
        let actions = session.on_tick(PING_INTERVAL_MS + 10);
        let nonce = match &actions[..] {
            [SessionAction::Send(Message::Ping { nonce })] => *nonce,
            other => panic!("expected a ping, got {other:?}"),
        };
        // matching echo clears the outstanding ping
        assert!(session
            .on_message(Message::Ping { nonce }, PING_INTERVAL_MS + 20, tip())
            .is_empty());
        // an unknown nonce is a remote ping and gets echoed
        let actions = session.on_message(Message::Ping { nonce: 999 }, PING_INTERVAL_MS + 30, tip());
        assert_eq!(actions, vec![SessionAction::Send(Message::Ping { nonce: 999 })]);
    }

    #[test]
    fn two_missed_pongs_time_out() {
        let mut session = active_session();
        assert_eq!(session.on_tick(PING_INTERVAL_MS).len(), 1);
        assert_eq!(session.on_tick(2 * PING_INTERVAL_MS).len(), 1);
        let actions = session.on_tick(3 * PING_INTERVAL_MS);
        assert_eq!(actions, vec![SessionAction::Close(DisconnectReason::Timeout)]);
    }

    #[test]
    fn consensus_messages_are_forwarded_when_active() {
        let mut session = active_session();
        let actions = session.on_message(Message::GetMainBlockHeader { height: 4 }, 50, tip());
        assert_eq!(
            actions,
            vec![SessionAction::Forward(Message::GetMainBlockHeader { height: 4 })]
        );
    }

    #[test]
    fn remote_disconnect_tears_down_silently() {
        let mut session = active_session();
        let actions = session.on_message(
            Message::Disconnect {
                reason: DisconnectReason::Timeout,
            },
            60,
            tip(),
        );
        assert_eq!(
            actions,
            vec![SessionAction::Teardown(DisconnectReason::Timeout)]
        );
        assert!(session.on_message(Message::GetStats, 70, tip()).is_empty());
    }
}
