use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};
use xdag_core::{Hash256, XdagStats};
use xdag_network::{DisconnectReason, MainBlockHeader, Message};

/// Outstanding sync requests are re-issued after this long.
pub const SYNC_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Re-issues before the unresponsive peer is dropped.
pub const MAX_REQUEST_REISSUES: u32 = 3;

pub type PeerId = u64;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Sliding window of in-flight height requests.
    pub window: usize,
    /// How far ahead a remote must be before we enter SYNCING.
    pub start_gap: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window: 32,
            start_gap: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Behind the network; the request pipeline is running.
    Syncing,
    /// Caught up; new blocks arrive by relay.
    Synced,
}

/// What the controller wants done; the node routes these through the peers'
/// message queues.
#[derive(Debug, PartialEq, Eq)]
pub enum SyncAction {
    Request(PeerId, Message),
    Disconnect(PeerId, DisconnectReason),
}

struct Pending {
    peer: PeerId,
    deadline_ms: u64,
    reissues: u32,
    tried: Vec<PeerId>,
}

impl Pending {
    fn new(peer: PeerId, now_ms: u64) -> Self {
        Self {
            peer,
            deadline_ms: now_ms + SYNC_REQUEST_TIMEOUT_MS,
            reissues: 0,
            tried: Vec::new(),
        }
    }
}

/// Main-chain download controller.
///
/// Learns the network tip from STATS exchanges, keeps a sliding window of
/// `GET_MAIN_BLOCK_HEADER` requests, fetches unknown bodies with
/// `GET_MAIN_BLOCK`, and re-issues anything unanswered for five seconds to a
/// different peer.
pub struct SyncController {
    config: SyncConfig,
    state: SyncState,
    /// Highest main-chain height any peer has reported.
    target_nmain: u64,
    /// Next height that has never been requested.
    next_height: u64,
    /// Heights whose request died and must be re-queued.
    retry_heights: BTreeSet<u64>,
    pending_heights: HashMap<u64, Pending>,
    pending_blocks: HashMap<Hash256, Pending>,
}

impl SyncController {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            state: SyncState::Synced,
            target_nmain: 0,
            next_height: 1,
            retry_heights: BTreeSet::new(),
            pending_heights: HashMap::new(),
            pending_blocks: HashMap::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn target(&self) -> u64 {
        self.target_nmain
    }

    pub fn outstanding(&self) -> usize {
        self.pending_heights.len() + self.pending_blocks.len()
    }

    /// A peer reported its chain counters.
    pub fn on_stats(
        &mut self,
        peer: PeerId,
        remote: &XdagStats,
        local_nmain: u64,
        now_ms: u64,
    ) -> Vec<SyncAction> {
        let remote_best = remote.total_nmain.max(remote.nmain);
        if remote_best > self.target_nmain {
            self.target_nmain = remote_best;
        }

        let mut actions = Vec::new();
        if self.state == SyncState::Synced && self.target_nmain > local_nmain + self.config.start_gap
        {
            info!(
                target = self.target_nmain,
                local = local_nmain,
                "behind the network, entering sync"
            );
            self.state = SyncState::Syncing;
            self.next_height = local_nmain + 1;
        }
        self.fill_window(peer, now_ms, &mut actions);
        actions
    }

    /// A main-block header arrived; `known` tells whether the body is
    /// already in the store.
    pub fn on_header(
        &mut self,
        peer: PeerId,
        header: &MainBlockHeader,
        known: bool,
        local_nmain: u64,
        now_ms: u64,
    ) -> Vec<SyncAction> {
        self.pending_heights.remove(&header.height);
        let mut actions = Vec::new();
        if !known && !self.pending_blocks.contains_key(&header.hashlow) {
            self.pending_blocks
                .insert(header.hashlow, Pending::new(peer, now_ms));
            actions.push(SyncAction::Request(
                peer,
                Message::GetMainBlock {
                    hashlow: header.hashlow,
                },
            ));
        }
        self.fill_window(peer, now_ms, &mut actions);
        self.check_complete(local_nmain);
        actions
    }

    /// A requested block body was admitted (or turned out already known).
    pub fn on_block(
        &mut self,
        peer: PeerId,
        hashlow: &Hash256,
        local_nmain: u64,
        now_ms: u64,
    ) -> Vec<SyncAction> {
        self.pending_blocks.remove(hashlow);
        let mut actions = Vec::new();
        self.fill_window(peer, now_ms, &mut actions);
        self.check_complete(local_nmain);
        actions
    }

    /// Periodic timeout sweep. Unanswered requests move to another peer;
    /// a request that exhausted its re-issues drops the unresponsive peer.
    pub fn on_tick(&mut self, now_ms: u64, local_nmain: u64, peers: &[PeerId]) -> Vec<SyncAction> {
        let mut actions = Vec::new();

        let timed_out_heights: Vec<u64> = self
            .pending_heights
            .iter()
            .filter(|(_, p)| p.deadline_ms <= now_ms)
            .map(|(h, _)| *h)
            .collect();
        for height in timed_out_heights {
            let mut pending = self.pending_heights.remove(&height).expect("key just seen");
            if pending.reissues >= MAX_REQUEST_REISSUES {
                debug!(height, peer = pending.peer, "sync request exhausted");
                actions.push(SyncAction::Disconnect(pending.peer, DisconnectReason::Timeout));
                self.retry_heights.insert(height);
                continue;
            }
            let Some(next_peer) = pick_other(peers, &pending) else {
                self.retry_heights.insert(height);
                continue;
            };
            pending.tried.push(pending.peer);
            pending.peer = next_peer;
            pending.deadline_ms = now_ms + SYNC_REQUEST_TIMEOUT_MS;
            pending.reissues += 1;
            actions.push(SyncAction::Request(
                next_peer,
                Message::GetMainBlockHeader { height },
            ));
            self.pending_heights.insert(height, pending);
        }

        let timed_out_blocks: Vec<Hash256> = self
            .pending_blocks
            .iter()
            .filter(|(_, p)| p.deadline_ms <= now_ms)
            .map(|(h, _)| *h)
            .collect();
        for hashlow in timed_out_blocks {
            let mut pending = self.pending_blocks.remove(&hashlow).expect("key just seen");
            if pending.reissues >= MAX_REQUEST_REISSUES {
                actions.push(SyncAction::Disconnect(pending.peer, DisconnectReason::Timeout));
                continue;
            }
            let Some(next_peer) = pick_other(peers, &pending) else {
                continue;
            };
            pending.tried.push(pending.peer);
            pending.peer = next_peer;
            pending.deadline_ms = now_ms + SYNC_REQUEST_TIMEOUT_MS;
            pending.reissues += 1;
            actions.push(SyncAction::Request(next_peer, Message::GetMainBlock { hashlow }));
            self.pending_blocks.insert(hashlow, pending);
        }

        if let Some(peer) = peers.first() {
            self.fill_window(*peer, now_ms, &mut actions);
        }
        self.check_complete(local_nmain);
        actions
    }

    fn fill_window(&mut self, peer: PeerId, now_ms: u64, actions: &mut Vec<SyncAction>) {
        if self.state != SyncState::Syncing {
            return;
        }
        while self.outstanding() < self.config.window {
            let height = match self.retry_heights.pop_first() {
                Some(height) => height,
                None if self.next_height <= self.target_nmain => {
                    let height = self.next_height;
                    self.next_height += 1;
                    height
                }
                None => break,
            };
            self.pending_heights.insert(height, Pending::new(peer, now_ms));
            actions.push(SyncAction::Request(
                peer,
                Message::GetMainBlockHeader { height },
            ));
        }
    }

    fn check_complete(&mut self, local_nmain: u64) {
        if self.state == SyncState::Syncing
            && self.outstanding() == 0
            && self.retry_heights.is_empty()
            && local_nmain >= self.target_nmain
        {
            info!(height = local_nmain, "sync complete");
            self.state = SyncState::Synced;
        }
    }
}

fn pick_other(peers: &[PeerId], pending: &Pending) -> Option<PeerId> {
    peers
        .iter()
        .find(|p| **p != pending.peer && !pending.tried.contains(p))
        .or_else(|| peers.iter().find(|p| **p != pending.peer))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(nmain: u64) -> XdagStats {
        XdagStats {
            nmain,
            total_nmain: nmain,
            ..Default::default()
        }
    }

    fn header(height: u64) -> MainBlockHeader {
        MainBlockHeader {
            height,
            hashlow: Hash256::from_le_u64([0, height, 0, 0]),
            timestamp: height * 1_000,
        }
    }

    fn requested_heights(actions: &[SyncAction]) -> Vec<u64> {
        actions
            .iter()
            .filter_map(|a| match a {
                SyncAction::Request(_, Message::GetMainBlockHeader { height }) => Some(*height),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn small_gap_stays_synced() {
        let mut sync = SyncController::new(SyncConfig::default());
        let actions = sync.on_stats(1, &stats(4), 3, 0);
        assert!(actions.is_empty());
        assert_eq!(sync.state(), SyncState::Synced);
    }

    #[test]
    fn large_gap_starts_header_window() {
        let mut sync = SyncController::new(SyncConfig {
            window: 8,
            start_gap: 1,
        });
        let actions = sync.on_stats(1, &stats(100), 10, 0);
        assert_eq!(sync.state(), SyncState::Syncing);
        assert_eq!(requested_heights(&actions), (11..=18).collect::<Vec<u64>>());
    }

    #[test]
    fn unknown_header_fetches_the_block() {
        let mut sync = SyncController::new(SyncConfig {
            window: 2,
            start_gap: 1,
        });
        sync.on_stats(1, &stats(4), 0, 0);
        let h = header(1);
        let actions = sync.on_header(1, &h, false, 0, 100);
        assert!(actions.contains(&SyncAction::Request(
            1,
            Message::GetMainBlock { hashlow: h.hashlow }
        )));
    }

    #[test]
    fn known_header_is_not_refetched() {
        let mut sync = SyncController::new(SyncConfig {
            window: 2,
            start_gap: 1,
        });
        sync.on_stats(1, &stats(4), 0, 0);
        let actions = sync.on_header(1, &header(1), true, 0, 100);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, SyncAction::Request(_, Message::GetMainBlock { .. }))));
    }

    #[test]
    fn completes_when_window_drains_at_target() {
        let mut sync = SyncController::new(SyncConfig {
            window: 4,
            start_gap: 1,
        });
        sync.on_stats(1, &stats(3), 0, 0);
        assert_eq!(sync.state(), SyncState::Syncing);
        for height in 1..=3 {
            let h = header(height);
            sync.on_header(1, &h, false, height - 1, 100);
            sync.on_block(1, &h.hashlow, height, 200);
        }
        assert_eq!(sync.state(), SyncState::Synced);
        assert_eq!(sync.outstanding(), 0);
    }

    #[test]
    fn timeout_reissues_to_a_different_peer() {
        let mut sync = SyncController::new(SyncConfig {
            window: 1,
            start_gap: 1,
        });
        let first = sync.on_stats(1, &stats(10), 0, 0);
        assert_eq!(requested_heights(&first), vec![1]);

        let actions = sync.on_tick(SYNC_REQUEST_TIMEOUT_MS, 0, &[1, 2]);
        assert_eq!(actions, vec![SyncAction::Request(2, Message::GetMainBlockHeader { height: 1 })]);
    }

    #[test]
    fn exhausted_reissues_disconnect_the_peer() {
        let mut sync = SyncController::new(SyncConfig {
            window: 1,
            start_gap: 1,
        });
        sync.on_stats(1, &stats(10), 0, 0);
        let peers = [1, 2];
        let mut now = 0;
        for _ in 0..MAX_REQUEST_REISSUES {
            now += SYNC_REQUEST_TIMEOUT_MS;
            let actions = sync.on_tick(now, 0, &peers);
            assert!(actions
                .iter()
                .any(|a| matches!(a, SyncAction::Request(_, Message::GetMainBlockHeader { .. }))));
        }
        now += SYNC_REQUEST_TIMEOUT_MS;
        let actions = sync.on_tick(now, 0, &peers);
        assert!(actions
            .iter()
            .any(|a| matches!(a, SyncAction::Disconnect(_, DisconnectReason::Timeout))));
        // the height goes back into the pipeline on the same sweep
        assert!(sync.outstanding() > 0 || !actions.is_empty());
    }

    #[test]
    fn window_advances_as_headers_arrive() {
        let mut sync = SyncController::new(SyncConfig {
            window: 2,
            start_gap: 1,
        });
        let first = sync.on_stats(1, &stats(6), 0, 0);
        assert_eq!(requested_heights(&first), vec![1, 2]);
        let actions = sync.on_header(1, &header(1), true, 1, 100);
        assert_eq!(requested_heights(&actions), vec![3]);
    }
}
