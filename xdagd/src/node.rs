use crate::config::Config;
use crate::errors::{NodeError, NodeResult};
use crate::sync::{SyncAction, SyncController};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use xdag_consensus::{ChainError, Dagchain, ImportResult};
use xdag_core::{Block, Hash256, XdagStats, PROTOCOL_VERSION};
use xdag_crypto::{keccak256, KeyPair};
use xdag_database::{BlockStore, Database, MetaStore};
use xdag_network::{
    read_frame, DisconnectReason, MainBlockHeader, Message, MessageQueue, NetError, PeerSession,
    SessionAction, SessionConfig, TaskHandle, TcpTransport, TickScheduler,
};

const EPOCH_TICK: Duration = Duration::from_secs(1);
const SESSION_TICK: Duration = Duration::from_secs(1);
const SYNC_TICK: Duration = Duration::from_secs(1);
const QUEUE_TICK: Duration = Duration::from_millis(xdag_network::queue::TICK_INTERVAL_MS);
const CHAIN_CHANNEL_DEPTH: usize = 1_024;

pub type PeerId = u64;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock after the epoch")
        .as_millis() as u64
}

enum ChainCommand {
    Import {
        block: Block,
        from: Option<PeerId>,
        relay: bool,
    },
    EpochTick,
    Shutdown,
}

struct PeerHandle {
    id: PeerId,
    addr: SocketAddr,
    queue: Arc<MessageQueue>,
    session: Mutex<PeerSession>,
    node_id: Mutex<Option<[u8; 20]>>,
    session_tick: Mutex<Option<TaskHandle>>,
}

struct Shared {
    config: Config,
    store: Arc<BlockStore>,
    peers: Mutex<HashMap<PeerId, Arc<PeerHandle>>>,
    next_peer_id: AtomicU64,
    /// Snapshot the consensus thread refreshes after every ledger change;
    /// I/O threads serve STATS from it without touching the chain.
    stats: RwLock<XdagStats>,
    tip: RwLock<Hash256>,
    sync: Mutex<SyncController>,
    chain_tx: SyncSender<ChainCommand>,
    fatal_tx: tokio::sync::mpsc::UnboundedSender<NodeError>,
    scheduler: TickScheduler,
    node_id: [u8; 20],
    shutdown: AtomicBool,
}

/// The running daemon: storage, the consensus thread, the listener and the
/// timer plane, wired per the configuration.
pub struct Node {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    fatal_rx: tokio::sync::mpsc::UnboundedReceiver<NodeError>,
}

impl Node {
    pub fn start(config: Config) -> NodeResult<Node> {
        fs::create_dir_all(&config.data_dir)
            .map_err(|e| NodeError::Config(format!("cannot create data dir: {e}")))?;

        let key = load_or_create_node_key(&config)?;
        let node_id = derive_node_id(&key);

        let db = Arc::new(Database::open(&config.data_dir)?);
        let store = Arc::new(BlockStore::new(db.clone(), 4_096));
        let meta_store = MetaStore::new(db);
        let chain = Dagchain::bootstrap(store.clone(), &meta_store, config.network)?;
        let stats = chain.stats()?;
        let tip = chain.tip();
        info!(
            network = config.network.name(),
            height = chain.tip_height(),
            %tip,
            "chain ready"
        );

        let listener = TcpListener::bind(("0.0.0.0", config.port))?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let (chain_tx, chain_rx) = mpsc::sync_channel(CHAIN_CHANNEL_DEPTH);
        let (fatal_tx, fatal_rx) = tokio::sync::mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            sync: Mutex::new(SyncController::new(config.sync.clone())),
            config,
            store,
            peers: Mutex::new(HashMap::new()),
            next_peer_id: AtomicU64::new(1),
            stats: RwLock::new(stats),
            tip: RwLock::new(tip),
            chain_tx,
            fatal_tx,
            scheduler: TickScheduler::new("xdag-timer"),
            node_id,
            shutdown: AtomicBool::new(false),
        });

        spawn_consensus_thread(chain, chain_rx, shared.clone());
        spawn_accept_thread(listener, shared.clone());
        schedule_global_ticks(&shared);
        connect_bootnodes(&shared);

        info!(%local_addr, "p2p listener up");
        Ok(Node {
            shared,
            local_addr,
            fatal_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until Ctrl-C or a fatal subsystem failure; returns the
    /// process exit code.
    pub async fn run(mut self) -> i32 {
        let code = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                0
            }
            err = self.fatal_rx.recv() => match err {
                Some(err) => {
                    error!(%err, "fatal failure");
                    err.exit_code()
                }
                None => 0,
            },
        };
        self.stop();
        code
    }

    pub fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _ = self.shared.chain_tx.try_send(ChainCommand::Shutdown);
        let peers: Vec<Arc<PeerHandle>> = self.shared.peers.lock().values().cloned().collect();
        for peer in peers {
            close_peer(&self.shared, &peer, DisconnectReason::Timeout, true);
        }
        self.shared.scheduler.shutdown();
    }
}

fn load_or_create_node_key(config: &Config) -> NodeResult<KeyPair> {
    let path = config.data_dir.join("node_key");
    if path.exists() {
        let hex_key = fs::read_to_string(&path)
            .map_err(|e| NodeError::Crypto(format!("unreadable node key: {e}")))?;
        let raw = hex::decode(hex_key.trim())
            .map_err(|e| NodeError::Crypto(format!("corrupt node key: {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| NodeError::Crypto("node key must be 32 bytes".into()))?;
        KeyPair::from_secret_bytes(&bytes)
            .map_err(|e| NodeError::Crypto(format!("invalid node key: {e}")))
    } else {
        let key = KeyPair::generate();
        fs::write(&path, hex::encode(key.secret_bytes()))
            .map_err(|e| NodeError::Crypto(format!("cannot persist node key: {e}")))?;
        Ok(key)
    }
}

/// Node identity: the tail of the Keccak-256 of the uncompressed public key.
fn derive_node_id(key: &KeyPair) -> [u8; 20] {
    let digest = keccak256(&key.uncompressed_public()[1..]);
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest[12..]);
    id
}

fn spawn_consensus_thread(mut chain: Dagchain, rx: Receiver<ChainCommand>, shared: Arc<Shared>) {
    thread::Builder::new()
        .name("xdag-consensus".into())
        .spawn(move || consensus_loop(&mut chain, rx, &shared))
        .expect("spawning the consensus thread");
}

fn consensus_loop(chain: &mut Dagchain, rx: Receiver<ChainCommand>, shared: &Arc<Shared>) {
    while let Ok(command) = rx.recv() {
        match command {
            ChainCommand::Shutdown => break,
            ChainCommand::EpochTick => {
                if let Err(err) = chain.epoch_tick(now_ms()) {
                    if report_chain_error(shared, err) {
                        return;
                    }
                }
                refresh_snapshot(chain, shared);
            }
            ChainCommand::Import { block, from, relay } => {
                let hashlow = block.hashlow();
                let relayable = relay.then(|| block.clone());
                match chain.try_connect(block, now_ms()) {
                    Ok(ImportResult::Applied { .. }) => {
                        refresh_snapshot(chain, shared);
                        if let Some(block) = relayable {
                            relay_block(shared, from, block);
                        }
                        note_sync_block(chain, shared, from, &hashlow);
                    }
                    Ok(ImportResult::AlreadyKnown) => {
                        note_sync_block(chain, shared, from, &hashlow);
                    }
                    Ok(ImportResult::Orphaned { missing }) => {
                        // fetch the gap from whoever sent the orphan
                        if let Some(peer) = from.and_then(|id| lookup_peer(shared, id)) {
                            for hashlow in missing {
                                peer.queue.send(Message::GetMainBlock { hashlow });
                            }
                        }
                    }
                    Err(err) => {
                        if report_chain_error(shared, err) {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Returns true when the error is fatal and the consensus loop must stop.
fn report_chain_error(shared: &Arc<Shared>, err: ChainError) -> bool {
    if err.is_fatal() {
        let tip = *shared.tip.read();
        error!(%err, %tip, "consensus failure, requesting shutdown");
        let _ = shared.fatal_tx.send(NodeError::Chain(err));
        true
    } else {
        debug!(%err, "block rejected");
        false
    }
}

fn refresh_snapshot(chain: &Dagchain, shared: &Arc<Shared>) {
    match chain.stats() {
        Ok(fresh) => {
            let mut stats = shared.stats.write();
            let merged_blocks = stats.total_nblocks.max(fresh.total_nblocks);
            let merged_main = stats.total_nmain.max(fresh.total_nmain);
            *stats = fresh;
            stats.total_nblocks = merged_blocks;
            stats.total_nmain = merged_main;
            *shared.tip.write() = stats.tip_hashlow;
        }
        Err(err) => {
            let _ = report_chain_error(shared, err);
        }
    }
}

fn note_sync_block(chain: &Dagchain, shared: &Arc<Shared>, from: Option<PeerId>, hashlow: &Hash256) {
    let Some(peer) = from else { return };
    let actions = shared
        .sync
        .lock()
        .on_block(peer, hashlow, chain.tip_height(), now_ms());
    perform_sync_actions(shared, actions);
}

fn relay_block(shared: &Arc<Shared>, from: Option<PeerId>, block: Block) {
    let peers = shared.peers.lock();
    for (id, peer) in peers.iter() {
        if Some(*id) == from {
            continue;
        }
        peer.queue.send(Message::NewBlock(block.clone()));
    }
}

fn lookup_peer(shared: &Arc<Shared>, id: PeerId) -> Option<Arc<PeerHandle>> {
    shared.peers.lock().get(&id).cloned()
}

fn perform_sync_actions(shared: &Arc<Shared>, actions: Vec<SyncAction>) {
    for action in actions {
        match action {
            SyncAction::Request(peer, msg) => {
                if let Some(peer) = lookup_peer(shared, peer) {
                    peer.queue.send(msg);
                }
            }
            SyncAction::Disconnect(peer, reason) => {
                if let Some(peer) = lookup_peer(shared, peer) {
                    close_peer(shared, &peer, reason, false);
                }
            }
        }
    }
}

fn schedule_global_ticks(shared: &Arc<Shared>) {
    let chain_tx = shared.chain_tx.clone();
    shared
        .scheduler
        .schedule_at_fixed_rate(EPOCH_TICK, EPOCH_TICK, move || {
            if let Err(TrySendError::Disconnected(_)) = chain_tx.try_send(ChainCommand::EpochTick) {
                // consensus thread is gone; nothing left to drive
            }
        });

    let weak = Arc::downgrade(shared);
    shared
        .scheduler
        .schedule_at_fixed_rate(SYNC_TICK, SYNC_TICK, move || {
            let Some(shared) = weak.upgrade() else { return };
            let peer_ids: Vec<PeerId> = shared.peers.lock().keys().copied().collect();
            let local_nmain = shared.stats.read().nmain;
            let actions = shared
                .sync
                .lock()
                .on_tick(now_ms(), local_nmain, &peer_ids);
            perform_sync_actions(&shared, actions);
        });
}

fn spawn_accept_thread(listener: TcpListener, shared: Arc<Shared>) {
    thread::Builder::new()
        .name("xdag-accept".into())
        .spawn(move || loop {
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            match listener.accept() {
                Ok((stream, addr)) => {
                    debug!(%addr, "inbound connection");
                    if let Err(err) = setup_peer(&shared, stream, addr, false) {
                        warn!(%addr, %err, "failed to set up inbound peer");
                    }
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                    thread::sleep(Duration::from_millis(100));
                }
            }
        })
        .expect("spawning the accept thread");
}

fn connect_bootnodes(shared: &Arc<Shared>) {
    for addr in shared.config.bootnodes.clone() {
        let shared = shared.clone();
        thread::Builder::new()
            .name("xdag-dial".into())
            .spawn(move || match TcpStream::connect_timeout(&addr, Duration::from_secs(5)) {
                Ok(stream) => {
                    if let Err(err) = setup_peer(&shared, stream, addr, true) {
                        warn!(%addr, %err, "failed to set up outbound peer");
                    }
                }
                Err(err) => warn!(%addr, %err, "bootnode unreachable"),
            })
            .expect("spawning a dial thread");
    }
}

fn setup_peer(
    shared: &Arc<Shared>,
    stream: TcpStream,
    addr: SocketAddr,
    outbound: bool,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let write_half = stream.try_clone()?;

    let id = shared.next_peer_id.fetch_add(1, Ordering::Relaxed);
    let queue = Arc::new(MessageQueue::new(shared.config.queue.clone()));
    queue.activate(Box::new(TcpTransport::new(write_half)));

    let session_config = SessionConfig {
        network_id: shared.config.network.id(),
        version: PROTOCOL_VERSION,
        listen_port: shared.config.port,
        node_id: shared.node_id,
    };
    let now = now_ms();
    let (session, first_actions) = if outbound {
        let (session, actions) = PeerSession::outbound(session_config, now, *shared.tip.read());
        (session, actions)
    } else {
        (PeerSession::inbound(session_config, now), Vec::new())
    };

    let peer = Arc::new(PeerHandle {
        id,
        addr,
        queue: queue.clone(),
        session: Mutex::new(session),
        node_id: Mutex::new(None),
        session_tick: Mutex::new(None),
    });
    shared.peers.lock().insert(id, peer.clone());

    // flush ticks every 10 ms on the shared timer thread
    {
        let weak_queue = Arc::downgrade(&queue);
        let weak_shared = Arc::downgrade(shared);
        let weak_peer = Arc::downgrade(&peer);
        let handle = shared
            .scheduler
            .schedule_at_fixed_rate(QUEUE_TICK, QUEUE_TICK, move || {
                let Some(queue) = weak_queue.upgrade() else { return };
                if queue.is_closed() {
                    return;
                }
                if let Err(err) = queue.tick() {
                    if let (Some(shared), Some(peer)) = (weak_shared.upgrade(), weak_peer.upgrade())
                    {
                        warn!(peer = peer.id, %err, "transport write failed");
                        close_peer(&shared, &peer, DisconnectReason::Timeout, true);
                    }
                }
            });
        queue.bind_tick(handle);
    }

    // liveness and handshake deadlines once a second
    {
        let weak_shared = Arc::downgrade(shared);
        let weak_peer = Arc::downgrade(&peer);
        let handle = shared
            .scheduler
            .schedule_at_fixed_rate(SESSION_TICK, SESSION_TICK, move || {
                let (Some(shared), Some(peer)) = (weak_shared.upgrade(), weak_peer.upgrade())
                else {
                    return;
                };
                let actions = peer.session.lock().on_tick(now_ms());
                handle_session_actions(&shared, &peer, actions);
            });
        *peer.session_tick.lock() = Some(handle);
    }

    handle_session_actions(shared, &peer, first_actions);

    let shared = shared.clone();
    thread::Builder::new()
        .name(format!("xdag-peer-{id}"))
        .spawn(move || reader_loop(shared, peer, stream))
        .expect("spawning a peer reader thread");
    Ok(())
}

fn reader_loop(shared: Arc<Shared>, peer: Arc<PeerHandle>, mut stream: TcpStream) {
    loop {
        if peer.queue.is_closed() {
            return;
        }
        match read_frame(&mut stream) {
            Ok(msg) => {
                let tip = *shared.tip.read();
                let actions = peer.session.lock().on_message(msg, now_ms(), tip);
                handle_session_actions(&shared, &peer, actions);
            }
            Err(NetError::Io(err)) => {
                if !peer.queue.is_closed() {
                    debug!(peer = peer.id, %err, "connection dropped");
                    close_peer(&shared, &peer, DisconnectReason::Timeout, true);
                }
                return;
            }
            Err(err) => {
                warn!(peer = peer.id, %err, "protocol violation");
                close_peer(&shared, &peer, DisconnectReason::BadProtocol, false);
                return;
            }
        }
    }
}

fn handle_session_actions(shared: &Arc<Shared>, peer: &Arc<PeerHandle>, actions: Vec<SessionAction>) {
    for action in actions {
        match action {
            SessionAction::Send(msg) => {
                peer.queue.send(msg);
            }
            SessionAction::Close(reason) => {
                close_peer(shared, peer, reason, false);
            }
            SessionAction::Teardown(_reason) => {
                close_peer(shared, peer, DisconnectReason::Timeout, true);
            }
            SessionAction::Established(handshake) => {
                let duplicate = shared.peers.lock().values().any(|other| {
                    other.id != peer.id && *other.node_id.lock() == Some(handshake.node_id)
                });
                if duplicate {
                    close_peer(shared, peer, DisconnectReason::DuplicatedPeerId, false);
                    continue;
                }
                *peer.node_id.lock() = Some(handshake.node_id);
                info!(peer = peer.id, addr = %peer.addr, "handshake complete");
                peer.queue.send(Message::GetStats);
            }
            SessionAction::Forward(msg) => dispatch(shared, peer, msg),
        }
    }
}

fn dispatch(shared: &Arc<Shared>, peer: &Arc<PeerHandle>, msg: Message) {
    match msg {
        Message::NewBlock(block) => submit_block(shared, peer, block, true),
        Message::MainBlock(block) => submit_block(shared, peer, block, false),
        Message::GetMainBlock { hashlow } => match shared.store.get_block(&hashlow) {
            Ok(Some(block)) => {
                peer.queue.send(Message::MainBlock(block));
            }
            Ok(None) => debug!(peer = peer.id, %hashlow, "unknown block requested"),
            Err(err) => warn!(%err, "store read failed serving a block"),
        },
        Message::GetMainBlockHeader { height } => match main_header_at(shared, height) {
            Ok(Some(header)) => {
                peer.queue.send(Message::MainBlockHeader(header));
            }
            Ok(None) => debug!(peer = peer.id, height, "no main block at requested height"),
            Err(err) => warn!(%err, "store read failed serving a header"),
        },
        Message::MainBlockHeader(header) => {
            let known = match shared.store.has_block(&header.hashlow) {
                Ok(known) => known,
                Err(err) => {
                    warn!(%err, "store read failed checking a header");
                    return;
                }
            };
            let local_nmain = shared.stats.read().nmain;
            let actions =
                shared
                    .sync
                    .lock()
                    .on_header(peer.id, &header, known, local_nmain, now_ms());
            perform_sync_actions(shared, actions);
        }
        Message::GetStats => {
            let stats = shared.stats.read().clone();
            peer.queue.send(Message::Stats(stats));
        }
        Message::Stats(remote) => {
            let local_nmain = {
                let mut stats = shared.stats.write();
                stats.merge_remote(&remote);
                stats.nmain
            };
            let actions = shared
                .sync
                .lock()
                .on_stats(peer.id, &remote, local_nmain, now_ms());
            perform_sync_actions(shared, actions);
        }
        // handshake-plane messages never reach dispatch
        Message::Disconnect { .. } | Message::Handshake(_) | Message::Ping { .. } => {}
    }
}

fn submit_block(shared: &Arc<Shared>, peer: &Arc<PeerHandle>, block: Block, relay: bool) {
    let command = ChainCommand::Import {
        block,
        from: Some(peer.id),
        relay,
    };
    match shared.chain_tx.try_send(command) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            // admission is saturated; drop and let sync re-request
            debug!(peer = peer.id, "consensus channel full, dropping block");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

fn main_header_at(shared: &Arc<Shared>, height: u64) -> Result<Option<MainBlockHeader>, NodeError> {
    let Some(hashlow) = shared.store.main_hash_at(height)? else {
        return Ok(None);
    };
    let Some(info) = shared.store.get_info(&hashlow)? else {
        return Ok(None);
    };
    Ok(Some(MainBlockHeader {
        height,
        hashlow,
        timestamp: info.timestamp,
    }))
}

/// Removes the peer and tears its connection down. `silent` skips the
/// disconnect frame (remote already gone).
fn close_peer(shared: &Arc<Shared>, peer: &Arc<PeerHandle>, reason: DisconnectReason, silent: bool) {
    shared.peers.lock().remove(&peer.id);
    if let Some(handle) = peer.session_tick.lock().take() {
        handle.cancel();
    }
    peer.session.lock().mark_closed();
    if silent {
        peer.queue.abort();
    } else {
        peer.queue.close(reason);
    }
}
