use crate::frame::write_frame;
use crate::message::{opcodes, DisconnectReason, Message};
use crate::scheduler::TaskHandle;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::net::TcpStream;
use tracing::{debug, warn};

/// Messages drained per tick.
pub const MAX_BURST: usize = 5;

/// Queue ticks fire at this period on the shared scheduler.
pub const TICK_INTERVAL_MS: u64 = 10;

#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Maximum queued messages before the peer is dropped.
    pub max_queue_size: usize,
    /// Opcodes routed through the priority sub-queue.
    pub priority_opcodes: HashSet<u8>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 4_096,
            priority_opcodes: [opcodes::NEW_BLOCK].into_iter().collect(),
        }
    }
}

/// The write side of a peer connection, abstracted so tests can observe the
/// exact wire order.
pub trait Transport: Send {
    fn write_message(&mut self, msg: &Message) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn shutdown(&mut self);
}

/// Production transport over a cloned TCP write half.
pub struct TcpTransport {
    stream: io::BufWriter<TcpStream>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: io::BufWriter::new(stream),
        }
    }
}

impl Transport for TcpTransport {
    fn write_message(&mut self, msg: &Message) -> io::Result<()> {
        write_frame(&mut self.stream, msg).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.stream)
    }

    fn shutdown(&mut self) {
        let _ = self.stream.get_ref().shutdown(std::net::Shutdown::Both);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Active,
    Closed,
}

struct Queues {
    state: QueueState,
    normal: VecDeque<Message>,
    prioritized: VecDeque<Message>,
}

/// Ordered, bounded, priority-aware outbound queue for one peer.
///
/// `send` never touches the socket; a shared scheduler invokes [`tick`]
/// every 10 ms, draining up to [`MAX_BURST`] messages (priority sub-queue
/// first) and flushing once. Overflow closes the peer with
/// `MESSAGE_QUEUE_FULL`.
///
/// [`tick`]: MessageQueue::tick
pub struct MessageQueue {
    config: QueueConfig,
    queues: Mutex<Queues>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    tick_task: Mutex<Option<TaskHandle>>,
}

impl MessageQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            queues: Mutex::new(Queues {
                state: QueueState::Idle,
                normal: VecDeque::new(),
                prioritized: VecDeque::new(),
            }),
            transport: Mutex::new(None),
            tick_task: Mutex::new(None),
        }
    }

    /// Attaches the transport and starts accepting sends.
    pub fn activate(&self, transport: Box<dyn Transport>) {
        *self.transport.lock() = Some(transport);
        let mut queues = self.queues.lock();
        if queues.state == QueueState::Idle {
            queues.state = QueueState::Active;
        }
    }

    /// Remembers the scheduler task driving this queue so `deactivate` can
    /// cancel it.
    pub fn bind_tick(&self, handle: TaskHandle) {
        *self.tick_task.lock() = Some(handle);
    }

    /// Stops the scheduled tick without emitting a disconnect.
    pub fn deactivate(&self) {
        if let Some(handle) = self.tick_task.lock().take() {
            handle.cancel();
        }
    }

    pub fn state(&self) -> QueueState {
        self.queues.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == QueueState::Closed
    }

    pub fn size(&self) -> usize {
        let queues = self.queues.lock();
        queues.normal.len() + queues.prioritized.len()
    }

    pub fn is_idle(&self) -> bool {
        self.size() == 0
    }

    /// Enqueues a message. Returns false when the queue is not active or
    /// overflows; overflow also emits `DISCONNECT(MESSAGE_QUEUE_FULL)` and
    /// closes the queue for good.
    pub fn send(&self, msg: Message) -> bool {
        {
            let mut queues = self.queues.lock();
            if queues.state != QueueState::Active {
                return false;
            }
            if queues.normal.len() + queues.prioritized.len() < self.config.max_queue_size {
                if self.config.priority_opcodes.contains(&msg.opcode()) {
                    queues.prioritized.push_back(msg);
                } else {
                    queues.normal.push_back(msg);
                }
                return true;
            }
            debug!(size = queues.normal.len() + queues.prioritized.len(), "message queue full");
        }
        self.close(DisconnectReason::MessageQueueFull);
        false
    }

    /// Drains up to [`MAX_BURST`] messages to the transport, then flushes
    /// once. Transport errors bubble up so the session can tear down.
    pub fn tick(&self) -> io::Result<()> {
        let batch: Vec<Message> = {
            let mut queues = self.queues.lock();
            if queues.state != QueueState::Active {
                return Ok(());
            }
            let mut batch = Vec::new();
            while batch.len() < MAX_BURST {
                let next = queues
                    .prioritized
                    .pop_front()
                    .or_else(|| queues.normal.pop_front());
                match next {
                    Some(msg) => batch.push(msg),
                    None => break,
                }
            }
            batch
        };
        if batch.is_empty() {
            return Ok(());
        }

        let mut guard = self.transport.lock();
        let Some(transport) = guard.as_mut() else {
            return Ok(());
        };
        for msg in &batch {
            transport.write_message(msg)?;
        }
        transport.flush()
    }

    /// Tears the transport down without a farewell frame, for connections
    /// whose remote end is already gone. Idempotent like `close`.
    pub fn abort(&self) {
        {
            let mut queues = self.queues.lock();
            if queues.state == QueueState::Closed {
                return;
            }
            queues.state = QueueState::Closed;
        }
        self.deactivate();
        if let Some(transport) = self.transport.lock().as_mut() {
            transport.shutdown();
        }
    }

    /// Idempotent shutdown: the first call writes `DISCONNECT(reason)`,
    /// flushes and schedules transport shutdown; later calls are no-ops.
    pub fn close(&self, reason: DisconnectReason) {
        {
            let mut queues = self.queues.lock();
            if queues.state == QueueState::Closed {
                return;
            }
            queues.state = QueueState::Closed;
        }
        self.deactivate();
        let mut guard = self.transport.lock();
        if let Some(transport) = guard.as_mut() {
            let farewell = Message::Disconnect { reason };
            if let Err(err) = transport
                .write_message(&farewell)
                .and_then(|_| transport.flush())
            {
                warn!(%err, "failed to deliver disconnect");
            }
            transport.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Eq)]
    enum WireEvent {
        Msg(Message),
        Flush,
        Shutdown,
    }

    #[derive(Clone, Default)]
    struct MockTransport {
        events: Arc<Mutex<Vec<WireEvent>>>,
    }

    impl Transport for MockTransport {
        fn write_message(&mut self, msg: &Message) -> io::Result<()> {
            self.events.lock().push(WireEvent::Msg(msg.clone()));
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.events.lock().push(WireEvent::Flush);
            Ok(())
        }

        fn shutdown(&mut self) {
            self.events.lock().push(WireEvent::Shutdown);
        }
    }

    fn active_queue(max: usize) -> (MessageQueue, Arc<Mutex<Vec<WireEvent>>>) {
        let queue = MessageQueue::new(QueueConfig {
            max_queue_size: max,
            ..QueueConfig::default()
        });
        let transport = MockTransport::default();
        let events = transport.events.clone();
        queue.activate(Box::new(transport));
        (queue, events)
    }

    fn normal_msg(height: u64) -> Message {
        Message::GetMainBlockHeader { height }
    }

    fn priority_msg() -> Message {
        Message::NewBlock(
            xdag_core::BlockBuilder::new(1_000)
                .remark(b"priority")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn idle_queue_rejects_sends() {
        let queue = MessageQueue::new(QueueConfig::default());
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(!queue.send(normal_msg(1)));
    }

    #[test]
    fn overflow_disconnects_with_queue_full() {
        let (queue, events) = active_queue(4);
        for height in 0..4 {
            assert!(queue.send(normal_msg(height)));
        }
        // the fifth send overflows
        assert!(!queue.send(normal_msg(4)));
        assert!(queue.is_closed());
        // and stays closed
        assert!(!queue.send(normal_msg(5)));

        let events = events.lock();
        assert_eq!(
            events[0],
            WireEvent::Msg(Message::Disconnect {
                reason: DisconnectReason::MessageQueueFull
            })
        );
        assert_eq!(events[1], WireEvent::Flush);
        assert_eq!(events[2], WireEvent::Shutdown);
    }

    #[test]
    fn priority_preempts_but_keeps_relative_order() {
        let (queue, events) = active_queue(64);
        for height in 0..3 {
            assert!(queue.send(normal_msg(height)));
        }
        let urgent = priority_msg();
        assert!(queue.send(urgent.clone()));

        queue.tick().unwrap();

        let events = events.lock();
        let expected = vec![
            WireEvent::Msg(urgent),
            WireEvent::Msg(normal_msg(0)),
            WireEvent::Msg(normal_msg(1)),
            WireEvent::Msg(normal_msg(2)),
            WireEvent::Flush,
        ];
        assert_eq!(*events, expected);
    }

    #[test]
    fn tick_drains_at_most_five_with_one_flush() {
        let (queue, events) = active_queue(64);
        for height in 0..8 {
            assert!(queue.send(normal_msg(height)));
        }
        queue.tick().unwrap();
        {
            let events = events.lock();
            assert_eq!(events.len(), MAX_BURST + 1);
            assert_eq!(events[MAX_BURST], WireEvent::Flush);
        }
        assert_eq!(queue.size(), 3);

        queue.tick().unwrap();
        let events = events.lock();
        let msgs: Vec<&WireEvent> = events
            .iter()
            .filter(|e| matches!(e, WireEvent::Msg(_)))
            .collect();
        assert_eq!(msgs.len(), 8);
        // submission order preserved within the normal class
        for (i, event) in msgs.iter().enumerate() {
            assert_eq!(**event, WireEvent::Msg(normal_msg(i as u64)));
        }
    }

    #[test]
    fn close_is_idempotent() {
        let (queue, events) = active_queue(8);
        queue.close(DisconnectReason::Timeout);
        queue.close(DisconnectReason::BadProtocol);
        let events = events.lock();
        let disconnects = events
            .iter()
            .filter(|e| matches!(e, WireEvent::Msg(Message::Disconnect { .. })))
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(
            events[0],
            WireEvent::Msg(Message::Disconnect {
                reason: DisconnectReason::Timeout
            })
        );
    }

    #[test]
    fn tick_after_close_is_a_no_op() {
        let (queue, events) = active_queue(8);
        assert!(queue.send(normal_msg(0)));
        queue.close(DisconnectReason::Timeout);
        let before = events.lock().len();
        queue.tick().unwrap();
        assert_eq!(events.lock().len(), before);
    }

    #[test]
    fn transport_error_propagates_from_tick() {
        struct FailingTransport;
        impl Transport for FailingTransport {
            fn write_message(&mut self, _msg: &Message) -> io::Result<()> {
                Err(io::Error::other("broken pipe"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
            fn shutdown(&mut self) {}
        }
        let queue = MessageQueue::new(QueueConfig::default());
        queue.activate(Box::new(FailingTransport));
        assert!(queue.send(normal_msg(0)));
        assert!(queue.tick().is_err());
    }
}
