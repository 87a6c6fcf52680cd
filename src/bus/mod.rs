//! Message Bus Module
//!
//! The `MessageBus` decouples channel adapters from the agent loop.
//! Inbound messages (from channels to the loop) and outbound messages (from
//! the loop back to channels) travel on separate bounded queues.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  publish_inbound  ┌──────────────────────┐  consume_inbound_for(key)
//! │   Channel   │──────────────────>│ per-key FIFO queues  │─────────────────────────> session worker
//! └─────────────┘                   │ (bounded in total)   │
//!                                   └──────────┬───────────┘
//!                                              │ next_ready_key()
//!                                              ▼
//!                                        dispatcher
//!
//! ┌─────────────┐  consume_outbound ┌──────────────────────┐  publish_outbound
//! │   Channel   │<──────────────────│   outbound (mpsc)    │<───────────────── session worker
//! └─────────────┘                   └──────────────────────┘
//! ```
//!
//! Inbound ordering is FIFO within a session key; there is no ordering
//! across keys. Producers never wait on a full bus: they get
//! [`ClawError::BusOverflow`] and a [`BusEvent`] is broadcast so the
//! overflow is observable.
//!
//! # Example
//!
//! ```
//! use clawloop::bus::{MessageBus, InboundMessage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MessageBus::new();
//!
//!     let msg = InboundMessage::new("telegram", "user123", "chat456", "Hello");
//!     bus.publish_inbound(msg).unwrap();
//!
//!     let key = bus.next_ready_key().await.unwrap();
//!     let received = bus.consume_inbound_for(&key).await.unwrap();
//!     assert_eq!(received.content, "Hello");
//! }
//! ```

pub mod message;

pub use message::{InboundMessage, MediaAttachment, MediaType, OutboundKind, OutboundMessage};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tracing::{debug, warn};

use crate::error::{ClawError, Result};

/// Default buffer size for message channels
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Capacity of the event broadcast ring
const EVENT_BUFFER_SIZE: usize = 256;

/// Observable bus conditions. None of these are fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    /// An adapter tried to enqueue while inbound was at capacity
    InboundOverflow { session_key: String, capacity: usize },
    /// The loop tried to publish while outbound was at capacity
    OutboundOverflow { session_key: String, channel: String },
    /// A channel failed to deliver an outbound message
    DeliveryFailed {
        session_key: String,
        channel: String,
        error: String,
    },
    /// A sender failed the channel allow-list check
    Rejected { channel: String, sender_id: String },
}

/// Snapshot of the bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub inbound_published: u64,
    pub inbound_consumed: u64,
    pub inbound_overflows: u64,
    pub outbound_published: u64,
    pub outbound_overflows: u64,
    pub delivery_failures: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct BusCounters {
    inbound_published: AtomicU64,
    inbound_consumed: AtomicU64,
    inbound_overflows: AtomicU64,
    outbound_published: AtomicU64,
    outbound_overflows: AtomicU64,
    delivery_failures: AtomicU64,
    rejected: AtomicU64,
}

/// Inbound storage: one FIFO per session key plus the keys awaiting dispatch.
#[derive(Default)]
struct InboundState {
    queues: HashMap<String, VecDeque<InboundMessage>>,
    ready: VecDeque<String>,
    ready_set: HashSet<String>,
    len: usize,
    closed: bool,
}

/// The central message bus for routing messages between channels and the agent loop.
///
/// Cloning a `MessageBus` yields another handle onto the same queues.
#[derive(Clone)]
pub struct MessageBus {
    inbound: Arc<std::sync::Mutex<InboundState>>,
    inbound_capacity: usize,
    /// Wakes the dispatcher when a key becomes ready
    ready_notify: Arc<Notify>,
    /// Wakes keyed consumers when any message arrives
    arrival_notify: Arc<Notify>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<OutboundMessage>>>,
    events: broadcast::Sender<BusEvent>,
    counters: Arc<BusCounters>,
}

impl MessageBus {
    /// Creates a new `MessageBus` with default buffer sizes.
    ///
    /// The default buffer size is 100 messages for both directions.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Creates a new `MessageBus` using the same capacity for both directions.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self::with_capacities(buffer_size, buffer_size)
    }

    /// Creates a new `MessageBus` with separate inbound and outbound capacities.
    ///
    /// # Example
    /// ```
    /// use clawloop::bus::MessageBus;
    ///
    /// let bus = MessageBus::with_capacities(500, 200);
    /// assert_eq!(bus.inbound_capacity(), 500);
    /// ```
    pub fn with_capacities(inbound_capacity: usize, outbound_capacity: usize) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        Self {
            inbound: Arc::new(std::sync::Mutex::new(InboundState::default())),
            inbound_capacity: inbound_capacity.max(1),
            ready_notify: Arc::new(Notify::new()),
            arrival_notify: Arc::new(Notify::new()),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            events,
            counters: Arc::new(BusCounters::default()),
        }
    }

    fn lock_inbound(&self) -> MutexGuard<'_, InboundState> {
        // Critical sections never panic midway, so a poisoned lock still holds consistent data.
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of inbound messages held across all keys.
    pub fn inbound_capacity(&self) -> usize {
        self.inbound_capacity
    }

    /// Publishes an inbound message to the bus.
    ///
    /// Never waits. When the inbound queues are at capacity the message is
    /// handed back to the caller as an error and a [`BusEvent::InboundOverflow`]
    /// is broadcast.
    ///
    /// # Errors
    /// - `ClawError::BusOverflow` if the bus is full
    /// - `ClawError::BusClosed` if the bus has been closed
    pub fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        let key = msg.session_key.clone();
        {
            let mut state = self.lock_inbound();
            if state.closed {
                return Err(ClawError::BusClosed);
            }
            if state.len >= self.inbound_capacity {
                drop(state);
                self.counters
                    .inbound_overflows
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_key = %key,
                    capacity = self.inbound_capacity,
                    "Inbound bus full, rejecting message"
                );
                self.emit(BusEvent::InboundOverflow {
                    session_key: key,
                    capacity: self.inbound_capacity,
                });
                return Err(ClawError::BusOverflow(format!(
                    "inbound queue full ({} messages)",
                    self.inbound_capacity
                )));
            }
            state.queues.entry(key.clone()).or_default().push_back(msg);
            state.len += 1;
            if state.ready_set.insert(key.clone()) {
                state.ready.push_back(key.clone());
            }
        }

        self.counters
            .inbound_published
            .fetch_add(1, Ordering::Relaxed);
        debug!(session_key = %key, "Inbound message enqueued");
        self.ready_notify.notify_one();
        self.arrival_notify.notify_waiters();
        Ok(())
    }

    /// Waits for the next session key that has received messages.
    ///
    /// Each key is reported at most once until it is taken; a key may be
    /// reported again after further messages arrive. Returns `None` once the
    /// bus is closed and no keys remain.
    pub async fn next_ready_key(&self) -> Option<String> {
        loop {
            {
                let mut state = self.lock_inbound();
                if let Some(key) = state.ready.pop_front() {
                    state.ready_set.remove(&key);
                    return Some(key);
                }
                if state.closed {
                    return None;
                }
            }
            self.ready_notify.notified().await;
        }
    }

    /// Takes the oldest pending message for `key` without waiting.
    pub fn try_consume_inbound_for(&self, key: &str) -> Option<InboundMessage> {
        let mut state = self.lock_inbound();
        let queue = state.queues.get_mut(key)?;
        let msg = queue.pop_front();
        if queue.is_empty() {
            state.queues.remove(key);
        }
        if msg.is_some() {
            state.len -= 1;
            self.counters
                .inbound_consumed
                .fetch_add(1, Ordering::Relaxed);
        }
        msg
    }

    /// Waits for the oldest pending message for `key`.
    ///
    /// Returns `None` once the bus is closed and the key has nothing pending.
    pub async fn consume_inbound_for(&self, key: &str) -> Option<InboundMessage> {
        loop {
            let notified = self.arrival_notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so an arrival between the
            // check and the await is not missed.
            notified.as_mut().enable();

            if let Some(msg) = self.try_consume_inbound_for(key) {
                return Some(msg);
            }
            if self.lock_inbound().closed {
                return None;
            }
            notified.await;
        }
    }

    /// Number of messages waiting for `key`.
    pub fn pending_for(&self, key: &str) -> usize {
        self.lock_inbound()
            .queues
            .get(key)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Total number of inbound messages waiting across all keys.
    pub fn inbound_len(&self) -> usize {
        self.lock_inbound().len
    }

    /// True if a message for `key` that starts with the slash command `command` is queued.
    pub fn contains_command(&self, key: &str, command: &str) -> bool {
        self.lock_inbound()
            .queues
            .get(key)
            .map(|q| q.iter().any(|m| m.command() == Some(command)))
            .unwrap_or(false)
    }

    /// Publishes an outbound message to the bus.
    ///
    /// Never waits. A full outbound queue yields `BusOverflow` and a
    /// [`BusEvent::OutboundOverflow`].
    pub fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        match self.outbound_tx.try_send(msg) {
            Ok(()) => {
                self.counters
                    .outbound_published
                    .fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(msg)) => {
                self.counters
                    .outbound_overflows
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_key = %msg.session_key,
                    channel = %msg.channel,
                    "Outbound bus full, rejecting message"
                );
                self.emit(BusEvent::OutboundOverflow {
                    session_key: msg.session_key,
                    channel: msg.channel,
                });
                Err(ClawError::BusOverflow("outbound queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClawError::BusClosed),
        }
    }

    /// Consumes the next outbound message from the bus.
    ///
    /// Returns `None` if the channel is closed (all senders dropped).
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Subscribes to overflow, delivery-failure and rejection events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    /// Broadcasts an event and bumps the matching counter.
    pub fn emit(&self, event: BusEvent) {
        match &event {
            BusEvent::DeliveryFailed { .. } => {
                self.counters
                    .delivery_failures
                    .fetch_add(1, Ordering::Relaxed);
            }
            BusEvent::Rejected { .. } => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        // No subscribers is fine; the counters still record it.
        let _ = self.events.send(event);
    }

    /// Returns a snapshot of the bus counters.
    pub fn stats(&self) -> BusStats {
        let c = &self.counters;
        BusStats {
            inbound_published: c.inbound_published.load(Ordering::Relaxed),
            inbound_consumed: c.inbound_consumed.load(Ordering::Relaxed),
            inbound_overflows: c.inbound_overflows.load(Ordering::Relaxed),
            outbound_published: c.outbound_published.load(Ordering::Relaxed),
            outbound_overflows: c.outbound_overflows.load(Ordering::Relaxed),
            delivery_failures: c.delivery_failures.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting inbound messages and wakes every waiter.
    ///
    /// Messages already queued can still be consumed.
    pub fn close(&self) {
        self.lock_inbound().closed = true;
        self.ready_notify.notify_one();
        self.arrival_notify.notify_waiters();
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock_inbound().closed
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
