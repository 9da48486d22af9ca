//! Room table and fan-out
//!
//! One room per auction id. `publish` holds the room table's read lock
//! and the room's own lock for the whole fan-out, so a publish either
//! sees a membership change completely or not at all, and every
//! subscriber receives one room's events in publish order. Fan-out only
//! pushes into bounded in-memory queues and never awaits.
//!
//! Lock order is always room table, then room, then subscriber queue.
//! Subscribers disconnected for overflow are collected during fan-out
//! and torn down after the locks are released.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use types::events::{AuctionEvent, EventPublisher};
use types::ids::AuctionId;

use crate::backpressure::{BackpressureAction, ClientQueue, DropPolicy};
use crate::protocol::{ClientMessage, ServerMessage};

pub type SubscriberId = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("max rooms ({max}) reached")]
    TooManyRooms { max: usize },

    #[error("subscriber {0} is disconnected")]
    Disconnected(SubscriberId),
}

/// Configuration for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Outbound queue capacity per subscriber.
    pub queue_capacity: usize,
    pub drop_policy: DropPolicy,
    /// Server ping interval (default: 30s).
    pub heartbeat_interval: Duration,
    /// Subscribers silent for longer than this are dropped (default: 90s).
    pub stale_timeout: Duration,
    pub max_rooms_per_subscriber: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            drop_policy: DropPolicy::DropOldest,
            heartbeat_interval: Duration::from_secs(30),
            stale_timeout: Duration::from_secs(90),
            max_rooms_per_subscriber: 50,
        }
    }
}

/// Counters for logging and health output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub subscribers: usize,
    pub rooms: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub disconnected: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Room {
    members: Mutex<BTreeSet<SubscriberId>>,
}

struct SubscriberState {
    queue: Mutex<ClientQueue<ServerMessage>>,
    notify: Notify,
    rooms: Mutex<BTreeSet<AuctionId>>,
    last_seen: Mutex<Instant>,
    closed: AtomicBool,
}

impl SubscriberState {
    fn new(config: &BrokerConfig) -> Self {
        Self {
            queue: Mutex::new(ClientQueue::new(config.queue_capacity, config.drop_policy)),
            notify: Notify::new(),
            rooms: Mutex::new(BTreeSet::new()),
            last_seen: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    disconnected: AtomicU64,
}

struct Inner {
    config: BrokerConfig,
    next_id: AtomicU64,
    next_nonce: AtomicU64,
    rooms: RwLock<HashMap<AuctionId, Arc<Room>>>,
    subscribers: DashMap<SubscriberId, Arc<SubscriberState>>,
    counters: Counters,
}

/// Enqueue outcome for one subscriber
enum Delivery {
    Queued,
    DroppedOldest,
    Overflow,
}

/// Shared handle to one broker instance. Cheap to clone.
#[derive(Clone)]
pub struct BrokerHandle {
    inner: Arc<Inner>,
}

impl BrokerHandle {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                next_id: AtomicU64::new(1),
                next_nonce: AtomicU64::new(1),
                rooms: RwLock::new(HashMap::new()),
                subscribers: DashMap::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Register a new subscriber with an empty queue and no rooms.
    pub fn connect(&self) -> Subscriber {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(SubscriberState::new(&self.inner.config));
        self.inner.subscribers.insert(id, state.clone());
        debug!(client_id = id, "Subscriber connected");
        Subscriber {
            id,
            state,
            broker: self.clone(),
        }
    }

    /// Add `id` to the room. Returns false if it was already a member.
    pub fn join(&self, id: SubscriberId, auction_id: &AuctionId) -> Result<bool, BrokerError> {
        let state = self.state(id)?;
        {
            let mut rooms = lock(&state.rooms);
            if rooms.contains(auction_id) {
                return Ok(false);
            }
            let max = self.inner.config.max_rooms_per_subscriber;
            if rooms.len() >= max {
                return Err(BrokerError::TooManyRooms { max });
            }
            rooms.insert(auction_id.clone());
        }

        self.add_member(id, auction_id);
        // A disconnect racing this join may have missed the new membership.
        if state.is_closed() {
            self.remove_member(id, auction_id);
            return Err(BrokerError::Disconnected(id));
        }
        debug!(client_id = id, auction_id = %auction_id, "Joined room");
        Ok(true)
    }

    /// Remove `id` from the room. Returns false if it was not a member.
    pub fn leave(&self, id: SubscriberId, auction_id: &AuctionId) -> bool {
        let was_member = match self.inner.subscribers.get(&id) {
            Some(state) => lock(&state.rooms).remove(auction_id),
            None => false,
        };
        if was_member {
            self.remove_member(id, auction_id);
            debug!(client_id = id, auction_id = %auction_id, "Left room");
        }
        was_member
    }

    /// Fan `event` out to every member of its room.
    ///
    /// Returns the number of subscribers it was queued for.
    pub fn publish(&self, event: AuctionEvent) -> usize {
        let auction_id = event.auction_id().clone();
        let label = event.event_type_label();
        let message = ServerMessage::from(event);
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);

        let mut overflowed = Vec::new();
        let mut delivered = 0;
        {
            let rooms = self.inner.rooms.read().unwrap_or_else(PoisonError::into_inner);
            let Some(room) = rooms.get(&auction_id) else {
                debug!(auction_id = %auction_id, event_type = label, "Published to empty room");
                return 0;
            };
            let members = lock(&room.members);
            for id in members.iter() {
                let Some(state) = self.inner.subscribers.get(id).map(|s| s.clone()) else {
                    continue;
                };
                match self.deliver(*id, &state, message.clone()) {
                    Delivery::Queued | Delivery::DroppedOldest => delivered += 1,
                    Delivery::Overflow => overflowed.push(*id),
                }
            }
        }

        for id in overflowed {
            self.disconnect(id, "outbound queue overflow");
        }
        self.inner
            .counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        debug!(
            auction_id = %auction_id,
            event_type = label,
            delivered,
            "Event published"
        );
        delivered
    }

    /// Remove a subscriber and all its memberships. Idempotent.
    pub fn disconnect(&self, id: SubscriberId, reason: &str) {
        let Some((_, state)) = self.inner.subscribers.remove(&id) else {
            return;
        };
        state.close();
        let rooms: Vec<AuctionId> = std::mem::take(&mut *lock(&state.rooms))
            .into_iter()
            .collect();
        for auction_id in &rooms {
            self.remove_member(id, auction_id);
        }
        self.inner
            .counters
            .disconnected
            .fetch_add(1, Ordering::Relaxed);
        info!(client_id = id, rooms = rooms.len(), reason, "Subscriber disconnected");
    }

    /// Mark inbound traffic from `id` (any frame counts as liveness).
    pub fn record_activity(&self, id: SubscriberId) {
        if let Some(state) = self.inner.subscribers.get(&id) {
            *lock(&state.last_seen) = Instant::now();
        }
    }

    /// Queue a `ping` for every subscriber. Returns how many were pinged.
    pub fn send_heartbeats(&self) -> usize {
        let nonce = self.inner.next_nonce.fetch_add(1, Ordering::Relaxed);
        let targets: Vec<(SubscriberId, Arc<SubscriberState>)> = self
            .inner
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut overflowed = Vec::new();
        for (id, state) in &targets {
            if let Delivery::Overflow = self.deliver(*id, state, ServerMessage::Ping { nonce }) {
                overflowed.push(*id);
            }
        }
        for id in overflowed {
            self.disconnect(id, "outbound queue overflow");
        }
        targets.len()
    }

    /// Disconnect subscribers silent for longer than the stale timeout.
    pub fn reap_stale(&self) -> Vec<SubscriberId> {
        let timeout = self.inner.config.stale_timeout;
        let now = Instant::now();
        let stale: Vec<SubscriberId> = self
            .inner
            .subscribers
            .iter()
            .filter(|entry| now.duration_since(*lock(&entry.value().last_seen)) > timeout)
            .map(|entry| *entry.key())
            .collect();

        for id in &stale {
            warn!(client_id = id, timeout_secs = timeout.as_secs(), "Subscriber stale");
            self.disconnect(*id, "liveness timeout");
        }
        stale
    }

    /// Ping and reap on the heartbeat interval until aborted.
    pub fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(broker.inner.config.heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                broker.reap_stale();
                let pinged = broker.send_heartbeats();
                let stats = broker.stats();
                debug!(
                    pinged,
                    rooms = stats.rooms,
                    delivered = stats.delivered,
                    dropped = stats.dropped,
                    "Heartbeat"
                );
            }
        })
    }

    pub fn stats(&self) -> BrokerStats {
        let counters = &self.inner.counters;
        BrokerStats {
            subscribers: self.inner.subscribers.len(),
            rooms: self
                .inner
                .rooms
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            published: counters.published.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            disconnected: counters.disconnected.load(Ordering::Relaxed),
        }
    }

    pub fn room_size(&self, auction_id: &AuctionId) -> usize {
        self.inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(auction_id)
            .map(|room| lock(&room.members).len())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    fn state(&self, id: SubscriberId) -> Result<Arc<SubscriberState>, BrokerError> {
        self.inner
            .subscribers
            .get(&id)
            .map(|state| state.clone())
            .ok_or(BrokerError::Disconnected(id))
    }

    fn deliver(&self, id: SubscriberId, state: &SubscriberState, message: ServerMessage) -> Delivery {
        let mut queue = lock(&state.queue);
        let dropped_before = queue.messages_dropped();
        match queue.enqueue(message) {
            Ok(()) => {
                let dropped = queue.messages_dropped() > dropped_before;
                drop(queue);
                state.notify.notify_one();
                if dropped {
                    self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(client_id = id, "Subscriber lagging, dropped oldest message");
                    Delivery::DroppedOldest
                } else {
                    Delivery::Queued
                }
            }
            Err(BackpressureAction::DisconnectClient) => {
                warn!(client_id = id, "Backpressure: disconnecting lagging subscriber");
                Delivery::Overflow
            }
        }
    }

    fn add_member(&self, id: SubscriberId, auction_id: &AuctionId) {
        let mut rooms = self.inner.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let room = rooms.entry(auction_id.clone()).or_default();
        lock(&room.members).insert(id);
    }

    fn remove_member(&self, id: SubscriberId, auction_id: &AuctionId) {
        let mut rooms = self.inner.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let empty = match rooms.get(auction_id) {
            Some(room) => {
                let mut members = lock(&room.members);
                members.remove(&id);
                members.is_empty()
            }
            None => false,
        };
        if empty {
            rooms.remove(auction_id);
            debug!(auction_id = %auction_id, "Room closed");
        }
    }

    fn queue_to_self(&self, id: SubscriberId, message: ServerMessage) {
        if let Ok(state) = self.state(id) {
            if let Delivery::Overflow = self.deliver(id, &state, message) {
                self.disconnect(id, "outbound queue overflow");
            }
        }
    }
}

impl EventPublisher for BrokerHandle {
    fn publish(&self, event: AuctionEvent) -> usize {
        BrokerHandle::publish(self, event)
    }
}

/// One connected subscriber. Dropping it disconnects.
pub struct Subscriber {
    id: SubscriberId,
    state: Arc<SubscriberState>,
    broker: BrokerHandle,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn join(&self, auction_id: &AuctionId) -> Result<bool, BrokerError> {
        self.broker.join(self.id, auction_id)
    }

    pub fn leave(&self, auction_id: &AuctionId) -> bool {
        self.broker.leave(self.id, auction_id)
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Apply one inbound control message; replies are queued in order
    /// with room events.
    pub fn handle(&self, message: ClientMessage) {
        self.broker.record_activity(self.id);
        let reply = match message {
            ClientMessage::Join { auction_id } => match self.join(&auction_id) {
                Ok(_) => ServerMessage::Joined { auction_id },
                Err(e) => ServerMessage::Error {
                    message: e.to_string(),
                },
            },
            ClientMessage::Leave { auction_id } => {
                self.leave(&auction_id);
                ServerMessage::Left { auction_id }
            }
            ClientMessage::Ping { nonce } => ServerMessage::Pong { nonce },
            ClientMessage::Pong { .. } => return,
        };
        self.broker.queue_to_self(self.id, reply);
    }

    /// Queue an error frame for this subscriber (e.g. an unparseable message).
    pub fn send_error(&self, message: impl Into<String>) {
        self.broker.queue_to_self(
            self.id,
            ServerMessage::Error {
                message: message.into(),
            },
        );
    }

    pub fn try_recv(&self) -> Option<ServerMessage> {
        lock(&self.state.queue).pop()
    }

    /// Next queued message; `None` once disconnected and drained.
    pub async fn recv(&self) -> Option<ServerMessage> {
        loop {
            if let Some(message) = self.try_recv() {
                return Some(message);
            }
            if self.state.is_closed() {
                return None;
            }
            self.state.notify.notified().await;
        }
    }

    pub fn queued(&self) -> usize {
        lock(&self.state.queue).len()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.broker.disconnect(self.id, "subscriber dropped");
    }
}
