//! ClientSyncAgent
//!
//! Keeps one observer's local view of the auctions it watches in step with
//! the broker. A single driver task owns the connection and walks it
//! through these phases:
//!
//! ```text
//! Idle ──watch──▶ Connecting ──ok──▶ Connected ──drop / missed pong──▶ Connecting
//!                  │    ▲
//!             fail │    │ delay elapsed
//!                  ▼    │
//!                 Backoff ──max attempts──▶ Failed ──retry──▶ Connecting
//! ```
//!
//! On every successful (re)connect the agent rejoins each watched room and
//! refetches its view, so bids missed while disconnected are recovered.
//! Unwatching the last auction cancels any reconnect in flight and closes
//! the connection before the call returns.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use auction_engine::ViewSource;
use event_broker::{ClientMessage, ServerMessage};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use types::auction::BidRecord;
use types::errors::AuctionError;
use types::events::BidEvent;
use types::ids::{Address, AuctionId};
use types::numeric::Amount;
use types::retry::RetryPolicy;

use crate::connection::{ConnectionStatus, ReconnectDecision, ReconnectTracker};
use crate::history::{BidApplied, LiveAuction};
use crate::transport::{Connection, Connector};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub reconnect: RetryPolicy,
    /// How often the agent probes the connection.
    pub ping_interval: Duration,
    /// A probe unanswered for this long counts as a dropped connection.
    pub pong_timeout: Duration,
    /// Notifications buffered for the owner before new ones are dropped.
    pub notification_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            reconnect: RetryPolicy::reconnect(),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            notification_capacity: 64,
        }
    }
}

/// Something the owner should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentNotification {
    /// A bid by someone other than the owner.
    NewBid {
        auction_id: AuctionId,
        bid: BidRecord,
        current_bid: Amount,
    },
    AuctionEnded {
        auction_id: AuctionId,
        final_bid: Amount,
        winner: Option<Address>,
    },
    StatusChanged(ConnectionStatus),
}

enum Command {
    Watch {
        auction_id: AuctionId,
        ack: oneshot::Sender<Result<(), AuctionError>>,
    },
    Unwatch {
        auction_id: AuctionId,
        ack: oneshot::Sender<()>,
    },
    Retry,
    Shutdown,
}

type Watched = Arc<Mutex<BTreeMap<AuctionId, LiveAuction>>>;

fn lock(watched: &Watched) -> MutexGuard<'_, BTreeMap<AuctionId, LiveAuction>> {
    watched.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running sync agent. Dropping it stops the driver task.
pub struct ClientSyncAgent {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    watched: Watched,
    task: JoinHandle<()>,
}

impl ClientSyncAgent {
    /// Start an agent. `owner` is the address whose own bids are not
    /// announced back to it.
    pub fn spawn(
        owner: Option<Address>,
        connector: Arc<dyn Connector>,
        views: Arc<dyn ViewSource>,
        config: AgentConfig,
    ) -> (Self, mpsc::Receiver<AgentNotification>) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (notify_tx, notify_rx) = mpsc::channel(config.notification_capacity.max(1));
        let watched: Watched = Arc::new(Mutex::new(BTreeMap::new()));

        let driver = Driver {
            owner,
            connector,
            views,
            tracker: ReconnectTracker::new(config.reconnect),
            config,
            watched: watched.clone(),
            commands: command_rx,
            status: status_tx,
            notifications: notify_tx,
            next_nonce: 0,
        };
        let task = tokio::spawn(driver.run());

        let agent = Self {
            commands: command_tx,
            status: status_rx,
            watched,
            task,
        };
        (agent, notify_rx)
    }

    /// Start observing an auction. Resolves once its initial view is held.
    pub async fn watch(&self, auction_id: AuctionId) -> Result<(), AuctionError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Watch { auction_id, ack }).await?;
        done.await.map_err(|_| stopped())?
    }

    /// Stop observing an auction. When it was the last one, the connection
    /// is closed (and any reconnect cancelled) before this returns.
    pub async fn unwatch(&self, auction_id: &AuctionId) -> Result<(), AuctionError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Unwatch {
            auction_id: auction_id.clone(),
            ack,
        })
        .await?;
        done.await.map_err(|_| stopped())
    }

    /// Leave `ReconnectFailed` and start a fresh reconnect cycle.
    pub async fn retry(&self) -> Result<(), AuctionError> {
        self.send(Command::Retry).await
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Local state of a watched auction.
    pub fn auction(&self, auction_id: &AuctionId) -> Option<LiveAuction> {
        lock(&self.watched).get(auction_id).cloned()
    }

    pub fn watched(&self) -> Vec<AuctionId> {
        lock(&self.watched).keys().cloned().collect()
    }

    /// Close the connection and wait for the driver to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sync agent task failed");
        }
    }

    async fn send(&self, command: Command) -> Result<(), AuctionError> {
        self.commands.send(command).await.map_err(|_| stopped())
    }
}

fn stopped() -> AuctionError {
    AuctionError::TransportDropped {
        reason: "sync agent stopped".to_string(),
    }
}

enum Phase {
    Idle,
    Connecting,
    Backoff { until: Instant },
    Connected(Live),
    Failed,
}

struct Live {
    conn: Box<dyn Connection>,
    next_ping: Instant,
    pong_due: Option<Instant>,
}

enum Outcome {
    Continue,
    /// Nothing left to watch; the connection must go.
    Teardown,
    Retry,
    Shutdown,
}

enum Wake {
    Command(Option<Command>),
    Connected(Result<Box<dyn Connection>, AuctionError>),
    Message(Option<ServerMessage>),
    PingDue,
    PongMissed,
    BackoffElapsed,
}

struct Driver {
    owner: Option<Address>,
    connector: Arc<dyn Connector>,
    views: Arc<dyn ViewSource>,
    config: AgentConfig,
    tracker: ReconnectTracker,
    watched: Watched,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    notifications: mpsc::Sender<AgentNotification>,
    next_nonce: u64,
}

impl Driver {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match self.step(phase).await {
                Some(next) => next,
                None => break,
            };
        }
        self.set_status(ConnectionStatus::Disconnected);
        debug!("Sync agent stopped");
    }

    /// Advance one event. `None` stops the driver.
    async fn step(&mut self, phase: Phase) -> Option<Phase> {
        match phase {
            Phase::Idle => {
                self.set_status(ConnectionStatus::Disconnected);
                let command = self.commands.recv().await?;
                match self.on_command(command, None).await {
                    Outcome::Shutdown => None,
                    _ if self.has_watched() => Some(Phase::Connecting),
                    _ => Some(Phase::Idle),
                }
            }

            Phase::Failed => {
                self.set_status(ConnectionStatus::ReconnectFailed);
                let command = self.commands.recv().await?;
                match self.on_command(command, None).await {
                    Outcome::Shutdown => None,
                    Outcome::Teardown => Some(Phase::Idle),
                    Outcome::Retry => {
                        self.tracker.reset();
                        info!("Reconnect requested by owner");
                        Some(self.connect_or_idle())
                    }
                    Outcome::Continue => Some(Phase::Failed),
                }
            }

            Phase::Connecting => {
                self.set_status(ConnectionStatus::Connecting {
                    attempt: self.tracker.next_attempt(),
                });
                let connector = self.connector.clone();
                let wake = tokio::select! {
                    command = self.commands.recv() => Wake::Command(command),
                    result = connector.connect() => Wake::Connected(result),
                };
                match wake {
                    Wake::Connected(Ok(conn)) => Some(self.on_connected(conn).await),
                    Wake::Connected(Err(e)) => Some(self.on_connect_failed(&e)),
                    // The attempt in flight was dropped by select; start over.
                    Wake::Command(command) => self.after_command(command, Phase::Connecting).await,
                    _ => Some(Phase::Connecting),
                }
            }

            Phase::Backoff { until } => {
                let wake = tokio::select! {
                    command = self.commands.recv() => Wake::Command(command),
                    _ = sleep_until(until) => Wake::BackoffElapsed,
                };
                match wake {
                    Wake::BackoffElapsed => Some(Phase::Connecting),
                    Wake::Command(command) => {
                        self.after_command(command, Phase::Backoff { until }).await
                    }
                    _ => Some(Phase::Backoff { until }),
                }
            }

            Phase::Connected(mut live) => {
                let pong_deadline = live.pong_due.unwrap_or(live.next_ping);
                let wake = tokio::select! {
                    command = self.commands.recv() => Wake::Command(command),
                    message = live.conn.recv() => Wake::Message(message),
                    _ = sleep_until(live.next_ping) => Wake::PingDue,
                    _ = sleep_until(pong_deadline), if live.pong_due.is_some() => Wake::PongMissed,
                };
                self.on_connected_wake(live, wake).await
            }
        }
    }

    /// Handle a command that interrupted connecting or backing off.
    async fn after_command(&mut self, command: Option<Command>, resume: Phase) -> Option<Phase> {
        let command = command?;
        match self.on_command(command, None).await {
            Outcome::Shutdown => None,
            Outcome::Teardown => {
                info!("Reconnect cancelled: nothing left to watch");
                self.tracker.reset();
                Some(Phase::Idle)
            }
            Outcome::Continue | Outcome::Retry => Some(resume),
        }
    }

    async fn on_connected_wake(&mut self, mut live: Live, wake: Wake) -> Option<Phase> {
        match wake {
            Wake::Command(None) => {
                live.conn.close().await;
                None
            }
            Wake::Command(Some(command)) => {
                match self.on_command(command, Some(live.conn.as_mut())).await {
                    Outcome::Shutdown => {
                        live.conn.close().await;
                        None
                    }
                    Outcome::Teardown => {
                        live.conn.close().await;
                        Some(Phase::Idle)
                    }
                    Outcome::Continue | Outcome::Retry => Some(Phase::Connected(live)),
                }
            }
            Wake::Message(None) => {
                warn!("Connection dropped");
                Some(Phase::Connecting)
            }
            Wake::Message(Some(message)) => {
                live.pong_due = None;
                if let Some(reply) = self.on_message(message) {
                    if let Err(e) = live.conn.send(reply).await {
                        warn!(error = %e, "Reply failed");
                        return Some(Phase::Connecting);
                    }
                }
                Some(Phase::Connected(live))
            }
            Wake::PingDue => {
                self.next_nonce += 1;
                let now = Instant::now();
                live.next_ping = now + self.config.ping_interval;
                if live.pong_due.is_none() {
                    live.pong_due = Some(now + self.config.pong_timeout);
                }
                if let Err(e) = live
                    .conn
                    .send(ClientMessage::Ping {
                        nonce: self.next_nonce,
                    })
                    .await
                {
                    warn!(error = %e, "Ping failed");
                    return Some(Phase::Connecting);
                }
                Some(Phase::Connected(live))
            }
            Wake::PongMissed => {
                warn!(
                    timeout_secs = self.config.pong_timeout.as_secs(),
                    "Liveness probe unanswered, reconnecting"
                );
                live.conn.close().await;
                Some(Phase::Connecting)
            }
            Wake::Connected(_) | Wake::BackoffElapsed => Some(Phase::Connected(live)),
        }
    }

    async fn on_connected(&mut self, mut conn: Box<dyn Connection>) -> Phase {
        if !self.has_watched() {
            conn.close().await;
            return Phase::Idle;
        }
        if let Err(e) = self.resync(conn.as_mut()).await {
            return self.on_connect_failed(&e);
        }
        info!(attempts = self.tracker.next_attempt(), "Connected");
        self.tracker.on_connected();
        self.set_status(ConnectionStatus::Connected);

        Phase::Connected(Live {
            conn,
            next_ping: Instant::now() + self.config.ping_interval,
            pong_due: None,
        })
    }

    fn on_connect_failed(&mut self, error: &AuctionError) -> Phase {
        match self.tracker.on_failure() {
            ReconnectDecision::RetryAfter(delay) => {
                warn!(
                    error = %error,
                    failures = self.tracker.failures(),
                    delay_ms = delay.as_millis() as u64,
                    "Connect failed, backing off"
                );
                self.set_status(ConnectionStatus::Connecting {
                    attempt: self.tracker.next_attempt(),
                });
                Phase::Backoff {
                    until: Instant::now() + delay,
                }
            }
            ReconnectDecision::GiveUp => {
                warn!(
                    error = %error,
                    failures = self.tracker.failures(),
                    "Giving up reconnecting"
                );
                Phase::Failed
            }
        }
    }

    /// Rejoin every watched room, then refetch each view.
    ///
    /// Joining first means anything published while the view is fetched
    /// is queued on the connection and reconciled by dedup afterwards.
    async fn resync(&mut self, conn: &mut dyn Connection) -> Result<(), AuctionError> {
        let ids: Vec<AuctionId> = lock(&self.watched).keys().cloned().collect();
        for auction_id in &ids {
            conn.send(ClientMessage::Join {
                auction_id: auction_id.clone(),
            })
            .await?;
        }

        for auction_id in ids {
            match self.views.build_view(&auction_id).await {
                Ok(view) => {
                    let ended = {
                        let mut watched = lock(&self.watched);
                        match watched.get_mut(&auction_id) {
                            Some(live) => {
                                if live.merge_snapshot(&view) {
                                    Some((live.current_bid(), live.highest_bidder().cloned()))
                                } else {
                                    None
                                }
                            }
                            None => None,
                        }
                    };
                    if let Some((final_bid, winner)) = ended {
                        self.notify(AgentNotification::AuctionEnded {
                            auction_id,
                            final_bid,
                            winner,
                        });
                    }
                }
                Err(e) => {
                    warn!(auction_id = %auction_id, error = %e, "Resync fetch failed, keeping local view");
                }
            }
        }
        Ok(())
    }

    async fn on_command(&mut self, command: Command, conn: Option<&mut dyn Connection>) -> Outcome {
        match command {
            Command::Watch { auction_id, ack } => {
                let result = self.watch(auction_id, conn).await;
                let _ = ack.send(result);
                Outcome::Continue
            }
            Command::Unwatch { auction_id, ack } => {
                let (removed, empty) = {
                    let mut watched = lock(&self.watched);
                    let removed = watched.remove(&auction_id).is_some();
                    (removed, watched.is_empty())
                };
                if removed {
                    debug!(auction_id = %auction_id, "Unwatched");
                }
                let outcome = match conn {
                    Some(conn) if empty => {
                        conn.close().await;
                        Outcome::Teardown
                    }
                    Some(conn) => {
                        if removed {
                            let _ = conn.send(ClientMessage::Leave { auction_id }).await;
                        }
                        Outcome::Continue
                    }
                    None if empty => Outcome::Teardown,
                    None => Outcome::Continue,
                };
                let _ = ack.send(());
                outcome
            }
            Command::Retry => Outcome::Retry,
            Command::Shutdown => Outcome::Shutdown,
        }
    }

    async fn watch(
        &mut self,
        auction_id: AuctionId,
        mut conn: Option<&mut dyn Connection>,
    ) -> Result<(), AuctionError> {
        if lock(&self.watched).contains_key(&auction_id) {
            return Ok(());
        }

        if let Some(conn) = conn.as_deref_mut() {
            if let Err(e) = conn
                .send(ClientMessage::Join {
                    auction_id: auction_id.clone(),
                })
                .await
            {
                // The driver notices the drop on its next receive and
                // rejoins from the watched set.
                debug!(error = %e, "Join not sent");
            }
        }

        let view = match self.views.build_view(&auction_id).await {
            Ok(view) => view,
            Err(e) => {
                if let Some(conn) = conn {
                    let _ = conn
                        .send(ClientMessage::Leave {
                            auction_id: auction_id.clone(),
                        })
                        .await;
                }
                return Err(e);
            }
        };

        info!(auction_id = %auction_id, current_bid = %view.current_bid, "Watching auction");
        lock(&self.watched).insert(auction_id, LiveAuction::from_view(&view));
        Ok(())
    }

    /// Apply one inbound message; returns the reply to send, if any.
    fn on_message(&mut self, message: ServerMessage) -> Option<ClientMessage> {
        match message {
            ServerMessage::Bid(event) => {
                self.on_bid(event);
                None
            }
            ServerMessage::Ended {
                auction_id,
                final_bid,
                winner,
                ..
            } => {
                let ended = lock(&self.watched).get_mut(&auction_id).and_then(|live| {
                    live.mark_ended(final_bid, winner.as_ref())
                        .then(|| (live.current_bid(), live.highest_bidder().cloned()))
                });
                if let Some((final_bid, winner)) = ended {
                    info!(auction_id = %auction_id, final_bid = %final_bid, "Auction ended");
                    self.notify(AgentNotification::AuctionEnded {
                        auction_id,
                        final_bid,
                        winner,
                    });
                }
                None
            }
            ServerMessage::Ping { nonce } => Some(ClientMessage::Pong { nonce }),
            ServerMessage::Pong { .. } => None,
            ServerMessage::Joined { auction_id } => {
                debug!(auction_id = %auction_id, "Joined room");
                None
            }
            ServerMessage::Left { auction_id } => {
                debug!(auction_id = %auction_id, "Left room");
                None
            }
            ServerMessage::Error { message } => {
                warn!(message = %message, "Broker reported an error");
                None
            }
        }
    }

    fn on_bid(&mut self, event: BidEvent) {
        let applied = {
            let mut watched = lock(&self.watched);
            let Some(live) = watched.get_mut(&event.auction_id) else {
                return;
            };
            (live.apply_bid(&event), live.current_bid())
        };

        match applied {
            (BidApplied::Duplicate, _) => {
                debug!(auction_id = %event.auction_id, "Duplicate bid ignored");
            }
            (BidApplied::Recorded { .. }, current_bid) => {
                let own = self
                    .owner
                    .as_ref()
                    .is_some_and(|owner| owner.same_as(&event.bidder));
                if own {
                    debug!(auction_id = %event.auction_id, "Own bid confirmed");
                    return;
                }
                self.notify(AgentNotification::NewBid {
                    bid: event.to_record(),
                    auction_id: event.auction_id,
                    current_bid,
                });
            }
        }
    }

    fn notify(&self, notification: AgentNotification) {
        if let Err(TrySendError::Full(dropped)) = self.notifications.try_send(notification) {
            warn!(notification = ?dropped, "Owner not draining notifications, dropping one");
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        if *self.status.borrow() == status {
            return;
        }
        self.status.send_replace(status);
        debug!(status = %status, "Connection status changed");
        self.notify(AgentNotification::StatusChanged(status));
    }

    fn has_watched(&self) -> bool {
        !lock(&self.watched).is_empty()
    }

    fn connect_or_idle(&self) -> Phase {
        if self.has_watched() {
            Phase::Connecting
        } else {
            Phase::Idle
        }
    }
}
