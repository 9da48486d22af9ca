//! Shared fixtures for the sync agent tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use auction_engine::admission::{AdmissionConfig, BidAdmissionService};
use auction_engine::ledger::{LedgerDetails, LedgerSession, MemoryLedger};
use auction_engine::snapshot::{AuctionSnapshotBuilder, SnapshotConfig};
use auction_engine::store::{ContentStore, MemoryContentStore, Tags};
use chrono::{DateTime, Utc};
use client_sync::{BrokerConnection, Connection, Connector};
use event_broker::{BrokerConfig, BrokerHandle, ClientMessage, ServerMessage, SubscriberId};
use serde_json::json;
use types::clock::ManualClock;
use types::errors::AuctionError;
use types::ids::AuctionId;
use types::numeric::Amount;

pub const ALICE: &str = "0x52908400098527886E0F7030069857D2E4169EE7";
pub const BOB: &str = "0x8ba1f109551bD432803012645Ac136ddd64DBA72";
pub const SELLER: &str = "0x0000000000000000000000000000000000000001";
pub const AUCTION: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

pub fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// One auction (start 100, increment 10) behind a real builder, admission
/// service and broker.
pub struct World {
    pub id: AuctionId,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    pub broker: BrokerHandle,
    pub snapshots: Arc<AuctionSnapshotBuilder>,
    pub admission: BidAdmissionService,
}

impl World {
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(MemoryContentStore::new());
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let broker = BrokerHandle::new(BrokerConfig::default());
        let id = AuctionId::new(AUCTION);
        let end_time = start() + chrono::Duration::hours(1);

        let blob = json!({
            "name": "Brass Lamp",
            "description": "Working condition",
            "image": format!("ipfs://{}", AUCTION),
            "attributes": {
                "category": "Home",
                "startingBid": 100,
                "minBidIncrement": 10,
                "endTime": end_time.to_rfc3339(),
                "created": start().to_rfc3339(),
                "sellerAddress": SELLER
            }
        });
        store
            .insert_with_id(AUCTION, serde_json::to_vec(&blob).unwrap(), Tags::new())
            .await;
        ledger
            .register(
                id.clone(),
                LedgerDetails {
                    seller: SELLER.to_string(),
                    title: "Brass Lamp".to_string(),
                    image_ref: String::new(),
                    starting_bid: Amount::from_u64(100),
                    end_time,
                    ended: false,
                    highest_bidder: None,
                    highest_bid: Amount::ZERO,
                },
            )
            .await;

        let dyn_store: Arc<dyn ContentStore> = store;
        let snapshots = Arc::new(AuctionSnapshotBuilder::new(
            dyn_store.clone(),
            ledger.clone(),
            clock.clone(),
            SnapshotConfig::default(),
        ));
        let admission = BidAdmissionService::new(
            snapshots.clone(),
            ledger.clone(),
            dyn_store,
            Arc::new(broker.clone()),
            AdmissionConfig::default(),
        );

        Self {
            id,
            clock,
            ledger,
            broker,
            snapshots,
            admission,
        }
    }

    /// Place a bid through the admission service and assert it was accepted.
    pub async fn bid(&self, bidder: &str, amount: u64) {
        self.clock.advance(chrono::Duration::seconds(1));
        let session = LedgerSession::new(bidder, self.ledger.clone());
        let decision = self
            .admission
            .admit(&self.id, &session, Amount::from_u64(amount))
            .await
            .unwrap();
        assert!(decision.is_accepted(), "{:?}", decision);
    }
}

/// Broker transport that can be told to fail and remembers every
/// subscriber it opened.
pub struct TestConnector {
    broker: BrokerHandle,
    failing: AtomicBool,
    attempts: AtomicU32,
    subscribers: Mutex<Vec<SubscriberId>>,
}

impl TestConnector {
    pub fn new(broker: BrokerHandle) -> Arc<Self> {
        Arc::new(Self {
            broker,
            failing: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_subscriber(&self) -> Option<SubscriberId> {
        self.subscribers.lock().unwrap().last().copied()
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, AuctionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuctionError::TransportDropped {
                reason: "connection refused".to_string(),
            });
        }
        let subscriber = self.broker.connect();
        self.subscribers.lock().unwrap().push(subscriber.id());
        Ok(Box::new(BrokerConnection::new(subscriber)))
    }
}

/// Accepts every frame and never answers.
pub struct SilentConnector {
    pub connects: AtomicU32,
}

struct SilentConnection;

#[async_trait]
impl Connection for SilentConnection {
    async fn send(&mut self, _message: ClientMessage) -> Result<(), AuctionError> {
        Ok(())
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        std::future::pending().await
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl Connector for SilentConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, AuctionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SilentConnection))
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
