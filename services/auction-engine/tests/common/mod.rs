//! Shared fixtures for the auction engine integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use auction_engine::admission::{AdmissionConfig, BidAdmissionService};
use auction_engine::ledger::{LedgerDetails, LedgerSession, MemoryLedger};
use auction_engine::snapshot::{AuctionSnapshotBuilder, SnapshotConfig};
use auction_engine::store::{ContentStore, MemoryContentStore, Tags};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use types::clock::ManualClock;
use types::events::{AuctionEvent, EventPublisher};
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

/// Publisher that keeps everything it is given
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<AuctionEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<AuctionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: AuctionEvent) -> usize {
        self.events.lock().unwrap().push(event);
        1
    }
}

pub struct Harness {
    pub id: AuctionId,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryContentStore>,
    pub ledger: Arc<MemoryLedger>,
    pub snapshots: Arc<AuctionSnapshotBuilder>,
    pub admission: BidAdmissionService,
    pub events: Arc<RecordingPublisher>,
}

impl Harness {
    /// Auction with starting bid 100, increment 10, ending in one hour.
    pub async fn new() -> Self {
        Self::with_end(start() + Duration::hours(1)).await
    }

    pub async fn with_end(end_time: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(MemoryContentStore::new());
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let id = AuctionId::new(AUCTION);

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
                "sellerAddress": SELLER,
                "sellerName": "Dana"
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

        let dyn_store: Arc<dyn ContentStore> = store.clone();
        let snapshots = Arc::new(AuctionSnapshotBuilder::new(
            dyn_store.clone(),
            ledger.clone(),
            clock.clone(),
            SnapshotConfig::default(),
        ));
        let events = Arc::new(RecordingPublisher::default());
        let admission = BidAdmissionService::new(
            snapshots.clone(),
            ledger.clone(),
            dyn_store,
            events.clone(),
            AdmissionConfig::default(),
        );

        Self {
            id,
            clock,
            store,
            ledger,
            snapshots,
            admission,
            events,
        }
    }

    pub fn session(&self, address: &str) -> LedgerSession {
        LedgerSession::new(address, self.ledger.clone())
    }
}
