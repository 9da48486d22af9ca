//! Lifecycle monitor
//!
//! Background worker that periodically rebuilds the views of watched
//! auctions and publishes a single `ended` event for each one once its
//! status flips to ended.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::clock::Clock;
use types::errors::AuctionError;
use types::events::{AuctionEvent, EventPublisher};
use types::ids::AuctionId;

use crate::snapshot::AuctionSnapshotBuilder;

pub struct LifecycleMonitor {
    snapshots: Arc<AuctionSnapshotBuilder>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    watched: DashSet<AuctionId>,
}

impl LifecycleMonitor {
    pub fn new(
        snapshots: Arc<AuctionSnapshotBuilder>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            snapshots,
            publisher,
            clock,
            watched: DashSet::new(),
        }
    }

    /// Start watching an auction. Returns false if it was already watched.
    pub fn watch(&self, auction_id: AuctionId) -> bool {
        self.watched.insert(auction_id)
    }

    pub fn is_watching(&self, auction_id: &AuctionId) -> bool {
        self.watched.contains(auction_id)
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Check every watched auction once; returns how many ended this tick.
    pub async fn tick(&self) -> usize {
        let ids: Vec<AuctionId> = self.watched.iter().map(|id| id.key().clone()).collect();
        let mut ended = 0;

        for auction_id in ids {
            let view = match self.snapshots.build(&auction_id).await {
                Ok(view) => view,
                Err(AuctionError::NotFound { .. }) => {
                    warn!(auction_id = %auction_id, "Watched auction vanished, dropping it");
                    self.watched.remove(&auction_id);
                    continue;
                }
                Err(e) => {
                    debug!(auction_id = %auction_id, error = %e, "Lifecycle check skipped");
                    continue;
                }
            };

            if !view.is_ended() {
                continue;
            }
            // Removal decides which caller publishes when ticks overlap.
            if self.watched.remove(&auction_id).is_none() {
                continue;
            }

            let event = AuctionEvent::Ended {
                auction_id: auction_id.clone(),
                final_bid: view.has_bids().then_some(view.current_bid),
                winner: view.highest_bidder.clone(),
                timestamp: self.clock.now(),
            };
            let delivered = self.publisher.publish(event);
            info!(
                auction_id = %auction_id,
                final_bid = %view.current_bid,
                delivered,
                "Auction ended"
            );
            ended += 1;
        }

        ended
    }

    /// Run `tick` on a fixed interval until the handle is aborted.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use serde_json::json;
    use types::clock::ManualClock;
    use types::numeric::Amount;

    use crate::ledger::{LedgerDetails, MemoryLedger};
    use crate::snapshot::SnapshotConfig;
    use crate::store::{ContentStore, MemoryContentStore, Tags};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AuctionEvent>>);

    impl EventPublisher for Recorder {
        fn publish(&self, event: AuctionEvent) -> usize {
            if let Ok(mut events) = self.0.lock() {
                events.push(event);
            }
            1
        }
    }

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_ended_published_once() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(MemoryContentStore::new());
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let id = AuctionId::new("QmClock");

        let blob = json!({ "name": "Clock", "attributes": { "startingBid": 100 } });
        store
            .insert_with_id("QmClock", serde_json::to_vec(&blob).unwrap(), Tags::new())
            .await;
        ledger
            .register(
                id.clone(),
                LedgerDetails {
                    seller: String::new(),
                    title: String::new(),
                    image_ref: String::new(),
                    starting_bid: Amount::from_u64(100),
                    end_time: start() + ChronoDuration::minutes(10),
                    ended: false,
                    highest_bidder: None,
                    highest_bid: Amount::ZERO,
                },
            )
            .await;

        let store: Arc<dyn ContentStore> = store;
        let snapshots = Arc::new(AuctionSnapshotBuilder::new(
            store,
            ledger,
            clock.clone(),
            SnapshotConfig::default(),
        ));
        let recorder = Arc::new(Recorder::default());
        let monitor = LifecycleMonitor::new(snapshots, recorder.clone(), clock.clone());
        assert!(monitor.watch(id.clone()));
        assert!(!monitor.watch(id.clone()));

        assert_eq!(monitor.tick().await, 0);
        clock.advance(ChronoDuration::minutes(11));
        assert_eq!(monitor.tick().await, 1);
        assert_eq!(monitor.tick().await, 0);
        assert!(!monitor.is_watching(&id));

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            AuctionEvent::Ended { final_bid: None, .. }
        ));
    }
}
