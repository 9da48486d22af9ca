//! Bid admission
//!
//! Validates a proposed bid against a freshly built view, forwards it to
//! the ledger through the bidder's `BidSubmitter`, and once the ledger
//! confirms, publishes the `BidEvent` and appends a bid record to the
//! content store.
//!
//! Admission for one auction is serialized: the per-auction lock is held
//! from validation until the receipt resolves, so the next bid for the
//! same auction validates against a view that already includes this one.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use types::auction::AuctionView;
use types::errors::{AuctionError, RejectReason};
use types::events::{AuctionEvent, BidEvent, EventPublisher};
use types::ids::{Address, AuctionId};
use types::numeric::Amount;

use crate::ledger::{BidSubmitter, Ledger, LedgerError, TxReference};
use crate::metadata;
use crate::snapshot::AuctionSnapshotBuilder;
use crate::store::ContentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// How long to wait for a submitted bid to become final
    pub receipt_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            receipt_timeout: Duration::from_secs(15),
        }
    }
}

/// A bid the ledger has taken but not yet confirmed.
///
/// Holds the auction's admission lock until confirmed or dropped.
#[derive(Debug)]
pub struct PendingBid {
    pub auction_id: AuctionId,
    pub bidder: Address,
    pub amount: Amount,
    pub tx: TxReference,
    _admission: OwnedMutexGuard<()>,
}

/// Result of the validate-and-submit step
#[derive(Debug)]
pub enum Submission {
    Pending(PendingBid),
    Rejected(RejectReason),
}

/// Final decision on a bid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidDecision {
    Accepted(BidEvent),
    Rejected(RejectReason),
}

impl BidDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BidDecision::Accepted(_))
    }
}

/// Check `amount` against a view: ended first, then the minimum.
pub fn check_bid(view: &AuctionView, amount: Amount) -> Result<(), RejectReason> {
    if view.is_ended() {
        return Err(RejectReason::AuctionEnded);
    }
    let minimum = view.min_next_bid();
    if amount < minimum {
        return Err(RejectReason::BidTooLow {
            minimum,
            offered: amount,
        });
    }
    Ok(())
}

pub struct BidAdmissionService {
    snapshots: Arc<AuctionSnapshotBuilder>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn ContentStore>,
    publisher: Arc<dyn EventPublisher>,
    locks: DashMap<AuctionId, Arc<Mutex<()>>>,
    config: AdmissionConfig,
}

impl BidAdmissionService {
    pub fn new(
        snapshots: Arc<AuctionSnapshotBuilder>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ContentStore>,
        publisher: Arc<dyn EventPublisher>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            snapshots,
            ledger,
            store,
            publisher,
            locks: DashMap::new(),
            config,
        }
    }

    /// Validate and submit, then wait for finality.
    pub async fn admit(
        &self,
        auction_id: &AuctionId,
        submitter: &dyn BidSubmitter,
        amount: Amount,
    ) -> Result<BidDecision, AuctionError> {
        match self.submit(auction_id, submitter, amount).await? {
            Submission::Pending(pending) => self.confirm(pending).await,
            Submission::Rejected(reason) => Ok(BidDecision::Rejected(reason)),
        }
    }

    /// Validate against a fresh view and hand the bid to the ledger.
    ///
    /// Nothing is published here; the bid is not final until `confirm`.
    pub async fn submit(
        &self,
        auction_id: &AuctionId,
        submitter: &dyn BidSubmitter,
        amount: Amount,
    ) -> Result<Submission, AuctionError> {
        let bidder = match Address::parse(submitter.address()) {
            Ok(bidder) => bidder,
            Err(e) => {
                debug!(auction_id = %auction_id, error = %e, "Rejected bid from malformed bidder");
                return Ok(Submission::Rejected(RejectReason::InvalidBidder(e.to_string())));
            }
        };

        let guard = self.lock_for(auction_id).lock_owned().await;
        let outcome = self.validate_and_send(auction_id, &bidder, submitter, amount).await;
        let tx = match outcome {
            Ok(Ok(tx)) => tx,
            Ok(Err(reason)) => {
                drop(guard);
                self.release(auction_id);
                return Ok(Submission::Rejected(reason));
            }
            Err(e) => {
                drop(guard);
                self.release(auction_id);
                return Err(e);
            }
        };

        debug!(auction_id = %auction_id, bidder = %bidder, amount = %amount, tx = %tx.0, "Bid pending");
        Ok(Submission::Pending(PendingBid {
            auction_id: auction_id.clone(),
            bidder,
            amount,
            tx,
            _admission: guard,
        }))
    }

    /// Runs under the admission lock. The inner `Err` is a rejection.
    async fn validate_and_send(
        &self,
        auction_id: &AuctionId,
        bidder: &Address,
        submitter: &dyn BidSubmitter,
        amount: Amount,
    ) -> Result<Result<TxReference, RejectReason>, AuctionError> {
        let view = self.snapshots.build(auction_id).await?;

        if let Err(reason) = check_bid(&view, amount) {
            info!(
                auction_id = %auction_id,
                bidder = %bidder,
                amount = %amount,
                reason = reason.reason_code(),
                "Bid rejected"
            );
            return Ok(Err(reason));
        }

        let sent = tokio::time::timeout(
            self.config.receipt_timeout,
            submitter.submit_bid(auction_id, amount),
        )
        .await;
        match sent {
            Ok(Ok(tx)) => Ok(Ok(tx)),
            Ok(Err(LedgerError::Transient(reason))) => {
                warn!(auction_id = %auction_id, error = %reason, "Ledger unavailable for submission");
                Err(AuctionError::LedgerUnavailable { reason })
            }
            Ok(Err(e)) => {
                info!(auction_id = %auction_id, bidder = %bidder, error = %e, "Ledger refused bid");
                Ok(Err(RejectReason::LedgerRejected(e.to_string())))
            }
            Err(_) => {
                warn!(
                    auction_id = %auction_id,
                    timeout_secs = self.config.receipt_timeout.as_secs(),
                    "Bid submission timed out"
                );
                Err(AuctionError::LedgerUnavailable {
                    reason: "bid submission timed out".to_string(),
                })
            }
        }
    }

    /// Wait for the receipt; publish and record the bid once final.
    pub async fn confirm(&self, pending: PendingBid) -> Result<BidDecision, AuctionError> {
        let auction_id = pending.auction_id.clone();
        let decision = self.finish(pending).await;
        self.release(&auction_id);
        decision
    }

    async fn finish(&self, pending: PendingBid) -> Result<BidDecision, AuctionError> {
        let receipt = match tokio::time::timeout(
            self.config.receipt_timeout,
            self.ledger.await_receipt(&pending.tx),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(LedgerError::Transient(reason))) => {
                warn!(tx = %pending.tx.0, error = %reason, "Receipt lookup failed");
                return Err(AuctionError::LedgerUnavailable { reason });
            }
            Ok(Err(e)) => {
                info!(
                    auction_id = %pending.auction_id,
                    bidder = %pending.bidder,
                    tx = %pending.tx.0,
                    error = %e,
                    "Bid transaction rejected by ledger"
                );
                return Ok(BidDecision::Rejected(RejectReason::LedgerRejected(
                    e.to_string(),
                )));
            }
            Err(_) => {
                warn!(
                    tx = %pending.tx.0,
                    timeout_secs = self.config.receipt_timeout.as_secs(),
                    "Receipt not confirmed in time"
                );
                return Err(AuctionError::LedgerUnavailable {
                    reason: format!("no receipt for {} within timeout", pending.tx.0),
                });
            }
        };

        let event = BidEvent::new(
            pending.auction_id.clone(),
            pending.bidder.clone(),
            pending.amount,
            receipt.confirmed_at,
        );
        let delivered = self.publisher.publish(AuctionEvent::Bid(event.clone()));
        info!(
            auction_id = %event.auction_id,
            bidder = %event.bidder,
            amount = %event.amount,
            event_id = %event.event_id,
            delivered,
            "Bid accepted"
        );

        self.record_bid(&event).await;
        Ok(BidDecision::Accepted(event))
    }

    async fn record_bid(&self, event: &BidEvent) {
        let record = event.to_record();
        let blob = match serde_json::to_vec(&record) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(auction_id = %event.auction_id, error = %e, "Could not encode bid record");
                return;
            }
        };
        let tags = metadata::bid_tags(&event.auction_id, &record);
        let timeout = self.snapshots.config().fetch_timeout;
        match tokio::time::timeout(timeout, self.store.put(blob, tags)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(auction_id = %event.auction_id, error = %e, "Bid record not written");
            }
            Err(_) => {
                warn!(auction_id = %event.auction_id, "Bid record write timed out");
            }
        }
    }

    fn lock_for(&self, auction_id: &AuctionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(auction_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the auction's lock once nobody holds or waits on it.
    fn release(&self, auction_id: &AuctionId) {
        self.locks
            .remove_if(auction_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Auctions with an admission in flight
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }
}
