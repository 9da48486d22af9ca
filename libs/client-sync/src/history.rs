//! Observer-side state for one auction
//!
//! `LiveAuction` starts from an `AuctionView` and is then advanced by room
//! events. Deliveries may be duplicated or reordered across reconnects, so
//! every mutation is idempotent:
//! - a bid already held (same bidder, amount and timestamp) is ignored
//! - `current_bid` only ever moves up
//! - `ended` only ever flips from false to true

use serde::Serialize;
use types::auction::{AuctionView, BidRecord};
use types::events::BidEvent;
use types::ids::{Address, AuctionId};
use types::numeric::Amount;

/// Outcome of applying one bid event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidApplied {
    /// Already in the local history; nothing changed.
    Duplicate,
    /// Added to the history. `raised` is true when it moved `current_bid`.
    Recorded { raised: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveAuction {
    auction_id: AuctionId,
    starting_bid: Amount,
    min_bid_increment: Amount,
    current_bid: Amount,
    highest_bidder: Option<Address>,
    /// Newest first.
    bids: Vec<BidRecord>,
    ended: bool,
}

impl LiveAuction {
    pub fn from_view(view: &AuctionView) -> Self {
        let mut bids = Vec::with_capacity(view.bids.len());
        for bid in &view.bids {
            if !bids.iter().any(|held: &BidRecord| held.same_bid(bid)) {
                bids.push(bid.clone());
            }
        }
        bids.sort_by(BidRecord::newest_first);

        Self {
            auction_id: view.id.clone(),
            starting_bid: view.starting_bid,
            min_bid_increment: view.min_bid_increment,
            current_bid: view.current_bid,
            highest_bidder: view.highest_bidder.clone(),
            bids,
            ended: view.is_ended(),
        }
    }

    pub fn auction_id(&self) -> &AuctionId {
        &self.auction_id
    }

    pub fn current_bid(&self) -> Amount {
        self.current_bid
    }

    pub fn highest_bidder(&self) -> Option<&Address> {
        self.highest_bidder.as_ref()
    }

    pub fn starting_bid(&self) -> Amount {
        self.starting_bid
    }

    /// Lowest amount a new bid must offer, as far as this observer knows.
    pub fn min_next_bid(&self) -> Amount {
        self.current_bid + self.min_bid_increment
    }

    pub fn bids(&self) -> &[BidRecord] {
        &self.bids
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Apply a live bid event for this auction.
    pub fn apply_bid(&mut self, event: &BidEvent) -> BidApplied {
        self.insert(event.to_record())
    }

    /// Apply an `ended` event. Returns true the first time only.
    pub fn mark_ended(&mut self, final_bid: Option<Amount>, winner: Option<&Address>) -> bool {
        if let Some(final_bid) = final_bid {
            if final_bid > self.current_bid {
                self.current_bid = final_bid;
                self.highest_bidder = winner.cloned();
            }
        }
        let first = !self.ended;
        self.ended = true;
        first
    }

    /// Fold a freshly built view into the local state (after a reconnect).
    ///
    /// Bids missed while disconnected are added; nothing held locally is
    /// lost. Returns true if this merge is what flipped the auction to ended.
    pub fn merge_snapshot(&mut self, view: &AuctionView) -> bool {
        for bid in &view.bids {
            self.insert(bid.clone());
        }
        if view.current_bid > self.current_bid {
            self.current_bid = view.current_bid;
            self.highest_bidder = view.highest_bidder.clone();
        }
        if view.is_ended() && !self.ended {
            self.ended = true;
            return true;
        }
        false
    }

    fn insert(&mut self, record: BidRecord) -> BidApplied {
        if self.bids.iter().any(|held| held.same_bid(&record)) {
            return BidApplied::Duplicate;
        }

        let raised = record.amount > self.current_bid;
        if raised {
            self.current_bid = record.amount;
            self.highest_bidder = Some(record.bidder.clone());
        }

        let at = self
            .bids
            .partition_point(|held| BidRecord::newest_first(held, &record).is_lt());
        self.bids.insert(at, record);

        BidApplied::Recorded { raised }
    }
}
