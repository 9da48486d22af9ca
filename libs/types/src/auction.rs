//! Canonical auction state
//!
//! `AuctionView` is the immutable merge of content-store metadata and
//! ledger state at one point in time. It is rebuilt on every observation,
//! never mutated in place.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{Address, AuctionId};
use crate::numeric::Amount;

/// Derived auction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Active,
    Ended,
}

impl AuctionStatus {
    /// `Ended` iff the ledger says so or `now >= end_time`.
    pub fn derive(ledger_ended: bool, end_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if ledger_ended || now >= end_time {
            AuctionStatus::Ended
        } else {
            AuctionStatus::Active
        }
    }
}

/// One accepted bid. Written once, never altered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRecord {
    pub bidder: Address,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
}

impl BidRecord {
    /// Same bidder, amount and timestamp
    pub fn same_bid(&self, other: &BidRecord) -> bool {
        self.bidder.same_as(&other.bidder)
            && self.amount == other.amount
            && self.timestamp == other.timestamp
    }

    /// Newest first; equal timestamps put the larger amount first.
    pub fn newest_first(a: &BidRecord, b: &BidRecord) -> std::cmp::Ordering {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.amount.cmp(&a.amount))
    }
}

/// Where `current_bid` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentBidSource {
    /// Ledger reported a highest bid
    Ledger,
    /// Ledger unreachable; derived from recorded bid history
    BidHistory,
    /// No bid exists in any reachable source; equals `starting_bid`
    NoBidsYet,
}

/// Ledger reachability at the time the view was built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAvailability {
    Reachable,
    /// Ledger answered but holds no record for this auction
    NoRecord,
    Unavailable,
}

/// Fields that were filled with a documented default instead of real data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewField {
    Title,
    Description,
    Category,
    ImageUrl,
    SellerAddress,
    SellerName,
    MinBidIncrement,
    EndTime,
    CreatedAt,
}

/// Canonical merged state for one auction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionView {
    pub id: AuctionId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub image_url: String,
    pub seller_address: String,
    pub seller_name: String,
    pub seller_verified: bool,
    pub starting_bid: Amount,
    pub current_bid: Amount,
    pub highest_bidder: Option<Address>,
    pub min_bid_increment: Amount,
    pub created_at: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AuctionStatus,
    /// Newest first
    pub bids: Vec<BidRecord>,
    pub current_bid_source: CurrentBidSource,
    pub ledger: LedgerAvailability,
    pub defaulted_fields: BTreeSet<ViewField>,
}

impl AuctionView {
    /// Smallest amount the next bid may carry.
    ///
    /// With no bids yet `current_bid == starting_bid`, so the first bid
    /// must also clear `starting_bid + min_bid_increment`.
    pub fn min_next_bid(&self) -> Amount {
        self.current_bid + self.min_bid_increment
    }

    pub fn is_ended(&self) -> bool {
        self.status == AuctionStatus::Ended
    }

    pub fn has_bids(&self) -> bool {
        self.current_bid_source != CurrentBidSource::NoBidsYet
    }

    pub fn is_defaulted(&self, field: ViewField) -> bool {
        self.defaulted_fields.contains(&field)
    }

    /// The view may lag the ledger when it could not be consulted.
    pub fn is_possibly_stale(&self) -> bool {
        self.ledger == LedgerAvailability::Unavailable
    }
}
