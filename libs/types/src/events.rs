//! Events fanned out to auction observers
//!
//! A `BidEvent` is emitted exactly once per accepted bid and delivered
//! at-least-once; receivers deduplicate on (bidder, amount, timestamp).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auction::BidRecord;
use crate::ids::{Address, AuctionId};
use crate::numeric::Amount;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidEvent {
    /// Correlation identifier for logs; not part of the dedup key
    pub event_id: Uuid,
    pub auction_id: AuctionId,
    pub bidder: Address,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
}

impl BidEvent {
    pub fn new(
        auction_id: AuctionId,
        bidder: Address,
        amount: Amount,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            auction_id,
            bidder,
            amount,
            timestamp,
        }
    }

    pub fn to_record(&self) -> BidRecord {
        BidRecord {
            bidder: self.bidder.clone(),
            amount: self.amount,
            timestamp: self.timestamp,
        }
    }
}

/// Everything published into an auction's room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuctionEvent {
    Bid(BidEvent),
    Ended {
        auction_id: AuctionId,
        final_bid: Option<Amount>,
        winner: Option<Address>,
        timestamp: DateTime<Utc>,
    },
}

impl AuctionEvent {
    pub fn auction_id(&self) -> &AuctionId {
        match self {
            AuctionEvent::Bid(bid) => &bid.auction_id,
            AuctionEvent::Ended { auction_id, .. } => auction_id,
        }
    }

    /// Event type as a string label for logging.
    pub fn event_type_label(&self) -> &'static str {
        match self {
            AuctionEvent::Bid(_) => "bid",
            AuctionEvent::Ended { .. } => "ended",
        }
    }
}

/// Publishing side of the broker, handed explicitly to producers.
///
/// Returns the number of subscribers the event was queued for.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: AuctionEvent) -> usize;
}
