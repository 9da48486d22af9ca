//! Wire protocol for room subscriptions
//!
//! JSON text frames tagged by `type`.
//!
//! Client → server: `join`, `leave`, `ping`, `pong`.
//! Server → client: `joined`, `left`, `bid`, `ended`, `ping`, `pong`, `error`.
//!
//! Flow: join → joined → bid* → ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use types::events::{AuctionEvent, BidEvent};
use types::ids::{Address, AuctionId};
use types::numeric::Amount;

/// Control message sent by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join { auction_id: AuctionId },
    Leave { auction_id: AuctionId },
    /// Liveness probe; answered with `pong` carrying the same nonce.
    Ping { nonce: u64 },
    /// Answer to a server `ping`.
    Pong { nonce: u64 },
}

/// Message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Joined { auction_id: AuctionId },
    Left { auction_id: AuctionId },
    Bid(BidEvent),
    Ended {
        auction_id: AuctionId,
        final_bid: Option<Amount>,
        winner: Option<Address>,
        timestamp: DateTime<Utc>,
    },
    Ping { nonce: u64 },
    Pong { nonce: u64 },
    Error { message: String },
}

impl ServerMessage {
    /// The room event carried by this message, if any.
    pub fn into_event(self) -> Option<AuctionEvent> {
        match self {
            ServerMessage::Bid(bid) => Some(AuctionEvent::Bid(bid)),
            ServerMessage::Ended {
                auction_id,
                final_bid,
                winner,
                timestamp,
            } => Some(AuctionEvent::Ended {
                auction_id,
                final_bid,
                winner,
                timestamp,
            }),
            _ => None,
        }
    }
}

impl From<AuctionEvent> for ServerMessage {
    fn from(event: AuctionEvent) -> Self {
        match event {
            AuctionEvent::Bid(bid) => ServerMessage::Bid(bid),
            AuctionEvent::Ended {
                auction_id,
                final_bid,
                winner,
                timestamp,
            } => ServerMessage::Ended {
                auction_id,
                final_bid,
                winner,
                timestamp,
            },
        }
    }
}

/// Parse a raw text frame into a ClientMessage.
pub fn parse_client_message(json: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(json)
}
