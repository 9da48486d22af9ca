//! Content-store metadata format
//!
//! Auction metadata blobs are JSON documents:
//!
//! ```text
//! { "name", "description", "image",
//!   "attributes": { "category", "startingBid", "currentBid"?, "minBidIncrement"?,
//!                   "endTime", "created", "sellerAddress", "sellerName"?,
//!                   "sellerVerified"?, "bids"?: [{ "amount", "bidder", "timestamp" }] } }
//! ```
//!
//! Numeric fields may arrive as JSON numbers or strings. Bid records
//! appended after creation live as separate blobs whose tags carry the
//! bid, so history can be listed without fetching every blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use types::auction::BidRecord;
use types::ids::{Address, AuctionId};
use types::numeric::Amount;

use crate::store::{TagFilter, Tags};

pub const TAG_TYPE: &str = "type";
pub const TYPE_AUCTION: &str = "auction-metadata";
pub const TYPE_BID: &str = "bid";
pub const TAG_CATEGORY: &str = "category";
pub const TAG_SELLER: &str = "seller";
pub const TAG_END_TIME: &str = "endTime";
pub const TAG_STATUS: &str = "status";
pub const TAG_AUCTION: &str = "auction";
pub const TAG_BIDDER: &str = "bidder";
pub const TAG_AMOUNT: &str = "amount";
pub const TAG_TIMESTAMP: &str = "timestamp";

pub const DEFAULT_GATEWAY_TEMPLATE: &str = "https://gateway.pinata.cloud/ipfs/{cid}";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuctionMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub attributes: MetadataAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataAttributes {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub starting_bid: Option<Value>,
    #[serde(default)]
    pub current_bid: Option<Value>,
    #[serde(default)]
    pub min_bid_increment: Option<Value>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub seller_address: Option<String>,
    #[serde(default)]
    pub seller_name: Option<String>,
    #[serde(default)]
    pub seller_verified: Option<bool>,
    #[serde(default)]
    pub bids: Option<Vec<RawBid>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBid {
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub bidder: String,
    #[serde(default)]
    pub timestamp: String,
}

impl AuctionMetadata {
    pub fn from_slice(blob: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(blob)
    }

    /// Well-formed bids recorded in the blob; malformed entries are skipped.
    pub fn recorded_bids(&self, auction_id: &AuctionId) -> Vec<BidRecord> {
        let Some(raw) = &self.attributes.bids else {
            return Vec::new();
        };

        raw.iter()
            .filter_map(|bid| {
                let record = parse_bid(&bid.bidder, &bid.amount, &bid.timestamp);
                if record.is_none() {
                    warn!(auction_id = %auction_id, bidder = %bid.bidder, "Skipping malformed recorded bid");
                }
                record
            })
            .collect()
    }
}

fn parse_bid(bidder: &str, amount: &Value, timestamp: &str) -> Option<BidRecord> {
    Some(BidRecord {
        bidder: Address::parse(bidder).ok()?,
        amount: parse_amount(amount)?,
        timestamp: parse_timestamp(timestamp)?,
    })
}

/// Accepts JSON numbers and numeric strings.
pub fn parse_amount(value: &Value) -> Option<Amount> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Accepts RFC 3339 strings and Unix seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// A content identifier rather than a URL or free text.
///
/// CIDv0: `Qm` + 44 base58 characters. CIDv1: lowercase base32/hex
/// multibase string starting with `b`, at least 50 characters.
pub fn looks_like_cid(s: &str) -> bool {
    if s.starts_with("Qm") && s.len() == 46 {
        return s.chars().all(|c| c.is_ascii_alphanumeric() && !"0OIl".contains(c));
    }
    s.starts_with('b')
        && s.len() >= 50
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Rewrite an image reference into a fetchable locator.
///
/// `ipfs://<cid>` and bare CIDs go through `gateway_template`; absolute
/// locators pass through unchanged. Returns `None` for anything else.
pub fn resolve_image(reference: &str, gateway_template: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    if let Some(cid) = reference.strip_prefix("ipfs://") {
        let cid = cid.trim_start_matches("ipfs/");
        return Some(gateway_template.replace("{cid}", cid));
    }
    if reference.starts_with("https://") || reference.starts_with("http://") {
        return Some(reference.to_string());
    }
    if looks_like_cid(reference) {
        return Some(gateway_template.replace("{cid}", reference));
    }
    None
}

pub fn auction_filter() -> TagFilter {
    TagFilter::new().with_tag(TAG_TYPE, TYPE_AUCTION)
}

pub fn bid_filter(auction_id: &AuctionId) -> TagFilter {
    TagFilter::new()
        .with_tag(TAG_TYPE, TYPE_BID)
        .with_tag(TAG_AUCTION, auction_id.as_str())
}

/// Tags for an appended bid record
pub fn bid_tags(auction_id: &AuctionId, bid: &BidRecord) -> Tags {
    let mut tags = Tags::new();
    tags.insert(TAG_TYPE.into(), TYPE_BID.into());
    tags.insert(TAG_AUCTION.into(), auction_id.to_string());
    tags.insert(TAG_BIDDER.into(), bid.bidder.to_string());
    tags.insert(TAG_AMOUNT.into(), bid.amount.to_string());
    tags.insert(TAG_TIMESTAMP.into(), bid.timestamp.to_rfc3339());
    tags
}

/// Inverse of [`bid_tags`]
pub fn bid_from_tags(tags: &Tags) -> Option<BidRecord> {
    parse_bid(
        tags.get(TAG_BIDDER)?,
        &Value::String(tags.get(TAG_AMOUNT)?.clone()),
        tags.get(TAG_TIMESTAMP)?,
    )
}
