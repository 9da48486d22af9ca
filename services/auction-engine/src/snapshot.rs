//! Auction snapshot builder
//!
//! Builds the canonical `AuctionView` for one auction by merging the
//! content-store metadata blob, the ledger's contract state and the bid
//! records appended to the store. The merge itself (`merge_view`) is a
//! pure function of its inputs and the current time.
//!
//! # Precedence
//! - Ledger wins for every field it carries (seller, title, image, money, end time, ended flag).
//! - Metadata fills descriptive fields the ledger lacks.
//! - Anything missing from both gets a default and is listed in `defaulted_fields`.
//!
//! An unreachable ledger degrades the view instead of failing it:
//! `current_bid` comes from recorded bid history and `status` from the
//! wall clock.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use types::auction::{
    AuctionStatus, AuctionView, BidRecord, CurrentBidSource, LedgerAvailability, ViewField,
};
use types::clock::Clock;
use types::errors::AuctionError;
use types::ids::{Address, AuctionId};
use types::numeric::Amount;
use types::retry::RetryPolicy;

use crate::ledger::{Ledger, LedgerDetails};
use crate::metadata::{self, AuctionMetadata, DEFAULT_GATEWAY_TEMPLATE};
use crate::retry::{with_retry, RetryError};
use crate::store::{ContentStore, StoreError};

pub const DEFAULT_TITLE: &str = "Untitled Auction";
pub const DEFAULT_CATEGORY: &str = "Uncategorized";
pub const DEFAULT_SELLER_NAME: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotConfig {
    /// Locator template with a `{cid}` placeholder
    pub gateway_template: String,
    /// Per-attempt timeout for store and ledger calls
    pub fetch_timeout: Duration,
    pub content_retry: RetryPolicy,
    pub ledger_retry: RetryPolicy,
    pub default_min_bid_increment: Amount,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            gateway_template: DEFAULT_GATEWAY_TEMPLATE.to_string(),
            fetch_timeout: Duration::from_secs(15),
            content_retry: RetryPolicy::content_fetch(),
            ledger_retry: RetryPolicy::ledger_read(),
            default_min_bid_increment: Amount::from_u64(1),
        }
    }
}

/// Outcome of consulting the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRead {
    Found(LedgerDetails),
    NoRecord,
    Unavailable,
}

impl LedgerRead {
    fn availability(&self) -> LedgerAvailability {
        match self {
            LedgerRead::Found(_) => LedgerAvailability::Reachable,
            LedgerRead::NoRecord => LedgerAvailability::NoRecord,
            LedgerRead::Unavailable => LedgerAvailability::Unavailable,
        }
    }

    fn details(&self) -> Option<&LedgerDetails> {
        match self {
            LedgerRead::Found(details) => Some(details),
            _ => None,
        }
    }
}

/// Anything that can produce a fresh view of an auction.
#[async_trait]
pub trait ViewSource: Send + Sync {
    async fn build_view(&self, auction_id: &AuctionId) -> Result<AuctionView, AuctionError>;
}

pub struct AuctionSnapshotBuilder {
    store: Arc<dyn ContentStore>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    config: SnapshotConfig,
}

impl AuctionSnapshotBuilder {
    pub fn new(
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Fetch, merge and return the current view of `auction_id`.
    pub async fn build(&self, auction_id: &AuctionId) -> Result<AuctionView, AuctionError> {
        let metadata = self.fetch_metadata(auction_id).await?;
        let (ledger, history) = tokio::join!(
            self.read_ledger(auction_id),
            self.read_bid_history(auction_id)
        );

        let view = merge_view(
            auction_id,
            &metadata,
            &ledger,
            history,
            self.clock.now(),
            &self.config,
        )?;
        debug!(
            auction_id = %auction_id,
            status = ?view.status,
            current_bid = %view.current_bid,
            source = ?view.current_bid_source,
            ledger = ?view.ledger,
            "Built auction view"
        );
        Ok(view)
    }

    async fn fetch_metadata(&self, auction_id: &AuctionId) -> Result<AuctionMetadata, AuctionError> {
        let store = &self.store;
        let blob = with_retry(
            &self.config.content_retry,
            self.config.fetch_timeout,
            "content_store.get",
            move || store.get(auction_id.as_str()),
        )
        .await
        .map_err(|e| match e {
            RetryError::Permanent {
                error: StoreError::NotFound(_),
                ..
            } => AuctionError::NotFound {
                auction_id: auction_id.to_string(),
            },
            other => AuctionError::MetadataUnavailable {
                auction_id: auction_id.to_string(),
                attempts: other.attempts(),
                reason: other.to_string(),
            },
        })?;

        AuctionMetadata::from_slice(&blob).map_err(|e| {
            warn!(auction_id = %auction_id, error = %e, "Metadata blob does not decode");
            AuctionError::CorruptMetadata {
                auction_id: auction_id.to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn read_ledger(&self, auction_id: &AuctionId) -> LedgerRead {
        let ledger = &self.ledger;
        let result = with_retry(
            &self.config.ledger_retry,
            self.config.fetch_timeout,
            "ledger.read_auction_details",
            move || ledger.read_auction_details(auction_id),
        )
        .await;

        match result {
            Ok(Some(details)) => LedgerRead::Found(details),
            Ok(None) => LedgerRead::NoRecord,
            Err(e) => {
                warn!(
                    auction_id = %auction_id,
                    error = %e,
                    "Ledger unavailable, falling back to recorded history"
                );
                LedgerRead::Unavailable
            }
        }
    }

    async fn read_bid_history(&self, auction_id: &AuctionId) -> Vec<BidRecord> {
        let listing = tokio::time::timeout(
            self.config.fetch_timeout,
            self.store.list(&metadata::bid_filter(auction_id)),
        )
        .await;
        match listing {
            Ok(Ok(entries)) => entries
                .iter()
                .filter_map(|entry| metadata::bid_from_tags(&entry.tags))
                .collect(),
            Ok(Err(e)) => {
                warn!(auction_id = %auction_id, error = %e, "Could not list bid records");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    auction_id = %auction_id,
                    timeout_secs = self.config.fetch_timeout.as_secs(),
                    "Listing bid records timed out"
                );
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ViewSource for AuctionSnapshotBuilder {
    async fn build_view(&self, auction_id: &AuctionId) -> Result<AuctionView, AuctionError> {
        self.build(auction_id).await
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Merge the three sources into one view.
pub fn merge_view(
    auction_id: &AuctionId,
    meta: &AuctionMetadata,
    ledger: &LedgerRead,
    recorded: Vec<BidRecord>,
    now: DateTime<Utc>,
    config: &SnapshotConfig,
) -> Result<AuctionView, AuctionError> {
    let attrs = &meta.attributes;
    let chain = ledger.details();
    let mut defaulted = BTreeSet::new();

    let title = non_empty(chain.map(|d| d.title.as_str()))
        .or_else(|| non_empty(meta.name.as_deref()))
        .unwrap_or_else(|| {
            defaulted.insert(ViewField::Title);
            DEFAULT_TITLE.to_string()
        });

    let description = non_empty(meta.description.as_deref()).unwrap_or_else(|| {
        defaulted.insert(ViewField::Description);
        String::new()
    });

    let category = non_empty(attrs.category.as_deref()).unwrap_or_else(|| {
        defaulted.insert(ViewField::Category);
        DEFAULT_CATEGORY.to_string()
    });

    let image_url = chain
        .and_then(|d| metadata::resolve_image(&d.image_ref, &config.gateway_template))
        .or_else(|| {
            meta.image
                .as_deref()
                .and_then(|image| metadata::resolve_image(image, &config.gateway_template))
        })
        .unwrap_or_else(|| {
            defaulted.insert(ViewField::ImageUrl);
            config.gateway_template.replace("{cid}", auction_id.as_str())
        });

    let seller_address = non_empty(chain.map(|d| d.seller.as_str()))
        .or_else(|| non_empty(attrs.seller_address.as_deref()))
        .unwrap_or_else(|| {
            defaulted.insert(ViewField::SellerAddress);
            String::new()
        });

    let seller_name = non_empty(attrs.seller_name.as_deref()).unwrap_or_else(|| {
        defaulted.insert(ViewField::SellerName);
        DEFAULT_SELLER_NAME.to_string()
    });

    let starting_bid = chain
        .map(|d| d.starting_bid)
        .filter(Amount::is_positive)
        .or_else(|| {
            attrs
                .starting_bid
                .as_ref()
                .and_then(metadata::parse_amount)
                .filter(Amount::is_positive)
        })
        .ok_or_else(|| AuctionError::MetadataUnavailable {
            auction_id: auction_id.to_string(),
            attempts: 1,
            reason: "starting bid missing or not positive".to_string(),
        })?;

    let min_bid_increment = attrs
        .min_bid_increment
        .as_ref()
        .and_then(metadata::parse_amount)
        .filter(Amount::is_positive)
        .unwrap_or_else(|| {
            defaulted.insert(ViewField::MinBidIncrement);
            config.default_min_bid_increment
        });

    let end_time = chain
        .map(|d| d.end_time)
        .or_else(|| attrs.end_time.as_deref().and_then(metadata::parse_timestamp))
        .unwrap_or_else(|| {
            defaulted.insert(ViewField::EndTime);
            now
        });

    let created_at = attrs
        .created
        .as_deref()
        .and_then(metadata::parse_timestamp)
        .unwrap_or_else(|| {
            defaulted.insert(ViewField::CreatedAt);
            now
        });

    let mut bids = meta.recorded_bids(auction_id);
    for record in recorded {
        if !bids.iter().any(|b| b.same_bid(&record)) {
            bids.push(record);
        }
    }
    bids.sort_by(BidRecord::newest_first);

    let (current_bid, highest_bidder, current_bid_source) = match chain {
        Some(details) if details.highest_bid.is_positive() => (
            details.highest_bid,
            details.highest_bidder.clone(),
            CurrentBidSource::Ledger,
        ),
        Some(_) => (starting_bid, None, CurrentBidSource::NoBidsYet),
        None => fallback_current_bid(&bids, attrs.current_bid.as_ref(), starting_bid),
    };

    let ledger_ended = chain.map(|d| d.ended).unwrap_or(false);

    Ok(AuctionView {
        id: auction_id.clone(),
        title,
        description,
        category,
        image_url,
        seller_address,
        seller_name,
        seller_verified: attrs.seller_verified.unwrap_or(false),
        starting_bid,
        current_bid: current_bid.max(starting_bid),
        highest_bidder,
        min_bid_increment,
        created_at,
        end_time,
        status: AuctionStatus::derive(ledger_ended, end_time, now),
        bids,
        current_bid_source,
        ledger: ledger.availability(),
        defaulted_fields: defaulted,
    })
}

/// Highest recorded bid when the ledger cannot answer.
fn fallback_current_bid(
    bids: &[BidRecord],
    metadata_current: Option<&serde_json::Value>,
    starting_bid: Amount,
) -> (Amount, Option<Address>, CurrentBidSource) {
    let top = bids.iter().max_by(|a, b| a.amount.cmp(&b.amount));
    let recorded_current = metadata_current
        .and_then(metadata::parse_amount)
        .filter(|amount| *amount > starting_bid);

    match (top, recorded_current) {
        (Some(top), Some(current)) if current > top.amount => {
            (current, None, CurrentBidSource::BidHistory)
        }
        (Some(top), _) => (
            top.amount,
            Some(top.bidder.clone()),
            CurrentBidSource::BidHistory,
        ),
        (None, Some(current)) => (current, None, CurrentBidSource::BidHistory),
        (None, None) => (starting_bid, None, CurrentBidSource::NoBidsYet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn alice() -> Address {
        Address::parse("0x52908400098527886E0F7030069857D2E4169EE7").unwrap()
    }

    fn meta(value: serde_json::Value) -> AuctionMetadata {
        serde_json::from_value(value).unwrap()
    }

    fn full_meta() -> AuctionMetadata {
        meta(json!({
            "name": "Brass Lamp",
            "description": "Working condition",
            "image": "ipfs://QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG",
            "attributes": {
                "category": "Home",
                "startingBid": "100",
                "minBidIncrement": 10,
                "endTime": "2025-03-01T12:00:00Z",
                "created": "2025-03-01T09:00:00Z",
                "sellerAddress": "0x0000000000000000000000000000000000000001",
                "sellerName": "Dana",
                "sellerVerified": true
            }
        }))
    }

    fn ledger_details(highest: u64) -> LedgerDetails {
        LedgerDetails {
            seller: "0x0000000000000000000000000000000000000002".into(),
            title: String::new(),
            image_ref: String::new(),
            starting_bid: Amount::from_u64(100),
            end_time: now() + ChronoDuration::hours(1),
            ended: false,
            highest_bidder: (highest > 0).then(alice),
            highest_bid: Amount::from_u64(highest),
        }
    }

    fn id() -> AuctionId {
        AuctionId::new("QmLamp")
    }

    #[test]
    fn test_ledger_wins_where_present() {
        let view = merge_view(
            &id(),
            &full_meta(),
            &LedgerRead::Found(ledger_details(130)),
            Vec::new(),
            now(),
            &SnapshotConfig::default(),
        )
        .unwrap();

        assert_eq!(view.title, "Brass Lamp");
        assert_eq!(view.seller_address, "0x0000000000000000000000000000000000000002");
        assert_eq!(view.end_time, now() + ChronoDuration::hours(1));
        assert_eq!(view.current_bid, Amount::from_u64(130));
        assert_eq!(view.current_bid_source, CurrentBidSource::Ledger);
        assert_eq!(view.highest_bidder, Some(alice()));
        assert!(view.defaulted_fields.is_empty());
    }

    #[test]
    fn test_defaults_are_recorded() {
        let view = merge_view(
            &id(),
            &meta(json!({ "attributes": { "startingBid": 5 } })),
            &LedgerRead::NoRecord,
            Vec::new(),
            now(),
            &SnapshotConfig::default(),
        )
        .unwrap();

        assert_eq!(view.title, DEFAULT_TITLE);
        assert_eq!(view.category, DEFAULT_CATEGORY);
        assert_eq!(view.description, "");
        assert_eq!(view.current_bid, Amount::from_u64(5));
        assert_eq!(view.current_bid_source, CurrentBidSource::NoBidsYet);
        assert_eq!(view.image_url, "https://gateway.pinata.cloud/ipfs/QmLamp");
        for field in [
            ViewField::Title,
            ViewField::Description,
            ViewField::Category,
            ViewField::ImageUrl,
            ViewField::EndTime,
            ViewField::CreatedAt,
            ViewField::MinBidIncrement,
        ] {
            assert!(view.is_defaulted(field), "{:?} should be defaulted", field);
        }
        // Defaulted end time is `now`, so the auction reads as ended.
        assert!(view.is_ended());
    }

    #[test]
    fn test_no_bids_yet_distinct_from_unavailable() {
        let config = SnapshotConfig::default();
        let reachable = merge_view(
            &id(),
            &full_meta(),
            &LedgerRead::Found(ledger_details(0)),
            Vec::new(),
            now(),
            &config,
        )
        .unwrap();
        let unreachable = merge_view(
            &id(),
            &full_meta(),
            &LedgerRead::Unavailable,
            Vec::new(),
            now(),
            &config,
        )
        .unwrap();

        assert_eq!(reachable.current_bid, unreachable.current_bid);
        assert_eq!(reachable.ledger, LedgerAvailability::Reachable);
        assert_eq!(unreachable.ledger, LedgerAvailability::Unavailable);
        assert!(unreachable.is_possibly_stale());
        assert!(!reachable.is_possibly_stale());
    }

    #[test]
    fn test_fallback_uses_recorded_history() {
        let recorded = vec![
            BidRecord {
                bidder: alice(),
                amount: Amount::from_u64(110),
                timestamp: now() - ChronoDuration::minutes(5),
            },
            BidRecord {
                bidder: alice(),
                amount: Amount::from_u64(120),
                timestamp: now() - ChronoDuration::minutes(1),
            },
        ];
        let view = merge_view(
            &id(),
            &full_meta(),
            &LedgerRead::Unavailable,
            recorded,
            now(),
            &SnapshotConfig::default(),
        )
        .unwrap();

        assert_eq!(view.current_bid, Amount::from_u64(120));
        assert_eq!(view.current_bid_source, CurrentBidSource::BidHistory);
        assert_eq!(view.bids[0].amount, Amount::from_u64(120));
        assert_eq!(view.min_next_bid(), Amount::from_u64(130));
    }

    #[test]
    fn test_recorded_duplicates_collapse() {
        let record = BidRecord {
            bidder: alice(),
            amount: Amount::from_u64(110),
            timestamp: now() - ChronoDuration::minutes(5),
        };
        let view = merge_view(
            &id(),
            &full_meta(),
            &LedgerRead::Unavailable,
            vec![record.clone(), record],
            now(),
            &SnapshotConfig::default(),
        )
        .unwrap();
        assert_eq!(view.bids.len(), 1);
    }

    #[test]
    fn test_ledger_ended_flag_is_authoritative() {
        let mut details = ledger_details(130);
        details.ended = true;
        let view = merge_view(
            &id(),
            &full_meta(),
            &LedgerRead::Found(details),
            Vec::new(),
            now(),
            &SnapshotConfig::default(),
        )
        .unwrap();
        assert_eq!(view.status, AuctionStatus::Ended);
    }

    #[test]
    fn test_missing_starting_bid_is_an_error() {
        let err = merge_view(
            &id(),
            &meta(json!({ "name": "Broken" })),
            &LedgerRead::Unavailable,
            Vec::new(),
            now(),
            &SnapshotConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.reason_code(), "METADATA_UNAVAILABLE");
    }
}
