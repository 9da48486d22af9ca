//! Auction listing and creation
//!
//! Listing walks the content store's tag index and builds a view per
//! entry; one unreadable auction is logged and skipped rather than
//! failing the whole listing.

use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use types::auction::AuctionView;
use types::clock::Clock;
use types::errors::AuctionError;
use types::ids::{Address, AuctionId};
use types::numeric::Amount;

use crate::metadata::{self, AuctionMetadata, MetadataAttributes};
use crate::retry::with_retry;
use crate::snapshot::AuctionSnapshotBuilder;
use crate::store::{ContentStore, TagFilter, Tags};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionFilter {
    pub category: Option<String>,
    pub seller: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

impl AuctionFilter {
    fn tag_filter(&self) -> TagFilter {
        let mut filter = metadata::auction_filter();
        if let Some(category) = &self.category {
            filter = filter.with_tag(metadata::TAG_CATEGORY, category.as_str());
        }
        if let Some(seller) = &self.seller {
            filter = filter.with_tag(metadata::TAG_SELLER, seller.to_ascii_lowercase());
        }
        filter
    }
}

/// Request to list a new auction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAuction {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Content id, `ipfs://` reference or absolute locator
    #[serde(default)]
    pub image: Option<String>,
    pub starting_bid: Amount,
    #[serde(default)]
    pub min_bid_increment: Option<Amount>,
    pub duration_secs: i64,
    pub seller_address: String,
    #[serde(default)]
    pub seller_name: Option<String>,
}

impl CreateAuction {
    fn validate(&self) -> Result<Address, AuctionError> {
        if self.title.trim().is_empty() {
            return Err(AuctionError::ValidationFailed("title must not be empty".into()));
        }
        if !self.starting_bid.is_positive() {
            return Err(AuctionError::ValidationFailed(
                "starting bid must be greater than zero".into(),
            ));
        }
        if let Some(increment) = self.min_bid_increment {
            if !increment.is_positive() {
                return Err(AuctionError::ValidationFailed(
                    "minimum bid increment must be greater than zero".into(),
                ));
            }
        }
        if self.duration_secs <= 0 {
            return Err(AuctionError::ValidationFailed(
                "duration must be greater than zero".into(),
            ));
        }
        Address::parse(&self.seller_address)
            .map_err(|e| AuctionError::ValidationFailed(format!("seller: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAuction {
    pub id: AuctionId,
    pub view: AuctionView,
}

pub struct AuctionCatalog {
    store: Arc<dyn ContentStore>,
    snapshots: Arc<AuctionSnapshotBuilder>,
    clock: Arc<dyn Clock>,
}

impl AuctionCatalog {
    pub fn new(
        store: Arc<dyn ContentStore>,
        snapshots: Arc<AuctionSnapshotBuilder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            snapshots,
            clock,
        }
    }

    /// Views of every auction matching `filter`, ending soonest first.
    pub async fn list_auctions(&self, filter: &AuctionFilter) -> Result<Vec<AuctionView>, AuctionError> {
        let tag_filter = filter.tag_filter();
        let tag_filter = &tag_filter;
        let store = &self.store;
        let config = self.snapshots.config();
        let entries = with_retry(
            &config.content_retry,
            config.fetch_timeout,
            "content_store.list",
            move || store.list(tag_filter),
        )
        .await
        .map_err(|e| AuctionError::MetadataUnavailable {
            auction_id: "*".to_string(),
            attempts: e.attempts(),
            reason: e.to_string(),
        })?;

        let ids: Vec<AuctionId> = entries
            .iter()
            .filter_map(|entry| AuctionId::try_new(entry.id.clone()))
            .collect();
        let built = join_all(ids.iter().map(|id| self.snapshots.build(id))).await;

        let mut views: Vec<AuctionView> = ids
            .iter()
            .zip(built)
            .filter_map(|(id, result)| match result {
                Ok(view) => Some(view),
                Err(e) => {
                    warn!(auction_id = %id, error = %e, "Skipping unreadable auction");
                    None
                }
            })
            .filter(|view| !filter.active_only || !view.is_ended())
            .collect();
        views.sort_by(|a, b| a.end_time.cmp(&b.end_time).then_with(|| a.id.cmp(&b.id)));

        debug!(matched = entries.len(), returned = views.len(), "Listed auctions");
        Ok(views)
    }

    pub async fn list_by_seller(&self, seller: &str) -> Result<Vec<AuctionView>, AuctionError> {
        let seller = Address::parse(seller)
            .map_err(|e| AuctionError::ValidationFailed(format!("seller: {}", e)))?;
        self.list_auctions(&AuctionFilter {
            seller: Some(seller.normalized()),
            ..AuctionFilter::default()
        })
        .await
    }

    /// Validate, write the metadata blob with its tags, and return the new view.
    pub async fn create_auction(&self, request: CreateAuction) -> Result<CreatedAuction, AuctionError> {
        let seller = request.validate()?;
        let now = self.clock.now();
        let end_time = now + Duration::seconds(request.duration_secs);
        let category = request
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| crate::snapshot::DEFAULT_CATEGORY.to_string());
        let min_bid_increment = request
            .min_bid_increment
            .unwrap_or(self.snapshots.config().default_min_bid_increment);

        let blob_doc = AuctionMetadata {
            name: Some(request.title.trim().to_string()),
            description: Some(request.description),
            image: request.image,
            attributes: MetadataAttributes {
                category: Some(category.clone()),
                starting_bid: Some(json!(request.starting_bid.to_string())),
                current_bid: Some(json!(request.starting_bid.to_string())),
                min_bid_increment: Some(json!(min_bid_increment.to_string())),
                end_time: Some(end_time.to_rfc3339()),
                created: Some(now.to_rfc3339()),
                seller_address: Some(seller.to_string()),
                seller_name: request.seller_name,
                seller_verified: Some(false),
                bids: Some(Vec::new()),
            },
        };
        let blob = serde_json::to_vec(&blob_doc)
            .map_err(|e| AuctionError::ValidationFailed(format!("unencodable metadata: {}", e)))?;

        let mut tags = Tags::new();
        tags.insert(metadata::TAG_TYPE.into(), metadata::TYPE_AUCTION.into());
        tags.insert(metadata::TAG_CATEGORY.into(), category);
        tags.insert(metadata::TAG_SELLER.into(), seller.normalized());
        tags.insert(metadata::TAG_END_TIME.into(), end_time.to_rfc3339());
        tags.insert(metadata::TAG_STATUS.into(), "active".into());

        let fetch_timeout = self.snapshots.config().fetch_timeout;
        let content_id = match tokio::time::timeout(fetch_timeout, self.store.put(blob, tags)).await {
            Ok(Ok(content_id)) => content_id,
            Ok(Err(e)) => {
                return Err(AuctionError::MetadataUnavailable {
                    auction_id: "new".to_string(),
                    attempts: 1,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!(seller = %seller, "Metadata write timed out");
                return Err(AuctionError::MetadataUnavailable {
                    auction_id: "new".to_string(),
                    attempts: 1,
                    reason: format!("write not acknowledged within {}s", fetch_timeout.as_secs()),
                });
            }
        };
        let id = AuctionId::try_new(content_id).ok_or_else(|| AuctionError::MetadataUnavailable {
            auction_id: "new".to_string(),
            attempts: 1,
            reason: "store returned an empty id".to_string(),
        })?;
        info!(auction_id = %id, seller = %seller, end_time = %end_time, "Auction created");

        let view = self.snapshots.build(&id).await?;
        Ok(CreatedAuction { id, view })
    }
}
