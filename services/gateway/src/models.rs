use auction_engine::catalog::AuctionFilter;
use serde::{Deserialize, Serialize};
use types::events::BidEvent;
use types::numeric::Amount;

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceBidRequest {
    pub bidder: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct BidResponse {
    pub status: &'static str,
    pub bid: BidEvent,
}

/// `GET /v1/auctions` query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
    pub seller: Option<String>,
    pub active: Option<bool>,
}

impl From<ListQuery> for AuctionFilter {
    fn from(query: ListQuery) -> Self {
        AuctionFilter {
            category: query.category.filter(|c| !c.is_empty()),
            seller: query.seller.filter(|s| !s.is_empty()),
            active_only: query.active.unwrap_or(false),
        }
    }
}
