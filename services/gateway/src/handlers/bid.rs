use crate::error::AppError;
use crate::models::{BidResponse, PlaceBidRequest};
use crate::rate_limit::BID_LIMIT;
use crate::state::AppState;
use auction_engine::admission::BidDecision;
use auction_engine::ledger::LedgerSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use types::errors::RejectReason;
use types::ids::{Address, AuctionId};

pub async fn place_bid(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<PlaceBidRequest>,
) -> Result<(StatusCode, Json<BidResponse>), AppError> {
    let auction_id = AuctionId::try_new(id)
        .ok_or_else(|| AppError::BadRequest("auction id must not be empty".into()))?;

    // Only well-formed bidders get a rate-limit bucket.
    let bidder = Address::parse(&payload.bidder)
        .map_err(|e| RejectReason::InvalidBidder(e.to_string()))?;
    state
        .rate_limiter
        .check("bids", &bidder.normalized(), BID_LIMIT)?;

    let session = LedgerSession::new(payload.bidder, state.ledger.clone());
    match state
        .admission
        .admit(&auction_id, &session, payload.amount)
        .await?
    {
        BidDecision::Accepted(bid) => {
            state.lifecycle.watch(auction_id);
            Ok((
                StatusCode::CREATED,
                Json(BidResponse {
                    status: "accepted",
                    bid,
                }),
            ))
        }
        BidDecision::Rejected(reason) => {
            tracing::debug!(auction_id = %auction_id, reason = reason.reason_code(), "Bid rejected");
            Err(reason.into())
        }
    }
}
