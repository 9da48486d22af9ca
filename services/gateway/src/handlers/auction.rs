use crate::error::AppError;
use crate::models::ListQuery;
use crate::rate_limit::CREATE_LIMIT;
use crate::state::AppState;
use auction_engine::catalog::CreateAuction;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use types::auction::AuctionView;
use types::ids::AuctionId;

fn auction_id(raw: &str) -> Result<AuctionId, AppError> {
    AuctionId::try_new(raw).ok_or_else(|| AppError::BadRequest("auction id must not be empty".into()))
}

pub async fn create_auction(
    State(state): State<AppState>,
    Json(payload): Json<CreateAuction>,
) -> Result<(StatusCode, Json<AuctionView>), AppError> {
    state
        .rate_limiter
        .check("create", &payload.seller_address, CREATE_LIMIT)?;

    let created = state.catalog.create_auction(payload).await?;
    state.register_local_contract(&created.view).await;
    state.lifecycle.watch(created.id.clone());

    // Rebuild so the view reflects the contract just registered.
    let view = match state.snapshots.build(&created.id).await {
        Ok(view) => view,
        Err(e) => {
            tracing::warn!(auction_id = %created.id, error = %e, "Rebuild after create failed");
            created.view
        }
    };
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_auction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AuctionView>, AppError> {
    let id = auction_id(&id)?;
    let view = state.snapshots.build(&id).await?;
    if !view.is_ended() {
        state.lifecycle.watch(id);
    }
    Ok(Json(view))
}

pub async fn list_auctions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AuctionView>>, AppError> {
    let views = state.catalog.list_auctions(&query.into()).await?;
    Ok(Json(views))
}

pub async fn user_auctions(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<AuctionView>>, AppError> {
    let views = state.catalog.list_by_seller(&address).await?;
    Ok(Json(views))
}
