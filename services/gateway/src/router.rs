use crate::handlers::{auction, bid, ws};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/auctions",
            post(auction::create_auction).get(auction::list_auctions),
        )
        .route("/auctions/{id}", get(auction::get_auction))
        .route("/auctions/{id}/bids", post(bid::place_bid))
        .route("/users/{address}/auctions", get(auction::user_auctions))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/v1", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use auction_engine::ledger::MemoryLedger;
    use auction_engine::store::MemoryContentStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use types::clock::{Clock, SystemClock};

    const SELLER: &str = "0x0000000000000000000000000000000000000001";
    const ALICE: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    fn state() -> AppState {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        AppState::new(
            GatewayConfig::default(),
            Arc::new(MemoryContentStore::new()),
            ledger.clone(),
            Some(ledger),
            clock,
        )
    }

    fn app() -> Router {
        create_router(state())
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &Router, title: &str, category: &str) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/v1/auctions",
            Some(json!({
                "title": title,
                "category": category,
                "startingBid": "100",
                "minBidIncrement": "10",
                "durationSecs": 3600,
                "sellerAddress": SELLER
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_bid_and_fetch() {
        let app = app();
        let id = create(&app, "Brass Lamp", "Home").await;
        let bids = format!("/v1/auctions/{}/bids", id);

        let (status, body) = call(&app, "POST", &bids, Some(json!({ "bidder": ALICE, "amount": "105" }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "BID_TOO_LOW");

        let (status, body) = call(&app, "POST", &bids, Some(json!({ "bidder": ALICE, "amount": "110" }))).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["status"], "accepted");

        let (status, view) = call(&app, "GET", &format!("/v1/auctions/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["currentBid"], "110");
        assert_eq!(view["highestBidder"], ALICE);
        assert_eq!(view["status"], "active");
    }

    #[tokio::test]
    async fn test_unknown_auction_is_404() {
        let (status, body) = call(&app(), "GET", "/v1/auctions/QmMissing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");
        assert!(body["message"].as_str().unwrap().contains("QmMissing"));
    }

    #[tokio::test]
    async fn test_malformed_bidder_is_400() {
        let app = app();
        let id = create(&app, "Brass Lamp", "Home").await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/auctions/{}/bids", id),
            Some(json!({ "bidder": "not-an-address", "amount": "500" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_BIDDER");
    }

    #[tokio::test]
    async fn test_invalid_create_is_422() {
        let (status, body) = call(
            &app(),
            "POST",
            "/v1/auctions",
            Some(json!({
                "title": "",
                "startingBid": "100",
                "durationSecs": 3600,
                "sellerAddress": SELLER
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn test_list_filters_and_seller_route() {
        let app = app();
        create(&app, "Brass Lamp", "Home").await;
        create(&app, "Oil Painting", "Art").await;

        let (status, all) = call(&app, "GET", "/v1/auctions?active=true", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(all.as_array().unwrap().len(), 2);

        let (_, art) = call(&app, "GET", "/v1/auctions?category=Art", None).await;
        let art = art.as_array().unwrap();
        assert_eq!(art.len(), 1);
        assert_eq!(art[0]["title"], "Oil Painting");

        let (_, mine) = call(&app, "GET", &format!("/v1/users/{}/auctions", SELLER), None).await;
        assert_eq!(mine.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_bidders_get_no_rate_limit_bucket() {
        let state = state();
        let limiter = state.rate_limiter.clone();
        let app = create_router(state);
        let id = create(&app, "Brass Lamp", "Home").await;
        let before = limiter.tracked_keys();

        for i in 0..20 {
            let (status, _) = call(
                &app,
                "POST",
                &format!("/v1/auctions/{}/bids", id),
                Some(json!({ "bidder": format!("junk-{}", i), "amount": "500" })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        assert_eq!(limiter.tracked_keys(), before);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/v1/auctions/{}/bids", id),
            Some(json!({ "bidder": ALICE, "amount": "110" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(limiter.tracked_keys(), before + 1);
    }
}
