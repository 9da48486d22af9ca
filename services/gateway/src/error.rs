use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use types::errors::{AuctionError, RejectReason};

/// Central error type for the Gateway application
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Auction(#[from] AuctionError),

    #[error("Bid rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Auction(e) => match e {
                AuctionError::NotFound { .. } => StatusCode::NOT_FOUND,
                AuctionError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AuctionError::LedgerRejected { .. } | AuctionError::CorruptMetadata { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                AuctionError::MetadataUnavailable { .. }
                | AuctionError::LedgerUnavailable { .. }
                | AuctionError::TransportDropped { .. }
                | AuctionError::ReconnectFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppError::Rejected(reason) => match reason {
                RejectReason::AuctionEnded => StatusCode::CONFLICT,
                RejectReason::BidTooLow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                RejectReason::InvalidBidder(_) => StatusCode::BAD_REQUEST,
                RejectReason::LedgerRejected(_) => StatusCode::BAD_GATEWAY,
            },
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Auction(e) => e.reason_code(),
            AppError::Rejected(reason) => reason.reason_code(),
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::InternalError(e) => {
                tracing::error!(error = %e, "Unhandled gateway error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::numeric::Amount;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                AppError::from(AuctionError::NotFound {
                    auction_id: "Qm".into(),
                }),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                AppError::from(RejectReason::AuctionEnded),
                StatusCode::CONFLICT,
                "AUCTION_ENDED",
            ),
            (
                AppError::from(RejectReason::BidTooLow {
                    minimum: Amount::from_u64(110),
                    offered: Amount::from_u64(105),
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
                "BID_TOO_LOW",
            ),
            (
                AppError::from(AuctionError::LedgerUnavailable {
                    reason: "timeout".into(),
                }),
                StatusCode::SERVICE_UNAVAILABLE,
                "LEDGER_UNAVAILABLE",
            ),
            (
                AppError::from(RejectReason::LedgerRejected("reverted".into())),
                StatusCode::BAD_GATEWAY,
                "LEDGER_REJECTED",
            ),
        ];

        for (error, status, code) in cases {
            assert_eq!(error.status(), status);
            assert_eq!(error.code(), code);
        }
    }
}
