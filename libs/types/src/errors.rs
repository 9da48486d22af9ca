//! Error taxonomy for the auction core
//!
//! Transient I/O failures are retried inside the owning component and
//! only surface here once retries are exhausted. Validation and ledger
//! rejections are terminal and never retried.

use thiserror::Error;

use crate::numeric::Amount;

/// Why a proposed bid was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("auction has ended")]
    AuctionEnded,

    #[error("bid too low: minimum {minimum}, offered {offered}")]
    BidTooLow { minimum: Amount, offered: Amount },

    #[error("invalid bidder: {0}")]
    InvalidBidder(String),

    #[error("ledger rejected the bid: {0}")]
    LedgerRejected(String),
}

impl RejectReason {
    pub fn reason_code(&self) -> &'static str {
        match self {
            RejectReason::AuctionEnded => "AUCTION_ENDED",
            RejectReason::BidTooLow { .. } => "BID_TOO_LOW",
            RejectReason::InvalidBidder(_) => "INVALID_BIDDER",
            RejectReason::LedgerRejected(_) => "LEDGER_REJECTED",
        }
    }
}

/// Top-level auction error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuctionError {
    #[error("auction not found: {auction_id}")]
    NotFound { auction_id: String },

    #[error("metadata unavailable for {auction_id} after {attempts} attempt(s): {reason}")]
    MetadataUnavailable {
        auction_id: String,
        attempts: u32,
        reason: String,
    },

    /// Blob exists but cannot be decoded; fetching it again will not help
    #[error("metadata for {auction_id} is corrupt: {reason}")]
    CorruptMetadata { auction_id: String, reason: String },

    #[error("ledger unavailable: {reason}")]
    LedgerUnavailable { reason: String },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("ledger rejected: {reason}")]
    LedgerRejected { reason: String },

    #[error("transport dropped: {reason}")]
    TransportDropped { reason: String },

    #[error("reconnect failed after {attempts} attempt(s)")]
    ReconnectFailed { attempts: u32 },
}

impl AuctionError {
    /// Stable code for callers and wire payloads
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuctionError::NotFound { .. } => "NOT_FOUND",
            AuctionError::MetadataUnavailable { .. } => "METADATA_UNAVAILABLE",
            AuctionError::CorruptMetadata { .. } => "METADATA_CORRUPT",
            AuctionError::LedgerUnavailable { .. } => "LEDGER_UNAVAILABLE",
            AuctionError::ValidationFailed(_) => "VALIDATION_FAILED",
            AuctionError::LedgerRejected { .. } => "LEDGER_REJECTED",
            AuctionError::TransportDropped { .. } => "TRANSPORT_DROPPED",
            AuctionError::ReconnectFailed { .. } => "RECONNECT_FAILED",
        }
    }

    /// "Try again later" as opposed to "fix your input"
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuctionError::MetadataUnavailable { .. }
                | AuctionError::LedgerUnavailable { .. }
                | AuctionError::TransportDropped { .. }
                | AuctionError::ReconnectFailed { .. }
        )
    }
}

impl From<RejectReason> for AuctionError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::LedgerRejected(reason) => AuctionError::LedgerRejected { reason },
            other => AuctionError::ValidationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bid_too_low_display() {
        let err = RejectReason::BidTooLow {
            minimum: Amount::from_u64(110),
            offered: Amount::from_u64(105),
        };
        assert_eq!(err.to_string(), "bid too low: minimum 110, offered 105");
        assert_eq!(err.reason_code(), "BID_TOO_LOW");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AuctionError::MetadataUnavailable {
            auction_id: "Qm".into(),
            attempts: 3,
            reason: "timeout".into(),
        }
        .is_retryable());
        assert!(!AuctionError::ValidationFailed("too low".into()).is_retryable());
        assert!(!AuctionError::CorruptMetadata {
            auction_id: "Qm".into(),
            reason: "expected value at line 1 column 1".into(),
        }
        .is_retryable());
        assert!(!AuctionError::NotFound {
            auction_id: "Qm".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_reject_reason_into_error() {
        let err: AuctionError = RejectReason::LedgerRejected("reverted".into()).into();
        assert_eq!(err.reason_code(), "LEDGER_REJECTED");
        let err: AuctionError = RejectReason::AuctionEnded.into();
        assert_eq!(err.reason_code(), "VALIDATION_FAILED");
    }
}
