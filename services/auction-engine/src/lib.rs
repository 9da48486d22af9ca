//! Auction Engine Service
//!
//! Canonical auction state and bid admission for the live auction core.
//!
//! **Components:**
//! - `snapshot`: merges content-store metadata with ledger state into an `AuctionView`
//! - `admission`: validates bids against a fresh view and forwards them to the ledger
//! - `catalog`: tag-filtered listing and auction creation
//! - `lifecycle`: background worker publishing `ended` events
//!
//! **Key Invariants:**
//! - Admitted bids clear `current_bid + min_bid_increment`
//! - `status == ended` whenever `now >= end_time`, ledger or not
//! - No event is published for a bid the ledger did not confirm

pub mod admission;
pub mod catalog;
pub mod ledger;
pub mod lifecycle;
pub mod metadata;
pub mod retry;
pub mod snapshot;
pub mod store;

pub use admission::{BidAdmissionService, BidDecision, Submission};
pub use catalog::AuctionCatalog;
pub use lifecycle::LifecycleMonitor;
pub use snapshot::{AuctionSnapshotBuilder, ViewSource};
