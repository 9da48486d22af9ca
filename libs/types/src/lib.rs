//! Types library for the live auction core
//!
//! This library provides the type definitions shared by the snapshot
//! builder, bid admission, the event broker and client-side sync agents.
//!
//! # Modules
//! - `ids`: Identifiers (AuctionId, Address)
//! - `numeric`: Fixed-point native-currency amounts
//! - `auction`: Canonical merged auction view and bid records
//! - `events`: Bid and lifecycle events fanned out to observers
//! - `retry`: Shared retry/backoff policy
//! - `clock`: Injectable wall clock
//! - `errors`: Error taxonomy

pub mod auction;
pub mod clock;
pub mod errors;
pub mod events;
pub mod ids;
pub mod numeric;
pub mod retry;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auction::*;
    pub use crate::clock::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::retry::*;
}
