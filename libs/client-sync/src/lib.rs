//! Client Sync
//!
//! Observer-side synchronisation for live auctions.
//!
//! **Components:**
//! - `history`: local per-auction state, idempotent under duplicate and
//!   out-of-order delivery
//! - `connection`: connection status and reconnect accounting
//! - `transport`: `Connector`/`Connection` seam and the in-process broker transport
//! - `agent`: the driver task tying the above together
//!
//! **Key Invariants:**
//! - A watched auction's `current_bid` never decreases
//! - The owner is never notified of its own bids
//! - After `max_attempts` consecutive failures the agent stops reconnecting
//!   until told to retry

pub mod agent;
pub mod connection;
pub mod history;
pub mod transport;

pub use agent::{AgentConfig, AgentNotification, ClientSyncAgent};
pub use connection::{ConnectionStatus, ReconnectDecision, ReconnectTracker};
pub use history::{BidApplied, LiveAuction};
pub use transport::{BrokerConnection, BrokerConnector, Connection, Connector};
