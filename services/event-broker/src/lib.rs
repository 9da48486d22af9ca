//! Event Broker Service
//!
//! Room-based publish/subscribe hub for live auctions: one room per
//! auction id, bid and lifecycle events fanned out to every member.
//!
//! **Guarantees:**
//! - Join/leave are idempotent
//! - Within one room, a subscriber sees events in publish order
//! - A slow subscriber never blocks delivery to others (bounded queues)
//! - Ping/pong liveness; silent subscribers are dropped

pub mod backpressure;
pub mod broker;
pub mod protocol;

pub use backpressure::DropPolicy;
pub use broker::{BrokerConfig, BrokerError, BrokerHandle, BrokerStats, Subscriber, SubscriberId};
pub use protocol::{parse_client_message, ClientMessage, ServerMessage};
