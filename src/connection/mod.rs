//! The `connection` module owns the single fabric session every interaction
//! pattern borrows.
//!
//! [`ConnectionManager`] tracks the session state machine and serializes
//! connect/disconnect against in-flight sends. [`ResponseRouter`] correlates
//! inbound responses with the requests waiting for them.

pub mod manager;
pub mod router;

pub use manager::{ConnectionHandle, ConnectionManager, ConnectionState, REPLY_TOPIC_PREFIX};
pub(crate) use manager::TopicLease;
pub use router::{PendingResponse, ResponseRouter};

#[cfg(test)]
mod tests;
