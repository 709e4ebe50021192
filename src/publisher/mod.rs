//! The `publisher` module sends one-way events.

pub mod publisher;

pub use publisher::{Ack, Publisher};
