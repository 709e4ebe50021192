//! The `message` module defines the fabric message model.
//!
//! Every message exchanged with the fabric is a [`Message`]: a common header
//! (topic, version, id, sender/origin identities, payload) plus a
//! [`MessageBody`] that carries the fields only meaningful for its kind.

pub mod id;
pub mod message;

pub use id::generate_id;
pub use message::{Message, MessageBody, MessageType, PROTOCOL_VERSION};
