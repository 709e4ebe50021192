//! The `fabric` module is the boundary to the fabric client library.
//!
//! [`Fabric`] is the capability set the facade consumes: session lifecycle,
//! one-way publish, topic subscriptions delivered as a [`Subscription`]
//! stream, and service registration. Wire encoding, broker routing and
//! topic wildcards belong to the implementation behind the trait.
//!
//! [`LoopbackHub`] provides an in-process implementation used for local
//! embedding and tests.

pub mod loopback;
pub mod subscription;
pub mod topic;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::FabricConfig;
use crate::message::Message;

pub use loopback::{LoopbackFabric, LoopbackHub};
pub use subscription::Subscription;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FabricError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("session is not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("subscription refused: {0}")]
    SubscribeFailed(String),

    #[error("session severed: {0}")]
    Severed(String),
}

/// A service announced to the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    /// Logical service name requests are addressed to.
    pub service_type: String,
    /// Unique id of this provider instance.
    pub instance_id: String,
    pub topics: Vec<String>,
}

/// Capabilities of a fabric client session.
///
/// An implementation owns exactly one transport session. `disconnect` and
/// `unsubscribe` are best effort and never fail.
#[async_trait]
pub trait Fabric: Send + Sync {
    async fn connect(&self, config: &FabricConfig) -> Result<(), FabricError>;

    async fn disconnect(&self);

    /// Last known transport state.
    fn is_connected(&self) -> bool;

    async fn publish(&self, message: Message) -> Result<(), FabricError>;

    /// Subscribe to `topic`. The returned stream ends once the topic is
    /// unsubscribed or the session disconnects, and yields an error if the
    /// session fails.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, FabricError>;

    async fn unsubscribe(&self, topic: &str);

    async fn register_service(&self, registration: &ServiceRegistration)
    -> Result<(), FabricError>;

    async fn unregister_service(&self, registration: &ServiceRegistration);
}
