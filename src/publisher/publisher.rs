use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::FabricConfig;
use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::message::Message;
use crate::utils::DxlError;

/// Local acceptance of a published event. Says nothing about delivery to
/// subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message_id: String,
    pub topic: String,
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event successfully posted to topic '{}'", self.topic)
    }
}

/// Sends one-way events over a shared connection.
#[derive(Debug, Clone)]
pub struct Publisher {
    connection: Arc<ConnectionManager>,
}

impl Publisher {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    pub async fn connect(&self, config: &FabricConfig) -> Result<ConnectionHandle, DxlError> {
        self.connection.connect(config).await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Publish an event on `topic`. Fire-and-forget: returns once the fabric
    /// has accepted the message.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Ack, DxlError> {
        let handle = self.connection.handle().await.ok_or(DxlError::NotConnected)?;
        let event = Message::event(topic, payload).with_sender(handle.client_id);
        let ack = Ack {
            message_id: event.id().to_string(),
            topic: topic.to_string(),
        };
        self.connection.send(event).await?;
        info!(topic, message_id = %ack.message_id, "event published");
        Ok(ack)
    }
}
