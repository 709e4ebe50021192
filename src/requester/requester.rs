//! Request/response on top of one-way sends
//!
//! A request carries the client's reply topic. The response router
//! registered by the connection manager hands the matching answer back to
//! the waiting call; answers to anything else are dropped there.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::FabricConfig;
use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::message::{Message, MessageBody};
use crate::utils::DxlError;

#[derive(Debug, Clone)]
pub struct Requester {
    connection: Arc<ConnectionManager>,
}

impl Requester {
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

    /// Send a request on `topic` and wait up to `timeout` for its answer.
    ///
    /// The timeout is measured from the moment the fabric accepted the
    /// request. A matched error message is returned as
    /// `DxlError::RemoteService`.
    pub async fn send_request(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Message, DxlError> {
        self.exchange(topic, None, payload.into(), timeout).await
    }

    /// Like [`send_request`](Self::send_request), addressed to one service
    /// instance when several serve the same topic.
    pub async fn send_service_request(
        &self,
        topic: &str,
        service_id: &str,
        payload: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Message, DxlError> {
        self.exchange(topic, Some(service_id), payload.into(), timeout)
            .await
    }

    async fn exchange(
        &self,
        topic: &str,
        service_id: Option<&str>,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Message, DxlError> {
        let handle = self.connection.handle().await.ok_or(DxlError::NotConnected)?;
        let mut request = Message::request(topic, payload, handle.reply_topic)
            .with_sender(handle.client_id);
        if let Some(service_id) = service_id {
            request = request.with_service_id(service_id);
        }
        let pending = self.connection.router().register(request.id())?;

        self.connection.send(request).await?;
        debug!(topic, request_id = %pending.request_id(), ?timeout, "request sent");

        let answer = pending.wait(timeout).await?;
        match answer.body() {
            MessageBody::Error {
                error_code,
                error_text,
                ..
            } => {
                warn!(topic, code = %error_code, "request answered with an error");
                Err(DxlError::RemoteService {
                    code: error_code.clone(),
                    text: error_text.clone(),
                })
            }
            _ => Ok(answer),
        }
    }

    /// [`send_request`](Self::send_request) with the request timeout of the
    /// current connection's config.
    pub async fn request(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Message, DxlError> {
        let config = self.connection.config().await.ok_or(DxlError::NotConnected)?;
        self.send_request(topic, payload, config.request_timeout())
            .await
    }
}
