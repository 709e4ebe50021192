//! Request/response correlation
//!
//! The router keeps one entry per outstanding request, keyed by the request
//! id. Inbound responses and errors are matched on `request_id` exactly;
//! anything without a waiting entry is discarded, since it is most likely
//! the late answer to a request that already timed out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::message::Message;
use crate::utils::DxlError;

#[derive(Debug, Default)]
pub struct ResponseRouter {
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Message>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start waiting for the answer to `request_id`.
    ///
    /// The entry is removed when the returned handle is dropped.
    pub fn register(self: &Arc<Self>, request_id: &str) -> Result<PendingResponse, DxlError> {
        let mut pending = self.lock();
        if pending.contains_key(request_id) {
            return Err(DxlError::Transport(format!(
                "request id {request_id} is already awaiting a response"
            )));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(request_id.to_string(), tx);
        Ok(PendingResponse {
            request_id: request_id.to_string(),
            receiver: rx,
            router: Arc::clone(self),
        })
    }

    /// Hand an inbound response or error to its waiting request. Returns
    /// `false` when nothing was waiting for it.
    pub fn route(&self, message: Message) -> bool {
        let Some(request_id) = message.request_id() else {
            debug!(message_id = %message.id(), kind = %message.kind(), "not a reply, discarded");
            return false;
        };
        let waiter = self.lock().remove(request_id);
        match waiter {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                debug!(request_id, "no pending request, reply discarded");
                false
            }
        }
    }

    /// Fail every outstanding request; their waits end with a connection
    /// error.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn forget(&self, request_id: &str) {
        self.lock().remove(request_id);
    }
}

/// Handle on one outstanding request.
#[derive(Debug)]
pub struct PendingResponse {
    request_id: String,
    receiver: oneshot::Receiver<Message>,
    router: Arc<ResponseRouter>,
}

impl PendingResponse {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait up to `timeout` for the correlated response or error message.
    pub async fn wait(mut self, timeout: Duration) -> Result<Message, DxlError> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(DxlError::Connection(format!(
                "connection lost while awaiting response to {}",
                self.request_id
            ))),
            Err(_) => Err(DxlError::Timeout {
                request_id: self.request_id.clone(),
                timeout,
            }),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.router.forget(&self.request_id);
    }
}
