//! Service provider
//!
//! Registers a service with the fabric and answers every request arriving
//! on its topics. Each request gets exactly one answer on its reply topic:
//! a response carrying the handler's payload, or an error carrying the
//! handler's fault. A handler that panics is answered with
//! [`INTERNAL_ERROR_CODE`] so the requester does not sit out its timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::FabricConfig;
use crate::connection::{ConnectionManager, TopicLease};
use crate::dispatch::{DispatchControl, DispatchRole, DispatchState, ExitReason, run_dispatch};
use crate::fabric::ServiceRegistration;
use crate::message::{Message, generate_id};
use crate::utils::DxlError;

/// Error code sent when a handler fails without a structured fault.
pub const INTERNAL_ERROR_CODE: &str = "internal_error";

/// Structured failure returned by a request handler; sent back to the
/// requester as an error message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {text}")]
pub struct ServiceFault {
    pub code: String,
    pub text: String,
}

impl ServiceFault {
    pub fn new(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            text: text.into(),
        }
    }

    pub fn internal(text: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR_CODE, text)
    }
}

/// Answers requests for a [`ServiceProvider`].
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &Message) -> Result<Vec<u8>, ServiceFault>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Message) -> Result<Vec<u8>, ServiceFault> + Send + Sync,
{
    fn handle(&self, request: &Message) -> Result<Vec<u8>, ServiceFault> {
        self(request)
    }
}

#[derive(Debug)]
pub struct ServiceProvider {
    connection: Arc<ConnectionManager>,
    control: DispatchControl,
    handled_requests: Arc<AtomicU64>,
}

impl ServiceProvider {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            control: DispatchControl::new(),
            handled_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Serve `service_id` on `topic` until [`stop`](Self::stop) is called or
    /// receiving fails.
    pub async fn start<H>(
        &self,
        config: &FabricConfig,
        topic: &str,
        service_id: &str,
        handler: H,
    ) -> Result<ExitReason, DxlError>
    where
        H: RequestHandler + 'static,
    {
        let handler: Arc<dyn RequestHandler> = Arc::new(handler);
        let handlers = HashMap::from([(topic.to_string(), handler)]);
        self.start_with_topics(config, service_id, handlers).await
    }

    /// Serve `service_id` on several topics, each with its own handler.
    pub async fn start_with_topics(
        &self,
        config: &FabricConfig,
        service_id: &str,
        handlers: HashMap<String, Arc<dyn RequestHandler>>,
    ) -> Result<ExitReason, DxlError> {
        if handlers.is_empty() {
            return Err(DxlError::subscription(service_id, "no topics to serve"));
        }
        let claim = self.control.claim()?;
        self.serve(config, service_id, handlers, claim.stop_signal())
            .await
    }

    async fn serve(
        &self,
        config: &FabricConfig,
        service_id: &str,
        handlers: HashMap<String, Arc<dyn RequestHandler>>,
        stop: watch::Receiver<bool>,
    ) -> Result<ExitReason, DxlError> {
        let mut topics: Vec<String> = handlers.keys().cloned().collect();
        topics.sort();

        let handle = self
            .connection
            .connect(config)
            .await
            .map_err(|e| DxlError::subscription(topics.join(", "), e))?;
        let registration = ServiceRegistration {
            service_type: service_id.to_string(),
            instance_id: generate_id(),
            topics: topics.clone(),
        };
        let mut lease = TopicLease::new(Arc::clone(&self.connection));
        lease.register_service(registration).await?;

        let mut subscriptions = Vec::with_capacity(topics.len());
        for topic in &topics {
            match lease.subscribe(topic).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    lease.release().await;
                    return Err(e);
                }
            }
        }
        info!(service = %service_id, topics = ?topics, "service provider started");

        let outcome = run_dispatch(
            &self.control,
            stop,
            stream::select_all(subscriptions),
            |request| {
                let handler = handlers.get(request.topic()).cloned();
                self.answer(handler, request, service_id, &handle.client_id)
            },
        )
        .await;

        lease.release().await;
        let reason = ExitReason::from_outcome(DispatchRole::ServiceProvider, topics, outcome);
        info!(service = %service_id, "{reason}");
        Ok(reason)
    }

    async fn answer(
        &self,
        handler: Option<Arc<dyn RequestHandler>>,
        request: Message,
        service_id: &str,
        client_id: &str,
    ) {
        let Some(reply_topic) = request.reply_topic().map(str::to_string) else {
            debug!(message_id = %request.id(), kind = %request.kind(), "not a request, skipped");
            return;
        };
        let Some(handler) = handler else {
            warn!(topic = %request.topic(), "no handler for topic");
            return;
        };

        let request = Arc::new(request);
        let outcome = {
            let request = Arc::clone(&request);
            tokio::task::spawn_blocking(move || handler.handle(&request)).await
        };
        let reply = match outcome {
            Ok(Ok(payload)) => Message::response_to(&request, payload),
            Ok(Err(fault)) => {
                warn!(request_id = %request.id(), fault = %fault, "request handler failed");
                Message::error_for(&request, fault.code, fault.text)
            }
            Err(e) => {
                error!(request_id = %request.id(), error = %e, "request handler panicked");
                Message::error_for(&request, INTERNAL_ERROR_CODE, "request handler failed")
            }
        };
        let Some(reply) = reply else {
            return;
        };

        let reply = reply.with_service_id(service_id).with_sender(client_id);
        self.handled_requests.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.connection.send(reply).await {
            warn!(request_id = %request.id(), reply_topic = %reply_topic, error = %e, "unable to send reply");
        }
    }

    /// Ask a running `start` to return. Safe to call from any task or thread.
    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn state(&self) -> DispatchState {
        self.control.state()
    }

    /// Number of requests answered, with a response or an error.
    pub fn handled_requests(&self) -> u64 {
        self.handled_requests.load(Ordering::Relaxed)
    }
}
