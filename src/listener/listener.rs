//! Event listener
//!
//! Subscribes to one topic and hands every inbound message to a callback
//! until stopped. Callbacks run on the blocking pool, one at a time per
//! listener, so a slow or panicking callback never stalls the runtime or
//! ends the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream;
use tracing::{error, info, trace, warn};

use crate::config::FabricConfig;
use crate::connection::{ConnectionManager, TopicLease};
use crate::dispatch::{DispatchControl, DispatchRole, DispatchState, ExitReason, run_dispatch};
use crate::message::Message;
use crate::utils::{CallbackError, DxlError};

/// Receives messages from a [`Listener`].
pub trait MessageCallback: Send + Sync {
    fn on_message(&self, message: &Message) -> Result<(), CallbackError>;
}

impl<F> MessageCallback for F
where
    F: Fn(&Message) -> Result<(), CallbackError> + Send + Sync,
{
    fn on_message(&self, message: &Message) -> Result<(), CallbackError> {
        self(message)
    }
}

#[derive(Debug)]
pub struct Listener {
    connection: Arc<ConnectionManager>,
    control: DispatchControl,
    failed_deliveries: Arc<AtomicU64>,
}

impl Listener {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            control: DispatchControl::new(),
            failed_deliveries: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connect if needed, subscribe to `topic` and deliver messages to
    /// `callback` until [`stop`](Self::stop) is called or receiving fails.
    ///
    /// Fails with `DxlError::Subscription` if the topic cannot be subscribed
    /// to and with `DxlError::AlreadyStarted` if this listener is running.
    pub async fn start<C>(
        &self,
        config: &FabricConfig,
        topic: &str,
        callback: C,
    ) -> Result<ExitReason, DxlError>
    where
        C: MessageCallback + 'static,
    {
        let claim = self.control.claim()?;
        self.listen(config, topic, Arc::new(callback), claim.stop_signal())
            .await
    }

    async fn listen(
        &self,
        config: &FabricConfig,
        topic: &str,
        callback: Arc<dyn MessageCallback>,
        stop: tokio::sync::watch::Receiver<bool>,
    ) -> Result<ExitReason, DxlError> {
        self.connection
            .connect(config)
            .await
            .map_err(|e| DxlError::subscription(topic, e))?;
        let mut lease = TopicLease::new(Arc::clone(&self.connection));
        let subscription = lease.subscribe(topic).await?;
        info!(topic, "event listener started");

        let outcome = run_dispatch(
            &self.control,
            stop,
            stream::select_all([subscription]),
            |message| deliver(Arc::clone(&callback), Arc::clone(&self.failed_deliveries), message),
        )
        .await;

        lease.release().await;
        let reason =
            ExitReason::from_outcome(DispatchRole::EventListener, vec![topic.to_string()], outcome);
        info!(topic, "{reason}");
        Ok(reason)
    }

    /// Ask a running `start` to return. Safe to call from any task or thread.
    /// Called while nothing is running, the request ends the next `start`
    /// right after it subscribes.
    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn state(&self) -> DispatchState {
        self.control.state()
    }

    /// Number of messages whose callback failed or panicked.
    pub fn failed_deliveries(&self) -> u64 {
        self.failed_deliveries.load(Ordering::Relaxed)
    }
}

async fn deliver(callback: Arc<dyn MessageCallback>, failed: Arc<AtomicU64>, message: Message) {
    let topic = message.topic().to_string();
    let message_id = message.id().to_string();
    match tokio::task::spawn_blocking(move || callback.on_message(&message)).await {
        Ok(Ok(())) => trace!(topic = %topic, message_id = %message_id, "delivered"),
        Ok(Err(e)) => {
            failed.fetch_add(1, Ordering::Relaxed);
            warn!(topic = %topic, message_id = %message_id, error = %e, "delivery error");
        }
        Err(e) => {
            failed.fetch_add(1, Ordering::Relaxed);
            error!(topic = %topic, message_id = %message_id, error = %e, "callback panicked");
        }
    }
}
