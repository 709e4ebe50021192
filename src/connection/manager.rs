//! Connection manager
//!
//! Owns the single fabric session shared by publishers, listeners,
//! requesters and service providers.
//!
//! Concurrency and usage notes:
//! - The session sits behind a `tokio::sync::RwLock`. Sends, subscribes and
//!   registrations take the read side and may interleave freely; `connect`
//!   and `disconnect` take the write side, so they never run while a send or
//!   subscribe is using the session.
//! - The state is also kept in a plain mutex so `is_connected` and `state`
//!   answer without waiting on the session lock.
//! - On connect the manager subscribes to the client's reply topic and runs a
//!   pump task feeding responses into the [`ResponseRouter`]. A fatal failure
//!   on that stream moves the manager to `Disconnected` and fails every
//!   pending request.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FabricConfig;
use crate::connection::router::ResponseRouter;
use crate::fabric::{Fabric, ServiceRegistration, Subscription};
use crate::message::Message;
use crate::utils::DxlError;

/// Prefix of the per-client topic responses are addressed to.
pub const REPLY_TOPIC_PREFIX: &str = "/mcafee/client/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Identity of an established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub client_id: String,
    pub reply_topic: String,
    pub connected_at: DateTime<Utc>,
    /// Incremented on every new session opened by the same manager.
    pub generation: u64,
}

struct Session {
    handle: ConnectionHandle,
    config: FabricConfig,
    // topic -> number of holders
    topics: Mutex<HashMap<String, usize>>,
    reply_pump: JoinHandle<()>,
}

impl Session {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ConnectionManager {
    fabric: Arc<dyn Fabric>,
    state: Arc<Mutex<ConnectionState>>,
    session: RwLock<Option<Session>>,
    router: Arc<ResponseRouter>,
    generation: Mutex<u64>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("pending_requests", &self.router.pending_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self {
            fabric,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            session: RwLock::new(None),
            router: Arc::new(ResponseRouter::new()),
            generation: Mutex::new(0),
        }
    }

    /// Current state, reconciled with the transport: a session the fabric
    /// reports as lost reads as `Disconnected`.
    pub fn state(&self) -> ConnectionState {
        let mut state = lock(&self.state);
        if *state == ConnectionState::Connected && !self.fabric.is_connected() {
            warn!("fabric session lost");
            *state = ConnectionState::Disconnected;
        }
        *state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn router(&self) -> &Arc<ResponseRouter> {
        &self.router
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!(from = %*state, to = %next, "connection state change");
            *state = next;
        }
    }

    /// Open the session, or return the current handle if already connected.
    ///
    /// Fails with `DxlError::Connection` if `config` is invalid or the fabric
    /// does not answer within the configured connect timeout.
    pub async fn connect(&self, config: &FabricConfig) -> Result<ConnectionHandle, DxlError> {
        let mut session = self.session.write().await;

        if let Some(current) = session.as_ref() {
            if self.is_connected() {
                return Ok(current.handle.clone());
            }
        }
        // A session left behind by a transport failure is torn down first.
        if let Some(stale) = session.take() {
            self.teardown(stale).await;
        }

        config.validate()?;
        self.set_state(ConnectionState::Connecting);
        match self.open(config).await {
            Ok(opened) => {
                let handle = opened.handle.clone();
                *session = Some(opened);
                self.set_state(ConnectionState::Connected);
                info!(client_id = %handle.client_id, generation = handle.generation, "connected to fabric");
                Ok(handle)
            }
            Err(err) => {
                self.fabric.disconnect().await;
                self.set_state(ConnectionState::Disconnected);
                warn!(error = %err, "unable to connect to fabric");
                Err(err)
            }
        }
    }

    async fn open(&self, config: &FabricConfig) -> Result<Session, DxlError> {
        let client_id = config.resolve_client_id();
        let config = config.clone().with_client_id(client_id.clone());
        let timeout = config.connect_timeout();

        tokio::time::timeout(timeout, self.fabric.connect(&config))
            .await
            .map_err(|_| {
                DxlError::Connection(format!("no broker answered within {timeout:?}"))
            })?
            .map_err(|e| DxlError::Connection(e.to_string()))?;

        let reply_topic = format!("{REPLY_TOPIC_PREFIX}{client_id}");
        let replies = self
            .fabric
            .subscribe(&reply_topic)
            .await
            .map_err(|e| DxlError::Connection(format!("reply topic: {e}")))?;

        let generation = {
            let mut generation = lock(&self.generation);
            *generation += 1;
            *generation
        };

        Ok(Session {
            handle: ConnectionHandle {
                client_id,
                reply_topic,
                connected_at: Utc::now(),
                generation,
            },
            config,
            topics: Mutex::new(HashMap::new()),
            reply_pump: self.spawn_reply_pump(replies),
        })
    }

    fn spawn_reply_pump(&self, mut replies: Subscription) -> JoinHandle<()> {
        let router = Arc::clone(&self.router);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(inbound) = replies.next_message().await {
                match inbound {
                    Ok(message) => {
                        router.route(message);
                    }
                    Err(e) => {
                        warn!(error = %e, "reply stream failed, session lost");
                        let mut state = lock(&state);
                        if *state == ConnectionState::Connected {
                            *state = ConnectionState::Disconnected;
                        }
                        drop(state);
                        router.clear();
                        return;
                    }
                }
            }
            debug!(topic = %replies.topic(), "reply stream closed");
        })
    }

    /// Close the session and release every subscription held through it.
    /// Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let mut session = self.session.write().await;
        match session.take() {
            Some(current) => {
                self.set_state(ConnectionState::Disconnecting);
                let client_id = current.handle.client_id.clone();
                self.teardown(current).await;
                info!(client_id = %client_id, "disconnected from fabric");
            }
            None => debug!("disconnect while not connected"),
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn teardown(&self, session: Session) {
        let topics: Vec<String> = session.topics().drain().map(|(topic, _)| topic).collect();
        for topic in topics {
            self.fabric.unsubscribe(&topic).await;
        }
        self.fabric.unsubscribe(&session.handle.reply_topic).await;
        session.reply_pump.abort();
        self.router.clear();
        self.fabric.disconnect().await;
    }

    /// Handle of the current session, if connected.
    pub async fn handle(&self) -> Option<ConnectionHandle> {
        let session = self.session.read().await;
        session
            .as_ref()
            .filter(|_| self.is_connected())
            .map(|s| s.handle.clone())
    }

    /// Config the current session was opened with, if connected.
    pub async fn config(&self) -> Option<FabricConfig> {
        let session = self.session.read().await;
        session
            .as_ref()
            .filter(|_| self.is_connected())
            .map(|s| s.config.clone())
    }

    /// Hand a message to the fabric.
    pub async fn send(&self, message: Message) -> Result<(), DxlError> {
        let session = self.session.read().await;
        if session.is_none() || !self.is_connected() {
            return Err(DxlError::NotConnected);
        }
        let message_id = message.id().to_string();
        self.fabric
            .publish(message)
            .await
            .map_err(|e| DxlError::Transport(e.to_string()))?;
        debug!(message_id = %message_id, "message handed to fabric");
        Ok(())
    }

    /// Subscribe to `topic` through the current session. The session's reply
    /// topic is reserved for the response router and cannot be subscribed to.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, DxlError> {
        let session = self.session.read().await;
        let current = match session.as_ref() {
            Some(current) if self.is_connected() => current,
            _ => return Err(DxlError::subscription(topic, DxlError::NotConnected)),
        };
        if topic == current.handle.reply_topic {
            return Err(DxlError::subscription(
                topic,
                "reply topic is reserved for responses",
            ));
        }
        let subscription = self
            .fabric
            .subscribe(topic)
            .await
            .map_err(|e| DxlError::subscription(topic, e))?;
        *current.topics().entry(topic.to_string()).or_insert(0) += 1;
        Ok(subscription)
    }

    /// Release one hold on `topic`; the fabric subscription is dropped with
    /// the last one. No-op when not connected.
    pub async fn unsubscribe(&self, topic: &str) {
        let session = self.session.read().await;
        let Some(current) = session.as_ref() else {
            return;
        };
        let last = {
            let mut topics = current.topics();
            match topics.get_mut(topic) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    topics.remove(topic);
                    true
                }
                None => false,
            }
        };
        if last {
            self.fabric.unsubscribe(topic).await;
        }
    }

    pub async fn register_service(&self, registration: &ServiceRegistration) -> Result<(), DxlError> {
        let session = self.session.read().await;
        let current = match session.as_ref() {
            Some(current) if self.is_connected() => current,
            _ => {
                return Err(DxlError::subscription(
                    &registration.service_type,
                    DxlError::NotConnected,
                ));
            }
        };
        let timeout = current.config.register_timeout();
        tokio::time::timeout(timeout, self.fabric.register_service(registration))
            .await
            .map_err(|_| {
                DxlError::subscription(
                    &registration.service_type,
                    format!("registration not confirmed within {timeout:?}"),
                )
            })?
            .map_err(|e| DxlError::subscription(&registration.service_type, e))
    }

    pub async fn unregister_service(&self, registration: &ServiceRegistration) {
        let session = self.session.read().await;
        if session.is_some() {
            self.fabric.unregister_service(registration).await;
        }
    }

    /// Topics currently held through this manager, excluding the reply topic.
    pub async fn subscribed_topics(&self) -> Vec<String> {
        let session = self.session.read().await;
        let mut topics: Vec<String> = session
            .as_ref()
            .map(|s| s.topics().keys().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }
}

/// Topics (and optionally a service registration) held through a manager
/// on behalf of one listener or service provider run.
///
/// [`release`](Self::release) gives them back in order. If the lease is
/// dropped without being released, as when a `start` future is cancelled,
/// the release runs on a spawned task instead.
#[derive(Debug)]
pub(crate) struct TopicLease {
    connection: Arc<ConnectionManager>,
    topics: Vec<String>,
    registration: Option<ServiceRegistration>,
}

impl TopicLease {
    pub(crate) fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            topics: Vec::new(),
            registration: None,
        }
    }

    /// Subscribe to `topic` and keep it until release.
    pub(crate) async fn subscribe(&mut self, topic: &str) -> Result<Subscription, DxlError> {
        let subscription = self.connection.subscribe(topic).await?;
        self.topics.push(topic.to_string());
        Ok(subscription)
    }

    pub(crate) async fn register_service(
        &mut self,
        registration: ServiceRegistration,
    ) -> Result<(), DxlError> {
        self.connection.register_service(&registration).await?;
        self.registration = Some(registration);
        Ok(())
    }

    pub(crate) async fn release(mut self) {
        let topics = std::mem::take(&mut self.topics);
        let registration = self.registration.take();
        release_all(&self.connection, topics, registration).await;
    }
}

impl Drop for TopicLease {
    fn drop(&mut self) {
        if self.topics.is_empty() && self.registration.is_none() {
            return;
        }
        let topics = std::mem::take(&mut self.topics);
        let registration = self.registration.take();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(topics = ?topics, "lease dropped, releasing in background");
                let connection = Arc::clone(&self.connection);
                runtime.spawn(async move {
                    release_all(&connection, topics, registration).await;
                });
            }
            Err(_) => warn!(topics = ?topics, "lease dropped outside a runtime, topics not released"),
        }
    }
}

async fn release_all(
    connection: &ConnectionManager,
    topics: Vec<String>,
    registration: Option<ServiceRegistration>,
) {
    for topic in &topics {
        connection.unsubscribe(topic).await;
    }
    if let Some(registration) = registration {
        connection.unregister_service(&registration).await;
    }
}
