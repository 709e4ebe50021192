//! Loopback fabric
//!
//! An in-process hub standing in for a broker network. Every
//! [`LoopbackFabric`] obtained from the same [`LoopbackHub`] is one client
//! session; messages published by any session are delivered to all
//! subscriptions on the exact same topic, across sessions.
//!
//! Usage notes:
//! - Delivery copies the message through its JSON form, so subscribers never
//!   share state with the publisher. The hub stamps the sender id and the
//!   origin broker id and appends its broker id to the origin trail.
//! - Faults can be injected per session (unreachable brokers, slow connects,
//!   refused sends) and a session can be severed to simulate a fatal
//!   transport failure: its streams yield an error and it reports
//!   disconnected.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::FabricConfig;
use crate::fabric::subscription::Subscription;
use crate::fabric::topic::{SessionId, Topic};
use crate::fabric::{Fabric, FabricError, ServiceRegistration};
use crate::message::{Message, generate_id};

#[derive(Debug)]
struct SessionRecord {
    client_id: String,
    connected: Arc<AtomicBool>,
    topics: HashSet<String>,
}

#[derive(Debug, Default)]
struct HubState {
    topics: HashMap<String, Topic>,
    sessions: HashMap<SessionId, SessionRecord>,
    services: HashMap<String, (SessionId, ServiceRegistration)>,
}

impl HubState {
    /// Remove a session and everything it holds. When `reason` is given the
    /// session's streams receive a `Severed` error before they end.
    fn drop_session(&mut self, session: &str, reason: Option<&str>) {
        let Some(record) = self.sessions.remove(session) else {
            return;
        };
        record.connected.store(false, Ordering::SeqCst);

        for name in &record.topics {
            if let Some(topic) = self.topics.get_mut(name) {
                if let (Some(reason), Some(senders)) = (reason, topic.subscribers.get(session)) {
                    for tx in senders {
                        let _ = tx.send(Err(FabricError::Severed(reason.to_string())));
                    }
                }
                topic.unsubscribe(session);
                if topic.is_empty() {
                    self.topics.remove(name);
                }
            }
        }
        self.services.retain(|_, (owner, _)| owner != session);
    }
}

/// In-process broker shared by loopback sessions.
#[derive(Debug, Clone)]
pub struct LoopbackHub {
    broker_id: String,
    state: Arc<Mutex<HubState>>,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::with_broker_id(generate_id())
    }

    pub fn with_broker_id(broker_id: impl Into<String>) -> Self {
        Self {
            broker_id: broker_id.into(),
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    /// A new, not yet connected, client session on this hub.
    pub fn session(&self) -> LoopbackFabric {
        LoopbackFabric {
            hub: self.clone(),
            session_id: generate_id(),
            connected: Arc::new(AtomicBool::new(false)),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn connected_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Number of sessions subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map_or(0, |t| t.subscribers.len())
    }

    pub fn services(&self) -> Vec<ServiceRegistration> {
        self.lock()
            .services
            .values()
            .map(|(_, registration)| registration.clone())
            .collect()
    }

    /// Fail every connected session.
    pub fn sever_all(&self, reason: &str) {
        let mut state = self.lock();
        let sessions: Vec<SessionId> = state.sessions.keys().cloned().collect();
        for session in sessions {
            state.drop_session(&session, Some(reason));
        }
        warn!(broker_id = %self.broker_id, reason, "all loopback sessions severed");
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, session: &str, message: Message) -> Result<usize, FabricError> {
        let mut state = self.lock();
        let client_id = state
            .sessions
            .get(session)
            .map(|record| record.client_id.clone())
            .ok_or(FabricError::NotConnected)?;

        let text = message
            .stamped(&client_id, &self.broker_id)
            .to_json()
            .map_err(|e| FabricError::SendFailed(e.to_string()))?;
        let delivered =
            Message::from_json(&text).map_err(|e| FabricError::SendFailed(e.to_string()))?;

        let topic_name = delivered.topic().to_string();
        match state.topics.get_mut(&topic_name) {
            Some(topic) => Ok(topic.deliver(&Ok(delivered))),
            None => {
                debug!(topic = %topic_name, "no subscribers for topic");
                Ok(0)
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Faults {
    unreachable: bool,
    fail_publish: bool,
    connect_delay: Option<Duration>,
}

/// One client session on a [`LoopbackHub`].
#[derive(Debug)]
pub struct LoopbackFabric {
    hub: LoopbackHub,
    session_id: SessionId,
    connected: Arc<AtomicBool>,
    faults: Mutex<Faults>,
}

impl LoopbackFabric {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Make subsequent connects fail as if no broker answered.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults().unreachable = unreachable;
    }

    /// Make subsequent publishes fail at the transport boundary.
    pub fn set_fail_publish(&self, fail: bool) {
        self.faults().fail_publish = fail;
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.faults().connect_delay = delay;
    }

    /// Fail this session as a dropped transport would.
    pub fn sever(&self, reason: &str) {
        self.hub.lock().drop_session(&self.session_id, Some(reason));
        self.connected.store(false, Ordering::SeqCst);
        warn!(session = %self.session_id, reason, "loopback session severed");
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connected(&self) -> Result<(), FabricError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FabricError::NotConnected)
        }
    }
}

#[async_trait]
impl Fabric for LoopbackFabric {
    async fn connect(&self, config: &FabricConfig) -> Result<(), FabricError> {
        let faults = self.faults().clone();
        if faults.unreachable {
            let brokers: Vec<String> = config.brokers.iter().map(ToString::to_string).collect();
            return Err(FabricError::Unreachable(brokers.join(", ")));
        }
        if let Some(delay) = faults.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| self.session_id.clone());
        self.hub.lock().sessions.insert(
            self.session_id.clone(),
            SessionRecord {
                client_id: client_id.clone(),
                connected: self.connected.clone(),
                topics: HashSet::new(),
            },
        );
        self.connected.store(true, Ordering::SeqCst);
        info!(session = %self.session_id, client_id = %client_id, "loopback session connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.hub.lock().drop_session(&self.session_id, None);
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(session = %self.session_id, "loopback session disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, message: Message) -> Result<(), FabricError> {
        self.ensure_connected()?;
        if self.faults().fail_publish {
            return Err(FabricError::SendFailed("publish refused by transport".to_string()));
        }
        let reached = self.hub.route(&self.session_id, message)?;
        debug!(session = %self.session_id, reached, "message routed");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, FabricError> {
        self.ensure_connected()?;
        let mut state = self.hub.lock();
        let record = state
            .sessions
            .get_mut(&self.session_id)
            .ok_or(FabricError::NotConnected)?;
        record.topics.insert(topic.to_string());

        let (tx, subscription) = Subscription::channel(topic);
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(&self.session_id, tx);
        debug!(session = %self.session_id, topic, "subscribed");
        Ok(subscription)
    }

    async fn unsubscribe(&self, topic: &str) {
        let mut state = self.hub.lock();
        if let Some(record) = state.sessions.get_mut(&self.session_id) {
            record.topics.remove(topic);
        }
        if let Some(t) = state.topics.get_mut(topic) {
            t.unsubscribe(&self.session_id);
            if t.is_empty() {
                state.topics.remove(topic);
            }
        }
        debug!(session = %self.session_id, topic, "unsubscribed");
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), FabricError> {
        self.ensure_connected()?;
        self.hub.lock().services.insert(
            registration.instance_id.clone(),
            (self.session_id.clone(), registration.clone()),
        );
        info!(
            service = %registration.service_type,
            instance = %registration.instance_id,
            "service registered"
        );
        Ok(())
    }

    async fn unregister_service(&self, registration: &ServiceRegistration) {
        self.hub.lock().services.remove(&registration.instance_id);
        debug!(instance = %registration.instance_id, "service unregistered");
    }
}
