//! Topic table of the loopback hub
//!
//! A `Topic` maps each subscribed session to the senders feeding its
//! subscription streams. A session may hold several subscriptions on the
//! same topic; each one receives its own copy of every message.
//!
//! Callers must synchronize access (the hub lock) when modifying a topic.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::fabric::subscription::Inbound;

pub type SessionId = String;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashMap<SessionId, Vec<UnboundedSender<Inbound>>>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self, session: &str, sender: UnboundedSender<Inbound>) {
        self.subscribers
            .entry(session.to_string())
            .or_default()
            .push(sender);
    }

    /// Drop every subscription `session` holds on this topic, ending their
    /// streams.
    pub fn unsubscribe(&mut self, session: &str) {
        self.subscribers.remove(session);
    }

    pub fn is_subscribed(&self, session: &str) -> bool {
        self.subscribers.contains_key(session)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Feed `item` to every live subscription, pruning closed ones. Returns
    /// the number of subscriptions reached.
    pub fn deliver(&mut self, item: &Inbound) -> usize {
        let mut delivered = 0;
        for senders in self.subscribers.values_mut() {
            senders.retain(|tx| tx.send(item.clone()).is_ok());
            delivered += senders.len();
        }
        self.subscribers.retain(|_, senders| !senders.is_empty());
        delivered
    }
}
