use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::fabric::FabricError;
use crate::message::Message;

/// Item delivered on a subscription.
pub type Inbound = Result<Message, FabricError>;

/// Inbound message stream for one topic, in fabric receive order.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    receiver: UnboundedReceiver<Inbound>,
}

impl Subscription {
    /// Create a subscription and the sender a fabric uses to feed it.
    pub fn channel(topic: impl Into<String>) -> (UnboundedSender<Inbound>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                topic: topic.into(),
                receiver: rx,
            },
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next inbound item, or `None` once the subscription has ended.
    pub async fn next_message(&mut self) -> Option<Inbound> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Inbound;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
