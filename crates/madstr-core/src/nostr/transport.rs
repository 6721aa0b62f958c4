use async_trait::async_trait;
use nostr_sdk::prelude::*;
use tokio::sync::mpsc;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Let the transport close the subscription after end-of-stored-events
    pub close_on_eose: bool,
}

impl SubscribeOptions {
    /// Stored matches first, then live delivery until explicitly stopped
    pub fn live() -> Self {
        Self {
            close_on_eose: false,
        }
    }

    pub fn until_eose() -> Self {
        Self {
            close_on_eose: true,
        }
    }
}

/// Notifications delivered on a subscription's channel
#[derive(Debug, Clone)]
pub enum SubscriptionNotice {
    Event(Box<Event>),
    /// All stored matches have been delivered; live events may follow
    EndOfStoredEvents,
    /// The relay side closed the subscription
    Closed(String),
}

/// An open subscription. Dropping the receiver does not stop it on the relay
/// side; call [`Transport::unsubscribe`] with `id` for that.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub notices: mpsc::UnboundedReceiver<SubscriptionNotice>,
}

impl Subscription {
    /// Next notice, or `Closed` once the transport dropped its sender
    pub async fn next_notice(&mut self) -> SubscriptionNotice {
        self.notices
            .recv()
            .await
            .unwrap_or_else(|| SubscriptionNotice::Closed("transport dropped".to_string()))
    }
}

/// The pub/sub client the feed core consumes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(
        &self,
        filter: Filter,
        options: SubscribeOptions,
    ) -> Result<Subscription, TransportError>;

    /// Stop a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: &SubscriptionId);

    /// Latest kind:0 event of `author`, or `None` when the author has none
    async fn fetch_profile(&self, author: PublicKey) -> Result<Option<Event>, TransportError>;
}
