//! Tracks the subscribers attached to a shared run.

use crate::common::SubscriberId;
use slotmap::SlotMap;
use tokio::sync::mpsc;
use tracing::trace;

/// A set of subscribers, each addressed by a revocable `SubscriberId` token.
///
/// Delivery only ever goes through tokens that are still registered: once a
/// subscriber is removed, nothing reaches it, even if a delivery was already
/// under way for the others.
pub struct SubscriberRegistry<M> {
    subscribers: SlotMap<SubscriberId, mpsc::UnboundedSender<M>>,
}

impl<M> SubscriberRegistry<M> {
    pub fn new() -> Self {
        Self {
            subscribers: SlotMap::with_key(),
        }
    }

    /// Registers a new subscriber and returns its token and receiving end.
    pub fn insert(&mut self) -> (SubscriberId, mpsc::UnboundedReceiver<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribers.insert(tx);
        trace!("Subscriber {:?} attached.", id);
        (id, rx)
    }

    /// Revokes a token. Returns `true` if it was still registered.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let was_removed = self.subscribers.remove(id).is_some();
        if was_removed {
            trace!("Subscriber {:?} detached.", id);
        }
        was_removed
    }

    /// Drops every sender, ending all subscriber streams.
    pub fn close_all(&mut self) {
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<M: Clone> SubscriberRegistry<M> {
    /// Sends `message` to every live subscriber.
    ///
    /// Subscribers whose receiving end has gone away are pruned. Returns the
    /// number of subscribers the message reached.
    pub fn deliver(&mut self, message: &M) -> usize {
        self.subscribers
            .retain(|_, tx| tx.send(message.clone()).is_ok());
        self.subscribers.len()
    }
}

impl<M> Default for SubscriberRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
