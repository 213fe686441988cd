//! Inbound message routing
//!
//! Subscribers register for a bare tag or for a tag scoped to one session.
//! Records are dispatched synchronously from the transport reader task, so
//! every subscriber sees messages in transport arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use sshdeck_protocol::{Envelope, Tag};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Where a subscriber listens
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// Every message with this tag (and, for session-scoped messages, only
    /// fallback tags when nobody listens on the session)
    Tag(Tag),
    /// Messages with this tag for one session
    Session(Tag, String),
}

impl SubscriptionKey {
    pub fn session(tag: Tag, session_id: impl Into<String>) -> Self {
        SubscriptionKey::Session(tag, session_id.into())
    }
}

/// Token returned by `subscribe`, needed to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    key: SubscriptionKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }
}

pub struct Dispatcher {
    subscribers: DashMap<SubscriptionKey, Vec<(u64, Handler)>>,
    next_id: AtomicU64,
    /// `Some(reason)` once the transport is gone
    closed: watch::Sender<Option<String>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(None);
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed,
        }
    }

    /// Register a callback. Callbacks run on the reader task and must not block.
    pub fn subscribe<F>(&self, key: SubscriptionKey, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription { key, id }
    }

    /// Register a channel subscriber. Messages are queued in arrival order.
    pub fn subscribe_channel(
        &self,
        key: SubscriptionKey,
    ) -> (Subscription, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribe(key, move |msg| {
            let _ = tx.send(msg.clone());
        });
        (sub, rx)
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, sub: &Subscription) -> bool {
        let mut removed = false;
        let mut now_empty = false;
        if let Some(mut list) = self.subscribers.get_mut(&sub.key) {
            let before = list.len();
            list.retain(|(id, _)| *id != sub.id);
            removed = list.len() != before;
            now_empty = list.is_empty();
        }
        if now_empty {
            self.subscribers.remove_if(&sub.key, |_, list| list.is_empty());
        }
        removed
    }

    /// Total number of live subscribers across all keys
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().map(|entry| entry.value().len()).sum()
    }

    /// Route one inbound message. Returns how many subscribers received it.
    pub fn dispatch(&self, msg: &Envelope) -> usize {
        let handlers = self.route(msg);
        for handler in &handlers {
            handler(msg);
        }
        handlers.len()
    }

    fn route(&self, msg: &Envelope) -> Vec<Handler> {
        match &msg.session_id {
            Some(session_id) => {
                let scoped = self.handlers_for(&SubscriptionKey::Session(msg.tag, session_id.clone()));
                if !scoped.is_empty() {
                    return scoped;
                }
                if msg.tag.is_global_fallback() {
                    return self.handlers_for(&SubscriptionKey::Tag(msg.tag));
                }
                debug!(
                    component = "dispatcher",
                    event = "dispatch.dropped",
                    tag = %msg.tag.wire_name(),
                    session_id = %session_id,
                    request_id = ?msg.request_id,
                    "No subscriber for session-scoped message"
                );
                Vec::new()
            }
            None => self.handlers_for(&SubscriptionKey::Tag(msg.tag)),
        }
    }

    // Clone the handler list so no map guard is held while callbacks run;
    // callbacks are free to subscribe or unsubscribe.
    fn handlers_for(&self, key: &SubscriptionKey) -> Vec<Handler> {
        self.subscribers
            .get(key)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Mark the transport as gone. Pending requests observe this immediately.
    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let first = self.closed.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(reason.clone());
                true
            } else {
                false
            }
        });
        if first {
            info!(
                component = "dispatcher",
                event = "dispatch.closed",
                reason = %reason,
                "Backend transport closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    pub fn closed_reason(&self) -> Option<String> {
        self.closed.borrow().clone()
    }

    /// Watch for transport closure
    pub fn watch_closed(&self) -> watch::Receiver<Option<String>> {
        self.closed.subscribe()
    }
}
