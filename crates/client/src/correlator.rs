//! Request/response correlation over the shared backend stream
//!
//! Each request gets a fresh `request_id` and transient dispatcher handlers for
//! its success tag and the generic error tag. Whatever the outcome (response,
//! backend error, timeout, transport loss, or the caller dropping the future)
//! those handlers are removed exactly once, when the guard drops.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sshdeck_protocol::{encode_record, new_id, Envelope, Tag};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::dispatcher::{Dispatcher, Subscription, SubscriptionKey};
use crate::error::{ClientError, Result};
use crate::transport::Transport;

type Completion = Arc<Mutex<Option<oneshot::Sender<Result<Envelope>>>>>;

#[derive(Clone)]
pub struct Correlator {
    dispatcher: Arc<Dispatcher>,
    transport: Transport,
}

impl Correlator {
    pub fn new(dispatcher: Arc<Dispatcher>, transport: Transport) -> Self {
        Self {
            dispatcher,
            transport,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Transmit a message, assigning a request id if it has none.
    pub async fn send(&self, mut msg: Envelope) -> Result<String> {
        if let Some(reason) = self.dispatcher.closed_reason() {
            return Err(ClientError::Transport(reason));
        }
        let request_id = msg.request_id.get_or_insert_with(new_id).clone();
        let line = encode_record(&msg)?;

        debug!(
            component = "correlator",
            event = "correlator.send",
            tag = %msg.tag.wire_name(),
            request_id = %request_id,
            session_id = ?msg.session_id,
            payload_len = line.len(),
            "Sending message to backend"
        );

        self.transport.send_line(line).await?;
        Ok(request_id)
    }

    /// Send and wait for the terminal response carrying the same request id.
    pub async fn request(&self, msg: Envelope, success: Tag, timeout: Duration) -> Result<Envelope> {
        self.request_inner(msg, success, None, timeout).await
    }

    /// Like `request`, but forwards same-id messages tagged `progress` to
    /// `progress_tx` until the terminal response arrives.
    pub async fn request_with_progress(
        &self,
        msg: Envelope,
        success: Tag,
        progress: Tag,
        progress_tx: mpsc::UnboundedSender<Envelope>,
        timeout: Duration,
    ) -> Result<Envelope> {
        self.request_inner(msg, success, Some((progress, progress_tx)), timeout)
            .await
    }

    async fn request_inner(
        &self,
        mut msg: Envelope,
        success: Tag,
        progress: Option<(Tag, mpsc::UnboundedSender<Envelope>)>,
        timeout: Duration,
    ) -> Result<Envelope> {
        let request_id = msg.request_id.get_or_insert_with(new_id).clone();
        let session_id = msg.session_id.clone();
        let keys_for = |tag: Tag| response_keys(tag, session_id.as_deref());

        let (tx, rx) = oneshot::channel();
        let completion: Completion = Arc::new(Mutex::new(Some(tx)));
        let mut guard = TransientSubscriptions::new(&self.dispatcher);

        for key in keys_for(success) {
            let slot = completion.clone();
            let id = request_id.clone();
            guard.push(self.dispatcher.subscribe(key, move |m| {
                if m.answers(&id) {
                    complete(&slot, Ok(m.clone()));
                }
            }));
        }

        for key in keys_for(Tag::Error) {
            let slot = completion.clone();
            let id = request_id.clone();
            guard.push(self.dispatcher.subscribe(key, move |m| {
                if m.answers(&id) {
                    let err = m.error_payload();
                    complete(
                        &slot,
                        Err(ClientError::Backend {
                            message: err.message,
                            code: err.code,
                        }),
                    );
                }
            }));
        }

        if let Some((progress_tag, progress_tx)) = progress {
            for key in keys_for(progress_tag) {
                let id = request_id.clone();
                let progress_tx = progress_tx.clone();
                guard.push(self.dispatcher.subscribe(key, move |m| {
                    if m.answers(&id) {
                        let _ = progress_tx.send(m.clone());
                    }
                }));
            }
        }

        let tag = msg.tag;
        let mut closed = self.dispatcher.watch_closed();
        self.send(msg).await?;

        let outcome = tokio::select! {
            res = rx => res.unwrap_or_else(|_| Err(ClientError::Transport("completion dropped".into()))),
            reason = wait_closed(&mut closed) => Err(ClientError::Transport(reason)),
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    component = "correlator",
                    event = "correlator.timeout",
                    tag = %tag.wire_name(),
                    request_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(ClientError::Timeout { tag, timeout })
            }
        };

        drop(guard);
        outcome
    }
}

/// Keys a response may arrive under. Session-scoped requests listen on both
/// the session key and the bare tag, since the backend may answer either way.
///
/// Fallback tags only ever get the bare key: fallback delivery already reaches
/// it, and a scoped handler would shadow long-lived subscribers of that tag
/// for the whole session while the request is pending.
fn response_keys(tag: Tag, session_id: Option<&str>) -> Vec<SubscriptionKey> {
    let mut keys = vec![SubscriptionKey::Tag(tag)];
    match session_id {
        Some(session_id) if !tag.is_global_fallback() => {
            keys.push(SubscriptionKey::session(tag, session_id));
        }
        _ => {}
    }
    keys
}

fn complete(slot: &Completion, result: Result<Envelope>) {
    let sender = slot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(tx) = sender {
        let _ = tx.send(result);
    }
}

async fn wait_closed(rx: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        if let Some(reason) = rx.borrow_and_update().clone() {
            return reason;
        }
        if rx.changed().await.is_err() {
            return "dispatcher dropped".to_string();
        }
    }
}

/// Handlers registered for one request; removed together on drop.
struct TransientSubscriptions<'a> {
    dispatcher: &'a Dispatcher,
    subs: Vec<Subscription>,
}

impl<'a> TransientSubscriptions<'a> {
    fn new(dispatcher: &'a Dispatcher) -> Self {
        Self {
            dispatcher,
            subs: Vec::new(),
        }
    }

    fn push(&mut self, sub: Subscription) {
        self.subs.push(sub);
    }
}

impl Drop for TransientSubscriptions<'_> {
    fn drop(&mut self) {
        for sub in self.subs.drain(..) {
            self.dispatcher.unsubscribe(&sub);
        }
    }
}
