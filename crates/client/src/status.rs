//! Applies `session_status` events to the session registry

use std::sync::Arc;

use sshdeck_protocol::{Envelope, SessionStatusPayload, Tag};
use tracing::{debug, warn};

use crate::dispatcher::{Dispatcher, Subscription, SubscriptionKey};
use crate::sessions::SessionPatch;
use crate::store::WorkspaceStore;

/// Subscribe a tracker for every session's status. Session-scoped status
/// subscribers take precedence over it for their own session.
pub fn track_session_status(dispatcher: &Dispatcher, store: Arc<WorkspaceStore>) -> Subscription {
    dispatcher.subscribe(SubscriptionKey::Tag(Tag::SessionStatus), move |msg| {
        apply_status(&store, msg);
    })
}

fn apply_status(store: &WorkspaceStore, msg: &Envelope) {
    let Some(session_id) = msg.session_id.as_deref() else {
        warn!(
            component = "status",
            event = "status.missing_session",
            "session_status without a session id"
        );
        return;
    };
    let payload: SessionStatusPayload = match msg.payload_as() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(
                component = "status",
                event = "status.bad_payload",
                session_id = %session_id,
                error = %e,
                "Ignoring malformed session_status"
            );
            return;
        }
    };

    let patch = SessionPatch {
        status: Some(payload.status),
        error: Some(payload.error),
    };
    let changed = store.mutate(|s| s.sessions.update_session(session_id, patch));
    debug!(
        component = "status",
        event = "status.applied",
        session_id = %session_id,
        status = ?payload.status,
        changed,
        "Session status event"
    );
}
