//! Durable workspace state
//!
//! Stored by the backend as `{version, saved_at, snapshot, client_state}`.
//! `snapshot` belongs to the backend and is carried through untouched;
//! `client_state` records tabs plus a `SessionRef` for every session id any
//! tab mentions, since live session ids do not survive a restart.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::store::{ClientState, ViewFlags};
use crate::tabs::Tab;
use crate::workspace::remap::remap_tabs;

pub const WORKSPACE_STATE_VERSION: u32 = 1;

/// How to bring a session back after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub is_local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceClientState {
    #[serde(default)]
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub active_tab_id: Option<String>,
    /// Keyed by the session id as it was when the state was saved
    #[serde(default)]
    pub session_refs: BTreeMap<String, SessionRef>,
    #[serde(default)]
    pub view: ViewFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableWorkspaceState {
    pub version: u32,
    /// Milliseconds since the Unix epoch
    pub saved_at: u64,
    #[serde(default)]
    pub snapshot: Value,
    pub client_state: WorkspaceClientState,
}

impl DurableWorkspaceState {
    pub fn new(snapshot: Value, client_state: WorkspaceClientState) -> Self {
        Self {
            version: WORKSPACE_STATE_VERSION,
            saved_at: now_millis(),
            snapshot,
            client_state,
        }
    }

    /// Decode a stored value. Anything unreadable is discarded with a warning.
    pub fn parse(value: Value) -> Option<Self> {
        let state: Self = match serde_json::from_value(value) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    component = "workspace",
                    event = "workspace.state_unparseable",
                    error = %e,
                    "Discarding unreadable workspace state"
                );
                return None;
            }
        };
        if state.version > WORKSPACE_STATE_VERSION {
            warn!(
                component = "workspace",
                event = "workspace.state_version_unsupported",
                version = state.version,
                supported = WORKSPACE_STATE_VERSION,
                "Discarding workspace state from a newer client"
            );
            return None;
        }
        Some(state)
    }
}

/// Capture the durable part of the live state.
///
/// References to sessions the registry no longer knows are pruned first, so
/// every session id in the result has a `session_refs` entry.
pub fn build_client_state(state: &ClientState) -> WorkspaceClientState {
    let known: HashMap<String, String> = state
        .sessions
        .iter()
        .map(|s| (s.id.clone(), s.id.clone()))
        .collect();
    let tabs = remap_tabs(state.tabs.tabs(), &known);

    let mut session_refs = BTreeMap::new();
    for tab in &tabs {
        for id in tab.kind.session_ids() {
            if let Some(session) = state.sessions.get(id) {
                session_refs.insert(
                    id.to_string(),
                    SessionRef {
                        is_local: session.is_local(),
                        connection_id: session.connection_id.clone(),
                    },
                );
            }
        }
    }

    let active_tab_id = state
        .tabs
        .active_tab_id()
        .filter(|id| tabs.iter().any(|t| t.id == *id))
        .map(str::to_string);

    WorkspaceClientState {
        tabs,
        active_tab_id,
        session_refs,
        view: state.view().clone(),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
