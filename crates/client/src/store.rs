//! Shared client state with change notification
//!
//! One `WorkspaceStore` per client instance. Every mutation goes through
//! `mutate`, which publishes the new combined revision only when something
//! observable changed, so no-op updates never wake the save loop.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::sessions::SessionRegistry;
use crate::tabs::TabRegistry;

/// UI chrome that is persisted alongside the tabs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFlags {
    #[serde(default)]
    pub sidebar_collapsed: bool,
    #[serde(default)]
    pub file_panel_visible: bool,
}

#[derive(Debug, Default)]
pub struct ClientState {
    pub sessions: SessionRegistry,
    pub tabs: TabRegistry,
    view: ViewFlags,
    view_revision: u64,
}

impl ClientState {
    /// Combined revision; moves whenever any part changes
    pub fn revision(&self) -> u64 {
        self.sessions.revision() + self.tabs.revision() + self.view_revision
    }

    pub fn view(&self) -> &ViewFlags {
        &self.view
    }

    pub fn set_view(&mut self, view: ViewFlags) -> bool {
        if self.view == view {
            return false;
        }
        self.view = view;
        self.view_revision += 1;
        true
    }
}

pub struct WorkspaceStore {
    state: Mutex<ClientState>,
    changes: watch::Sender<u64>,
}

impl Default for WorkspaceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Mutex::new(ClientState::default()),
            changes,
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&ClientState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    pub fn mutate<R>(&self, f: impl FnOnce(&mut ClientState) -> R) -> R {
        let (result, before, after) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let before = state.revision();
            let result = f(&mut state);
            (result, before, state.revision())
        };
        if after != before {
            self.changes.send_replace(after);
        }
        result
    }

    pub fn revision(&self) -> u64 {
        self.read(ClientState::revision)
    }

    /// Receiver that observes the revision after each effective mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{Session, SessionPatch};
    use crate::tabs::TabKind;
    use sshdeck_protocol::SessionStatus;

    #[tokio::test]
    async fn effective_mutation_notifies_subscribers() {
        let store = WorkspaceStore::new();
        let mut rx = store.subscribe();

        store.mutate(|s| s.tabs.add_tab("log", TabKind::Log));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), store.revision());
    }

    #[test]
    fn no_op_mutation_is_silent() {
        let store = WorkspaceStore::new();
        store.mutate(|s| s.sessions.add_session(Session::connected("s1", None), None));
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.mutate(|s| s.sessions.update_session("s1", SessionPatch::status(SessionStatus::Connected)));
        store.mutate(|s| s.set_view(ViewFlags::default()));

        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn view_changes_bump_revision() {
        let store = WorkspaceStore::new();
        let before = store.revision();
        let changed = store.mutate(|s| {
            s.set_view(ViewFlags {
                sidebar_collapsed: true,
                file_panel_visible: false,
            })
        });
        assert!(changed);
        assert!(store.revision() > before);
        assert!(store.read(|s| s.view().sidebar_collapsed));
    }
}
