//! Restore-on-startup and debounced saving
//!
//! The engine moves `Idle -> Hydrating -> Hydrated` exactly once. While it is
//! not `Hydrated` no snapshot is written, so a half-restored workspace never
//! overwrites the stored one. Restore work is committed only if the user has
//! not opened any tab in the meantime; otherwise the reconnected sessions are
//! closed again and live state wins.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use sshdeck_protocol::Connection;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::sessions::Session;
use crate::store::WorkspaceStore;
use crate::workspace::debounce::DebounceTimer;
use crate::workspace::remap::remap_tabs;
use crate::workspace::state::{build_client_state, DurableWorkspaceState, SessionRef};
use crate::workspace::WorkspaceBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationPhase {
    Idle,
    Hydrating,
    Hydrated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub tabs_restored: usize,
    pub tabs_dropped: usize,
    pub sessions_restored: usize,
    /// Saved session ids that could not be brought back
    pub sessions_failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationOutcome {
    /// Nothing stored, or nothing usable in it
    Empty,
    Restored(RestoreReport),
    /// Live tabs appeared first; reconnected sessions were closed again
    Discarded { orphaned: usize },
    /// `hydrate` already ran
    Skipped,
}

type Restored = (Session, Option<Connection>);

pub struct WorkspaceEngine<B> {
    backend: Arc<B>,
    store: Arc<WorkspaceStore>,
    phase: watch::Sender<HydrationPhase>,
    changes: watch::Receiver<u64>,
    /// Store revision at the moment hydration finished
    settled_revision: AtomicU64,
    /// Backend-owned blob from the last loaded state, written back unchanged
    snapshot: Mutex<Value>,
    save_debounce: Duration,
}

impl<B: WorkspaceBackend> WorkspaceEngine<B> {
    pub fn new(backend: Arc<B>, store: Arc<WorkspaceStore>, save_debounce: Duration) -> Self {
        let (phase, _) = watch::channel(HydrationPhase::Idle);
        let changes = store.subscribe();
        Self {
            backend,
            store,
            phase,
            changes,
            settled_revision: AtomicU64::new(0),
            snapshot: Mutex::new(Value::Null),
            save_debounce,
        }
    }

    pub fn store(&self) -> &Arc<WorkspaceStore> {
        &self.store
    }

    pub fn phase(&self) -> HydrationPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<HydrationPhase> {
        self.phase.subscribe()
    }

    /// Restore the stored workspace. Never fails; problems are logged and
    /// reported through the outcome.
    pub async fn hydrate(&self) -> HydrationOutcome {
        let started = self.phase.send_if_modified(|phase| {
            if *phase == HydrationPhase::Idle {
                *phase = HydrationPhase::Hydrating;
                true
            } else {
                false
            }
        });
        if !started {
            warn!(
                component = "workspace",
                event = "workspace.hydrate_skipped",
                "Hydration already ran"
            );
            return HydrationOutcome::Skipped;
        }

        info!(
            component = "workspace",
            event = "workspace.hydrate_start",
            "Restoring workspace"
        );
        let baseline = self.store.revision();
        let outcome = self.restore().await;

        // Only a committed restore counts as already saved. Anything the user
        // changed while an empty or discarded restore ran is still unsaved.
        let settled = match outcome {
            HydrationOutcome::Restored(_) => self.store.revision(),
            _ => baseline,
        };
        self.settled_revision.store(settled, Ordering::SeqCst);
        self.phase.send_replace(HydrationPhase::Hydrated);

        info!(
            component = "workspace",
            event = "workspace.hydrate_done",
            outcome = ?outcome,
            "Workspace restore finished"
        );
        outcome
    }

    async fn restore(&self) -> HydrationOutcome {
        let connections = match self.backend.list_connections().await {
            Ok(connections) => connections,
            Err(e) => {
                warn!(
                    component = "workspace",
                    event = "workspace.connections_unavailable",
                    error = %e,
                    "Could not load connections; remote sessions will not be restored"
                );
                Vec::new()
            }
        };
        self.store
            .mutate(|s| s.sessions.set_connections(connections.clone()));

        let raw = match self.backend.load_state().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return HydrationOutcome::Empty,
            Err(e) => {
                warn!(
                    component = "workspace",
                    event = "workspace.load_failed",
                    error = %e,
                    "Could not load workspace state"
                );
                return HydrationOutcome::Empty;
            }
        };
        let Some(durable) = DurableWorkspaceState::parse(raw) else {
            return HydrationOutcome::Empty;
        };
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = durable.snapshot;
        let saved = durable.client_state;
        if saved.tabs.is_empty() {
            return HydrationOutcome::Empty;
        }

        // Reconnect every distinct session some tab still uses
        let used: BTreeSet<&str> = saved
            .tabs
            .iter()
            .flat_map(|t| t.kind.session_ids())
            .collect();
        let known: HashMap<&str, &Connection> =
            connections.iter().map(|c| (c.id.as_str(), c)).collect();
        let known = &known;

        let mut failed = Vec::new();
        let mut attempts = Vec::new();
        for old_id in used {
            match saved.session_refs.get(old_id) {
                Some(session_ref) => attempts.push(async move {
                    (old_id, self.reconnect(session_ref, known).await)
                }),
                None => {
                    warn!(
                        component = "workspace",
                        event = "workspace.session_ref_missing",
                        session_id = %old_id,
                        "Saved tab names a session with no reference"
                    );
                    failed.push(old_id.to_string());
                }
            }
        }

        let mut mapping = HashMap::new();
        let mut restored: Vec<Restored> = Vec::new();
        for (old_id, result) in join_all(attempts).await {
            match result {
                Ok((session, connection)) => {
                    mapping.insert(old_id.to_string(), session.id.clone());
                    restored.push((session, connection));
                }
                Err(e) => {
                    warn!(
                        component = "workspace",
                        event = "workspace.reconnect_failed",
                        session_id = %old_id,
                        error = %e,
                        "Could not restore session"
                    );
                    failed.push(old_id.to_string());
                }
            }
        }

        let tabs = remap_tabs(&saved.tabs, &mapping);
        let report = RestoreReport {
            tabs_restored: tabs.len(),
            tabs_dropped: saved.tabs.len() - tabs.len(),
            sessions_restored: restored.len(),
            sessions_failed: failed,
        };

        let committed = self.store.mutate(|s| {
            if !s.tabs.is_empty() {
                return false;
            }
            for (session, connection) in restored.iter().cloned() {
                s.sessions.add_session(session, connection);
            }
            s.tabs.replace_all(tabs, saved.active_tab_id.clone());
            s.set_view(saved.view.clone());
            true
        });

        if committed {
            return HydrationOutcome::Restored(report);
        }

        info!(
            component = "workspace",
            event = "workspace.restore_discarded",
            orphaned = restored.len(),
            "Live tabs opened during restore; discarding restored workspace"
        );
        let closing = restored.iter().map(|(session, _)| async move {
            if let Err(e) = self.backend.disconnect(&session.id).await {
                warn!(
                    component = "workspace",
                    event = "workspace.orphan_disconnect_failed",
                    session_id = %session.id,
                    error = %e,
                    "Failed to close restored session"
                );
            }
        });
        join_all(closing).await;
        HydrationOutcome::Discarded {
            orphaned: restored.len(),
        }
    }

    async fn reconnect(
        &self,
        session_ref: &SessionRef,
        known: &HashMap<&str, &Connection>,
    ) -> Result<Restored> {
        if session_ref.is_local {
            let opened = self.backend.create_local_session().await?;
            return Ok((Session::connected(opened.session_id, None), None));
        }

        let connection_id = session_ref.connection_id.as_deref().unwrap_or_default();
        let connection = known
            .get(connection_id)
            .map(|c| (*c).clone())
            .ok_or_else(|| ClientError::UnknownConnection(connection_id.to_string()))?;
        let opened = self.backend.connect(&connection.id).await?;
        Ok((
            Session::connected(opened.session_id, Some(connection.id.clone())),
            Some(connection),
        ))
    }

    fn saves_allowed(&self) -> bool {
        self.phase() == HydrationPhase::Hydrated
    }

    fn is_unsaved(&self, revision: u64) -> bool {
        self.saves_allowed() && revision > self.settled_revision.load(Ordering::SeqCst)
    }

    /// Build and submit a snapshot right away. Returns false while saving is
    /// suppressed (before or during hydration).
    pub async fn save_now(&self) -> Result<bool> {
        if !self.saves_allowed() {
            debug!(
                component = "workspace",
                event = "workspace.save_suppressed",
                phase = ?self.phase(),
                "Save suppressed until hydration completes"
            );
            return Ok(false);
        }

        let client_state = self.store.read(build_client_state);
        let tabs = client_state.tabs.len();
        let snapshot = self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let value = serde_json::to_value(DurableWorkspaceState::new(snapshot, client_state))?;
        self.backend.save_state(value).await?;

        debug!(
            component = "workspace",
            event = "workspace.saved",
            tabs,
            "Workspace state saved"
        );
        Ok(true)
    }

    async fn save_logged(&self) {
        if let Err(e) = self.save_now().await {
            warn!(
                component = "workspace",
                event = "workspace.save_failed",
                error = %e,
                "Failed to save workspace state"
            );
        }
    }

    /// Debounced save loop. Each effective store mutation restarts the
    /// quiescence timer; a pending save is flushed when `shutdown` fires.
    pub async fn run_save_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut changes = self.changes.clone();
        let mut phase_rx = self.phase.subscribe();
        let mut timer = DebounceTimer::new(self.save_debounce);

        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let revision = *changes.borrow_and_update();
                    if self.is_unsaved(revision) {
                        timer.reschedule();
                    } else {
                        timer.cancel();
                    }
                }
                changed = phase_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let phase = *phase_rx.borrow_and_update();
                    if phase != HydrationPhase::Hydrated {
                        timer.cancel();
                    } else if self.is_unsaved(self.store.revision()) {
                        timer.reschedule();
                    }
                }
                _ = timer.elapsed() => {
                    self.save_logged().await;
                }
                _ = shutdown.changed() => {
                    if timer.is_armed() {
                        self.save_logged().await;
                    }
                    break;
                }
            }
        }

        debug!(
            component = "workspace",
            event = "workspace.save_loop_stopped",
            "Save loop stopped"
        );
    }
}
