//! Client facade tying the backend API to the session and tab registries

use std::sync::Arc;

use sshdeck_protocol::{Connection, SessionOpened, WorkspaceTabEvent};
use tracing::{debug, info, warn};

use crate::backend::BackendApi;
use crate::dispatcher::Subscription;
use crate::error::{ClientError, Result};
use crate::sessions::Session;
use crate::status::track_session_status;
use crate::store::WorkspaceStore;
use crate::tabs::{RemoveTab, TabKind, WorkspaceGroup};

const LOCAL_TITLE: &str = "Local";

pub struct SshdeckClient {
    api: BackendApi,
    store: Arc<WorkspaceStore>,
    workspace_id: String,
    status_subscription: Subscription,
}

impl SshdeckClient {
    pub fn new(api: BackendApi, store: Arc<WorkspaceStore>, workspace_id: impl Into<String>) -> Self {
        let status_subscription = track_session_status(api.correlator().dispatcher(), store.clone());
        Self {
            api,
            store,
            workspace_id: workspace_id.into(),
            status_subscription,
        }
    }

    pub fn api(&self) -> &BackendApi {
        &self.api
    }

    pub fn store(&self) -> &Arc<WorkspaceStore> {
        &self.store
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Announce this workspace to the backend
    pub async fn register(&self, name: &str) -> Result<()> {
        self.api.register_workspace(&self.workspace_id, name).await?;
        info!(
            component = "client",
            event = "client.workspace_registered",
            workspace_id = %self.workspace_id,
            "Workspace registered"
        );
        Ok(())
    }

    /// Reload the connection list from the backend
    pub async fn refresh_connections(&self) -> Result<Vec<Connection>> {
        let connections = self.api.list_connections().await?;
        self.store
            .mutate(|s| s.sessions.set_connections(connections.clone()));
        Ok(connections)
    }

    async fn resolve_connection(&self, connection_id: &str) -> Result<Connection> {
        if let Some(connection) = self
            .store
            .read(|s| s.sessions.connection(connection_id).cloned())
        {
            return Ok(connection);
        }
        self.refresh_connections()
            .await?
            .into_iter()
            .find(|c| c.id == connection_id)
            .ok_or_else(|| ClientError::UnknownConnection(connection_id.to_string()))
    }

    /// Connect to a saved connection and open a terminal tab on the new session
    pub async fn open_terminal(&self, connection_id: &str) -> Result<String> {
        let connection = self.resolve_connection(connection_id).await?;
        let opened = self.api.connect(&connection.id).await?;
        let title = connection.name.clone();
        self.install_terminal(opened, Some(connection), &title).await
    }

    /// Start a local shell in a new terminal tab
    pub async fn open_local_terminal(&self) -> Result<String> {
        let opened = self.api.create_local_session().await?;
        self.install_terminal(opened, None, LOCAL_TITLE).await
    }

    async fn install_terminal(
        &self,
        opened: SessionOpened,
        connection: Option<Connection>,
        title: &str,
    ) -> Result<String> {
        let session_id = opened.session_id;
        let connection_id = connection.as_ref().map(|c| c.id.clone());
        let tab_id = self.store.mutate(|s| {
            s.sessions
                .add_session(Session::connected(&session_id, connection_id), connection);
            s.tabs.add_tab(
                title,
                TabKind::Terminal {
                    session_id: session_id.clone(),
                },
            )
        });
        self.announce_opened(&tab_id, vec![session_id]).await;
        Ok(tab_id)
    }

    /// Open a file browser on an existing session
    pub async fn open_file_browser(&self, session_id: &str) -> Result<String> {
        let tab_id = self.store.mutate(|s| {
            if !s.sessions.contains(session_id) {
                return Err(ClientError::UnknownSession(session_id.to_string()));
            }
            let name = s
                .sessions
                .connection_for(session_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| LOCAL_TITLE.to_string());
            Ok(s.tabs.add_tab(
                &format!("{} files", name),
                TabKind::FileBrowser {
                    session_id: session_id.to_string(),
                },
            ))
        })?;
        self.announce_opened(&tab_id, vec![session_id.to_string()])
            .await;
        Ok(tab_id)
    }

    /// Open an empty workspace group in picker mode
    pub async fn open_workspace_group(&self, title: &str) -> String {
        let tab_id = self.store.mutate(|s| {
            s.tabs
                .add_tab(title, TabKind::WorkspaceGroup(WorkspaceGroup::new()))
        });
        self.announce_opened(&tab_id, Vec::new()).await;
        tab_id
    }

    /// Add a session as a pane. Returns false if it was already there.
    pub fn add_pane(&self, tab_id: &str, session_id: &str) -> Result<bool> {
        self.store.mutate(|s| {
            if !s.sessions.contains(session_id) {
                return Err(ClientError::UnknownSession(session_id.to_string()));
            }
            match s.tabs.with_group(tab_id, |g| g.add_pane(session_id)) {
                Some(added) => Ok(added),
                None if s.tabs.get(tab_id).is_some() => Err(ClientError::NotAGroup(tab_id.into())),
                None => Err(ClientError::UnknownTab(tab_id.into())),
            }
        })
    }

    pub fn remove_pane(&self, tab_id: &str, session_id: &str) -> Result<bool> {
        self.store.mutate(|s| match s.tabs.with_group(tab_id, |g| g.remove_pane(session_id)) {
            Some(removed) => Ok(removed),
            None if s.tabs.get(tab_id).is_some() => Err(ClientError::NotAGroup(tab_id.into())),
            None => Err(ClientError::UnknownTab(tab_id.into())),
        })
    }

    pub fn pin_tab(&self, tab_id: &str) -> bool {
        self.store.mutate(|s| s.tabs.pin_tab(tab_id))
    }

    pub fn unpin_tab(&self, tab_id: &str) -> bool {
        self.store.mutate(|s| s.tabs.unpin_tab(tab_id))
    }

    pub fn set_active_tab(&self, tab_id: &str) -> bool {
        self.store.mutate(|s| s.tabs.set_active_tab(tab_id))
    }

    /// Close a tab. Pinned tabs stay open. Sessions that no other tab uses
    /// any more are dropped from the registry and disconnected.
    pub async fn close_tab(&self, tab_id: &str) -> Result<RemoveTab> {
        let (outcome, orphaned) = self.store.mutate(|s| {
            let outcome = s.tabs.remove_tab(tab_id);
            let mut orphaned = Vec::new();
            if let RemoveTab::Removed(tab) = &outcome {
                for id in tab.kind.session_ids() {
                    if s.tabs.tabs_referencing(id) == 0 && s.sessions.remove_session(id).is_some() {
                        orphaned.push(id.to_string());
                    }
                }
            }
            (outcome, orphaned)
        });

        let tab = match outcome {
            RemoveTab::Removed(tab) => tab,
            RemoveTab::Pinned => {
                debug!(
                    component = "client",
                    event = "client.close_pinned",
                    tab_id = %tab_id,
                    "Pinned tab stays open"
                );
                return Ok(RemoveTab::Pinned);
            }
            RemoveTab::NotFound => return Err(ClientError::UnknownTab(tab_id.to_string())),
        };

        for session_id in &orphaned {
            if let Err(e) = self.api.disconnect(session_id).await {
                warn!(
                    component = "client",
                    event = "client.disconnect_failed",
                    session_id = %session_id,
                    error = %e,
                    "Failed to disconnect session of closed tab"
                );
            }
        }

        let event = self.tab_event(
            &tab.id,
            tab.kind.session_ids().into_iter().map(str::to_string).collect(),
        );
        if let Err(e) = self.api.track_tab_closed(&event).await {
            warn!(
                component = "client",
                event = "client.track_failed",
                tab_id = %tab_id,
                error = %e,
                "Failed to report closed tab"
            );
        }
        Ok(RemoveTab::Removed(tab))
    }

    fn tab_event(&self, tab_id: &str, session_ids: Vec<String>) -> WorkspaceTabEvent {
        WorkspaceTabEvent {
            workspace_id: self.workspace_id.clone(),
            tab_id: tab_id.to_string(),
            session_ids,
        }
    }

    async fn announce_opened(&self, tab_id: &str, session_ids: Vec<String>) {
        let event = self.tab_event(tab_id, session_ids);
        if let Err(e) = self.api.track_tab_opened(&event).await {
            warn!(
                component = "client",
                event = "client.track_failed",
                tab_id = %tab_id,
                error = %e,
                "Failed to report opened tab"
            );
        }
    }
}

impl Drop for SshdeckClient {
    fn drop(&mut self) {
        self.api
            .correlator()
            .dispatcher()
            .unsubscribe(&self.status_subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::testing::{duplex_correlator, reply_to};
    use serde_json::json;
    use sshdeck_protocol::{Envelope, Tag};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Client against a scripted backend that knows connection `c1`.
    fn client() -> (SshdeckClient, Arc<Mutex<Vec<Envelope>>>) {
        let (correlator, peer) = duplex_correlator();
        let next = AtomicU64::new(1);
        let received = peer.serve(move |req| {
            let payload = match req.tag {
                Tag::ListConnections => json!({
                    "connections": [{"id": "c1", "name": "prod", "host": "10.0.0.5"}]
                }),
                Tag::Connect | Tag::CreateLocalSession => {
                    json!({"session_id": format!("sess-{}", next.fetch_add(1, Ordering::SeqCst))})
                }
                _ => serde_json::Value::Null,
            };
            let tag = match req.tag {
                Tag::ListConnections => Tag::ConnectionsList,
                Tag::Connect => Tag::Connected,
                Tag::CreateLocalSession => Tag::LocalSessionCreated,
                Tag::Disconnect => Tag::Disconnected,
                Tag::WorkspaceRegister => Tag::WorkspaceRegistered,
                _ => return None,
            };
            Some(reply_to(req, tag, payload))
        });
        let api = BackendApi::new(correlator, ClientConfig::default());
        let client = SshdeckClient::new(api, Arc::new(WorkspaceStore::new()), "ws-1");
        (client, received)
    }

    fn count(received: &Mutex<Vec<Envelope>>, tag: Tag) -> usize {
        received.lock().unwrap().iter().filter(|m| m.tag == tag).count()
    }

    #[tokio::test]
    async fn open_terminal_registers_session_and_tab() {
        let (client, _received) = client();

        let first = client.open_terminal("c1").await.unwrap();
        let second = client.open_terminal("c1").await.unwrap();

        client.store().read(|s| {
            assert_eq!(s.sessions.len(), 2);
            assert_eq!(s.tabs.get(&first).unwrap().title, "prod");
            assert_eq!(s.tabs.get(&second).unwrap().title, "prod (1)");
            assert_eq!(s.tabs.active_tab_id(), Some(second.as_str()));
            let TabKind::Terminal { session_id } = &s.tabs.get(&first).unwrap().kind else {
                panic!("terminal expected");
            };
            assert_eq!(
                s.sessions.get(session_id).unwrap().connection_id.as_deref(),
                Some("c1")
            );
        });
    }

    #[tokio::test]
    async fn unknown_connection_is_rejected() {
        let (client, received) = client();
        let err = client.open_terminal("nope").await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownConnection(_)));
        assert_eq!(count(&received, Tag::Connect), 0);
    }

    #[tokio::test]
    async fn closing_last_tab_on_a_session_disconnects_it() {
        let (client, received) = client();
        let terminal = client.open_local_terminal().await.unwrap();
        let session_id = client.store().read(|s| match &s.tabs.get(&terminal).unwrap().kind {
            TabKind::Terminal { session_id } => session_id.clone(),
            other => panic!("unexpected tab {other:?}"),
        });
        let browser = client.open_file_browser(&session_id).await.unwrap();
        assert_eq!(
            client.store().read(|s| s.tabs.get(&browser).unwrap().title.clone()),
            "Local files"
        );

        client.close_tab(&terminal).await.unwrap();
        assert!(client.store().read(|s| s.sessions.contains(&session_id)));
        assert_eq!(count(&received, Tag::Disconnect), 0);

        client.close_tab(&browser).await.unwrap();
        assert!(!client.store().read(|s| s.sessions.contains(&session_id)));
        assert_eq!(count(&received, Tag::Disconnect), 1);
    }

    #[tokio::test]
    async fn closing_a_group_disconnects_sessions_only_it_used() {
        let (client, received) = client();
        let shared_tab = client.open_local_terminal().await.unwrap();
        let lonely_tab = client.open_local_terminal().await.unwrap();
        let session_of = |tab: &str| {
            client.store().read(|s| match &s.tabs.get(tab).unwrap().kind {
                TabKind::Terminal { session_id } => session_id.clone(),
                other => panic!("unexpected tab {other:?}"),
            })
        };
        let shared = session_of(&shared_tab);
        let lonely = session_of(&lonely_tab);

        let group = client.open_workspace_group("ops").await;
        client.add_pane(&group, &shared).unwrap();
        client.add_pane(&group, &lonely).unwrap();
        client.close_tab(&lonely_tab).await.unwrap();
        assert_eq!(count(&received, Tag::Disconnect), 0);

        client.close_tab(&group).await.unwrap();
        client.store().read(|s| {
            assert!(s.sessions.contains(&shared));
            assert!(!s.sessions.contains(&lonely));
        });
        assert_eq!(count(&received, Tag::Disconnect), 1);
    }

    #[tokio::test]
    async fn pinned_tab_is_not_closed() {
        let (client, received) = client();
        let tab = client.open_local_terminal().await.unwrap();
        assert!(client.pin_tab(&tab));

        assert_eq!(client.close_tab(&tab).await.unwrap(), RemoveTab::Pinned);
        assert_eq!(client.store().read(|s| s.sessions.len()), 1);
        assert_eq!(count(&received, Tag::Disconnect), 0);

        client.unpin_tab(&tab);
        assert!(matches!(client.close_tab(&tab).await.unwrap(), RemoveTab::Removed(_)));
        assert!(matches!(client.close_tab(&tab).await, Err(ClientError::UnknownTab(_))));
    }

    #[tokio::test]
    async fn group_panes_are_validated() {
        let (client, _received) = client();
        let terminal = client.open_local_terminal().await.unwrap();
        let session_id = client.store().read(|s| s.sessions.iter().next().unwrap().id.clone());
        let group = client.open_workspace_group("ops").await;

        assert!(client.add_pane(&group, &session_id).unwrap());
        assert!(!client.add_pane(&group, &session_id).unwrap());
        assert!(matches!(
            client.add_pane(&group, "ghost"),
            Err(ClientError::UnknownSession(_))
        ));
        assert!(matches!(
            client.add_pane(&terminal, &session_id),
            Err(ClientError::NotAGroup(_))
        ));
        assert!(matches!(
            client.add_pane("missing", &session_id),
            Err(ClientError::UnknownTab(_))
        ));
        assert!(client.remove_pane(&group, &session_id).unwrap());
    }

    #[tokio::test]
    async fn tab_tracking_is_reported_to_backend() {
        let (client, received) = client();
        client.register("main").await.unwrap();
        let tab = client.open_local_terminal().await.unwrap();

        // Fire-and-forget: wait until the backend has seen it
        while count(&received, Tag::WorkspaceTabOpened) == 0 {
            tokio::task::yield_now().await;
        }
        let opened = received
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.tag == Tag::WorkspaceTabOpened)
            .cloned()
            .unwrap();
        assert_eq!(opened.payload["workspace_id"], "ws-1");
        assert_eq!(opened.payload["tab_id"], tab);
    }
}
