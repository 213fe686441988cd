//! Typed backend calls
//!
//! One method per operation. Each picks its request/response tags and a
//! timeout class from `ClientConfig`: connect-class calls get the long
//! timeout, transfers and bulk operations the transfer timeout, everything
//! else the control timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sshdeck_protocol::{
    BulkPathsPayload, BulkResult, CancelPayload, ConnectPayload, Connection,
    ConnectionsListPayload, DirectoryListing, Envelope, FileOpResult, HistoryEntry,
    HistoryPayload, KeyExportRequest, KeyExported, KeyGenerateRequest, KeyImportRequest, KeyInfo,
    KnownHostResult, KnownHostVerifyRequest, LimitPayload, LogEntry, LogsPayload, PathPayload,
    RenamePayload, SessionOpened, SettingsPayload, Snippet, SnippetsPayload, Tag, TerminalData,
    TerminalSize, TransferComplete, TransferRequest, TunnelInfo, TunnelSpec, TunnelStopPayload,
    TunnelsListPayload, WorkspaceRegisterPayload, WorkspaceStatePayload, WorkspaceTabEvent,
    ERROR_CODE_NOT_FOUND,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::dispatcher::{Subscription, SubscriptionKey};
use crate::error::{ClientError, Result};
use crate::workspace::WorkspaceBackend;

#[derive(Clone)]
pub struct BackendApi {
    correlator: Correlator,
    config: ClientConfig,
}

fn envelope<P: Serialize>(tag: Tag, payload: &P) -> Result<Envelope> {
    Ok(Envelope::new(tag).with_payload(payload)?)
}

fn decode<R: DeserializeOwned>(resp: &Envelope) -> Result<R> {
    resp.payload_as().map_err(|e| {
        ClientError::Protocol(format!("bad {} payload: {}", resp.tag.wire_name(), e))
    })
}

/// Treat "not found" as success for operations whose target may already be gone.
fn ignore_not_found(result: Result<Envelope>, target: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.has_code(ERROR_CODE_NOT_FOUND) => {
            debug!(
                component = "backend",
                event = "backend.target_already_gone",
                target = %target,
                "Target already finished"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

impl BackendApi {
    pub fn new(correlator: Correlator, config: ClientConfig) -> Self {
        Self { correlator, config }
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn call<R: DeserializeOwned>(
        &self,
        msg: Envelope,
        success: Tag,
        timeout: Duration,
    ) -> Result<R> {
        let resp = self.correlator.request(msg, success, timeout).await?;
        decode(&resp)
    }

    // -- Connections ---------------------------------------------------------

    pub async fn list_connections(&self) -> Result<Vec<Connection>> {
        let payload: ConnectionsListPayload = self
            .call(
                Envelope::new(Tag::ListConnections),
                Tag::ConnectionsList,
                self.config.request_timeout,
            )
            .await?;
        Ok(payload.connections)
    }

    pub async fn connect(&self, connection_id: &str) -> Result<SessionOpened> {
        let msg = envelope(
            Tag::Connect,
            &ConnectPayload {
                connection_id: connection_id.to_string(),
            },
        )?;
        self.call(msg, Tag::Connected, self.config.connect_timeout)
            .await
    }

    pub async fn create_local_session(&self) -> Result<SessionOpened> {
        self.call(
            Envelope::new(Tag::CreateLocalSession),
            Tag::LocalSessionCreated,
            self.config.connect_timeout,
        )
        .await
    }

    /// Close a session. Already-closed sessions are not an error.
    pub async fn disconnect(&self, session_id: &str) -> Result<()> {
        let msg = Envelope::new(Tag::Disconnect).with_session(session_id);
        let result = self
            .correlator
            .request(msg, Tag::Disconnected, self.config.request_timeout)
            .await;
        ignore_not_found(result, session_id)
    }

    // -- Terminal ------------------------------------------------------------

    pub async fn terminal_input(&self, session_id: &str, data: impl Into<String>) -> Result<()> {
        let msg = envelope(Tag::TerminalInput, &TerminalData { data: data.into() })?
            .with_session(session_id);
        self.correlator.send(msg).await.map(|_| ())
    }

    pub async fn resize_terminal(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        let msg = envelope(Tag::TerminalResize, &TerminalSize { cols, rows })?
            .with_session(session_id);
        self.correlator.send(msg).await.map(|_| ())
    }

    /// Stream of output records for one session, in arrival order
    pub fn terminal_output(
        &self,
        session_id: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<Envelope>) {
        self.correlator
            .dispatcher()
            .subscribe_channel(SubscriptionKey::session(Tag::TerminalOutput, session_id))
    }

    // -- File browser --------------------------------------------------------

    pub async fn list_directory(&self, session_id: &str, path: &str) -> Result<DirectoryListing> {
        let msg = envelope(Tag::ListDirectory, &PathPayload { path: path.into() })?
            .with_session(session_id);
        self.call(msg, Tag::DirectoryListing, self.config.request_timeout)
            .await
    }

    pub async fn make_directory(&self, session_id: &str, path: &str) -> Result<FileOpResult> {
        let msg = envelope(Tag::MakeDirectory, &PathPayload { path: path.into() })?
            .with_session(session_id);
        self.call(msg, Tag::FileOpResult, self.config.request_timeout)
            .await
    }

    pub async fn rename_path(&self, session_id: &str, from: &str, to: &str) -> Result<FileOpResult> {
        let payload = RenamePayload {
            from: from.into(),
            to: to.into(),
        };
        let msg = envelope(Tag::RenamePath, &payload)?.with_session(session_id);
        self.call(msg, Tag::FileOpResult, self.config.request_timeout)
            .await
    }

    pub async fn delete_path(&self, session_id: &str, path: &str) -> Result<FileOpResult> {
        let msg = envelope(Tag::DeletePath, &PathPayload { path: path.into() })?
            .with_session(session_id);
        self.call(msg, Tag::FileOpResult, self.config.request_timeout)
            .await
    }

    pub async fn bulk_delete(&self, session_id: &str, paths: Vec<String>) -> Result<BulkResult> {
        let payload = BulkPathsPayload {
            paths,
            destination: None,
        };
        let msg = envelope(Tag::BulkDelete, &payload)?.with_session(session_id);
        self.call(msg, Tag::BulkResult, self.config.transfer_timeout)
            .await
    }

    pub async fn bulk_download(
        &self,
        session_id: &str,
        paths: Vec<String>,
        destination: &str,
    ) -> Result<BulkResult> {
        let payload = BulkPathsPayload {
            paths,
            destination: Some(destination.into()),
        };
        let msg = envelope(Tag::BulkDownload, &payload)?.with_session(session_id);
        self.call(msg, Tag::BulkResult, self.config.transfer_timeout)
            .await
    }

    // -- Transfers -----------------------------------------------------------

    /// Upload a file. `request_id` is chosen by the caller so the transfer can
    /// be cancelled while it runs; `transfer_progress` records are forwarded
    /// to `progress`.
    pub async fn upload(
        &self,
        session_id: &str,
        transfer: &TransferRequest,
        request_id: &str,
        progress: mpsc::UnboundedSender<Envelope>,
    ) -> Result<TransferComplete> {
        self.transfer(Tag::Upload, session_id, transfer, request_id, progress)
            .await
    }

    pub async fn download(
        &self,
        session_id: &str,
        transfer: &TransferRequest,
        request_id: &str,
        progress: mpsc::UnboundedSender<Envelope>,
    ) -> Result<TransferComplete> {
        self.transfer(Tag::Download, session_id, transfer, request_id, progress)
            .await
    }

    async fn transfer(
        &self,
        tag: Tag,
        session_id: &str,
        transfer: &TransferRequest,
        request_id: &str,
        progress: mpsc::UnboundedSender<Envelope>,
    ) -> Result<TransferComplete> {
        let msg = envelope(tag, transfer)?
            .with_session(session_id)
            .with_request_id(request_id);
        let resp = self
            .correlator
            .request_with_progress(
                msg,
                Tag::TransferComplete,
                Tag::TransferProgress,
                progress,
                self.config.transfer_timeout,
            )
            .await?;
        decode(&resp)
    }

    /// Cancel a running transfer. Safe to call after it finished.
    pub async fn cancel_transfer(&self, target_request_id: &str) -> Result<()> {
        let msg = envelope(
            Tag::TransferCancel,
            &CancelPayload {
                target_request_id: target_request_id.to_string(),
            },
        )?;
        let result = self
            .correlator
            .request(msg, Tag::TransferCancelled, self.config.request_timeout)
            .await;
        ignore_not_found(result, target_request_id)
    }

    // -- Tunnels -------------------------------------------------------------

    pub async fn create_tunnel(&self, session_id: &str, spec: &TunnelSpec) -> Result<TunnelInfo> {
        let msg = envelope(Tag::TunnelCreate, spec)?.with_session(session_id);
        self.call(msg, Tag::TunnelCreated, self.config.connect_timeout)
            .await
    }

    /// Stop a tunnel. Safe to call after it already stopped.
    pub async fn stop_tunnel(&self, tunnel_id: &str) -> Result<()> {
        let msg = envelope(
            Tag::TunnelStop,
            &TunnelStopPayload {
                tunnel_id: tunnel_id.to_string(),
            },
        )?;
        let result = self
            .correlator
            .request(msg, Tag::TunnelStopped, self.config.request_timeout)
            .await;
        ignore_not_found(result, tunnel_id)
    }

    pub async fn list_tunnels(&self) -> Result<Vec<TunnelInfo>> {
        let payload: TunnelsListPayload = self
            .call(
                Envelope::new(Tag::TunnelList),
                Tag::TunnelsList,
                self.config.request_timeout,
            )
            .await?;
        Ok(payload.tunnels)
    }

    // -- Keys and known hosts ------------------------------------------------

    pub async fn generate_key(&self, request: &KeyGenerateRequest) -> Result<KeyInfo> {
        self.call(
            envelope(Tag::KeyGenerate, request)?,
            Tag::KeyGenerated,
            self.config.connect_timeout,
        )
        .await
    }

    pub async fn import_key(&self, request: &KeyImportRequest) -> Result<KeyInfo> {
        self.call(
            envelope(Tag::KeyImport, request)?,
            Tag::KeyImported,
            self.config.request_timeout,
        )
        .await
    }

    pub async fn export_key(&self, request: &KeyExportRequest) -> Result<KeyExported> {
        self.call(
            envelope(Tag::KeyExport, request)?,
            Tag::KeyExported,
            self.config.request_timeout,
        )
        .await
    }

    pub async fn verify_known_host(
        &self,
        request: &KnownHostVerifyRequest,
    ) -> Result<KnownHostResult> {
        self.call(
            envelope(Tag::KnownHostVerify, request)?,
            Tag::KnownHostResult,
            self.config.request_timeout,
        )
        .await
    }

    // -- Workspace bookkeeping -----------------------------------------------

    pub async fn register_workspace(&self, workspace_id: &str, name: &str) -> Result<()> {
        let payload = WorkspaceRegisterPayload {
            workspace_id: workspace_id.into(),
            name: name.into(),
        };
        self.correlator
            .request(
                envelope(Tag::WorkspaceRegister, &payload)?,
                Tag::WorkspaceRegistered,
                self.config.request_timeout,
            )
            .await
            .map(|_| ())
    }

    /// Fire-and-forget notice that a tab was opened
    pub async fn track_tab_opened(&self, event: &WorkspaceTabEvent) -> Result<()> {
        self.correlator
            .send(envelope(Tag::WorkspaceTabOpened, event)?)
            .await
            .map(|_| ())
    }

    /// Fire-and-forget notice that a tab was closed
    pub async fn track_tab_closed(&self, event: &WorkspaceTabEvent) -> Result<()> {
        self.correlator
            .send(envelope(Tag::WorkspaceTabClosed, event)?)
            .await
            .map(|_| ())
    }

    // -- Durable workspace state ---------------------------------------------

    pub async fn save_workspace_state(&self, state: Value) -> Result<()> {
        let payload = WorkspaceStatePayload { state: Some(state) };
        self.correlator
            .request(
                envelope(Tag::WorkspaceStateSave, &payload)?,
                Tag::WorkspaceStateSaved,
                self.config.request_timeout,
            )
            .await
            .map(|_| ())
    }

    pub async fn load_workspace_state(&self) -> Result<Option<Value>> {
        let resp = self
            .correlator
            .request(
                Envelope::new(Tag::WorkspaceStateLoad),
                Tag::WorkspaceStateLoaded,
                self.config.request_timeout,
            )
            .await?;
        if resp.payload.is_null() {
            return Ok(None);
        }
        let payload: WorkspaceStatePayload = decode(&resp)?;
        Ok(payload.state.filter(|state| !state.is_null()))
    }

    pub async fn clear_workspace_state(&self) -> Result<()> {
        self.correlator
            .request(
                Envelope::new(Tag::WorkspaceStateClear),
                Tag::WorkspaceStateCleared,
                self.config.request_timeout,
            )
            .await
            .map(|_| ())
    }

    // -- Snippets, history, settings, logs -----------------------------------

    pub async fn list_snippets(&self) -> Result<Vec<Snippet>> {
        let payload: SnippetsPayload = self
            .call(
                Envelope::new(Tag::SnippetsList),
                Tag::Snippets,
                self.config.request_timeout,
            )
            .await?;
        Ok(payload.snippets)
    }

    pub async fn save_snippet(&self, snippet: &Snippet) -> Result<Snippet> {
        self.call(
            envelope(Tag::SnippetSave, snippet)?,
            Tag::SnippetSaved,
            self.config.request_timeout,
        )
        .await
    }

    pub async fn list_history(&self, limit: Option<u32>) -> Result<Vec<HistoryEntry>> {
        let payload: HistoryPayload = self
            .call(
                envelope(Tag::HistoryList, &LimitPayload { limit })?,
                Tag::History,
                self.config.request_timeout,
            )
            .await?;
        Ok(payload.entries)
    }

    pub async fn get_settings(&self) -> Result<BTreeMap<String, Value>> {
        let payload: SettingsPayload = self
            .call(
                Envelope::new(Tag::SettingsGet),
                Tag::Settings,
                self.config.request_timeout,
            )
            .await?;
        Ok(payload.values)
    }

    pub async fn set_settings(
        &self,
        values: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>> {
        let payload: SettingsPayload = self
            .call(
                envelope(Tag::SettingsSet, &SettingsPayload { values })?,
                Tag::SettingsSaved,
                self.config.request_timeout,
            )
            .await?;
        Ok(payload.values)
    }

    pub async fn get_logs(&self, limit: Option<u32>) -> Result<Vec<LogEntry>> {
        let payload: LogsPayload = self
            .call(
                envelope(Tag::LogsGet, &LimitPayload { limit })?,
                Tag::Logs,
                self.config.request_timeout,
            )
            .await?;
        Ok(payload.entries)
    }
}

#[async_trait]
impl WorkspaceBackend for BackendApi {
    async fn list_connections(&self) -> Result<Vec<Connection>> {
        BackendApi::list_connections(self).await
    }

    async fn load_state(&self) -> Result<Option<Value>> {
        self.load_workspace_state().await
    }

    async fn save_state(&self, state: Value) -> Result<()> {
        self.save_workspace_state(state).await
    }

    async fn connect(&self, connection_id: &str) -> Result<SessionOpened> {
        BackendApi::connect(self, connection_id).await
    }

    async fn create_local_session(&self) -> Result<SessionOpened> {
        BackendApi::create_local_session(self).await
    }

    async fn disconnect(&self, session_id: &str) -> Result<()> {
        BackendApi::disconnect(self, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{duplex_correlator, reply_to, BackendPeer};
    use serde_json::json;
    use sshdeck_protocol::TransferProgress;

    fn api() -> (BackendApi, BackendPeer) {
        let (correlator, peer) = duplex_correlator();
        (BackendApi::new(correlator, ClientConfig::default()), peer)
    }

    fn not_found(req: &Envelope) -> Envelope {
        reply_to(req, Tag::Error, json!({"message": "no such target", "code": "not_found"}))
    }

    #[tokio::test]
    async fn list_connections_decodes_payload() {
        let (api, mut peer) = api();
        let call = tokio::spawn(async move { api.list_connections().await });

        let req = peer.next_request().await;
        assert_eq!(req.tag, Tag::ListConnections);
        peer.reply(&reply_to(
            &req,
            Tag::ConnectionsList,
            json!({"connections": [{"id": "c1", "name": "prod", "host": "10.0.0.5"}]}),
        ))
        .await;

        let connections = call.await.unwrap().unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].port, 22);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_uses_the_connect_timeout() {
        let (api, mut peer) = api();
        let call = tokio::spawn(async move { api.connect("c1").await });
        let req = peer.next_request().await;
        assert_eq!(req.payload["connection_id"], "c1");

        let err = call.await.unwrap().unwrap_err();
        match err {
            ClientError::Timeout { tag, timeout } => {
                assert_eq!(tag, Tag::Connect);
                assert_eq!(timeout, ClientConfig::default().connect_timeout);
            }
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn connect_takes_the_new_session_id_from_the_payload() {
        let (api, mut peer) = api();
        let call = tokio::spawn(async move { api.connect("c1").await });
        let req = peer.next_request().await;
        assert_eq!(req.session_id, None);

        let reply = reply_to(&req, Tag::Connected, json!({"session_id": "s9", "connection_id": "c1"}));
        assert_eq!(reply.session_id, None);
        peer.reply(&reply).await;

        let opened = call.await.unwrap().unwrap();
        assert_eq!(opened.session_id, "s9");
        assert_eq!(opened.connection_id.as_deref(), Some("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn scoped_connect_response_is_not_delivered() {
        let (api, mut peer) = api();
        let call = tokio::spawn(async move { api.connect("c1").await });
        let req = peer.next_request().await;

        let mut reply = reply_to(&req, Tag::Connected, json!({"session_id": "s9"}));
        reply.session_id = Some("s9".into());
        peer.reply(&reply).await;

        assert!(call.await.unwrap().unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn malformed_response_payload_is_a_protocol_error() {
        let (api, mut peer) = api();
        let call = tokio::spawn(async move { api.list_tunnels().await });
        let req = peer.next_request().await;
        peer.reply(&reply_to(&req, Tag::TunnelsList, json!({"tunnels": "nope"})))
            .await;
        assert!(matches!(call.await.unwrap(), Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn cancel_after_completion_is_not_an_error() {
        let (api, mut peer) = api();
        let call = tokio::spawn(async move { api.cancel_transfer("finished-transfer").await });
        let req = peer.next_request().await;
        assert_eq!(req.tag, Tag::TransferCancel);
        assert_eq!(req.payload["target_request_id"], "finished-transfer");
        peer.reply(&not_found(&req)).await;

        assert!(call.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn stop_tunnel_propagates_other_errors() {
        let (api, mut peer) = api();
        let call = tokio::spawn(async move { api.stop_tunnel("t1").await });
        let req = peer.next_request().await;
        peer.reply(&reply_to(&req, Tag::Error, json!({"message": "busy", "code": "busy"})))
            .await;

        let err = call.await.unwrap().unwrap_err();
        assert!(err.has_code("busy"));
    }

    #[tokio::test]
    async fn upload_reports_progress_under_its_request_id() {
        let (api, mut peer) = api();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let call = tokio::spawn(async move {
            let transfer = TransferRequest {
                local_path: "/tmp/a.tar".into(),
                remote_path: "/srv/a.tar".into(),
            };
            api.upload("s1", &transfer, "xfer-1", progress_tx).await
        });

        let req = peer.next_request().await;
        assert_eq!(req.request_id.as_deref(), Some("xfer-1"));
        assert_eq!(req.session_id.as_deref(), Some("s1"));
        let mut progress = reply_to(
            &req,
            Tag::TransferProgress,
            json!({"bytes_transferred": 512, "total_bytes": 1024}),
        );
        progress.session_id = Some("s1".into());
        peer.reply(&progress).await;
        peer.reply(&reply_to(&req, Tag::TransferComplete, json!({"bytes": 1024})))
            .await;

        let done = call.await.unwrap().unwrap();
        assert_eq!(done.bytes, 1024);
        let update: TransferProgress = progress_rx.recv().await.unwrap().payload_as().unwrap();
        assert_eq!(update.percent(), Some(50.0));
    }

    #[tokio::test]
    async fn load_state_without_stored_value_is_none() {
        let (api, mut peer) = api();
        let call = tokio::spawn(async move { api.load_workspace_state().await });
        let req = peer.next_request().await;
        peer.reply(&reply_to(&req, Tag::WorkspaceStateLoaded, json!({"state": null})))
            .await;
        assert_eq!(call.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn disconnect_of_unknown_session_succeeds() {
        let (api, mut peer) = api();
        let call = tokio::spawn(async move { api.disconnect("gone").await });
        let req = peer.next_request().await;
        assert_eq!(req.session_id.as_deref(), Some("gone"));
        peer.reply(&not_found(&req)).await;
        assert!(call.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn terminal_output_only_sees_its_session() {
        let (api, mut peer) = api();
        let (_sub, mut rx) = api.terminal_output("s1");

        for session in ["s2", "s1"] {
            let msg = Envelope::new(Tag::TerminalOutput)
                .with_session(session)
                .with_payload(&json!({"data": session}))
                .unwrap();
            peer.reply(&msg).await;
        }

        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload["data"], "s1");
        assert!(rx.try_recv().is_err());
    }
}
