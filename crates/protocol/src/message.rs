//! Wire envelope shared by both directions of the backend stream

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ErrorPayload;

/// Every message kind the client and backend exchange.
///
/// Requests and their terminal responses are separate tags; the response is
/// matched back to its caller through `request_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    // Connection management
    ListConnections,
    ConnectionsList,
    Connect,
    Connected,
    Disconnect,
    Disconnected,
    CreateLocalSession,
    LocalSessionCreated,

    // Session lifecycle
    SessionStatus,

    // Terminal streaming
    TerminalInput,
    TerminalResize,
    TerminalOutput,

    // File browser
    ListDirectory,
    DirectoryListing,
    MakeDirectory,
    RenamePath,
    DeletePath,
    FileOpResult,
    BulkDelete,
    BulkDownload,
    BulkResult,

    // Transfers
    Upload,
    Download,
    TransferProgress,
    TransferComplete,
    TransferCancel,
    TransferCancelled,

    // Tunnels
    TunnelCreate,
    TunnelCreated,
    TunnelStop,
    TunnelStopped,
    TunnelList,
    TunnelsList,

    // Keys
    KeyGenerate,
    KeyGenerated,
    KeyImport,
    KeyImported,
    KeyExport,
    KeyExported,

    // Known hosts
    KnownHostVerify,
    KnownHostResult,

    // Backend workspace bookkeeping
    WorkspaceRegister,
    WorkspaceRegistered,
    WorkspaceTabOpened,
    WorkspaceTabClosed,

    // Durable workspace state
    WorkspaceStateSave,
    WorkspaceStateSaved,
    WorkspaceStateLoad,
    WorkspaceStateLoaded,
    WorkspaceStateClear,
    WorkspaceStateCleared,

    // Snippets, history, settings, logs
    SnippetsList,
    Snippets,
    SnippetSave,
    SnippetSaved,
    HistoryList,
    History,
    SettingsGet,
    Settings,
    SettingsSet,
    SettingsSaved,
    LogsGet,
    Logs,

    // Generic failure for any request
    Error,
}

impl Tag {
    /// Whether a session-scoped message with this tag may fall back to
    /// subscribers registered for the bare tag when nobody subscribed to its
    /// session.
    ///
    /// Deliberately exhaustive: a new tag does not compile until it is placed
    /// on one side or the other.
    pub fn is_global_fallback(self) -> bool {
        match self {
            Tag::SessionStatus
            | Tag::Error
            | Tag::BulkResult
            | Tag::TransferProgress
            | Tag::TransferComplete
            | Tag::TransferCancelled => true,

            Tag::ListConnections
            | Tag::ConnectionsList
            | Tag::Connect
            | Tag::Connected
            | Tag::Disconnect
            | Tag::Disconnected
            | Tag::CreateLocalSession
            | Tag::LocalSessionCreated
            | Tag::TerminalInput
            | Tag::TerminalResize
            | Tag::TerminalOutput
            | Tag::ListDirectory
            | Tag::DirectoryListing
            | Tag::MakeDirectory
            | Tag::RenamePath
            | Tag::DeletePath
            | Tag::FileOpResult
            | Tag::BulkDelete
            | Tag::BulkDownload
            | Tag::Upload
            | Tag::Download
            | Tag::TransferCancel
            | Tag::TunnelCreate
            | Tag::TunnelCreated
            | Tag::TunnelStop
            | Tag::TunnelStopped
            | Tag::TunnelList
            | Tag::TunnelsList
            | Tag::KeyGenerate
            | Tag::KeyGenerated
            | Tag::KeyImport
            | Tag::KeyImported
            | Tag::KeyExport
            | Tag::KeyExported
            | Tag::KnownHostVerify
            | Tag::KnownHostResult
            | Tag::WorkspaceRegister
            | Tag::WorkspaceRegistered
            | Tag::WorkspaceTabOpened
            | Tag::WorkspaceTabClosed
            | Tag::WorkspaceStateSave
            | Tag::WorkspaceStateSaved
            | Tag::WorkspaceStateLoad
            | Tag::WorkspaceStateLoaded
            | Tag::WorkspaceStateClear
            | Tag::WorkspaceStateCleared
            | Tag::SnippetsList
            | Tag::Snippets
            | Tag::SnippetSave
            | Tag::SnippetSaved
            | Tag::HistoryList
            | Tag::History
            | Tag::SettingsGet
            | Tag::Settings
            | Tag::SettingsSet
            | Tag::SettingsSaved
            | Tag::LogsGet
            | Tag::Logs => false,
        }
    }

    /// Wire name of the tag, as used in logs.
    pub fn wire_name(self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", self))
    }
}

/// One record on the backend stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: Tag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope with no session, request id or payload
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            session_id: None,
            request_id: None,
            payload: Value::Null,
        }
    }

    /// Scope the envelope to a session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set an explicit request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach a typed payload
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = serde_json::to_value(payload)?;
        Ok(self)
    }

    /// Decode the payload into a typed struct
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// True when this message carries the given request id
    pub fn answers(&self, request_id: &str) -> bool {
        self.request_id.as_deref() == Some(request_id)
    }

    /// Best-effort extraction of an error message and code from an
    /// error-tagged envelope.
    pub fn error_payload(&self) -> ErrorPayload {
        match self.payload_as::<ErrorPayload>() {
            Ok(err) => err,
            Err(_) => ErrorPayload {
                message: match &self.payload {
                    Value::String(s) => s.clone(),
                    Value::Null => "unknown backend error".to_string(),
                    other => other.to_string(),
                },
                code: None,
            },
        }
    }
}
