//! Errors surfaced by the client core

use std::time::Duration;

use sshdeck_protocol::Tag;
use thiserror::Error;

/// Errors that can occur while talking to the backend
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to spawn backend: {0}")]
    Spawn(String),

    /// Backend exited or its pipes closed. Fatal to every pending request.
    #[error("Backend transport closed: {0}")]
    Transport(String),

    /// An unparseable record or payload
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request {tag:?} timed out after {timeout:?}")]
    Timeout { tag: Tag, timeout: Duration },

    /// Explicit `error` message from the backend
    #[error("Backend error: {message}")]
    Backend {
        message: String,
        code: Option<String>,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Unknown tab: {0}")]
    UnknownTab(String),

    #[error("Tab {0} is not a workspace group")]
    NotAGroup(String),
}

impl ClientError {
    /// Backend error carrying the given code
    pub fn has_code(&self, wanted: &str) -> bool {
        matches!(self, ClientError::Backend { code: Some(code), .. } if code == wanted)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
