//! Workspace persistence and restore

pub mod debounce;
pub mod engine;
pub mod remap;
pub mod state;

use async_trait::async_trait;
use serde_json::Value;
use sshdeck_protocol::{Connection, SessionOpened};

use crate::error::Result;

pub use debounce::DebounceTimer;
pub use engine::{HydrationOutcome, HydrationPhase, RestoreReport, WorkspaceEngine};
pub use remap::{remap_tab, remap_tabs};
pub use state::{
    build_client_state, DurableWorkspaceState, SessionRef, WorkspaceClientState,
    WORKSPACE_STATE_VERSION,
};

/// Backend calls the workspace engine depends on.
#[async_trait]
pub trait WorkspaceBackend: Send + Sync {
    async fn list_connections(&self) -> Result<Vec<Connection>>;

    /// Last stored workspace state, if any
    async fn load_state(&self) -> Result<Option<Value>>;

    async fn save_state(&self, state: Value) -> Result<()>;

    async fn connect(&self, connection_id: &str) -> Result<SessionOpened>;

    async fn create_local_session(&self) -> Result<SessionOpened>;

    async fn disconnect(&self, session_id: &str) -> Result<()>;
}
