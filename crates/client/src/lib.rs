//! sshdeck client core
//!
//! Talks to the backend process over its stdio, routes the records it sends
//! back to waiting callers and subscribers, and keeps the session and tab
//! registries along with the persisted workspace.

pub mod backend;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod sessions;
pub mod status;
pub mod store;
pub mod tabs;
pub mod transport;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use backend::BackendApi;
pub use client::SshdeckClient;
pub use config::ClientConfig;
pub use correlator::Correlator;
pub use dispatcher::{Dispatcher, Subscription, SubscriptionKey};
pub use error::{ClientError, Result};
pub use sessions::{Session, SessionPatch, SessionRegistry};
pub use store::{ClientState, ViewFlags, WorkspaceStore};
pub use tabs::{unique_title, GroupMode, RemoveTab, Tab, TabKind, TabRegistry, WorkspaceGroup};
pub use transport::{BackendProcess, Transport};
pub use workspace::{HydrationOutcome, HydrationPhase, WorkspaceBackend, WorkspaceEngine};
