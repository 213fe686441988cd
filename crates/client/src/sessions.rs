//! Live session registry

use std::collections::HashMap;

use sshdeck_protocol::{Connection, SessionStatus};

/// A live backend session. The id is only valid for this process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Owning connection; `None` for local shells
    pub connection_id: Option<String>,
    pub status: SessionStatus,
    pub error: Option<String>,
}

impl Session {
    pub fn connected(id: impl Into<String>, connection_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            connection_id,
            status: SessionStatus::Connected,
            error: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.connection_id.is_none()
    }
}

/// Partial update for a session. `error: Some(None)` clears the error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub error: Option<Option<String>>,
}

impl SessionPatch {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    connections: HashMap<String, Connection>,
    revision: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter bumped by every observable change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Add a session along with the connection that owns it (if remote)
    pub fn add_session(&mut self, session: Session, connection: Option<Connection>) {
        if let Some(conn) = connection {
            self.connections.insert(conn.id.clone(), conn);
        }
        if self.sessions.get(&session.id) != Some(&session) {
            self.sessions.insert(session.id.clone(), session);
            self.revision += 1;
        }
    }

    pub fn remove_session(&mut self, id: &str) -> Option<Session> {
        let removed = self.sessions.remove(id);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    /// Merge `patch` into a session. Returns true only if something changed,
    /// so replaying the same transition is a no-op.
    pub fn update_session(&mut self, id: &str, patch: SessionPatch) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };

        let mut changed = false;
        if let Some(status) = patch.status {
            if session.status != status {
                session.status = status;
                changed = true;
            }
        }
        if let Some(error) = patch.error {
            if session.error != error {
                session.error = error;
                changed = true;
            }
        }
        if changed {
            self.revision += 1;
        }
        changed
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Replace the known connection list (loaded from the backend)
    pub fn set_connections(&mut self, connections: Vec<Connection>) {
        self.connections = connections.into_iter().map(|c| (c.id.clone(), c)).collect();
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Connection owning a session, if the session is remote
    pub fn connection_for(&self, session_id: &str) -> Option<&Connection> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.connection_id.as_deref())
            .and_then(|cid| self.connections.get(cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> Connection {
        Connection {
            id: id.to_string(),
            name: format!("server {}", id),
            host: "10.0.0.1".to_string(),
            port: 22,
            username: Some("deploy".to_string()),
            group: None,
        }
    }

    #[test]
    fn add_and_remove_session() {
        let mut registry = SessionRegistry::new();
        registry.add_session(Session::connected("s1", Some("c1".into())), Some(conn("c1")));
        registry.add_session(Session::connected("local", None), None);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.connection_for("s1").map(|c| c.id.as_str()), Some("c1"));
        assert!(registry.get("local").unwrap().is_local());

        assert!(registry.remove_session("s1").is_some());
        assert!(registry.remove_session("s1").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn repeated_status_transition_is_a_noop() {
        let mut registry = SessionRegistry::new();
        registry.add_session(Session::connected("s1", None), None);
        let rev = registry.revision();

        assert!(registry.update_session("s1", SessionPatch::status(SessionStatus::Disconnected)));
        let after_first = registry.revision();
        assert!(after_first > rev);

        assert!(!registry.update_session("s1", SessionPatch::status(SessionStatus::Disconnected)));
        assert_eq!(registry.revision(), after_first);
    }

    #[test]
    fn patch_merges_fields() {
        let mut registry = SessionRegistry::new();
        registry.add_session(Session::connected("s1", None), None);

        registry.update_session(
            "s1",
            SessionPatch {
                status: Some(SessionStatus::Error),
                error: Some(Some("auth failed".into())),
            },
        );
        // Status-only patch keeps the error
        registry.update_session("s1", SessionPatch::status(SessionStatus::Error));
        assert_eq!(registry.get("s1").unwrap().error.as_deref(), Some("auth failed"));

        registry.update_session(
            "s1",
            SessionPatch {
                status: Some(SessionStatus::Connected),
                error: Some(None),
            },
        );
        let s = registry.get("s1").unwrap();
        assert_eq!(s.status, SessionStatus::Connected);
        assert!(s.error.is_none());
    }

    #[test]
    fn update_of_unknown_session_is_ignored() {
        let mut registry = SessionRegistry::new();
        assert!(!registry.update_session("ghost", SessionPatch::status(SessionStatus::Connected)));
        assert_eq!(registry.revision(), 0);
    }
}
