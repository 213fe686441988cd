//! sshdeck Protocol
//!
//! Shared types for communication between the sshdeck desktop client and its
//! backend process. Every record is one JSON object per line on the backend's
//! stdin/stdout.

use uuid::Uuid;

// Re-exports
pub mod framing;
pub mod message;
pub mod types;

pub use framing::{encode_record, LineFramer, ProtocolError};
pub use message::{Envelope, Tag};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
