//! Timeouts and timers for the client core

use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connect-class calls: connect, local session, tunnel create, key generation
    pub connect_timeout: Duration,
    /// Generic control calls
    pub request_timeout: Duration,
    /// Upload/download and bulk operations
    pub transfer_timeout: Duration,
    /// Quiescence window before a workspace snapshot is written
    pub save_debounce: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
        }
    }
}
