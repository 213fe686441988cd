//! Cancellable quiescence timer

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Fires once `delay` has passed since the last `start`/`reschedule`.
///
/// The timer is plain state; `elapsed` is meant to be one arm of a
/// `tokio::select!` loop, and stays pending forever while disarmed.
#[derive(Debug)]
pub struct DebounceTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arm the timer unless it is already running
    pub fn start(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.delay);
        }
    }

    /// Push the deadline out to `delay` from now, arming if needed
    pub fn reschedule(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve when the deadline passes, disarming the timer.
    pub async fn elapsed(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}
