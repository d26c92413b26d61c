//! Cross-worker "pause until" deadline.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Deadline shared by all workers.
///
/// The first worker that is told to back off publishes a deadline; every
/// worker waits it out before its next call. A later, longer deadline
/// replaces a shorter one; a shorter one never moves it earlier.
#[derive(Debug, Default)]
pub struct SharedCooldown {
    deadline: Mutex<Option<Instant>>,
}

impl SharedCooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push the deadline to at least `now + wait`. Returns the effective deadline.
    pub async fn extend(&self, wait: Duration) -> Instant {
        let candidate = Instant::now() + wait;
        let mut deadline = self.deadline.lock().await;
        match *deadline {
            Some(current) if current >= candidate => current,
            _ => {
                warn!(wait_ms = wait.as_millis() as u64, "Publishing shared cooldown");
                *deadline = Some(candidate);
                candidate
            }
        }
    }

    /// Time left before calls may resume, if a cooldown is active.
    pub async fn remaining(&self) -> Option<Duration> {
        let deadline = *self.deadline.lock().await;
        deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    /// Sleep until no cooldown is active.
    ///
    /// Re-reads the deadline after waking since another worker may have
    /// extended it meanwhile.
    pub async fn wait(&self) {
        loop {
            let deadline = {
                let mut guard = self.deadline.lock().await;
                match *guard {
                    Some(at) if at > Instant::now() => at,
                    Some(_) => {
                        *guard = None;
                        return;
                    }
                    None => return,
                }
            };

            debug!(
                remaining_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Waiting for shared cooldown"
            );
            sleep_until(deadline).await;
        }
    }
}
