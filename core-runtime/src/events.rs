//! # Event Bus System
//!
//! Typed progress events for a sync run, broadcast over
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **SyncEvent**: what happened (phase boundaries, progress ticks,
//!   rate-limit deferrals, run outcome)
//! - **EventBus**: the broadcast channel the orchestrator emits on
//!
//! Emitting never blocks and never fails the run; with no subscribers the
//! event is simply dropped.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(SyncEvent::PhaseStarted {
//!     run_id: "nightly".to_string(),
//!     phase: "extract".to_string(),
//! })
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.run_id(), "nightly");
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus.
const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Sync Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    RunStarted {
        run_id: String,
        /// Whether a checkpoint was found for this run id.
        resumed: bool,
        /// Phase the run starts from.
        phase: String,
    },
    PhaseStarted {
        run_id: String,
        phase: String,
    },
    /// Phase already recorded as done by the checkpoint.
    PhaseSkipped {
        run_id: String,
        phase: String,
    },
    PhaseCompleted {
        run_id: String,
        phase: String,
        succeeded: u64,
        failed: u64,
        deferred: u64,
        duration_ms: u64,
    },
    Progress {
        run_id: String,
        phase: String,
        processed: u64,
        total: u64,
    },
    /// A write was deferred because the API asked for a long wait.
    RateLimited {
        run_id: String,
        phase: String,
        target_id: String,
        retry_after_secs: f64,
    },
    RunCompleted {
        run_id: String,
        duration_ms: u64,
    },
    RunFailed {
        run_id: String,
        phase: String,
        message: String,
    },
    /// Stopped on request; the checkpoint was flushed.
    RunInterrupted {
        run_id: String,
        phase: String,
    },
}

impl SyncEvent {
    pub fn run_id(&self) -> &str {
        match self {
            SyncEvent::RunStarted { run_id, .. }
            | SyncEvent::PhaseStarted { run_id, .. }
            | SyncEvent::PhaseSkipped { run_id, .. }
            | SyncEvent::PhaseCompleted { run_id, .. }
            | SyncEvent::Progress { run_id, .. }
            | SyncEvent::RateLimited { run_id, .. }
            | SyncEvent::RunCompleted { run_id, .. }
            | SyncEvent::RunFailed { run_id, .. }
            | SyncEvent::RunInterrupted { run_id, .. } => run_id,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            SyncEvent::RunStarted { .. } => "Run started",
            SyncEvent::PhaseStarted { .. } => "Phase started",
            SyncEvent::PhaseSkipped { .. } => "Phase skipped (already checkpointed)",
            SyncEvent::PhaseCompleted { .. } => "Phase completed",
            SyncEvent::Progress { .. } => "Phase progress",
            SyncEvent::RateLimited { .. } => "Write deferred by rate limit",
            SyncEvent::RunCompleted { .. } => "Run completed",
            SyncEvent::RunFailed { .. } => "Run failed",
            SyncEvent::RunInterrupted { .. } => "Run interrupted",
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            SyncEvent::RunFailed { .. } => EventSeverity::Error,
            SyncEvent::RateLimited { .. } | SyncEvent::RunInterrupted { .. } => {
                EventSeverity::Warning
            }
            SyncEvent::Progress { .. } => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel for [`SyncEvent`]s. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    ///
    /// A subscriber falling further behind receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Errors only when nobody is subscribed.
    pub fn emit(&self, event: SyncEvent) -> Result<usize, SendError<SyncEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
