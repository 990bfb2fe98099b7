//! Notifications published by a sweep.
//!
//! For every `start()` the consumer sees, in order:
//!
//! ```text
//! Started  Progress(1) .. Progress(n)  [Error]  Finished
//! ```
//!
//! `Paused`/`Resumed` may be interleaved with progress while the sweep runs.
//! `Finished` is always the last notification of a sweep and is published
//! exactly once, unless the sweep was hard-terminated.

use crate::error::SweepFailure;
use crate::progress::SweepProgress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// How a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepStatus {
    /// The step routine returned normally without an abort request
    Completed,
    /// The step routine returned after an abort request
    Aborted,
    /// The step routine raised an error or panicked
    Failed,
}

impl std::fmt::Display for SweepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepStatus::Completed => write!(f, "completed"),
            SweepStatus::Aborted => write!(f, "aborted"),
            SweepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Published once when the background task begins.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepStarted {
    /// Identifier of the sweep
    pub run_uid: String,
    /// Number of grid points
    pub iteration_total: u64,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// Whether live buffers were allocated
    pub live_view: bool,
}

/// Terminal summary of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome {
    /// Identifier of the sweep
    pub run_uid: String,
    /// How the sweep ended
    pub status: SweepStatus,
    /// Number of samples recorded
    pub samples: u64,
    /// Number of points in the full grid
    pub iteration_total: u64,
    /// Duration from start to the end of the cleanup hook
    pub elapsed: Duration,
}

/// A sweep notification.
#[derive(Debug, Clone)]
pub enum SweepEvent {
    /// Background task started
    Started(SweepStarted),
    /// One grid point measured
    Progress(SweepProgress),
    /// Pause requested by the caller
    Paused,
    /// Resume requested by the caller
    Resumed,
    /// The step routine failed; always followed by `Finished`
    Error(SweepFailure),
    /// Last notification of the sweep
    Finished(SweepOutcome),
}

impl SweepEvent {
    /// True for the terminal notification.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SweepEvent::Finished(_))
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SweepEvent::Started(_) => "started",
            SweepEvent::Progress(_) => "progress",
            SweepEvent::Paused => "paused",
            SweepEvent::Resumed => "resumed",
            SweepEvent::Error(_) => "error",
            SweepEvent::Finished(_) => "finished",
        }
    }
}

/// Receiver of sweep notifications.
///
/// Called synchronously on the worker task; implementations must not block.
pub trait SweepObserver: Send + Sync {
    /// Handle one notification.
    fn notify(&self, event: SweepEvent);
}

/// Unbounded channels never drop or coalesce notifications.
impl SweepObserver for mpsc::UnboundedSender<SweepEvent> {
    fn notify(&self, event: SweepEvent) {
        if self.send(event).is_err() {
            tracing::trace!("Sweep event receiver dropped");
        }
    }
}

impl<F> SweepObserver for F
where
    F: Fn(SweepEvent) + Send + Sync,
{
    fn notify(&self, event: SweepEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_status_display() {
        assert_eq!(SweepStatus::Completed.to_string(), "completed");
        assert_eq!(SweepStatus::Aborted.to_string(), "aborted");
        assert_eq!(SweepStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_channel_observer_delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.notify(SweepEvent::Paused);
        tx.notify(SweepEvent::Resumed);
        assert_eq!(rx.try_recv().unwrap().kind(), "paused");
        assert_eq!(rx.try_recv().unwrap().kind(), "resumed");
    }

    #[test]
    fn test_closure_observer() {
        let seen = Mutex::new(Vec::new());
        let observer = |event: SweepEvent| seen.lock().unwrap().push(event.kind());
        observer.notify(SweepEvent::Paused);
        assert_eq!(*seen.lock().unwrap(), vec!["paused"]);
    }

    #[test]
    fn test_dropped_receiver_is_not_an_error() {
        let (tx, rx) = mpsc::unbounded_channel::<SweepEvent>();
        drop(rx);
        tx.notify(SweepEvent::Paused);
    }
}
