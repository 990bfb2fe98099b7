//! Cooperative pause/abort flags shared with the step routine.
//!
//! The worker never suspends or cancels a routine itself. It only flips the
//! two flags here; the routine polls them between grid points, typically via
//! [`LoopControl::checkpoint`]. A sample in flight is never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default interval at which [`LoopControl::checkpoint`] re-checks the flags
/// while paused.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Flags {
    pause_requested: AtomicBool,
    abort_requested: AtomicBool,
}

/// Shared pause/abort request flags.
///
/// Clones share the same flags. `abort_requested` is monotonic within a sweep:
/// only [`reset`](Self::reset), called by the worker at sweep start, clears it.
#[derive(Debug, Clone, Default)]
pub struct LoopControl {
    flags: Arc<Flags>,
}

/// What a routine should do after a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    /// Carry on with the next grid point
    Continue,
    /// Stop sweeping and return normally
    Abort,
}

impl LoopControl {
    /// Create a cleared pair of flags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear both flags. Called at the start of every sweep.
    pub fn reset(&self) {
        self.flags.abort_requested.store(false, Ordering::SeqCst);
        self.flags.pause_requested.store(false, Ordering::SeqCst);
    }

    /// Ask the routine to park before its next grid point.
    pub fn request_pause(&self) {
        self.flags.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Let a parked routine continue.
    pub fn request_resume(&self) {
        self.flags.pause_requested.store(false, Ordering::SeqCst);
    }

    /// Ask the routine to stop at its next poll.
    ///
    /// Also clears the pause request so a paused sweep does not stay parked.
    /// Idempotent.
    pub fn request_abort(&self) {
        self.flags.abort_requested.store(true, Ordering::SeqCst);
        self.flags.pause_requested.store(false, Ordering::SeqCst);
    }

    /// Current pause request.
    pub fn is_pause_requested(&self) -> bool {
        self.flags.pause_requested.load(Ordering::SeqCst)
    }

    /// Current abort request.
    pub fn is_abort_requested(&self) -> bool {
        self.flags.abort_requested.load(Ordering::SeqCst)
    }

    /// Poll point between two grid points.
    ///
    /// Returns immediately unless a pause is requested, in which case it
    /// sleeps in steps of `poll` until resumed or aborted.
    pub async fn checkpoint(&self, poll: Duration) -> LoopDecision {
        let mut parked = false;
        loop {
            if self.is_abort_requested() {
                if parked {
                    tracing::info!("Abort received while paused");
                }
                return LoopDecision::Abort;
            }
            if !self.is_pause_requested() {
                if parked {
                    tracing::debug!("Resuming after pause");
                }
                return LoopDecision::Continue;
            }
            if !parked {
                tracing::debug!("Parked at checkpoint");
                parked = true;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_clears_pause_and_is_idempotent() {
        let control = LoopControl::new();
        control.request_pause();
        assert!(control.is_pause_requested());

        control.request_abort();
        assert!(control.is_abort_requested());
        assert!(!control.is_pause_requested());

        control.request_abort();
        assert!(control.is_abort_requested());
        assert!(!control.is_pause_requested());
    }

    #[test]
    fn test_reset_clears_both_flags() {
        let control = LoopControl::new();
        let shared = control.clone();
        shared.request_pause();
        shared.request_abort();
        control.reset();
        assert!(!shared.is_abort_requested());
        assert!(!shared.is_pause_requested());
    }

    #[tokio::test]
    async fn test_checkpoint_continues_when_idle() {
        let control = LoopControl::new();
        assert_eq!(
            control.checkpoint(Duration::from_millis(1)).await,
            LoopDecision::Continue
        );
    }

    #[tokio::test]
    async fn test_checkpoint_parks_until_resume() {
        let control = LoopControl::new();
        control.request_pause();

        let resumer = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            resumer.request_resume();
        });

        let decision = tokio::time::timeout(
            Duration::from_secs(2),
            control.checkpoint(Duration::from_millis(2)),
        )
        .await
        .unwrap();
        assert_eq!(decision, LoopDecision::Continue);
    }

    #[tokio::test]
    async fn test_abort_while_parked_ends_the_wait() {
        let control = LoopControl::new();
        control.request_pause();

        let aborter = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            aborter.request_abort();
        });

        let decision = tokio::time::timeout(
            Duration::from_secs(2),
            control.checkpoint(Duration::from_millis(2)),
        )
        .await
        .unwrap();
        assert_eq!(decision, LoopDecision::Abort);
    }
}
