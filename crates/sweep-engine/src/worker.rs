//! SweepWorker - runs one sweep at a time on a background task.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ configure() ┌────────────┐  start()  ┌─────────┐
//! │ Idle │────────────▶│ Configured │──────────▶│ Running │◀──┐
//! └──────┘             └────────────┘           └────┬────┘   │ resume()
//!                            ▲                       │ pause()│
//!                            │ configure()           ▼        │
//!                      ┌─────┴────────────┐     ┌────────┐    │
//!                      │ Finished/Failed  │◀────│ Paused │────┘
//!                      └──────────────────┘     └────────┘
//! ```
//!
//! `start()` from a terminal state reruns the last configured plan.
//!
//! # Notification order
//!
//! For every sweep the observer sees `Started`, then zero or more `Progress`
//! (interleaved with `Paused`/`Resumed`), then `Error` if the routine
//! failed, then exactly one `Finished`. The cleanup hook runs after `Error`
//! and before `Finished`. `Finished` is published under the same lock that
//! moves the worker to its terminal state, so a caller that observes
//! `Finished` can immediately `start()` again.
//!
//! Observers are called with the worker's state lock held and must not call
//! back into the worker.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (worker, mut events) = SweepWorker::with_channel();
//! worker.configure(SweepRequest::new(plan, routine))?;
//! worker.start()?;
//! while let Some(event) = events.recv().await {
//!     if let SweepEvent::Finished(outcome) = event {
//!         println!("{} after {} samples", outcome.status, outcome.samples);
//!         break;
//!     }
//! }
//! ```

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use sweep_core::{
    allocate_live_buffers, LiveView, LoopControl, SweepError, SweepEvent, SweepFailure,
    SweepObserver, SweepOutcome, SweepPlan, SweepResult, SweepStarted, SweepStatus,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::routine::{CleanupHook, Publisher, SampleSink, StepRoutine};

/// Worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Nothing configured yet
    Idle,
    /// A plan is configured and ready to start
    Configured,
    /// A sweep is running
    Running,
    /// A pause was requested; the routine parks at its next checkpoint
    Paused,
    /// The last sweep completed or was aborted
    Finished,
    /// The last sweep failed or was terminated
    Failed,
}

impl WorkerState {
    /// A sweep task is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerState::Running | WorkerState::Paused)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Configured => write!(f, "configured"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Paused => write!(f, "paused"),
            WorkerState::Finished => write!(f, "finished"),
            WorkerState::Failed => write!(f, "failed"),
        }
    }
}

/// Plan, step routine and optional cleanup hook for one sweep.
#[derive(Clone)]
pub struct SweepRequest {
    /// What to sweep
    pub plan: SweepPlan,
    /// How to sweep it
    pub routine: Arc<dyn StepRoutine>,
    /// Run once after every sweep, whatever the outcome
    pub on_sweep_end: Option<CleanupHook>,
}

impl SweepRequest {
    /// Create a request without a cleanup hook.
    pub fn new(plan: SweepPlan, routine: Arc<dyn StepRoutine>) -> Self {
        Self {
            plan,
            routine,
            on_sweep_end: None,
        }
    }

    /// Attach a cleanup hook.
    pub fn with_cleanup(mut self, hook: CleanupHook) -> Self {
        self.on_sweep_end = Some(hook);
        self
    }

    /// Attach a cleanup hook if one is given.
    pub fn with_optional_cleanup(mut self, hook: Option<CleanupHook>) -> Self {
        self.on_sweep_end = hook;
        self
    }
}

impl std::fmt::Debug for SweepRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepRequest")
            .field("plan", &self.plan)
            .field("routine", &self.routine.name())
            .field("on_sweep_end", &self.on_sweep_end.is_some())
            .finish()
    }
}

struct Slot {
    state: WorkerState,
    request: Option<SweepRequest>,
    task: Option<JoinHandle<()>>,
    live: Vec<LiveView>,
    run_uid: Option<String>,
    /// Bumped by `start()` and `terminate()`; a task whose generation no
    /// longer matches must not touch the slot or publish.
    generation: u64,
}

struct Shared {
    slot: Mutex<Slot>,
    publisher: Arc<Publisher>,
    state_tx: watch::Sender<WorkerState>,
}

impl Shared {
    fn set_state(&self, slot: &mut Slot, state: WorkerState) {
        slot.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Runs sweeps in the background, one at a time.
pub struct SweepWorker {
    shared: Arc<Shared>,
    control: LoopControl,
}

impl SweepWorker {
    /// Create a worker publishing to `observer`.
    pub fn new(observer: Arc<dyn SweepObserver>) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    state: WorkerState::Idle,
                    request: None,
                    task: None,
                    live: Vec::new(),
                    run_uid: None,
                    generation: 0,
                }),
                publisher: Arc::new(Publisher::new(observer)),
                state_tx,
            }),
            control: LoopControl::new(),
        }
    }

    /// Create a worker together with an unbounded event receiver.
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<SweepEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(Arc::new(tx)), rx)
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        self.shared.slot.lock().state
    }

    /// Identifier of the current or last sweep.
    pub fn run_uid(&self) -> Option<String> {
        self.shared.slot.lock().run_uid.clone()
    }

    /// The pause/abort flags shared with the running routine.
    pub fn loop_control(&self) -> LoopControl {
        self.control.clone()
    }

    /// Store the plan for the next `start()`.
    ///
    /// Rejected while a sweep is running; the running sweep is unaffected.
    pub fn configure(&self, request: SweepRequest) -> SweepResult<()> {
        let mut slot = self.shared.slot.lock();
        if slot.state.is_active() {
            warn!("Cannot configure: sweep in progress");
            return Err(SweepError::AlreadyRunning {
                operation: "configure",
            });
        }

        request.plan.validate()?;
        debug!(
            routine = request.routine.name(),
            axes = request.plan.axes.len(),
            points = request.plan.total_points(),
            "Sweep configured"
        );
        slot.request = Some(request);
        self.shared.set_state(&mut slot, WorkerState::Configured);
        Ok(())
    }

    /// Launch the configured sweep on a background task.
    ///
    /// Returns the sweep's identifier. Allocates fresh live buffers (for
    /// 1-D and 2-D plans) and publishes `Started` before returning. Outside
    /// a Tokio runtime it fails with [`SweepError::NoRuntime`] and leaves the
    /// worker untouched.
    pub fn start(&self) -> SweepResult<String> {
        let mut slot = self.shared.slot.lock();
        if slot.state.is_active() {
            warn!("Cannot start: sweep already running");
            return Err(SweepError::AlreadyRunning { operation: "start" });
        }
        let request = slot.request.clone().ok_or(SweepError::NotConfigured)?;
        let runtime = Handle::try_current()
            .map_err(|_| SweepError::NoRuntime { operation: "start" })?;
        let total = request.plan.checked_total_points().ok_or_else(|| {
            SweepError::InvalidPlan("grid size overflows the point counter".to_string())
        })?;

        // nothing below may fail: the slot is about to say Running
        self.control.reset();
        let buffers = allocate_live_buffers(&request.plan);
        slot.live = buffers
            .as_ref()
            .map(|b| b.iter().map(|buffer| buffer.view()).collect())
            .unwrap_or_default();
        if buffers.is_none() {
            info!(
                axes = request.plan.axes.len(),
                "Live view disabled for sweeps of more than two axes"
            );
        }

        let run_uid = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        slot.generation += 1;
        slot.run_uid = Some(run_uid.clone());
        self.shared.set_state(&mut slot, WorkerState::Running);

        self.shared.publisher.publish(SweepEvent::Started(SweepStarted {
            run_uid: run_uid.clone(),
            iteration_total: total,
            started_at,
            live_view: buffers.is_some(),
        }));

        let sink = SampleSink::new(
            run_uid.clone(),
            &request.plan,
            started_at,
            buffers,
            self.shared.publisher.clone(),
        );
        let run = SweepRun {
            shared: self.shared.clone(),
            control: self.control.clone(),
            generation: slot.generation,
            run_uid: run_uid.clone(),
            request,
        };
        let span = tracing::info_span!("sweep", run_uid = %run_uid);
        slot.task = Some(runtime.spawn(run.execute(sink).instrument(span)));

        info!(run_uid = %run_uid, points = total, "Sweep started");
        Ok(run_uid)
    }

    /// Ask the running sweep to park at its next checkpoint.
    ///
    /// Publishes `Paused` once. Idempotent while paused.
    pub fn request_pause(&self) -> SweepResult<()> {
        let mut slot = self.shared.slot.lock();
        match slot.state {
            WorkerState::Running => {
                self.control.request_pause();
                self.shared.set_state(&mut slot, WorkerState::Paused);
                self.shared.publisher.publish(SweepEvent::Paused);
                info!("Sweep pause requested");
                Ok(())
            }
            WorkerState::Paused => Ok(()),
            other => Err(SweepError::NotRunning {
                operation: "pause",
                state: other.to_string(),
            }),
        }
    }

    /// Let a paused sweep continue.
    ///
    /// Publishes `Resumed` once. A no-op while running.
    pub fn request_resume(&self) -> SweepResult<()> {
        let mut slot = self.shared.slot.lock();
        match slot.state {
            WorkerState::Paused => {
                self.control.request_resume();
                self.shared.set_state(&mut slot, WorkerState::Running);
                self.shared.publisher.publish(SweepEvent::Resumed);
                info!("Sweep resumed");
                Ok(())
            }
            WorkerState::Running => Ok(()),
            other => Err(SweepError::NotRunning {
                operation: "resume",
                state: other.to_string(),
            }),
        }
    }

    /// Ask the running sweep to stop at its next poll.
    ///
    /// Clears any pending pause. Idempotent, and harmless when idle. The
    /// sweep still runs its cleanup hook and publishes `Finished` with
    /// status `Aborted`.
    pub fn request_abort(&self) {
        let mut slot = self.shared.slot.lock();
        self.control.request_abort();
        match slot.state {
            WorkerState::Paused => {
                self.shared.set_state(&mut slot, WorkerState::Running);
                info!("Sweep abort requested while paused");
            }
            WorkerState::Running => info!("Sweep abort requested"),
            _ => debug!("Abort requested with no sweep running"),
        }
    }

    /// Forcibly stop the background task.
    ///
    /// Unlike [`request_abort`](Self::request_abort) this neither runs the
    /// cleanup hook nor publishes `Finished`; the worker moves straight to
    /// `Failed`. Devices are left wherever the routine left them.
    pub fn terminate(&self) {
        let mut slot = self.shared.slot.lock();
        self.control.request_abort();
        let Some(task) = slot.task.take() else {
            return;
        };
        task.abort();
        if slot.state.is_active() {
            slot.generation += 1;
            self.shared.set_state(&mut slot, WorkerState::Failed);
            warn!(run_uid = ?slot.run_uid, "Sweep task terminated without cleanup");
        }
    }

    /// Wait until no sweep is in flight and return the resulting state.
    pub async fn wait(&self) -> WorkerState {
        let mut rx = self.shared.state_tx.subscribe();
        let result = rx.wait_for(|state| !state.is_active()).await.map(|s| *s);
        match result {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Views over the live buffers of the current or last sweep.
    ///
    /// Empty when live view is disabled for the plan.
    pub fn live_views(&self) -> Vec<LiveView> {
        self.shared.slot.lock().live.clone()
    }

    /// View over one channel's live buffer.
    pub fn live_view(&self, channel: &str) -> Option<LiveView> {
        self.shared
            .slot
            .lock()
            .live
            .iter()
            .find(|view| view.channel() == channel)
            .cloned()
    }
}

/// Everything the background task owns.
struct SweepRun {
    shared: Arc<Shared>,
    control: LoopControl,
    generation: u64,
    run_uid: String,
    request: SweepRequest,
}

impl SweepRun {
    async fn execute(self, mut sink: SampleSink) {
        let clock = Instant::now();
        let plan = &self.request.plan;
        let routine = self.request.routine.clone();

        let result = AssertUnwindSafe(routine.run(plan, &mut sink, &self.control))
            .catch_unwind()
            .await;

        let samples = sink.recorded();
        let total = sink.total();
        let (status, failure) = match result {
            // an abort that lands after the last point changes nothing
            Ok(Ok(())) if self.control.is_abort_requested() && samples < total => {
                (SweepStatus::Aborted, None)
            }
            Ok(Ok(())) => {
                if samples < total {
                    warn!(samples, total, "Step routine returned before covering the grid");
                }
                (SweepStatus::Completed, None)
            }
            Ok(Err(err)) => (
                SweepStatus::Failed,
                Some(SweepFailure::from_error(&err, samples)),
            ),
            Err(payload) => (
                SweepStatus::Failed,
                Some(SweepFailure::from_panic(payload.as_ref(), samples)),
            ),
        };

        if let Some(failure) = failure {
            error!(
                samples = failure.samples_recorded,
                causes = ?failure.causes,
                "Sweep failed: {}",
                failure.message
            );
            self.publish_if_current(SweepEvent::Error(failure));
        }

        if let Some(hook) = &self.request.on_sweep_end {
            debug!("Running sweep cleanup hook");
            if AssertUnwindSafe(async { hook().await })
                .catch_unwind()
                .await
                .is_err()
            {
                error!("Sweep cleanup hook panicked");
            }
        }

        let outcome = SweepOutcome {
            run_uid: self.run_uid.clone(),
            status,
            samples,
            iteration_total: total,
            elapsed: clock.elapsed(),
        };

        let mut slot = self.shared.slot.lock();
        if slot.generation != self.generation {
            debug!("Sweep superseded, skipping terminal notification");
            return;
        }
        slot.task = None;
        let state = match status {
            SweepStatus::Failed => WorkerState::Failed,
            SweepStatus::Completed | SweepStatus::Aborted => WorkerState::Finished,
        };
        info!(
            %status,
            samples,
            total,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Sweep finished"
        );
        self.shared.publisher.publish(SweepEvent::Finished(outcome));
        // waiters wake only after Finished is out
        self.shared.set_state(&mut slot, state);
    }

    /// Publish unless a later `start()` or `terminate()` took over the slot.
    fn publish_if_current(&self, event: SweepEvent) {
        let slot = self.shared.slot.lock();
        if slot.generation == self.generation {
            self.shared.publisher.publish(event);
        } else {
            debug!(event = event.kind(), "Sweep superseded, dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use sweep_core::{Axis, LoopDecision, OutputChannel, Sample, SweptAxis};

    struct CountingRoutine;

    #[async_trait]
    impl StepRoutine for CountingRoutine {
        async fn run(
            &self,
            plan: &SweepPlan,
            sink: &mut SampleSink,
            control: &LoopControl,
        ) -> anyhow::Result<()> {
            for i in 0..plan.total_points() {
                if control.checkpoint(Duration::from_millis(5)).await == LoopDecision::Abort {
                    return Ok(());
                }
                sink.record(Sample::new(vec![i as f64], vec![i as f64]));
            }
            Ok(())
        }
    }

    fn plan(points: usize) -> SweepPlan {
        SweepPlan::new(
            vec![SweptAxis::new("x", Axis::new(0.0, 1.0, points))],
            vec![OutputChannel::new("y")],
        )
    }

    #[test]
    fn test_state_display() {
        assert_eq!(WorkerState::Configured.to_string(), "configured");
        assert!(WorkerState::Paused.is_active());
        assert!(!WorkerState::Failed.is_active());
    }

    #[test]
    fn test_start_without_configure_is_rejected() {
        let (worker, _rx) = SweepWorker::with_channel();
        assert_eq!(worker.start(), Err(SweepError::NotConfigured));
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[test]
    fn test_configure_rejects_invalid_plan() {
        let (worker, _rx) = SweepWorker::with_channel();
        let err = worker
            .configure(SweepRequest::new(plan(0), Arc::new(CountingRoutine)))
            .unwrap_err();
        assert!(matches!(err, SweepError::InvalidAxis { .. }));
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[test]
    fn test_pause_when_idle_is_rejected() {
        let (worker, _rx) = SweepWorker::with_channel();
        assert!(matches!(
            worker.request_pause(),
            Err(SweepError::NotRunning { operation: "pause", .. })
        ));
        worker.request_abort();
        worker.terminate();
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    /// Records every point, then raises the abort flag itself.
    struct LateAbortRoutine;

    #[async_trait]
    impl StepRoutine for LateAbortRoutine {
        async fn run(
            &self,
            plan: &SweepPlan,
            sink: &mut SampleSink,
            control: &LoopControl,
        ) -> anyhow::Result<()> {
            for i in 0..plan.total_points() {
                sink.record(Sample::new(vec![i as f64], vec![i as f64]));
            }
            control.request_abort();
            Ok(())
        }
    }

    #[test]
    fn test_start_outside_runtime_leaves_worker_configured() {
        let (worker, mut rx) = SweepWorker::with_channel();
        worker
            .configure(SweepRequest::new(plan(4), Arc::new(CountingRoutine)))
            .unwrap();

        assert_eq!(
            worker.start(),
            Err(SweepError::NoRuntime { operation: "start" })
        );
        assert_eq!(worker.state(), WorkerState::Configured);
        assert_eq!(worker.run_uid(), None);
        assert!(rx.try_recv().is_err());

        // still usable afterwards
        worker
            .configure(SweepRequest::new(plan(2), Arc::new(CountingRoutine)))
            .unwrap();
    }

    #[test]
    fn test_configure_rejects_overflowing_grid() {
        let (worker, _rx) = SweepWorker::with_channel();
        let axes = (0..3)
            .map(|i| SweptAxis::new(format!("a{i}"), Axis::new(0.0, 1.0, 1 << 22)))
            .collect();
        let plan = SweepPlan::new(axes, vec![OutputChannel::new("y")]);
        let err = worker
            .configure(SweepRequest::new(plan, Arc::new(CountingRoutine)))
            .unwrap_err();
        assert!(matches!(err, SweepError::InvalidPlan(_)));
        assert_eq!(worker.state(), WorkerState::Idle);
        assert_eq!(worker.start(), Err(SweepError::NotConfigured));
    }

    #[test]
    fn test_superseded_run_publishes_nothing() {
        let (worker, mut rx) = SweepWorker::with_channel();
        let request = SweepRequest::new(plan(2), Arc::new(CountingRoutine));
        let run = SweepRun {
            shared: worker.shared.clone(),
            control: worker.loop_control(),
            generation: 0,
            run_uid: "stale".to_string(),
            request,
        };

        run.publish_if_current(SweepEvent::Paused);
        assert_eq!(rx.try_recv().unwrap().kind(), "paused");

        // a terminate() or a newer start() moved the slot on
        worker.shared.slot.lock().generation += 1;
        run.publish_if_current(SweepEvent::Resumed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_abort_after_last_point_completes() {
        let (worker, mut rx) = SweepWorker::with_channel();
        worker
            .configure(SweepRequest::new(plan(3), Arc::new(LateAbortRoutine)))
            .unwrap();
        worker.start().unwrap();
        assert_eq!(worker.wait().await, WorkerState::Finished);

        let mut outcome = None;
        while let Ok(event) = rx.try_recv() {
            if let SweepEvent::Finished(o) = event {
                outcome = Some(o);
            }
        }
        let outcome = outcome.unwrap();
        assert_eq!(outcome.status, SweepStatus::Completed);
        assert_eq!(outcome.samples, 3);
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let (worker, mut rx) = SweepWorker::with_channel();
        worker
            .configure(SweepRequest::new(plan(4), Arc::new(CountingRoutine)))
            .unwrap();
        let uid = worker.start().unwrap();
        assert_eq!(worker.wait().await, WorkerState::Finished);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
            if let SweepEvent::Finished(outcome) = event {
                assert_eq!(outcome.run_uid, uid);
                assert_eq!(outcome.status, SweepStatus::Completed);
                assert_eq!(outcome.samples, 4);
            }
        }
        assert_eq!(
            kinds,
            vec!["started", "progress", "progress", "progress", "progress", "finished"]
        );
        assert_eq!(worker.live_view("y").unwrap().snapshot(), vec![0.0, 1.0, 2.0, 3.0]);
    }
}
