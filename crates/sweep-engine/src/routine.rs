//! The step-routine seam.
//!
//! A [`StepRoutine`] performs the actual set+measure cycles. The worker calls
//! [`StepRoutine::run`] exactly once per sweep and hands it:
//!
//! - the [`SweepPlan`] to execute,
//! - a [`SampleSink`], the per-sample callback, which the routine must call
//!   exactly once per grid point, synchronously, before moving on,
//! - the sweep's [`LoopControl`], which the routine polls between points.
//!
//! Returning `Ok(())` ends the sweep normally (completed, or aborted if an
//! abort was requested). Returning an error ends it as failed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use sweep_core::{
    LoopControl, OutputBuffer, Sample, SweepEvent, SweepObserver, SweepPlan, SweepProgress,
    SweptAxis,
};

/// Something that can execute a sweep plan point by point.
#[async_trait]
pub trait StepRoutine: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "step_routine"
    }

    /// Execute `plan`, calling `sink.record` once per grid point.
    async fn run(
        &self,
        plan: &SweepPlan,
        sink: &mut SampleSink,
        control: &LoopControl,
    ) -> anyhow::Result<()>;
}

/// Hook run exactly once when a sweep ends, whatever the outcome.
///
/// Typically moves swept devices back to a rest value.
pub type CleanupHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap a synchronous closure as a [`CleanupHook`].
pub fn cleanup_fn<F>(f: F) -> CleanupHook
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(move || {
        f();
        futures::future::ready(()).boxed()
    })
}

/// Serializes notifications coming from the sweep task and from callers
/// (pause/resume), so an observer never runs concurrently with itself.
pub(crate) struct Publisher {
    observer: Arc<dyn SweepObserver>,
    gate: Mutex<()>,
}

impl Publisher {
    pub(crate) fn new(observer: Arc<dyn SweepObserver>) -> Self {
        Self {
            observer,
            gate: Mutex::new(()),
        }
    }

    pub(crate) fn publish(&self, event: SweepEvent) {
        let _gate = self.gate.lock();
        self.observer.notify(event);
    }
}

/// Per-sample callback handed to the step routine.
///
/// Each call to [`record`](Self::record) writes the readings into the live
/// buffers (write at the cursor, then advance) and publishes one
/// [`SweepProgress`]. Iteration indices are assigned here, so they are
/// strictly increasing by construction.
pub struct SampleSink {
    run_uid: String,
    total: u64,
    recorded: u64,
    started_at: DateTime<Utc>,
    clock: Instant,
    axes: Arc<[SweptAxis]>,
    channels: Arc<[String]>,
    buffers: Option<Vec<OutputBuffer>>,
    publisher: Arc<Publisher>,
    overrun_reported: bool,
}

impl SampleSink {
    pub(crate) fn new(
        run_uid: String,
        plan: &SweepPlan,
        started_at: DateTime<Utc>,
        buffers: Option<Vec<OutputBuffer>>,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            run_uid,
            total: plan.total_points(),
            recorded: 0,
            started_at,
            clock: Instant::now(),
            axes: plan.axes.clone().into(),
            channels: plan.channel_names().into(),
            buffers,
            publisher,
            overrun_reported: false,
        }
    }

    /// Record one measured grid point and publish its progress.
    pub fn record(&mut self, sample: Sample) {
        self.recorded += 1;
        let index = self.recorded;

        if sample.readings.len() != self.channels.len() {
            tracing::warn!(
                iteration = index,
                expected = self.channels.len(),
                got = sample.readings.len(),
                "Sample reading count does not match channel count"
            );
        }

        if let Some(buffers) = self.buffers.as_mut() {
            let mut written = true;
            for (i, buffer) in buffers.iter_mut().enumerate() {
                let value = sample.readings.get(i).copied().unwrap_or(f64::NAN);
                written &= buffer.record(value);
            }
            if !written && !self.overrun_reported {
                tracing::warn!(
                    iteration = index,
                    total = self.total,
                    "Step routine recorded more samples than grid points, live view not updated"
                );
                self.overrun_reported = true;
            }
        }

        tracing::debug!(iteration = index, total = self.total, "Sample recorded");

        let progress = SweepProgress {
            run_uid: self.run_uid.clone(),
            iteration_index: index,
            iteration_total: self.total,
            started_at: self.started_at,
            elapsed: self.clock.elapsed(),
            axes: self.axes.clone(),
            channels: self.channels.clone(),
            sample,
        };
        self.publisher.publish(SweepEvent::Progress(progress));
    }

    /// Number of samples recorded so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Number of grid points in the plan.
    pub fn total(&self) -> u64 {
        self.total
    }
}
