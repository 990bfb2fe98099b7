//! Video mode: repeat a 2-D raster indefinitely, refreshing one live buffer.
//!
//! Each frame sweeps the fast axis for every slow-axis value, writing into a
//! single [`OutputBuffer`] which is rewound between frames. Frames are
//! throttled to a minimum period. Bounds can be changed while running; the
//! buffer is reallocated before the next frame.
//!
//! Pause and stop take effect between frames. Stop also cuts a frame short
//! at its next point.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sweep_core::{
    Axis, LiveView, LoopControl, LoopDecision, Movable, OutputBuffer, Readable, SweepError,
    SweepFailure, SweepIndexCursor, SweepResult, DEFAULT_POLL_INTERVAL,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Default lower bound on frame duration (10 frames per second).
pub const DEFAULT_MIN_FRAME_PERIOD: Duration = Duration::from_millis(100);

/// Video mode notification.
#[derive(Debug, Clone)]
pub enum VideoEvent {
    /// A frame finished; `view` holds its data until the next frame overwrites it.
    FrameDone {
        /// 1-based frame counter since `start()`
        frame: u64,
        /// Time spent sweeping, excluding throttling
        elapsed: Duration,
        /// The frame buffer
        view: LiveView,
    },
    /// The frame loop failed and stopped. `samples_recorded` counts completed frames.
    Error(SweepFailure),
    /// The frame loop ended.
    Stopped {
        /// Completed frames
        frames: u64,
    },
}

/// Devices and bounds for video mode.
#[derive(Clone)]
pub struct VideoSetup {
    /// Slow axis (buffer columns)
    pub slow: Arc<dyn Movable>,
    /// Fast axis (buffer rows)
    pub fast: Arc<dyn Movable>,
    /// Output read at every point
    pub output: Arc<dyn Readable>,
    /// Channel name of the live buffer
    pub channel: String,
    /// Slow axis bounds
    pub slow_axis: Axis,
    /// Fast axis bounds
    pub fast_axis: Axis,
    /// Minimum frame period
    pub min_frame_period: Duration,
    /// Poll interval while paused
    pub poll_interval: Duration,
}

impl VideoSetup {
    /// Setup with default throttling.
    pub fn new(
        slow: Arc<dyn Movable>,
        fast: Arc<dyn Movable>,
        output: Arc<dyn Readable>,
        channel: impl Into<String>,
        slow_axis: Axis,
        fast_axis: Axis,
    ) -> Self {
        Self {
            slow,
            fast,
            output,
            channel: channel.into(),
            slow_axis,
            fast_axis,
            min_frame_period: DEFAULT_MIN_FRAME_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the minimum frame period.
    pub fn with_min_frame_period(mut self, period: Duration) -> Self {
        self.min_frame_period = period;
        self
    }
}

struct Bounds {
    slow: Axis,
    fast: Axis,
    changed: bool,
}

/// Continuous 2-D acquisition loop.
pub struct VideoMode {
    setup: VideoSetup,
    bounds: Arc<Mutex<Bounds>>,
    view: Arc<Mutex<Option<LiveView>>>,
    control: LoopControl,
    task: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<VideoEvent>,
}

impl VideoMode {
    /// Create a stopped video loop and its event receiver.
    pub fn new(setup: VideoSetup) -> SweepResult<(Self, mpsc::UnboundedReceiver<VideoEvent>)> {
        validate_bounds(&setup.slow_axis, &setup.fast_axis)?;
        let (events, rx) = mpsc::unbounded_channel();
        let bounds = Bounds {
            slow: setup.slow_axis,
            fast: setup.fast_axis,
            changed: false,
        };
        Ok((
            Self {
                setup,
                bounds: Arc::new(Mutex::new(bounds)),
                view: Arc::new(Mutex::new(None)),
                control: LoopControl::new(),
                task: Mutex::new(None),
                events,
            },
            rx,
        ))
    }

    /// Whether the frame loop is running (paused counts as running).
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Launch the frame loop.
    ///
    /// Fails with [`SweepError::NoRuntime`] outside a Tokio runtime.
    pub fn start(&self) -> SweepResult<()> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(SweepError::AlreadyRunning {
                operation: "start video mode",
            });
        }
        let runtime = Handle::try_current().map_err(|_| SweepError::NoRuntime {
            operation: "start video mode",
        })?;
        self.control.reset();
        self.bounds.lock().changed = true;

        let frames = FrameLoop {
            setup: self.setup.clone(),
            bounds: self.bounds.clone(),
            view: self.view.clone(),
            control: self.control.clone(),
            events: self.events.clone(),
        };
        let span = tracing::info_span!("video", channel = %self.setup.channel);
        *task = Some(runtime.spawn(frames.run().instrument(span)));
        info!("Video mode started");
        Ok(())
    }

    /// Replace both axes; applied before the next frame.
    pub fn set_bounds(&self, slow_axis: Axis, fast_axis: Axis) -> SweepResult<()> {
        validate_bounds(&slow_axis, &fast_axis)?;
        let mut bounds = self.bounds.lock();
        bounds.slow = slow_axis;
        bounds.fast = fast_axis;
        bounds.changed = true;
        debug!("Video bounds updated");
        Ok(())
    }

    /// Hold before the next frame.
    pub fn pause(&self) {
        self.control.request_pause();
    }

    /// Continue after a pause.
    pub fn resume(&self) {
        self.control.request_resume();
    }

    /// End the loop. Idempotent.
    pub fn stop(&self) {
        self.control.request_abort();
    }

    /// Wait for the frame loop to end.
    pub async fn wait(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Video task ended abnormally: {e}");
            }
        }
    }

    /// View over the current frame buffer, once the first frame has begun.
    pub fn live_view(&self) -> Option<LiveView> {
        self.view.lock().clone()
    }
}

fn validate_bounds(slow: &Axis, fast: &Axis) -> SweepResult<()> {
    slow.validate("slow")?;
    fast.validate("fast")
}

struct FrameLoop {
    setup: VideoSetup,
    bounds: Arc<Mutex<Bounds>>,
    view: Arc<Mutex<Option<LiveView>>>,
    control: LoopControl,
    events: mpsc::UnboundedSender<VideoEvent>,
}

struct Frame {
    buffer: OutputBuffer,
    slow: Vec<f64>,
    fast: Vec<f64>,
}

impl FrameLoop {
    async fn run(self) {
        let mut frame: Option<Frame> = None;
        let mut frames = 0u64;

        loop {
            if self.control.checkpoint(self.setup.poll_interval).await == LoopDecision::Abort {
                break;
            }

            let rebuild = std::mem::take(&mut self.bounds.lock().changed);
            let current = match frame.take() {
                Some(current) if !rebuild => current,
                _ => self.allocate(),
            };

            let begun = Instant::now();
            let current = match self.sweep(current).await {
                Ok(Some(current)) => current,
                Ok(None) => break,
                Err(e) => {
                    let failure = SweepFailure::from_error(&e, frames);
                    error!("Video frame failed: {}", failure.message);
                    self.send(VideoEvent::Error(failure));
                    break;
                }
            };
            let elapsed = begun.elapsed();
            if elapsed < self.setup.min_frame_period {
                tokio::time::sleep(self.setup.min_frame_period - elapsed).await;
            }

            frames += 1;
            self.send(VideoEvent::FrameDone {
                frame: frames,
                elapsed,
                view: current.buffer.view(),
            });
            frame = Some(current);
        }

        info!(frames, "Video mode stopped");
        self.send(VideoEvent::Stopped { frames });
    }

    fn allocate(&self) -> Frame {
        let bounds = self.bounds.lock();
        let cursor = SweepIndexCursor::new(
            bounds.slow.point_count,
            bounds.fast.point_count,
            bounds.slow.is_reversed(),
            bounds.fast.is_reversed(),
            false,
        );
        let buffer = OutputBuffer::new(self.setup.channel.clone(), cursor);
        *self.view.lock() = Some(buffer.view());
        debug!(
            cols = bounds.slow.point_count,
            rows = bounds.fast.point_count,
            "Video buffer allocated"
        );
        Frame {
            buffer,
            slow: bounds.slow.values(),
            fast: bounds.fast.values(),
        }
    }

    /// One raster pass. `Ok(None)` when stopped mid-frame.
    async fn sweep(&self, mut frame: Frame) -> anyhow::Result<Option<Frame>> {
        use anyhow::Context;

        frame.buffer.rewind();
        for &slow in &frame.slow {
            self.setup
                .slow
                .move_abs(slow)
                .await
                .with_context(|| format!("setting slow axis to {slow}"))?;
            self.setup.slow.wait_settled().await?;
            for &fast in &frame.fast {
                if self.control.is_abort_requested() {
                    return Ok(None);
                }
                self.setup
                    .fast
                    .move_abs(fast)
                    .await
                    .with_context(|| format!("setting fast axis to {fast}"))?;
                self.setup.fast.wait_settled().await?;
                let value = self
                    .setup
                    .output
                    .read()
                    .await
                    .with_context(|| format!("reading '{}'", self.setup.channel))?;
                frame.buffer.record(value);
            }
        }
        Ok(Some(frame))
    }

    fn send(&self, event: VideoEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Video event receiver dropped");
        }
    }
}
