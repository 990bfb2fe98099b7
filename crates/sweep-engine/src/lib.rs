//! `sweep-engine`
//!
//! Runs sweeps described by a [`sweep_core::SweepPlan`] on a background
//! Tokio task.
//!
//! - [`SweepWorker`]: lifecycle, pause/resume/abort, notifications
//! - [`StepRoutine`] / [`SampleSink`]: the seam between the worker and the
//!   code that actually sets and measures
//! - [`GridRoutine`]: step routine over `Movable`/`Readable` devices
//! - [`VideoMode`]: continuously repeated 2-D raster

pub mod grid;
pub mod routine;
pub mod video;
pub mod worker;

pub use grid::{GridPoints, GridRoutine};
pub use routine::{cleanup_fn, CleanupHook, SampleSink, StepRoutine};
pub use video::{VideoEvent, VideoMode, VideoSetup, DEFAULT_MIN_FRAME_PERIOD};
pub use worker::{SweepRequest, SweepWorker, WorkerState};
