//! `sweep-core`
//!
//! Core types for running multi-axis parameter sweeps in the background.
//!
//! ## Key Types
//!
//! - [`SweepPlan`]: swept axes, output channels and scan options
//! - [`SweepIndexCursor`]: maps the next sample to a `(col, row)` buffer cell
//! - [`OutputBuffer`] / [`LiveView`]: single-writer, lock-free live buffers
//! - [`LoopControl`]: cooperative pause/abort flags polled by step routines
//! - [`SweepProgress`] / [`SweepEvent`]: notifications published per sweep
//! - [`SweepError`]: synchronous configuration errors
//!
//! The worker that ties these together lives in `sweep-engine`.

pub mod axis;
pub mod buffer;
pub mod capabilities;
pub mod cursor;
pub mod error;
pub mod events;
pub mod loop_control;
pub mod progress;

pub use axis::{Axis, OutputChannel, SweepPlan, SweptAxis, MAX_LIVE_CELLS};
pub use buffer::{allocate_live_buffers, LiveView, OutputBuffer};
pub use capabilities::{Movable, Readable};
pub use cursor::SweepIndexCursor;
pub use error::{SweepError, SweepFailure, SweepResult};
pub use events::{SweepEvent, SweepObserver, SweepOutcome, SweepStarted, SweepStatus};
pub use loop_control::{LoopControl, LoopDecision, DEFAULT_POLL_INTERVAL};
pub use progress::{Sample, SweepProgress};
