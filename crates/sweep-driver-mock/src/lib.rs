//! Mock devices for sweeplab
//!
//! Simulated set-point and readout devices for running sweeps without
//! physical hardware. All delays use `tokio::time::sleep`.
//!
//! # Available Mock Drivers
//!
//! - [`MockStage`] - set-point device implementing `Movable`
//! - [`MockMeter`] - scalar readout implementing `Readable`, computed from
//!   the positions of linked stages

mod mock_meter;
mod mock_stage;
mod mode;

pub use mock_meter::{MockMeter, MockMeterConfig, Response};
pub use mock_stage::{MockStage, MockStageBuilder, MockStageConfig, StageLimits};
pub use mode::MockMode;
