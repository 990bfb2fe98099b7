//! # sweeplab
//!
//! Command-line front end and shared plumbing for running multi-axis sweeps
//! in the background with live-view buffers.
//!
//! - **`config`**: Figment-based configuration (TOML file plus `SWEEPLAB_`
//!   environment overrides) and conversion to a [`sweep_core::SweepPlan`].
//! - **`telemetry`**: `tracing-subscriber` initialisation.
//! - **`rig`**: simulated devices described by the configuration.
//!
//! The engine itself lives in the workspace crates `sweep-core`,
//! `sweep-engine` and `sweep-driver-mock`, re-exported here.

pub mod config;
pub mod rig;
pub mod telemetry;

pub use sweep_core;
pub use sweep_driver_mock;
pub use sweep_engine;
