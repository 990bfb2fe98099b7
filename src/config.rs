//! Configuration loading using Figment
//!
//! Configuration is layered from:
//! 1. `config/sweeplab.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `SWEEPLAB_`, nested keys separated
//!    by a double underscore
//!
//! Example: `SWEEPLAB_APPLICATION__LOG_LEVEL=debug`
//!
//! ```no_run
//! use sweeplab::config::SweeplabConfig;
//!
//! let config = SweeplabConfig::load()?;
//! config.validate()?;
//! println!("{} points", config.to_plan().total_points());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use sweep_core::{Axis, OutputChannel, SweepError, SweepPlan, SweepResult, SweptAxis};
use sweep_driver_mock::{MockMeterConfig, MockStageConfig};

use crate::telemetry::OutputFormat;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/sweeplab.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SWEEPLAB_";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SweeplabConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Worker and routine settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// The sweep to run
    pub sweep: SweepSection,
    /// Video mode settings
    #[serde(default)]
    pub video: VideoConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Checkpoint poll interval while paused, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Delay between setting the axes and reading, in milliseconds
    #[serde(default)]
    pub settle_ms: u64,
    /// Snake ordering
    #[serde(default)]
    pub alternate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            settle_ms: 0,
            alternate: false,
        }
    }
}

/// Swept axes and measured channels
#[derive(Debug, Clone, Deserialize)]
pub struct SweepSection {
    /// Swept axes, slowest first
    pub axes: Vec<AxisDefinition>,
    /// Output channels
    #[serde(default)]
    pub channels: Vec<ChannelDefinition>,
}

/// One swept axis and the simulated stage behind it
#[derive(Debug, Clone, Deserialize)]
pub struct AxisDefinition {
    /// Device name
    pub name: String,
    /// First set point
    pub start: f64,
    /// Last set point
    pub stop: f64,
    /// Number of set points
    pub points: usize,
    /// Return to `rest_value` when the sweep ends
    #[serde(default)]
    pub rest_on_end: bool,
    /// Rest value
    #[serde(default)]
    pub rest_value: f64,
    /// Mock stage settings
    #[serde(default)]
    pub stage: MockStageConfig,
}

/// One output channel and the simulated meter behind it
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDefinition {
    /// Channel name
    pub name: String,
    /// Mock meter settings
    #[serde(default)]
    pub meter: MockMeterConfig,
}

/// Video mode configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    /// Minimum frame period in milliseconds
    #[serde(default = "default_min_frame")]
    pub min_frame_ms: u64,
    /// Frames to acquire before stopping (0 = until interrupted)
    #[serde(default = "default_frames")]
    pub frames: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            min_frame_ms: default_min_frame(),
            frames: default_frames(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> u64 {
    100
}

fn default_min_frame() -> u64 {
    100
}

fn default_frames() -> u64 {
    10
}

impl SweeplabConfig {
    /// Load from the default path and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> SweepResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.engine.poll_interval_ms == 0 {
            return Err(SweepError::Configuration(
                "engine.poll_interval_ms must be at least 1".to_string(),
            ));
        }

        for axis in &self.sweep.axes {
            if axis.stage.speed < 0.0 || !axis.stage.speed.is_finite() {
                return Err(SweepError::Configuration(format!(
                    "Invalid stage speed {} for axis '{}'",
                    axis.stage.speed, axis.name
                )));
            }
        }

        for channel in &self.sweep.channels {
            if channel.meter.noise < 0.0 || !channel.meter.noise.is_finite() {
                return Err(SweepError::Configuration(format!(
                    "Invalid meter noise {} for channel '{}'",
                    channel.meter.noise, channel.name
                )));
            }
        }

        self.to_plan().validate()
    }

    /// The sweep plan described by this configuration.
    pub fn to_plan(&self) -> SweepPlan {
        let axes = self
            .sweep
            .axes
            .iter()
            .map(|def| {
                let swept = SweptAxis::new(&def.name, Axis::new(def.start, def.stop, def.points));
                if def.rest_on_end {
                    swept.with_rest(def.rest_value)
                } else {
                    swept
                }
            })
            .collect();
        let channels = self
            .sweep
            .channels
            .iter()
            .map(|c| OutputChannel::new(&c.name))
            .collect();

        SweepPlan::new(axes, channels)
            .with_alternate(self.engine.alternate)
            .with_settle(Duration::from_millis(self.engine.settle_ms))
    }

    /// Checkpoint poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.engine.poll_interval_ms)
    }
}
