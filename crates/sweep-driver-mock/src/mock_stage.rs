//! Mock set-point device (stage, voltage source, ...).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sweep_core::capabilities::Movable;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::mode::MockMode;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for MockStage
#[derive(Debug, Clone, Deserialize)]
pub struct MockStageConfig {
    /// Initial position (default: 0.0)
    #[serde(default)]
    pub initial_position: f64,

    /// Ramp speed in units/sec, used in realistic mode (default: 10.0)
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Settling time after each move in ms, used in realistic mode
    #[serde(default = "default_settling_ms")]
    pub settling_ms: u64,
}

fn default_speed() -> f64 {
    10.0
}

fn default_settling_ms() -> u64 {
    10
}

impl Default for MockStageConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            speed: default_speed(),
            settling_ms: default_settling_ms(),
        }
    }
}

/// Position limits; moves outside them fail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageLimits {
    /// Lowest reachable position
    pub min_position: f64,
    /// Highest reachable position
    pub max_position: f64,
}

impl StageLimits {
    fn enforce(&self, target: f64) -> Result<f64> {
        if target < self.min_position || target > self.max_position {
            Err(anyhow!(
                "Position {:.4} exceeds limits [{:.4}, {:.4}]",
                target,
                self.min_position,
                self.max_position
            ))
        } else {
            Ok(target)
        }
    }
}

// =============================================================================
// MockStage
// =============================================================================

/// Simulated set-point device.
///
/// Instant mode applies moves immediately; realistic mode sleeps for the
/// travel time at the configured speed plus a fixed settling time.
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::builder().limits(-5.0, 5.0).build();
/// stage.move_abs(1.5).await?;
/// assert_eq!(stage.position().await?, 1.5);
/// ```
#[derive(Clone)]
pub struct MockStage {
    name: String,
    position: Arc<RwLock<f64>>,
    moves: Arc<AtomicU64>,
    speed: f64,
    settling: Duration,
    limits: Option<StageLimits>,
    mode: MockMode,
}

impl MockStage {
    /// Create an instant-mode stage at 0.0.
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder().name(name).build()
    }

    /// Create a stage from configuration (realistic mode).
    pub fn with_config(name: impl Into<String>, config: MockStageConfig) -> Self {
        Self::builder()
            .name(name)
            .initial_position(config.initial_position)
            .speed(config.speed)
            .settling(Duration::from_millis(config.settling_ms))
            .mode(MockMode::Realistic)
            .build()
    }

    /// Create a builder
    pub fn builder() -> MockStageBuilder {
        MockStageBuilder::new()
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of successful `move_abs` calls so far.
    pub fn move_count(&self) -> u64 {
        self.moves.load(Ordering::SeqCst)
    }

    /// Current position without going through the async trait.
    pub async fn current(&self) -> f64 {
        *self.position.read().await
    }

    fn travel_time(&self, distance: f64) -> Duration {
        match self.mode {
            MockMode::Instant => Duration::ZERO,
            MockMode::Realistic if self.speed > 0.0 => {
                Duration::from_secs_f64(distance.abs() / self.speed)
            }
            MockMode::Realistic => Duration::ZERO,
        }
    }
}

#[async_trait]
impl Movable for MockStage {
    async fn move_abs(&self, target: f64) -> Result<()> {
        let target = match &self.limits {
            Some(limits) => limits.enforce(target)?,
            None => target,
        };

        let current = *self.position.read().await;
        let travel = self.travel_time(target - current);
        if !travel.is_zero() {
            sleep(travel).await;
        }

        *self.position.write().await = target;
        self.moves.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(stage = %self.name, from = current, to = target, "MockStage moved");
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.read().await)
    }

    async fn wait_settled(&self) -> Result<()> {
        if self.mode == MockMode::Realistic && !self.settling.is_zero() {
            sleep(self.settling).await;
        }
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for MockStage with fluent API
pub struct MockStageBuilder {
    name: String,
    initial_position: f64,
    speed: f64,
    settling: Duration,
    limits: Option<StageLimits>,
    mode: MockMode,
}

impl MockStageBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            name: "mock_stage".to_string(),
            initial_position: 0.0,
            speed: default_speed(),
            settling: Duration::from_millis(default_settling_ms()),
            limits: None,
            mode: MockMode::Instant,
        }
    }

    /// Set device name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set initial position
    pub fn initial_position(mut self, position: f64) -> Self {
        self.initial_position = position;
        self
    }

    /// Set ramp speed (units/sec)
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Set settling time
    pub fn settling(mut self, settling: Duration) -> Self {
        self.settling = settling;
        self
    }

    /// Reject moves outside `[min, max]`
    pub fn limits(mut self, min: f64, max: f64) -> Self {
        self.limits = Some(StageLimits {
            min_position: min,
            max_position: max,
        });
        self
    }

    /// Set operational mode
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build the stage
    pub fn build(self) -> MockStage {
        MockStage {
            name: self.name,
            position: Arc::new(RwLock::new(self.initial_position)),
            moves: Arc::new(AtomicU64::new(0)),
            speed: self.speed,
            settling: self.settling,
            limits: self.limits,
            mode: self.mode,
        }
    }
}

impl Default for MockStageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_and_read_back() {
        let stage = MockStage::new("gate");
        stage.move_abs(1.5).await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 1.5);
        assert_eq!(stage.move_count(), 1);
        stage.wait_settled().await.unwrap();
    }

    #[tokio::test]
    async fn test_limits_reject_moves() {
        let stage = MockStage::builder().limits(-1.0, 1.0).build();
        assert!(stage.move_abs(2.0).await.is_err());
        assert_eq!(stage.position().await.unwrap(), 0.0);
        assert_eq!(stage.move_count(), 0);
    }

    #[tokio::test]
    async fn test_realistic_mode_takes_travel_time() {
        let stage = MockStage::builder()
            .speed(100.0)
            .settling(Duration::ZERO)
            .mode(MockMode::Realistic)
            .build();
        let start = std::time::Instant::now();
        stage.move_abs(2.0).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_clones_share_position() {
        let stage = MockStage::new("x");
        let other = stage.clone();
        stage.move_abs(-0.25).await.unwrap();
        assert_eq!(other.current().await, -0.25);
    }
}
