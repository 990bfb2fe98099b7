//! Mock scalar meter whose reading depends on the position of linked stages.
//!
//! Provides:
//! - A configurable response surface over the linked set points
//! - Uniform noise
//! - Integration time (realistic mode)
//! - Failure injection after N reads, for exercising sweep error paths

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sweep_core::capabilities::Readable;
use tokio::time::{sleep, Duration};

use crate::mock_stage::MockStage;
use crate::mode::MockMode;

/// Response surface over the linked stage positions.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// Always the same value
    Constant {
        /// Reading
        value: f64,
    },
    /// `offset + slope * sum(positions)`
    Linear {
        /// Value at the origin
        offset: f64,
        /// Change per unit of every linked position
        slope: f64,
    },
    /// Gaussian bump centred on `center` along every linked axis
    Gaussian {
        /// Peak value
        amplitude: f64,
        /// Centre along every axis
        #[serde(default)]
        center: f64,
        /// Standard deviation
        width: f64,
    },
    /// `amplitude * prod(sin(frequency * x))`
    Ripple {
        /// Peak value
        amplitude: f64,
        /// Angular frequency per unit position
        frequency: f64,
    },
}

impl Default for Response {
    fn default() -> Self {
        Response::Gaussian {
            amplitude: 1.0,
            center: 0.0,
            width: 0.5,
        }
    }
}

impl Response {
    /// Evaluate the response at `positions`.
    pub fn evaluate(&self, positions: &[f64]) -> f64 {
        match *self {
            Response::Constant { value } => value,
            Response::Linear { offset, slope } => offset + slope * positions.iter().sum::<f64>(),
            Response::Gaussian {
                amplitude,
                center,
                width,
            } => {
                let r2: f64 = positions.iter().map(|x| (x - center).powi(2)).sum();
                amplitude * (-r2 / (2.0 * width * width)).exp()
            }
            Response::Ripple {
                amplitude,
                frequency,
            } => amplitude * positions.iter().map(|x| (frequency * x).sin()).product::<f64>(),
        }
    }
}

/// Configuration for MockMeter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockMeterConfig {
    /// Response surface
    #[serde(default)]
    pub response: Response,
    /// Peak-to-peak half width of the uniform noise
    #[serde(default)]
    pub noise: f64,
    /// Integration time per read in ms (realistic mode)
    #[serde(default)]
    pub integration_ms: u64,
    /// Fail every read after this many successful ones
    #[serde(default)]
    pub fail_after: Option<u64>,
}

/// Simulated meter.
///
/// # Example
///
/// ```rust,ignore
/// let gate = Arc::new(MockStage::new("gate"));
/// let meter = MockMeter::new("dmm1", Response::Constant { value: 2.0 })
///     .linked_to(vec![gate.clone()]);
/// assert_eq!(meter.read().await?, 2.0);
/// ```
pub struct MockMeter {
    name: String,
    response: Response,
    noise: f64,
    integration: Duration,
    fail_after: Option<u64>,
    mode: MockMode,
    linked: Vec<Arc<MockStage>>,
    reads: AtomicU64,
}

impl MockMeter {
    /// Create a noise-free, instant-mode meter.
    pub fn new(name: impl Into<String>, response: Response) -> Self {
        Self {
            name: name.into(),
            response,
            noise: 0.0,
            integration: Duration::ZERO,
            fail_after: None,
            mode: MockMode::Instant,
            linked: Vec::new(),
            reads: AtomicU64::new(0),
        }
    }

    /// Create a realistic-mode meter from configuration.
    pub fn with_config(name: impl Into<String>, config: MockMeterConfig) -> Self {
        Self {
            noise: config.noise.abs(),
            integration: Duration::from_millis(config.integration_ms),
            fail_after: config.fail_after,
            mode: MockMode::Realistic,
            ..Self::new(name, config.response)
        }
    }

    /// Stages whose positions feed the response surface.
    pub fn linked_to(mut self, stages: Vec<Arc<MockStage>>) -> Self {
        self.linked = stages;
        self
    }

    /// Fail every read after `count` successful reads.
    pub fn fail_after(mut self, count: u64) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Add uniform noise of half width `noise`.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of successful reads so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Readable for MockMeter {
    async fn read(&self) -> Result<f64> {
        if let Some(limit) = self.fail_after {
            if self.reads.load(Ordering::SeqCst) >= limit {
                bail!(
                    "Mock meter '{}' lost communication after {} reads",
                    self.name,
                    limit
                );
            }
        }

        if self.mode == MockMode::Realistic && !self.integration.is_zero() {
            sleep(self.integration).await;
        }

        let mut positions = Vec::with_capacity(self.linked.len());
        for stage in &self.linked {
            positions.push(stage.current().await);
        }

        let mut value = self.response.evaluate(&positions);
        if self.noise > 0.0 {
            value += rand::thread_rng().gen_range(-self.noise..self.noise);
        }

        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }
}
