//! Axis and plan descriptors.
//!
//! A [`SweepPlan`] is what the caller hands to the worker: the swept axes in
//! order (axis 0 is the slowest, the last axis the fastest), the output
//! channels measured at every grid point, and the scan options.
//!
//! # Example
//!
//! ```
//! use sweep_core::axis::{Axis, OutputChannel, SweepPlan, SweptAxis};
//!
//! let plan = SweepPlan::new(
//!     vec![
//!         SweptAxis::new("gate", Axis::new(-1.0, 1.0, 21)),
//!         SweptAxis::new("bias", Axis::new(0.0, 0.5, 11)),
//!     ],
//!     vec![OutputChannel::new("dmm1")],
//! )
//! .with_alternate(true);
//!
//! assert!(plan.validate().is_ok());
//! assert_eq!(plan.total_points(), 231);
//! assert!(plan.live_view_enabled());
//! ```

use crate::error::{SweepError, SweepResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Maximum number of swept axes for which live buffers are kept.
pub const MAX_LIVE_AXES: usize = 2;

/// Largest live buffer, in cells per channel (128 MiB of `f64`).
pub const MAX_LIVE_CELLS: u64 = 1 << 24;

/// One linearly swept parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// First set point
    pub start: f64,
    /// Last set point
    pub stop: f64,
    /// Number of set points, including both ends
    #[serde(rename = "points")]
    pub point_count: usize,
}

impl Axis {
    /// Create a new axis.
    pub fn new(start: f64, stop: f64, point_count: usize) -> Self {
        Self {
            start,
            stop,
            point_count,
        }
    }

    /// True when the axis ramps downwards (`stop < start`).
    pub fn is_reversed(&self) -> bool {
        self.stop < self.start
    }

    /// Distance between two consecutive set points.
    ///
    /// A single-point axis has a step of zero.
    pub fn step(&self) -> f64 {
        if self.point_count <= 1 {
            0.0
        } else {
            (self.stop - self.start) / (self.point_count - 1) as f64
        }
    }

    /// Set point at `index` (0 is `start`).
    pub fn value_at(&self, index: usize) -> f64 {
        if index + 1 == self.point_count {
            // exact endpoint, no accumulated rounding
            self.stop
        } else {
            self.start + self.step() * index as f64
        }
    }

    /// All set points from `start` to `stop`.
    pub fn values(&self) -> Vec<f64> {
        (0..self.point_count).map(|i| self.value_at(i)).collect()
    }

    /// Reject empty, degenerate or non-finite axes; `name` is used in the error.
    pub fn validate(&self, name: &str) -> SweepResult<()> {
        let invalid = |reason: &str| SweepError::InvalidAxis {
            axis: name.to_string(),
            reason: reason.to_string(),
        };
        if self.point_count == 0 {
            return Err(invalid("point count must be at least 1"));
        }
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(invalid("start and stop must be finite"));
        }
        if self.start == self.stop {
            return Err(invalid("start equals stop"));
        }
        Ok(())
    }
}

/// A swept device: a named axis plus what to do with it when the sweep ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweptAxis {
    /// Device name
    pub name: String,
    /// Sweep bounds
    #[serde(flatten)]
    pub axis: Axis,
    /// Move back to `rest_value` once the sweep has ended
    #[serde(default)]
    pub rest_on_end: bool,
    /// Value applied when `rest_on_end` is set
    #[serde(default)]
    pub rest_value: f64,
}

impl SweptAxis {
    /// Create a swept axis that stays where the sweep leaves it.
    pub fn new(name: impl Into<String>, axis: Axis) -> Self {
        Self {
            name: name.into(),
            axis,
            rest_on_end: false,
            rest_value: 0.0,
        }
    }

    /// Return to `value` when the sweep ends, whatever the outcome.
    pub fn with_rest(mut self, value: f64) -> Self {
        self.rest_on_end = true;
        self.rest_value = value;
        self
    }
}

/// A measured output channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputChannel {
    /// Channel name
    pub name: String,
}

impl OutputChannel {
    /// Create a channel descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Everything the worker needs to know about one sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    /// Swept axes, slowest first
    pub axes: Vec<SweptAxis>,
    /// Channels read at every grid point, in reading order
    pub channels: Vec<OutputChannel>,
    /// Snake ordering: faster axes reverse on every other pass
    pub alternate: bool,
    /// Delay between setting the axes and reading the channels
    pub settle: Duration,
}

impl SweepPlan {
    /// Create a raster plan with no settle delay.
    pub fn new(axes: Vec<SweptAxis>, channels: Vec<OutputChannel>) -> Self {
        Self {
            axes,
            channels,
            alternate: false,
            settle: Duration::ZERO,
        }
    }

    /// Enable or disable snake ordering.
    pub fn with_alternate(mut self, alternate: bool) -> Self {
        self.alternate = alternate;
        self
    }

    /// Set the per-point settle delay.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Number of grid points (product of all point counts).
    ///
    /// Saturates at `u64::MAX`; [`SweepPlan::validate`] rejects such plans.
    pub fn total_points(&self) -> u64 {
        self.checked_total_points().unwrap_or(u64::MAX)
    }

    /// Number of grid points, or `None` if the product overflows `u64`.
    pub fn checked_total_points(&self) -> Option<u64> {
        self.axes.iter().try_fold(1u64, |acc, swept| {
            acc.checked_mul(swept.axis.point_count as u64)
        })
    }

    /// Live buffers are kept only for 1-D and 2-D sweeps.
    pub fn live_view_enabled(&self) -> bool {
        !self.axes.is_empty() && self.axes.len() <= MAX_LIVE_AXES
    }

    /// Channel names in reading order.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Reject plans the engine cannot run.
    pub fn validate(&self) -> SweepResult<()> {
        if self.axes.is_empty() {
            return Err(SweepError::InvalidPlan(
                "at least one swept axis is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for swept in &self.axes {
            swept.axis.validate(&swept.name)?;
            if !names.insert(swept.name.as_str()) {
                return Err(SweepError::InvalidPlan(format!(
                    "axis '{}' is swept twice",
                    swept.name
                )));
            }
            if swept.rest_on_end && !swept.rest_value.is_finite() {
                return Err(SweepError::InvalidAxis {
                    axis: swept.name.clone(),
                    reason: "rest value must be finite".to_string(),
                });
            }
        }

        let mut channels = HashSet::new();
        for channel in &self.channels {
            if !channels.insert(channel.name.as_str()) {
                return Err(SweepError::InvalidPlan(format!(
                    "output channel '{}' is listed twice",
                    channel.name
                )));
            }
        }

        let total = self.checked_total_points().ok_or_else(|| {
            SweepError::InvalidPlan("grid size overflows the point counter".to_string())
        })?;
        if self.live_view_enabled() && total > MAX_LIVE_CELLS {
            return Err(SweepError::InvalidPlan(format!(
                "live view of {} cells exceeds the limit of {} per channel",
                total, MAX_LIVE_CELLS
            )));
        }

        if self.channels.is_empty() {
            tracing::warn!("Sweep plan has no output channel, nothing will be measured");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(axes: Vec<SweptAxis>) -> SweepPlan {
        SweepPlan::new(axes, vec![OutputChannel::new("dmm1")])
    }

    #[test]
    fn test_axis_values() {
        let axis = Axis::new(0.0, 1.0, 5);
        assert_eq!(axis.values(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(axis.step(), 0.25);
        assert!(!axis.is_reversed());

        let down = Axis::new(2.0, -2.0, 3);
        assert_eq!(down.values(), vec![2.0, 0.0, -2.0]);
        assert!(down.is_reversed());

        let single = Axis::new(3.0, 4.0, 1);
        assert_eq!(single.values(), vec![3.0]);
        assert_eq!(single.step(), 0.0);
    }

    #[test]
    fn test_total_points_and_live_view() {
        let p = plan(vec![SweptAxis::new("x", Axis::new(0.0, 1.0, 4))]);
        assert_eq!(p.total_points(), 4);
        assert!(p.live_view_enabled());

        let p = plan(vec![
            SweptAxis::new("x", Axis::new(0.0, 1.0, 4)),
            SweptAxis::new("y", Axis::new(0.0, 1.0, 3)),
            SweptAxis::new("z", Axis::new(0.0, 1.0, 2)),
        ]);
        assert_eq!(p.total_points(), 24);
        assert!(!p.live_view_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_plans() {
        assert!(matches!(
            plan(vec![]).validate(),
            Err(SweepError::InvalidPlan(_))
        ));

        let zero = plan(vec![SweptAxis::new("x", Axis::new(0.0, 1.0, 0))]);
        assert!(matches!(zero.validate(), Err(SweepError::InvalidAxis { .. })));

        let flat = plan(vec![SweptAxis::new("x", Axis::new(1.0, 1.0, 5))]);
        assert!(matches!(flat.validate(), Err(SweepError::InvalidAxis { .. })));

        let nan = plan(vec![SweptAxis::new("x", Axis::new(f64::NAN, 1.0, 5))]);
        assert!(matches!(nan.validate(), Err(SweepError::InvalidAxis { .. })));

        let twice = plan(vec![
            SweptAxis::new("x", Axis::new(0.0, 1.0, 2)),
            SweptAxis::new("x", Axis::new(0.0, 1.0, 2)),
        ]);
        assert!(matches!(twice.validate(), Err(SweepError::InvalidPlan(_))));

        let dup_channels = SweepPlan::new(
            vec![SweptAxis::new("x", Axis::new(0.0, 1.0, 2))],
            vec![OutputChannel::new("a"), OutputChannel::new("a")],
        );
        assert!(matches!(
            dup_channels.validate(),
            Err(SweepError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_grids() {
        let huge = plan(
            (0..3)
                .map(|i| SweptAxis::new(format!("a{i}"), Axis::new(0.0, 1.0, 1 << 22)))
                .collect(),
        );
        assert_eq!(huge.checked_total_points(), None);
        assert_eq!(huge.total_points(), u64::MAX);
        assert!(matches!(huge.validate(), Err(SweepError::InvalidPlan(_))));

        let wide = plan(vec![
            SweptAxis::new("x", Axis::new(0.0, 1.0, 1 << 13)),
            SweptAxis::new("y", Axis::new(0.0, 1.0, (1 << 11) + 1)),
        ]);
        assert!(matches!(wide.validate(), Err(SweepError::InvalidPlan(_))));

        // beyond two axes nothing is buffered, so only overflow matters
        let deep = plan(
            (0..3)
                .map(|i| SweptAxis::new(format!("a{i}"), Axis::new(0.0, 1.0, 1 << 10)))
                .collect(),
        );
        assert_eq!(deep.checked_total_points(), Some(1 << 30));
        assert!(deep.validate().is_ok());
    }

    #[test]
    fn test_validate_allows_no_channels() {
        let p = SweepPlan::new(vec![SweptAxis::new("x", Axis::new(0.0, 1.0, 2))], vec![]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_swept_axis_deserializes_flat() {
        let swept: SweptAxis = serde_json::from_str(
            r#"{"name": "gate", "start": 0.0, "stop": -1.0, "points": 11, "rest_on_end": true}"#,
        )
        .unwrap();
        assert_eq!(swept.axis, Axis::new(0.0, -1.0, 11));
        assert!(swept.rest_on_end);
        assert_eq!(swept.rest_value, 0.0);
    }
}
