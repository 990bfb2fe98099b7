//! Per-sample data and progress snapshots.
//!
//! A step routine hands one [`Sample`] to the worker per grid point. The
//! worker wraps it in a [`SweepProgress`] and publishes it. The snapshot is
//! moved into the notification, so the worker cannot touch it afterwards.

use crate::axis::SweptAxis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// One measured grid point as reported by the step routine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Set points of the swept axes, in axis order
    pub positions: Vec<f64>,
    /// Values read from the output channels, in channel order
    pub readings: Vec<f64>,
    /// Routine-specific extras (timestamps, secondary readings, ...)
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Sample {
    /// Create a sample from axis positions and channel readings.
    pub fn new(positions: Vec<f64>, readings: Vec<f64>) -> Self {
        Self {
            positions,
            readings,
            extra: Map::new(),
        }
    }

    /// Attach an extra value.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Immutable snapshot published after every grid point.
#[derive(Debug, Clone)]
pub struct SweepProgress {
    /// Identifier of the sweep this snapshot belongs to
    pub run_uid: String,
    /// 1-based index of the point just measured
    pub iteration_index: u64,
    /// Number of points in the full grid
    pub iteration_total: u64,
    /// Wall-clock time the sweep was started
    pub started_at: DateTime<Utc>,
    /// Time since the sweep started
    pub elapsed: Duration,
    /// Swept axes of this sweep
    pub axes: Arc<[SweptAxis]>,
    /// Output channel names, matching `sample.readings`
    pub channels: Arc<[String]>,
    /// The sample as reported by the routine
    pub sample: Sample,
}

impl SweepProgress {
    /// Completed fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.iteration_total == 0 {
            return 0.0;
        }
        (self.iteration_index as f64 / self.iteration_total as f64).min(1.0)
    }

    /// Remaining time extrapolated from the mean time per point so far.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        if self.iteration_index == 0 {
            return None;
        }
        let remaining = self.iteration_total.saturating_sub(self.iteration_index);
        let per_point = self.elapsed.as_secs_f64() / self.iteration_index as f64;
        Some(Duration::from_secs_f64(per_point * remaining as f64))
    }

    /// True for the snapshot of the last grid point.
    pub fn is_last(&self) -> bool {
        self.iteration_index >= self.iteration_total
    }

    /// Reading of `channel` in this sample.
    pub fn reading(&self, channel: &str) -> Option<f64> {
        self.channels
            .iter()
            .position(|c| c == channel)
            .and_then(|i| self.sample.readings.get(i).copied())
    }

    /// Flat key/value view of the sample.
    ///
    /// Contains `iter_part`, `iter_total`, `set_vals`, `read_vals`, one
    /// entry per axis and per channel name, and the routine's extras.
    pub fn raw_sample(&self) -> Map<String, Value> {
        let mut raw = Map::new();
        raw.insert("iter_part".into(), self.iteration_index.into());
        raw.insert("iter_total".into(), self.iteration_total.into());
        raw.insert("set_vals".into(), self.sample.positions.clone().into());
        raw.insert("read_vals".into(), self.sample.readings.clone().into());
        for (axis, value) in self.axes.iter().zip(&self.sample.positions) {
            raw.insert(axis.name.clone(), (*value).into());
        }
        for (channel, value) in self.channels.iter().zip(&self.sample.readings) {
            raw.insert(channel.clone(), (*value).into());
        }
        for (key, value) in &self.sample.extra {
            raw.insert(key.clone(), value.clone());
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;

    fn progress(index: u64, total: u64, elapsed: Duration) -> SweepProgress {
        SweepProgress {
            run_uid: "run-1".into(),
            iteration_index: index,
            iteration_total: total,
            started_at: Utc::now(),
            elapsed,
            axes: vec![SweptAxis::new("gate", Axis::new(0.0, 1.0, 10))].into(),
            channels: vec!["dmm1".to_string(), "dmm2".to_string()].into(),
            sample: Sample::new(vec![0.5], vec![1.25, -3.0]).with_extra("temperature", 4.2),
        }
    }

    #[test]
    fn test_fraction_and_eta() {
        let p = progress(4, 10, Duration::from_secs(8));
        assert!((p.fraction() - 0.4).abs() < 1e-12);
        assert_eq!(p.estimated_remaining(), Some(Duration::from_secs(12)));
        assert!(!p.is_last());

        let last = progress(10, 10, Duration::from_secs(20));
        assert!(last.is_last());
        assert_eq!(last.estimated_remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_raw_sample_contents() {
        let raw = progress(3, 10, Duration::from_secs(1)).raw_sample();
        assert_eq!(raw["iter_part"], 3);
        assert_eq!(raw["iter_total"], 10);
        assert_eq!(raw["gate"], 0.5);
        assert_eq!(raw["dmm1"], 1.25);
        assert_eq!(raw["dmm2"], -3.0);
        assert_eq!(raw["temperature"], 4.2);
        assert_eq!(raw["read_vals"], serde_json::json!([1.25, -3.0]));
    }

    #[test]
    fn test_reading_by_channel() {
        let p = progress(1, 10, Duration::ZERO);
        assert_eq!(p.reading("dmm2"), Some(-3.0));
        assert_eq!(p.reading("missing"), None);
    }
}
