//! Grid step routine driving `Movable` set points and `Readable` outputs.
//!
//! Visits every point of an N-dimensional grid, slowest axis first. Only the
//! axes whose index changed since the previous point are moved, so on a 2-D
//! raster the slow axis moves once per column.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use sweep_core::{
    LoopControl, LoopDecision, Movable, Readable, Sample, SweepPlan, DEFAULT_POLL_INTERVAL,
};
use tracing::{debug, info, warn};

use crate::routine::{CleanupHook, SampleSink, StepRoutine};

/// Iterator over grid index tuples in sweep order.
///
/// Axis 0 is the slowest. With `alternate`, every faster axis reverses on
/// each pass of the axis above it, so consecutive points differ by one step
/// along a single axis.
#[derive(Debug, Clone)]
pub struct GridPoints {
    counts: Vec<usize>,
    strides: Vec<u64>,
    alternate: bool,
    next: u64,
    total: u64,
}

impl GridPoints {
    /// Iterate over a grid with the given per-axis point counts.
    pub fn new(counts: Vec<usize>, alternate: bool) -> Self {
        let mut strides = vec![1u64; counts.len()];
        for k in (0..counts.len().saturating_sub(1)).rev() {
            strides[k] = strides[k + 1] * counts[k + 1] as u64;
        }
        let total = if counts.is_empty() {
            0
        } else {
            counts.iter().map(|&n| n as u64).product()
        };
        Self {
            counts,
            strides,
            alternate,
            next: 0,
            total,
        }
    }

    /// Iterate over the grid of `plan`.
    pub fn for_plan(plan: &SweepPlan) -> Self {
        Self::new(
            plan.axes.iter().map(|a| a.axis.point_count).collect(),
            plan.alternate,
        )
    }

    /// Index tuple of the `position`-th point.
    pub fn indices_at(&self, position: u64) -> Vec<usize> {
        self.counts
            .iter()
            .zip(&self.strides)
            .enumerate()
            .map(|(k, (&count, &stride))| {
                let digit = ((position / stride) % count as u64) as usize;
                let passes = position / (stride * count as u64);
                if self.alternate && k > 0 && passes % 2 == 1 {
                    count - 1 - digit
                } else {
                    digit
                }
            })
            .collect()
    }
}

impl Iterator for GridPoints {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let indices = self.indices_at(self.next);
        self.next += 1;
        Some(indices)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::try_from(self.total - self.next).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

/// Set the axes, wait, read the channels, record. Repeat.
pub struct GridRoutine {
    setters: Vec<Arc<dyn Movable>>,
    outputs: Vec<Arc<dyn Readable>>,
    poll_interval: Duration,
}

impl GridRoutine {
    /// One setter per swept axis and one output per channel, in plan order.
    pub fn new(setters: Vec<Arc<dyn Movable>>, outputs: Vec<Arc<dyn Readable>>) -> Self {
        Self {
            setters,
            outputs,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Poll interval while parked at a checkpoint.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Cleanup hook moving every `rest_on_end` axis of `plan` to its rest value.
    ///
    /// `None` when no axis asks to rest. Move failures are logged, not raised.
    pub fn rest_hook(&self, plan: &SweepPlan) -> Option<CleanupHook> {
        let targets: Vec<(String, Arc<dyn Movable>, f64)> = plan
            .axes
            .iter()
            .zip(&self.setters)
            .filter(|(swept, _)| swept.rest_on_end)
            .map(|(swept, setter)| (swept.name.clone(), setter.clone(), swept.rest_value))
            .collect();
        if targets.is_empty() {
            return None;
        }

        let targets = Arc::new(targets);
        let hook: CleanupHook = Arc::new(move || {
            let targets = targets.clone();
            async move {
                for (name, setter, value) in targets.iter() {
                    match setter.move_abs(*value).await {
                        Ok(()) => info!(axis = %name, value, "Axis returned to rest"),
                        Err(e) => warn!(axis = %name, value, "Failed to return axis to rest: {e:#}"),
                    }
                }
            }
            .boxed()
        });
        Some(hook)
    }
}

#[async_trait]
impl StepRoutine for GridRoutine {
    fn name(&self) -> &str {
        "grid"
    }

    async fn run(
        &self,
        plan: &SweepPlan,
        sink: &mut SampleSink,
        control: &LoopControl,
    ) -> anyhow::Result<()> {
        if self.setters.len() != plan.axes.len() {
            bail!(
                "Grid routine has {} set points for {} swept axes",
                self.setters.len(),
                plan.axes.len()
            );
        }
        if self.outputs.len() != plan.channels.len() {
            bail!(
                "Grid routine has {} outputs for {} channels",
                self.outputs.len(),
                plan.channels.len()
            );
        }

        let values: Vec<Vec<f64>> = plan.axes.iter().map(|a| a.axis.values()).collect();
        let mut previous: Option<Vec<usize>> = None;
        let mut moved = Vec::with_capacity(plan.axes.len());

        for indices in GridPoints::for_plan(plan) {
            if control.checkpoint(self.poll_interval).await == LoopDecision::Abort {
                info!(recorded = sink.recorded(), "Grid sweep aborted");
                return Ok(());
            }

            let positions: Vec<f64> = indices
                .iter()
                .enumerate()
                .map(|(k, &i)| values[k][i])
                .collect();

            moved.clear();
            for (k, setter) in self.setters.iter().enumerate() {
                if previous.as_ref().is_some_and(|p| p[k] == indices[k]) {
                    continue;
                }
                setter.move_abs(positions[k]).await.with_context(|| {
                    format!("setting '{}' to {}", plan.axes[k].name, positions[k])
                })?;
                moved.push(k);
            }
            for &k in &moved {
                self.setters[k]
                    .wait_settled()
                    .await
                    .with_context(|| format!("waiting for '{}' to settle", plan.axes[k].name))?;
            }
            if !plan.settle.is_zero() {
                tokio::time::sleep(plan.settle).await;
            }

            let mut readings = Vec::with_capacity(self.outputs.len());
            for (channel, output) in plan.channels.iter().zip(&self.outputs) {
                let value = output
                    .read()
                    .await
                    .with_context(|| format!("reading '{}'", channel.name))?;
                readings.push(value);
            }

            debug!(?indices, ?positions, "Grid point measured");
            sink.record(Sample::new(positions, readings));
            previous = Some(indices);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_order() {
        let points: Vec<_> = GridPoints::new(vec![2, 3], false).collect();
        assert_eq!(
            points,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2]
            ]
        );
    }

    #[test]
    fn test_snake_order_2d() {
        let points: Vec<_> = GridPoints::new(vec![3, 2], true).collect();
        assert_eq!(
            points,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![1, 1],
                vec![1, 0],
                vec![2, 0],
                vec![2, 1]
            ]
        );
    }

    #[test]
    fn test_snake_3d_moves_one_axis_per_step() {
        let points: Vec<_> = GridPoints::new(vec![2, 3, 2], true).collect();
        assert_eq!(points.len(), 12);
        for pair in points.windows(2) {
            let changed: Vec<usize> = (0..3).filter(|&k| pair[0][k] != pair[1][k]).collect();
            assert_eq!(changed.len(), 1, "{:?} -> {:?}", pair[0], pair[1]);
            let k = changed[0];
            assert_eq!(pair[0][k].abs_diff(pair[1][k]), 1);
        }
        let mut sorted = points.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 12);
    }

    #[test]
    fn test_empty_and_1d() {
        assert_eq!(GridPoints::new(vec![], false).count(), 0);
        let points: Vec<_> = GridPoints::new(vec![3], true).collect();
        assert_eq!(points, vec![vec![0], vec![1], vec![2]]);
        assert_eq!(GridPoints::new(vec![4, 5], false).size_hint(), (20, Some(20)));
    }
}
