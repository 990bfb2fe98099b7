//! Simulated instrument rig built from configuration.
//!
//! One [`MockStage`] per swept axis and one [`MockMeter`] per channel. Every
//! meter is linked to every stage, so readings depend on the whole set point.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use sweep_core::{Movable, Readable};
use sweep_driver_mock::{MockMeter, MockStage};
use sweep_engine::{GridRoutine, SweepRequest, VideoSetup};

use crate::config::SweeplabConfig;

/// Mock devices for one configuration.
pub struct MockRig {
    /// Set-point devices, in axis order
    pub stages: Vec<Arc<MockStage>>,
    /// Readout devices, in channel order
    pub meters: Vec<Arc<MockMeter>>,
}

impl MockRig {
    /// Build the devices described by `config`.
    pub fn from_config(config: &SweeplabConfig) -> Self {
        let stages: Vec<Arc<MockStage>> = config
            .sweep
            .axes
            .iter()
            .map(|def| Arc::new(MockStage::with_config(&def.name, def.stage.clone())))
            .collect();
        let meters = config
            .sweep
            .channels
            .iter()
            .map(|def| {
                Arc::new(
                    MockMeter::with_config(&def.name, def.meter.clone()).linked_to(stages.clone()),
                )
            })
            .collect();
        Self { stages, meters }
    }

    fn setters(&self) -> Vec<Arc<dyn Movable>> {
        self.stages
            .iter()
            .map(|s| s.clone() as Arc<dyn Movable>)
            .collect()
    }

    fn outputs(&self) -> Vec<Arc<dyn Readable>> {
        self.meters
            .iter()
            .map(|m| m.clone() as Arc<dyn Readable>)
            .collect()
    }

    /// Grid sweep over the whole rig, with rest-on-end cleanup.
    pub fn sweep_request(&self, config: &SweeplabConfig) -> SweepRequest {
        let plan = config.to_plan();
        let routine = GridRoutine::new(self.setters(), self.outputs())
            .with_poll_interval(config.poll_interval());
        let hook = routine.rest_hook(&plan);
        SweepRequest::new(plan, Arc::new(routine)).with_optional_cleanup(hook)
    }

    /// Video mode over the first two axes and the first channel.
    pub fn video_setup(&self, config: &SweeplabConfig) -> Result<VideoSetup> {
        let axes = &config.sweep.axes;
        if axes.len() < 2 || self.meters.is_empty() {
            bail!(
                "Video mode needs two swept axes and one channel, got {} axes and {} channels",
                axes.len(),
                self.meters.len()
            );
        }
        let plan = config.to_plan();
        let mut setup = VideoSetup::new(
            self.stages[0].clone(),
            self.stages[1].clone(),
            self.meters[0].clone(),
            &config.sweep.channels[0].name,
            plan.axes[0].axis,
            plan.axes[1].axis,
        )
        .with_min_frame_period(Duration::from_millis(config.video.min_frame_ms));
        setup.poll_interval = config.poll_interval();
        Ok(setup)
    }
}
