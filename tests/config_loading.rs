use serial_test::serial;
use std::io::Write;
use std::path::Path;
use sweep_core::{SweepError, SweepStatus};
use sweep_engine::{SweepWorker, WorkerState};
use sweeplab::config::SweeplabConfig;
use sweeplab::rig::MockRig;
use sweeplab::telemetry::OutputFormat;
use tempfile::NamedTempFile;

const SMALL: &str = r#"
[application]
name = "test bench"
log_level = "warn"
log_format = "json"

[engine]
poll_interval_ms = 5
alternate = true

[[sweep.axes]]
name = "x"
start = 0.0
stop = 1.0
points = 3
rest_on_end = true
rest_value = 0.5

[sweep.axes.stage]
speed = 1000.0
settling_ms = 0

[[sweep.axes]]
name = "y"
start = 2.0
stop = 0.0
points = 2

[sweep.axes.stage]
speed = 1000.0
settling_ms = 0

[[sweep.channels]]
name = "sum"

[sweep.channels.meter.response]
kind = "linear"
offset = 0.0
slope = 1.0
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn load(path: &Path) -> SweeplabConfig {
    SweeplabConfig::load_from(path).unwrap()
}

#[test]
#[serial]
fn test_load_from_file() {
    let file = write_config(SMALL);
    let config = load(file.path());

    assert_eq!(config.application.name, "test bench");
    assert_eq!(config.application.log_format, OutputFormat::Json);
    assert_eq!(config.engine.poll_interval_ms, 5);
    assert_eq!(config.engine.settle_ms, 0);
    assert_eq!(config.video.min_frame_ms, 100);
    assert_eq!(config.sweep.axes.len(), 2);
    assert_eq!(config.sweep.axes[1].stage.speed, 10.0);
    assert!(config.validate().is_ok());

    let plan = config.to_plan();
    assert_eq!(plan.total_points(), 6);
    assert!(plan.alternate);
    assert!(plan.axes[1].axis.is_reversed());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(SMALL);
    std::env::set_var("SWEEPLAB_APPLICATION__LOG_LEVEL", "debug");
    std::env::set_var("SWEEPLAB_ENGINE__ALTERNATE", "false");
    let config = SweeplabConfig::load_from(file.path());
    std::env::remove_var("SWEEPLAB_APPLICATION__LOG_LEVEL");
    std::env::remove_var("SWEEPLAB_ENGINE__ALTERNATE");

    let config = config.unwrap();
    assert_eq!(config.application.log_level, "debug");
    assert!(!config.engine.alternate);
}

#[test]
#[serial]
fn test_missing_sections_fail_to_load() {
    let file = write_config("[application]\nname = \"x\"\n");
    assert!(SweeplabConfig::load_from(file.path()).is_err());
}

#[test]
#[serial]
fn test_invalid_sweep_rejected_by_validate() {
    let file = write_config(&SMALL.replace("points = 3", "points = 0"));
    let config = load(file.path());
    assert!(matches!(
        config.validate(),
        Err(SweepError::InvalidAxis { ref axis, .. }) if axis == "x"
    ));
}

#[test]
#[serial]
fn test_infinite_meter_noise_rejected_by_validate() {
    let file = write_config(&SMALL.replace(
        "[sweep.channels.meter.response]",
        "[sweep.channels.meter]\nnoise = inf\n\n[sweep.channels.meter.response]",
    ));
    let config = load(file.path());
    assert!(config.sweep.channels[0].meter.noise.is_infinite());
    assert!(matches!(
        config.validate(),
        Err(SweepError::Configuration(ref msg)) if msg.contains("sum")
    ));
}

#[tokio::test]
#[serial]
async fn test_configured_rig_runs_sweep() {
    let file = write_config(SMALL);
    let config = load(file.path());
    let rig = MockRig::from_config(&config);

    let (worker, mut events) = SweepWorker::with_channel();
    worker.configure(rig.sweep_request(&config)).unwrap();
    worker.start().unwrap();
    assert_eq!(worker.wait().await, WorkerState::Finished);

    let mut status = None;
    while let Ok(event) = events.try_recv() {
        if let sweep_core::SweepEvent::Finished(outcome) = event {
            status = Some(outcome.status);
        }
    }
    assert_eq!(status, Some(SweepStatus::Completed));

    let view = worker.live_view("sum").unwrap();
    assert_eq!(view.shape(), (3, 2));
    assert_eq!(view.columns(), vec![vec![0.0, 2.0], vec![0.5, 2.5], vec![1.0, 3.0]]);
    assert_eq!(rig.stages[0].current().await, 0.5);
}
