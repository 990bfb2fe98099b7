//! CLI entry point for sweeplab
//!
//! Runs sweeps against the simulated rig described by the configuration:
//!
//! ```bash
//! sweeplab --config config/sweeplab.toml check
//! sweeplab run
//! sweeplab video --frames 50
//! ```
//!
//! Ctrl+C aborts a running sweep; the axes still return to rest.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sweep_core::{LiveView, SweepEvent, SweepProgress, SweepStatus};
use sweep_engine::{SweepWorker, VideoEvent, VideoMode};
use sweeplab::config::{SweeplabConfig, DEFAULT_CONFIG_PATH};
use sweeplab::rig::MockRig;
use sweeplab::telemetry;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "sweeplab")]
#[command(about = "Background multi-axis sweeps with live view", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured sweep once
    Run {
        /// Snake ordering, overriding the configuration
        #[arg(long)]
        alternate: bool,

        /// Leave the axes where the sweep ends
        #[arg(long)]
        no_rest: bool,
    },

    /// Repeat the first two axes as a 2-D frame
    Video {
        /// Frames to acquire (0 = until Ctrl+C), overriding the configuration
        #[arg(long)]
        frames: Option<u64>,
    },

    /// Validate the configuration and print the plan
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SweeplabConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    telemetry::init_from_config(&config).map_err(anyhow::Error::msg)?;
    config.validate()?;
    info!(name = %config.application.name, config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Commands::Run { alternate, no_rest } => {
            config.engine.alternate |= alternate;
            run_sweep(&config, no_rest).await
        }
        Commands::Video { frames } => {
            let frames = frames.unwrap_or(config.video.frames);
            run_video(&config, frames).await
        }
        Commands::Check => check(&config),
    }
}

fn check(config: &SweeplabConfig) -> Result<()> {
    let plan = config.to_plan();
    println!("Configuration OK: {}", config.application.name);
    for swept in &plan.axes {
        println!(
            "  axis    {:<12} {} -> {} ({} points){}",
            swept.name,
            swept.axis.start,
            swept.axis.stop,
            swept.axis.point_count,
            if swept.rest_on_end {
                format!(", rests at {}", swept.rest_value)
            } else {
                String::new()
            }
        );
    }
    for channel in &plan.channels {
        println!("  channel {}", channel.name);
    }
    println!(
        "  {} points, {} ordering, live view {}",
        plan.total_points(),
        if plan.alternate { "snake" } else { "raster" },
        if plan.live_view_enabled() { "on" } else { "off" }
    );
    Ok(())
}

async fn run_sweep(config: &SweeplabConfig, no_rest: bool) -> Result<()> {
    let rig = MockRig::from_config(config);
    let mut request = rig.sweep_request(config);
    if no_rest {
        request.on_sweep_end = None;
    }

    let (worker, mut events) = SweepWorker::with_channel();
    worker.configure(request)?;
    worker.start()?;

    let mut interrupted = false;
    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SweepEvent::Progress(progress)) => report_progress(&progress),
                Some(SweepEvent::Error(failure)) => error!("Sweep error: {failure}"),
                Some(SweepEvent::Finished(outcome)) => break outcome,
                Some(other) => info!(event = other.kind(), "Sweep event"),
                None => bail!("Sweep worker closed its event channel"),
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupt received, aborting sweep");
                worker.request_abort();
                interrupted = true;
            }
        }
    };

    println!(
        "Sweep {} {}: {} of {} points in {:.2?}",
        outcome.run_uid, outcome.status, outcome.samples, outcome.iteration_total, outcome.elapsed
    );
    for view in worker.live_views() {
        print_view(&view);
    }

    if outcome.status == SweepStatus::Failed {
        bail!(
            "Sweep failed after {} of {} points",
            outcome.samples,
            outcome.iteration_total
        );
    }
    Ok(())
}

fn report_progress(progress: &SweepProgress) {
    let step = (progress.iteration_total / 10).max(1);
    if progress.iteration_index % step == 0 || progress.is_last() {
        info!(
            point = progress.iteration_index,
            total = progress.iteration_total,
            percent = (progress.fraction() * 100.0).round() as u64,
            eta = ?progress.estimated_remaining(),
            "Sweep progress"
        );
    } else {
        debug!(
            point = progress.iteration_index,
            positions = ?progress.sample.positions,
            readings = ?progress.sample.readings,
            "Sweep progress"
        );
    }
}

fn print_view(view: &LiveView) {
    let (cols, rows) = view.shape();
    println!("{} ({} x {}, {} filled)", view.channel(), cols, rows, view.filled());
    for (col, values) in view.columns().iter().enumerate() {
        let line: Vec<String> = values.iter().map(|v| format!("{v:>9.4}")).collect();
        println!("  [{col:>3}] {}", line.join(" "));
    }
}

async fn run_video(config: &SweeplabConfig, frames: u64) -> Result<()> {
    let rig = MockRig::from_config(config);
    let (video, mut events) = VideoMode::new(rig.video_setup(config)?)?;
    video.start()?;

    let mut interrupted = false;
    let mut failed = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(VideoEvent::FrameDone { frame, elapsed, view }) => {
                    info!(frame, elapsed_ms = elapsed.as_millis() as u64, filled = view.filled(), "Frame done");
                    if frames > 0 && frame >= frames {
                        video.stop();
                    }
                }
                Some(VideoEvent::Error(failure)) => {
                    error!("Video error: {failure}");
                    failed = true;
                }
                Some(VideoEvent::Stopped { frames }) => {
                    info!(frames, "Video stopped");
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupt received, stopping video");
                video.stop();
                interrupted = true;
            }
        }
    }
    video.wait().await;

    if let Some(view) = video.live_view() {
        print_view(&view);
    }
    if failed {
        bail!("Video mode stopped on error");
    }
    Ok(())
}
