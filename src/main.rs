//! Cam-streamer binary: headless frame consumer.
//!
//! Opens the compiled driver when given one, falling back to the mock driver,
//! then polls the frame buffer and logs per-frame statistics.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use cam_streamer::buffer::FrameBufferDescriptor;
use cam_streamer::mock::{MockDriver, TestPattern};
use cam_streamer::native::{LegacyDriver, NativeDriver};
use cam_streamer::settings::StreamSettings;
use cam_streamer::{
    initialize, ConfigField, Configuration, DeviceHandle, Driver, GlobalSession,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cam-streamer", about = "Stream frames from a camera/LED driver")]
struct Cli {
    /// Path to YAML settings file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the compiled driver library
    #[arg(short, long, value_name = "LIB")]
    library: Option<PathBuf>,

    /// Treat the library as the global-singleton API generation
    #[arg(long, requires = "library")]
    legacy: bool,

    /// Enable verbose driver and log output
    #[arg(short, long)]
    verbose: bool,

    /// Override the input channel
    #[arg(long)]
    channel: Option<u32>,

    /// Number of frames to read before stopping
    #[arg(long, default_value_t = 300)]
    frames: u64,

    /// Delay between reads
    #[arg(long, value_parser = humantime::parse_duration, default_value = "33ms")]
    interval: Duration,

    /// Mock driver frame width
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Mock driver frame height
    #[arg(long, default_value_t = 480)]
    height: u32,
}

struct Plan {
    configuration: Configuration,
    channel: u32,
    frames: u64,
    interval: Duration,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => StreamSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => StreamSettings::default(),
    };
    let verbose = cli.verbose || settings.verbose;
    init_tracing(verbose);

    let plan = Plan {
        configuration: settings
            .configuration()
            .context("validating settings")?
            .with_verbose(verbose),
        channel: cli.channel.unwrap_or(settings.channel),
        frames: cli.frames,
        interval: cli.interval,
    };

    match cli.library.as_deref() {
        Some(path) if cli.legacy => match LegacyDriver::load(path)
            .map_err(anyhow::Error::from)
            .and_then(|driver| Ok(GlobalSession::initialize(driver, verbose)?))
        {
            Ok((mut session, descriptor)) => return consume(&mut *session, descriptor, &plan),
            Err(err) => warn!(error = %err, "legacy driver unavailable, using mock driver"),
        },
        Some(path) => match NativeDriver::load(path)
            .map_err(anyhow::Error::from)
            .and_then(|driver| Ok(initialize(driver, verbose)?))
        {
            Ok((mut handle, descriptor)) => return consume(&mut handle, descriptor, &plan),
            Err(err) => warn!(error = %err, "native driver unavailable, using mock driver"),
        },
        None => {}
    }

    let driver = MockDriver::new()
        .with_geometry(cli.width, cli.height)
        .with_pattern(TestPattern::Noise);
    let (mut handle, descriptor) = initialize(driver, verbose).context("initializing mock driver")?;
    consume(&mut handle, descriptor, &plan)
}

/// Apply `config`, logging fields the driver rejects instead of aborting.
fn apply<D: Driver>(handle: &mut DeviceHandle<D>, config: &Configuration) -> Vec<ConfigField> {
    match handle.configure(config) {
        Ok(applied) => applied,
        Err(err) => {
            for failure in &err.errors {
                warn!(error = %failure, "configuration field not applied");
            }
            err.applied
        }
    }
}

fn consume<D: Driver>(
    handle: &mut DeviceHandle<D>,
    descriptor: FrameBufferDescriptor,
    plan: &Plan,
) -> Result<()> {
    info!(
        width = descriptor.width(),
        height = descriptor.height(),
        driver = %handle.capabilities().driver,
        "device ready"
    );

    // Fields only accepted while running are applied on the second pass.
    apply(handle, &plan.configuration);
    handle.start(plan.channel).context("starting stream")?;
    let applied = apply(handle, &plan.configuration);
    info!(channel = plan.channel, ?applied, "stream started");

    for _ in 0..plan.frames {
        let snapshot = handle.read().context("reading frame")?.snapshot();
        let [c0, c1, c2] = snapshot.mean_channels();
        info!(
            generation = snapshot.generation(),
            verified = snapshot.is_verified(),
            c0 = format_args!("{c0:.1}"),
            c1 = format_args!("{c1:.1}"),
            c2 = format_args!("{c2:.1}"),
            "frame"
        );
        thread::sleep(plan.interval);
    }

    handle.stop().context("stopping stream")?;
    info!("stream stopped");
    Ok(())
}
