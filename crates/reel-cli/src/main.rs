//! Reel command-line front end
//!
//! Drives the audio engine without a GUI:
//!
//! - `reel devices`: list backends and devices
//! - `reel play <file>`: stream a file through a playback bus
//! - `reel record <file>`: record a capture bus to a take
//! - `reel export <out> -i <file>...`: offline mixdown with optional normalization
//!
//! Settings come from `reel.yaml` in the user config directory; command-line
//! flags override the driver section.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use reel_core::audio::{available_backends, enumerate_devices, BackendKind, DeviceId};
use reel_core::codec::{DitherMode, SampleFormat};
use reel_core::config::{default_config_path, load_config, EngineConfig};
use reel_core::engine::{AudioDevice, DeviceEvent};
use reel_core::render::{ExportSpec, RenderEvent, RenderInput, RenderService};
use reel_core::stream::ReadSource;
use reel_core::BusRole;

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config: EngineConfig = load_config(&config_path);

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Play(args) => play(config, args),
        Commands::Record(args) => record(config, args),
        Commands::Export(args) => export(config, args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Real-time audio I/O engine for multitrack recording")]
struct Cli {
    /// Config file (defaults to reel.yaml in the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio backends and devices
    Devices,
    /// Play an audio file
    Play(PlayArgs),
    /// Record from the default input
    Record(RecordArgs),
    /// Mix files into one export file
    Export(ExportArgs),
}

#[derive(Args, Clone)]
struct DriverArgs {
    /// Audio backend
    #[arg(long, value_enum)]
    backend: Option<Backend>,
    /// Device name as shown by `reel devices`
    #[arg(long)]
    device: Option<String>,
    /// Session sample rate
    #[arg(long)]
    rate: Option<u32>,
    /// Frames per period
    #[arg(long)]
    period: Option<u32>,
}

#[derive(Args)]
struct PlayArgs {
    file: PathBuf,
    /// Start position in seconds
    #[arg(long, default_value_t = 0.0)]
    start: f64,
    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<f64>,
    #[command(flatten)]
    driver: DriverArgs,
}

#[derive(Args)]
struct RecordArgs {
    /// Take file to write (WAV)
    file: PathBuf,
    /// Recording length in seconds
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,
    /// Channels to record, starting at input 0
    #[arg(long, default_value_t = 2)]
    channels: usize,
    #[arg(long, value_enum)]
    format: Option<Format>,
    #[command(flatten)]
    driver: DriverArgs,
}

#[derive(Args)]
struct ExportArgs {
    /// Output file (WAV)
    output: PathBuf,
    /// Input file; append @SECONDS to place it on the timeline
    #[arg(short, long = "input", required = true)]
    inputs: Vec<String>,
    #[arg(long, default_value_t = 2)]
    channels: usize,
    /// Export sample rate (defaults to the configured session rate)
    #[arg(long)]
    rate: Option<u32>,
    #[arg(long, value_enum, default_value_t = Format::Float32)]
    format: Format,
    #[arg(long, value_enum, default_value_t = Dither::None)]
    dither: Dither,
    /// Normalize the peak to this level in dBFS
    #[arg(long, allow_hyphen_values = true)]
    normalize: Option<f32>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Null,
    Default,
    Alsa,
    Jack,
    Coreaudio,
    Wasapi,
    Asio,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Null => BackendKind::Null,
            Backend::Default => BackendKind::SystemDefault,
            Backend::Alsa => BackendKind::Alsa,
            Backend::Jack => BackendKind::Jack,
            Backend::Coreaudio => BackendKind::CoreAudio,
            Backend::Wasapi => BackendKind::Wasapi,
            Backend::Asio => BackendKind::Asio,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Float32,
    Int16,
    Int24,
}

impl From<Format> for SampleFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Float32 => SampleFormat::Float32,
            Format::Int16 => SampleFormat::Int16,
            Format::Int24 => SampleFormat::Int24,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Dither {
    None,
    Rectangular,
    Triangular,
    Shaped,
}

impl From<Dither> for DitherMode {
    fn from(dither: Dither) -> Self {
        match dither {
            Dither::None => DitherMode::None,
            Dither::Rectangular => DitherMode::Rectangular,
            Dither::Triangular => DitherMode::Triangular,
            Dither::Shaped => DitherMode::Shaped,
        }
    }
}

/// Apply command-line overrides to the configured driver section
fn apply_driver_args(config: &mut EngineConfig, args: &DriverArgs) {
    let driver = &mut config.driver;
    if let Some(backend) = args.backend {
        driver.backend = backend.into();
    }
    if let Some(device) = &args.device {
        driver.device = Some(DeviceId::new(device.clone()));
    }
    if let Some(rate) = args.rate {
        driver.sample_rate = rate;
    }
    if let Some(period) = args.period {
        driver.period_size = period;
    }
}

fn list_devices() -> Result<()> {
    println!("Backends:");
    for backend in available_backends() {
        println!("  {}", backend);
    }
    println!();
    println!("Devices:");
    let devices = enumerate_devices();
    if devices.is_empty() {
        println!("  (none found)");
    }
    for device in devices {
        println!("  {}", device);
    }
    Ok(())
}

fn open_device(config: EngineConfig) -> Result<AudioDevice> {
    let device = AudioDevice::new(config).context("failed to create audio device")?;
    let report = device.open_default().context("failed to open an audio backend")?;
    for attempt in &report.attempts {
        log::warn!("{} unavailable: {}", attempt.backend, attempt.error);
    }
    log::info!(
        "{} on {}: {}Hz, {} frames/period ({:.1}ms)",
        report.active,
        report.info.device_name,
        report.info.sample_rate,
        report.info.period_size,
        report.info.latency_ms()
    );
    Ok(device)
}

/// Log device events until `deadline`
fn pump_events(events: &Receiver<DeviceEvent>, deadline: Instant) {
    while Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(50)) {
            Ok(event @ DeviceEvent::Underrun { .. }) => log::debug!("{}", event),
            Ok(event @ (DeviceEvent::DriverOpened { .. } | DeviceEvent::Xrun { .. })) => log::info!("{}", event),
            Ok(event) => log::warn!("{}", event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn play(mut config: EngineConfig, args: PlayArgs) -> Result<()> {
    apply_driver_args(&mut config, &args.driver);
    let prebuffer = config.disk.prebuffer_secs;
    let device = open_device(config)?;
    let session = device.session().context("no session after open")?;

    let source = ReadSource::open(&args.file, prebuffer, session.sample_rate)
        .with_context(|| format!("cannot play {}", args.file.display()))?;
    let start_frame = (args.start * session.sample_rate as f64) as u64;
    let length_secs = source
        .frames()
        .map(|f| f.saturating_sub(start_frame) as f64 / session.sample_rate as f64);
    let seconds = match (args.seconds, length_secs) {
        (Some(s), _) => s,
        (None, Some(len)) => len,
        (None, None) => bail!("{}: length unknown, pass --seconds", args.file.display()),
    };

    let bus = device.create_bus("play", BusRole::Playback, source.channels())?;
    let ports: Vec<usize> = (0..session.playback_channels.max(1)).collect();
    device.bind_bus(bus, ports)?;
    if start_frame > 0 {
        source.seek(start_frame);
    }
    device.attach_playback(bus, source)?;
    device.start()?;

    println!("Playing {} for {:.1}s (Ctrl-C to stop)", args.file.display(), seconds);
    let events = device.events();
    pump_events(&events, Instant::now() + Duration::from_secs_f64(seconds));

    device.stop();
    println!("Underruns: {}", device.underruns(bus)?);
    Ok(())
}

fn record(mut config: EngineConfig, args: RecordArgs) -> Result<()> {
    apply_driver_args(&mut config, &args.driver);
    let format = args.format.map(SampleFormat::from).unwrap_or(config.recording.format);
    let device = open_device(config)?;
    let session = device.session().context("no session after open")?;
    if session.capture_channels == 0 {
        bail!("{} opened without capture; nothing to record", session.backend);
    }

    let channels = args.channels.clamp(1, session.capture_channels);
    let bus = device.create_bus("record", BusRole::Capture, channels)?;
    device.bind_bus(bus, (0..channels).collect())?;
    device.arm_capture(bus, &args.file, format)?;
    device.start()?;

    println!("Recording {} channel(s) for {:.1}s", channels, args.seconds);
    let events = device.events();
    pump_events(&events, Instant::now() + Duration::from_secs_f64(args.seconds));

    device.stop();
    let take = device.disarm_capture(bus)?;
    println!(
        "Wrote {} ({:.2}s, {} dropped period(s))",
        take.path.display(),
        take.duration_secs(),
        device.underruns(bus)?
    );
    Ok(())
}

/// `path` or `path@seconds`
fn parse_input(arg: &str, rate: u32) -> Result<RenderInput> {
    let (path, offset) = match arg.rsplit_once('@') {
        Some((path, secs)) => {
            let secs: f64 = secs
                .parse()
                .with_context(|| format!("invalid offset in '{}'", arg))?;
            (path, (secs.max(0.0) * rate as f64) as u64)
        }
        None => (arg, 0),
    };
    let input = RenderInput::open(Path::new(path), rate).with_context(|| format!("cannot read {}", path))?;
    Ok(input.at(offset))
}

fn export(config: EngineConfig, args: ExportArgs) -> Result<()> {
    let rate = args.rate.unwrap_or(config.driver.sample_rate);
    let inputs = args
        .inputs
        .iter()
        .map(|arg| parse_input(arg, rate))
        .collect::<Result<Vec<_>>>()?;

    let mut spec = ExportSpec::new(&args.output, args.channels, rate).with_format(args.format.into(), args.dither.into());
    if let Some(db) = args.normalize {
        spec = spec.with_normalize(db);
    }

    let mut service = RenderService::new();
    let events = service.start(spec, inputs).context("export rejected")?;
    let mut failed = None;
    for event in events.iter() {
        match &event {
            RenderEvent::Progress { .. } => log::debug!("{}", event),
            RenderEvent::Clipped { .. } => log::warn!("{}", event),
            RenderEvent::Failed { error } => failed = Some(error.clone()),
            _ => println!("{}", event),
        }
        if event.is_terminal() {
            break;
        }
    }
    service.wait();

    match failed {
        Some(error) => bail!("export failed: {}", error),
        None => Ok(()),
    }
}
