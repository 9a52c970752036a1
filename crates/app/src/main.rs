use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use rodent_repeller_core::{
    null_output, AudioConfig, CaptureBuffer, EngineConfig, FrequencyRange, OutputFactory,
    PatternKind, Repeller, RepellerError, Settings, SignalEngine, SimulatedClock, SystemClock,
    TimeOfDay, WallClock, Waveform,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_SETTINGS: &str = "repeller-settings.json";

fn main() -> rodent_repeller_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Patterns => {
            list_patterns();
            Ok(())
        }
        Commands::Render(args) => run_render(&args),
        Commands::Simulate(args) => run_simulate(&args),
        Commands::Settings { action } => match action {
            SettingsAction::Show { settings } => show_settings(&settings),
            SettingsAction::Reset { settings } => reset_settings(&settings),
        },
    }
}

fn list_patterns() {
    for kind in PatternKind::ALL {
        println!(
            "{:>2}  {:<17} {:<17} {}",
            kind.index(),
            kind.id(),
            kind.name(),
            kind.description()
        );
    }
}

fn run_render(args: &RenderArgs) -> rodent_repeller_core::Result<()> {
    let audio = AudioConfig {
        sample_rate: args.sample_rate,
        ..AudioConfig::default()
    };
    let engine_config = EngineConfig {
        volume: args.volume,
        frequency_range: FrequencyRange::new(args.min, args.max),
        waveform: args.waveform,
    };
    let settings = Settings {
        engine: engine_config,
        pattern_index: args.pattern.index(),
        advanced_mode: true,
        ..Settings::default()
    };

    let capture = CaptureBuffer::new();
    let engine = build_engine(audio.clone(), capture.factory(), args.seed);
    let clock = SimulatedClock {
        origin: TimeOfDay::from_minutes(0),
    };
    let mut repeller = Repeller::new(settings, engine, Box::new(clock));

    tracing::info!(pattern = args.pattern.id(), seconds = args.seconds, "rendering");
    repeller.activate()?;
    repeller.advance(args.seconds);
    let spectrum = repeller.frequency_data()?;
    repeller.deactivate();

    let samples = capture.take()?;
    write_wav(&args.output, audio.sample_rate, &samples)?;

    let loudest_bin = spectrum
        .iter()
        .enumerate()
        .max_by_key(|(_, level)| **level)
        .map(|(bin, _)| bin)
        .unwrap_or(0);
    let bin_hz = audio.sample_rate as f32 / audio.fft_size as f32;
    tracing::info!(
        output = %args.output.display(),
        samples = samples.len(),
        peak_hz = loudest_bin as f32 * bin_hz,
        "render finished"
    );
    Ok(())
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> rodent_repeller_core::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
    for &sample in samples {
        let sample = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)
}

fn wav_error(err: hound::Error) -> RepellerError {
    RepellerError::msg(format!("failed to write wav: {err}"))
}

fn run_simulate(args: &SimulateArgs) -> rodent_repeller_core::Result<()> {
    let settings = load_settings(&args.settings)?;
    let start = match &args.start {
        Some(start) => start.parse::<TimeOfDay>()?,
        None => SystemClock.time_of_day(0.0),
    };
    let audio = AudioConfig {
        sample_rate: args.sample_rate,
        fft_size: 256,
        ..AudioConfig::default()
    };
    let engine = build_engine(audio, null_output(), Some(1));
    let clock = SimulatedClock { origin: start };
    let mut repeller = Repeller::new(settings, engine, Box::new(clock));

    if args.power_on {
        repeller.activate()?;
    }

    let step = args.step.max(1.0);
    let end = args.hours * 3600.0;
    let mut last = None;
    while repeller.now() < end {
        let snapshot = (
            repeller.is_active(),
            repeller.selected_pattern(),
            repeller.automation_status().map(str::to_owned),
        );
        if last.as_ref() != Some(&snapshot) {
            let time = clock.time_of_day(repeller.now());
            println!(
                "{time}  {:<8} {:<17} {}",
                if snapshot.0 { "active" } else { "idle" },
                snapshot.1.name(),
                snapshot.2.as_deref().unwrap_or("-"),
            );
            last = Some(snapshot);
        }
        let before = repeller.now();
        repeller.advance(step.min(end - before));
        if repeller.now() <= before {
            break;
        }
    }
    Ok(())
}

fn show_settings(path: &Path) -> rodent_repeller_core::Result<()> {
    let settings = load_settings(path)?;
    println!("{}", settings.to_json()?);
    Ok(())
}

fn reset_settings(path: &Path) -> rodent_repeller_core::Result<()> {
    std::fs::write(path, Settings::default().to_json()?)?;
    tracing::info!(path = %path.display(), "settings reset");
    Ok(())
}

/// Missing files yield the defaults; malformed ones are an error.
fn load_settings(path: &Path) -> rodent_repeller_core::Result<Settings> {
    match std::fs::read_to_string(path) {
        Ok(json) => Settings::from_json(&json),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            Ok(Settings::default())
        }
        Err(err) => Err(err.into()),
    }
}

fn build_engine(audio: AudioConfig, factory: OutputFactory, seed: Option<u64>) -> SignalEngine {
    match seed {
        Some(seed) => SignalEngine::with_seed(audio, factory, seed),
        None => SignalEngine::new(audio, factory),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Ultrasonic rodent repeller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the emission patterns.
    Patterns,
    /// Render a pattern offline into a WAV file.
    Render(RenderArgs),
    /// Run the automation schedules over simulated hours and print every
    /// state change.
    Simulate(SimulateArgs),
    /// Inspect or reset the persisted settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(clap::Args, Debug)]
struct RenderArgs {
    /// Pattern id or index.
    #[arg(short, long, default_value = "linear-sweep")]
    pattern: PatternKind,
    #[arg(short, long, default_value_t = 5.0)]
    seconds: f64,
    /// Destination WAV file.
    #[arg(short, long)]
    output: PathBuf,
    /// Volume in percent.
    #[arg(long, default_value_t = 80.0)]
    volume: f32,
    #[arg(long, default_value_t = 15_000.0)]
    min: f32,
    #[arg(long, default_value_t = 20_000.0)]
    max: f32,
    #[arg(long, default_value = "sine")]
    waveform: Waveform,
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,
    /// Seed for reproducible output.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct SimulateArgs {
    #[arg(long, default_value_t = 24.0)]
    hours: f64,
    #[arg(long, default_value = DEFAULT_SETTINGS)]
    settings: PathBuf,
    /// Seconds between reports.
    #[arg(long, default_value_t = 60.0)]
    step: f64,
    /// Simulated local time at the start, as HH:MM. Defaults to the current
    /// local time.
    #[arg(long)]
    start: Option<String>,
    /// Low rates keep long simulations fast; the output is discarded.
    #[arg(long, default_value_t = 2_000)]
    sample_rate: u32,
    /// Press the power button before the simulation starts.
    #[arg(long)]
    power_on: bool,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the settings as JSON.
    Show {
        #[arg(long, default_value = DEFAULT_SETTINGS)]
        settings: PathBuf,
    },
    /// Overwrite the settings file with defaults.
    Reset {
        #[arg(long, default_value = DEFAULT_SETTINGS)]
        settings: PathBuf,
    },
}
