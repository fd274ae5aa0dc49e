use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pitch_recognizer::analysis::{NoteEvent, RefreshAggregates};
use pitch_recognizer::capture::wav_file::read_wav;
use pitch_recognizer::capture::{SignalGenerator, SyntheticSpec};
use pitch_recognizer::telemetry;
use pitch_recognizer::{
    AppConfig, CaptureThread, EstimatorKind, ManualTimeSource, Recognizer, SampleQueue,
    SettingsRegistry,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "recognizer_cli",
    about = "Monophonic pitch recognition from synthetic tones, WAV files or live input"
)]
struct Cli {
    /// JSON configuration file (defaults to assets/recognizer_config.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Estimator override: autocorrelation, multi-correlation or bubble
    #[arg(long)]
    estimator: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List capture transports and their status
    Transports,
    /// Recognize a generated tone offline
    Tone {
        #[arg(long, default_value_t = 110.0)]
        frequency: f64,
        #[arg(long, default_value_t = 0.5)]
        amplitude: f32,
        #[arg(long, default_value_t = 500)]
        duration_ms: u64,
        /// Extra harmonic amplitudes, comma separated
        #[arg(long, value_delimiter = ',')]
        harmonics: Vec<f32>,
        #[arg(long, default_value_t = 44_100)]
        rate: u32,
    },
    /// Recognize a WAV file offline
    File {
        #[arg(long)]
        path: PathBuf,
    },
    /// Recognize live input in real time
    Live {
        /// Transport name; auto-detected when omitted
        #[arg(long)]
        transport: Option<String>,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };
    if let Some(name) = &cli.estimator {
        config.estimator.kind = name.parse::<EstimatorKind>()?;
    }

    match cli.command {
        Commands::Transports => run_transports(&config),
        Commands::Tone {
            frequency,
            amplitude,
            duration_ms,
            harmonics,
            rate,
        } => {
            let spec = SyntheticSpec {
                harmonics,
                ..SyntheticSpec::sine(frequency, amplitude)
            };
            let count = (rate as u64 * duration_ms / 1000) as usize;
            let samples = SignalGenerator::new(spec, rate).take(count);
            run_offline(&config, &samples, rate)
        }
        Commands::File { path } => {
            let (samples, rate) =
                read_wav(&path).with_context(|| format!("reading {}", path.display()))?;
            run_offline(&config, &samples, rate)
        }
        Commands::Live { transport, seconds } => run_live(&config, transport, seconds),
    }
}

fn run_transports(config: &AppConfig) -> Result<ExitCode> {
    let capture = CaptureThread::with_default_transports(Arc::new(SampleQueue::new()), &config.capture);
    capture.refresh_status();
    for info in capture.list_transports() {
        println!("{}", serde_json::to_string(&info)?);
    }
    Ok(ExitCode::from(0))
}

/// Feed `samples` through the recognizer one refresh period at a time on a
/// manual clock, then let the tail decay.
fn run_offline(config: &AppConfig, samples: &[f32], rate: u32) -> Result<ExitCode> {
    if rate == 0 {
        bail!("sampling rate must be positive");
    }
    let mut config = config.clone();
    config.settings.sampling_rate = Some(rate);

    let clock = Arc::new(ManualTimeSource::new());
    let settings = SettingsRegistry::new(config.settings.to_settings());
    let capture = CaptureThread::new(Arc::new(SampleQueue::new()));
    let mut recognizer = Recognizer::new(&config, settings, capture, clock.clone());
    recognizer.start()?;

    let interval_ms = config.recognition.refresh_interval_ms.max(1);
    let packet = ((rate as u64 * interval_ms / 1000) as usize).max(1);
    let tail = vec![0.0f32; packet];
    let tail_cycles = (recognizer.latency_ms() * 2.0 / interval_ms as f64).ceil() as usize;

    let mut notes = 0;
    for chunk in samples.chunks(packet).chain(std::iter::repeat(tail.as_slice()).take(tail_cycles)) {
        clock.advance(Duration::from_millis(interval_ms));
        recognizer.queue().push_packet(chunk)?;
        notes += emit(&recognizer.recognize().events)?;
    }
    notes += emit(&recognizer.cut_all())?;

    summarize(notes, recognizer.aggregates())?;
    Ok(ExitCode::from(0))
}

fn run_live(config: &AppConfig, transport: Option<String>, seconds: u64) -> Result<ExitCode> {
    let mut recognizer = Recognizer::from_config(config);
    let selected = match transport.or_else(|| config.capture.transport.clone()) {
        Some(name) => {
            recognizer.capture().select_transport(&name)?;
            Some(name)
        }
        None => recognizer.capture().auto_detect_transport()?,
    };
    let Some(name) = selected else {
        bail!("no capture transport available");
    };
    tracing::info!("[Recognizer] capturing from {}", name);
    recognizer.start()?;

    let interval = Duration::from_millis(config.recognition.refresh_interval_ms.max(1));
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut notes = 0;
    while Instant::now() < deadline {
        std::thread::sleep(interval);
        notes += emit(&recognizer.recognize().events)?;
    }
    notes += emit(&recognizer.cut_all())?;

    summarize(notes, recognizer.aggregates())?;
    Ok(ExitCode::from(0))
}

/// Print note events as JSON lines; returns the number of started notes.
fn emit(events: &[NoteEvent]) -> Result<usize> {
    let mut started = 0;
    for event in events {
        if matches!(event, NoteEvent::Started { .. }) {
            started += 1;
        }
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(started)
}

#[derive(Serialize)]
struct Summary {
    notes: usize,
    refresh: RefreshAggregates,
    telemetry_events: u64,
    telemetry_errors: u64,
}

fn summarize(notes: usize, refresh: RefreshAggregates) -> Result<()> {
    let snapshot = telemetry::hub().snapshot();
    let summary = Summary {
        notes,
        refresh,
        telemetry_events: snapshot.total_events,
        telemetry_errors: snapshot.errors,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    eprintln!("{json}");
    Ok(())
}
