use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use lapse_core::capture::{pick_display, CaptureEvent, CaptureRegion, CaptureSession};
use lapse_core::config::LapseConfig;
use lapse_core::coordinator::EncodeCoordinator;
use lapse_core::encode::{select_backend, BackendPreference, OutputKind};
use lapse_core::process::TokioProcessRunner;
use lapse_core::tools::ToolPaths;

#[derive(Parser, Debug)]
#[command(name = "lapse")]
#[command(about = "Record a screen region as timed frames and encode them into an animation")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(long, env = "LAPSE_CONFIG_PATH", global = true)]
    config_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LAPSE_LOG_LEVEL", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the displays available for capture
    Displays,
    /// Show the encoder executables found and the backend they select
    Tools,
    /// Capture frames until Ctrl+C or the duration elapses
    Record {
        /// Display index (out-of-range values use the last display)
        #[arg(long)]
        display: Option<usize>,
        /// Region as x,y,width,height in screen coordinates (default: whole display)
        #[arg(long)]
        region: Option<CaptureRegion>,
        /// Seconds between frames
        #[arg(long)]
        frequency: Option<f64>,
        /// Directory frames are written to
        #[arg(long)]
        output: Option<PathBuf>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Encode a directory of frames into one file
    Encode {
        /// Frame directory (default: the recording output directory)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Output path without extension
        #[arg(long)]
        output: PathBuf,
        /// png, webm, mp4 or gif
        #[arg(long, default_value = "gif")]
        kind: OutputKind,
        /// Playback frames per second
        #[arg(long)]
        fps: Option<f64>,
        /// auto, ffmpeg, imagemagick or apng
        #[arg(long)]
        backend: Option<BackendPreference>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(
        "lapse v{} starting (os={}, arch={})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    );

    let config_path = cli
        .config_path
        .map(PathBuf::from)
        .unwrap_or_else(LapseConfig::default_path);
    let mut config = LapseConfig::load_or_default(&config_path)?;

    match cli.command {
        Commands::Displays => list_displays().await,
        Commands::Tools => show_tools(&config),
        Commands::Record {
            display,
            region,
            frequency,
            output,
            duration,
        } => {
            if let Some(display) = display {
                config.record_display = display;
            }
            if let Some(frequency) = frequency {
                config.record_frequency_secs = frequency;
            }
            if let Some(output) = output {
                config.record_output = output;
            }
            let duration = duration
                .map(Duration::try_from_secs_f64)
                .transpose()
                .context("invalid --duration")?;

            record(&config, region, duration).await?;

            config.save(&config_path)?;
            info!("config saved to {}", config_path.display());
            Ok(())
        }
        Commands::Encode {
            input,
            output,
            kind,
            fps,
            backend,
        } => {
            let input = input.unwrap_or_else(|| config.record_output.clone());
            let fps = fps.unwrap_or(config.encode_fps);
            let backend = backend.unwrap_or(config.backend);
            encode(&config, backend, input, output, kind, fps).await
        }
    }
}

async fn list_displays() -> Result<()> {
    let session = CaptureSession::new(lapse_desktop::screen::create_screen_capture()?);
    for display in session.displays().await? {
        let b = display.bounds;
        println!(
            "{}: {} at {},{} size {}x{}{}",
            display.index,
            display.name,
            b.x,
            b.y,
            b.width,
            b.height,
            if display.is_primary { " (primary)" } else { "" }
        );
    }
    Ok(())
}

fn show_tools(config: &LapseConfig) -> Result<()> {
    let tools = ToolPaths::discover(&config.tool_overrides());
    println!("{}", serde_json::to_string_pretty(&tools)?);

    let backend = select_backend(config.backend, &tools, Arc::new(TokioProcessRunner))?;
    let kinds: Vec<String> = backend
        .supported_kinds()
        .iter()
        .map(|k| k.to_string())
        .collect();
    println!("backend: {} ({})", backend.name(), kinds.join(", "));
    Ok(())
}

async fn record(
    config: &LapseConfig,
    region: Option<CaptureRegion>,
    duration: Option<Duration>,
) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<CaptureEvent>();
    let mut session =
        CaptureSession::new(lapse_desktop::screen::create_screen_capture()?).with_events(event_tx);

    let displays = session.displays().await?;
    let display = pick_display(&displays, config.record_display)
        .context("no displays available")?;
    let region = region.unwrap_or_else(|| CaptureRegion::from_display(display));

    session.configure(
        region,
        display.index,
        config.record_frequency_secs,
        &config.record_output,
    )?;
    session.start()?;

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    info!("recording, press Ctrl+C to stop");

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(CaptureEvent::FrameWritten { path, stats, .. }) => {
                        info!("{} ({})", stats, path.display());
                    }
                    Some(CaptureEvent::TickFailed { message }) => {
                        warn!("frame skipped: {}", message);
                    }
                    None => break,
                }
            }
            _ = &mut deadline => {
                info!("duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, stopping");
                break;
            }
        }
    }

    session.stop().await?;
    println!("recorded {} into {}", session.stats(), config.record_output.display());
    Ok(())
}

async fn encode(
    config: &LapseConfig,
    preference: BackendPreference,
    input: PathBuf,
    output: PathBuf,
    kind: OutputKind,
    fps: f64,
) -> Result<()> {
    let tools = ToolPaths::discover(&config.tool_overrides());
    let backend = select_backend(preference, &tools, Arc::new(TokioProcessRunner))?;
    let coordinator = EncodeCoordinator::new(backend);

    let path = tokio::select! {
        result = coordinator.encode(&input, &output, kind, fps) => {
            result.with_context(|| format!("failed to encode {}", input.display()))?
        }
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("encode interrupted");
        }
    };

    println!("{}", path.display());
    Ok(())
}
