use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use videofx::{
    config::Config,
    engine::EffectsEngine,
    error::VideoFxError,
    filters::{FilterConfig, FilterRegistry},
    pipeline::{
        DirectoryHandOff, EngineEvent, FfmpegWriterFactory, MainQueue, RecordingWriterFactory,
        WriterFactory,
    },
    video::{FfmpegLoader, VideoSession},
};

#[derive(Parser)]
#[command(
    name = "videofx",
    version,
    about = "Apply photo filters to videos",
    long_about = "videofx decodes a video, runs every frame through an image filter, and either previews the result against a clock or re-encodes it to a new MP4."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List the available filters
    Filters,

    /// Show what videofx sees in a video
    Probe {
        /// Input video
        input: PathBuf,
    },

    /// Filter a video and save the result
    Export {
        /// Input video
        input: PathBuf,

        /// Filter to apply (see `videofx filters`)
        #[arg(short, long)]
        filter: Option<String>,

        /// Filter intensity (0.0-1.0)
        #[arg(short, long)]
        intensity: Option<f32>,

        /// Directory the finished video is saved to
        #[arg(short, long, default_value = ".")]
        gallery: PathBuf,

        /// Walk the whole export without encoding anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Play a video through a filter without a display
    Preview {
        /// Input video
        input: PathBuf,

        /// Filter to apply
        #[arg(short, long)]
        filter: Option<String>,

        /// Stop after this many seconds of playback
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,

        /// Save every rendered frame as a PNG here
        #[arg(short, long)]
        dump_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting videofx v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => Config::default(),
    };

    let outcome = match cli.command {
        Command::Filters => list_filters(),
        Command::Probe { input } => probe(&config, &input),
        Command::Export {
            input,
            filter,
            intensity,
            gallery,
            dry_run,
        } => {
            let config = with_filter(config, filter, intensity);
            export(config, &input, &gallery, dry_run).await
        }
        Command::Preview {
            input,
            filter,
            seconds,
            dump_dir,
        } => {
            let config = with_filter(config, filter, None);
            preview(config, &input, seconds, dump_dir.as_deref()).await
        }
    };

    if let Err(e) = &outcome {
        report_failure(e);
    }
    outcome
}

fn report_failure(err: &anyhow::Error) {
    match err.downcast_ref::<VideoFxError>() {
        Some(fx) if fx.is_recoverable() => {
            warn!("{} (this may succeed if you try again)", fx.user_message())
        }
        Some(fx) => error!("{}", fx.user_message()),
        None => error!("{:#}", err),
    }
}

fn with_filter(mut config: Config, name: Option<String>, intensity: Option<f32>) -> Config {
    if let Some(name) = name {
        config.filter = FilterConfig::named(name, config.filter.intensity);
    }
    if let Some(intensity) = intensity {
        config.filter.intensity = intensity.clamp(0.0, 1.0);
    }
    config
}

fn list_filters() -> Result<()> {
    let registry = FilterRegistry::new();
    for name in registry.available_filters() {
        let filter = registry.create(&FilterConfig::named(name.as_str(), 1.0))?;
        println!("{:<10} {}", name, filter.description());
    }
    Ok(())
}

fn probe(config: &Config, input: &Path) -> Result<()> {
    let loader = FfmpegLoader::new()?;
    let session = VideoSession::open(&loader, input, config.source.timescale)?;
    let (width, height) = session.presentation_size();
    let track = session.track();

    println!("File:         {}", session.locator().display());
    println!("Stream:       #{}", track.index);
    println!("Encoded size: {}x{}", track.natural_size.0, track.natural_size.1);
    println!("Display size: {}x{}", width, height);
    println!("Frame rate:   {:.3} fps", session.nominal_frame_rate());
    println!("Duration:     {}", session.duration());
    println!("Frames:       {}", session.total_frames());
    if !session.transform().is_identity() {
        println!("Orientation:  {:?}", session.transform());
    }
    Ok(())
}

async fn export(config: Config, input: &Path, gallery: &Path, dry_run: bool) -> Result<()> {
    let factory: Arc<dyn WriterFactory> = if dry_run {
        info!("Dry run, frames will not be encoded");
        Arc::new(RecordingWriterFactory::new())
    } else {
        Arc::new(FfmpegWriterFactory::new())
    };

    let (mut engine, mut queue) = EffectsEngine::new(config, Arc::new(FfmpegLoader::new()?), factory)?;
    engine
        .open(input)
        .with_context(|| format!("Cannot open {}", input.display()))?;
    queue.drain();

    let output = engine.start_export()?;
    info!("Writing {}", output.display());

    let result = {
        let finish = engine.finish_export();
        tokio::pin!(finish);
        loop {
            tokio::select! {
                result = &mut finish => break result,
                Some(event) = queue.recv() => log_export_event(&event),
            }
        }
    };
    for event in queue.drain() {
        log_export_event(&event);
    }
    let report = result?;

    if dry_run {
        println!(
            "{} of {} frames would be written ({} dropped)",
            report.frames_appended, report.total_frames, report.frames_dropped
        );
        videofx::pipeline::handoff::remove_artifact(&report.output)?;
        return Ok(());
    }

    let saved = engine
        .hand_off(&report, Arc::new(DirectoryHandOff::new(gallery)))
        .await?;
    println!("Saved {}", saved.display());
    Ok(())
}

fn log_export_event(event: &EngineEvent) {
    match event {
        EngineEvent::ExportProgress(fraction) => {
            tracing::debug!("Progress {:.1}%", fraction * 100.0)
        }
        EngineEvent::ExportFailed { reason, .. } => warn!("Export failed: {}", reason),
        _ => {}
    }
}

async fn preview(config: Config, input: &Path, seconds: f64, dump_dir: Option<&Path>) -> Result<()> {
    if let Some(dir) = dump_dir {
        std::fs::create_dir_all(dir)?;
    }

    let refresh = Duration::from_secs_f64(1.0 / config.preview.refresh_rate);
    let (mut engine, mut queue) = EffectsEngine::new(
        config,
        Arc::new(FfmpegLoader::new()?),
        Arc::new(FfmpegWriterFactory::new()),
    )?;
    engine
        .open(input)
        .with_context(|| format!("Cannot open {}", input.display()))?;

    let started = Instant::now();
    let mut ticker = tokio::time::interval(refresh);
    let mut rendered = 0usize;

    engine.play(0.0)?;
    loop {
        ticker.tick().await;
        let host = started.elapsed().as_secs_f64();
        engine.tick(host)?;
        rendered += handle_preview_events(&mut queue, dump_dir, rendered)?;

        if engine.is_paused() || host >= seconds {
            break;
        }
    }
    engine.pause(started.elapsed().as_secs_f64())?;

    println!(
        "Rendered {} frames, stopped at {:.1}%",
        rendered,
        engine.position() * 100.0
    );
    Ok(())
}

fn handle_preview_events(queue: &mut MainQueue, dump_dir: Option<&Path>, rendered: usize) -> Result<usize> {
    let mut count = 0;
    for event in queue.drain() {
        if let EngineEvent::FrameRendered { image, .. } = event {
            if let Some(dir) = dump_dir {
                let path = dir.join(format!("frame_{:05}.png", rendered + count));
                image.save_png(&path).with_context(|| format!("Cannot write {}", path.display()))?;
            }
            count += 1;
        }
    }
    Ok(count)
}
