//! Autodub - Automated Video Dubbing Workflow
//!
//! This is the main entry point for the Autodub application, which dubs
//! subtitled videos into a new spoken-language audio track using
//! voice-cloning TTS, vocal separation, and ffmpeg.

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use autodub::batch::BatchRunner;
use autodub::cli::{Args, Commands};
use autodub::config::Config;
use autodub::media::MediaProcessorFactory;
use autodub::pipeline::{Pipeline, RunMode};
use autodub::separate::SeparatorCli;
use autodub::subtitle::SubtitleExtractor;
use autodub::tts::{SpeechSynthesizer, SynthesizerCli};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            // Try to load config.toml from current directory first
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Run {
            video,
            subtitle,
            output_dir,
            project_name,
            full,
            start_time,
            end_time,
            max_segments,
            force,
        } => {
            if let Some(dir) = output_dir {
                config.paths.output_dir = dir;
            }
            if let Some(start) = start_time {
                config.demo.start_time = start;
            }
            if let Some(end) = end_time {
                config.demo.end_time = end;
            }
            if let Some(max) = max_segments {
                config.demo.max_segments = max;
            }
            let mode = if full { RunMode::Full } else { RunMode::Demo };

            let media = MediaProcessorFactory::create_processor(
                config.media.clone(),
                config.audio.clone(),
            );
            media.check_availability()?;
            let separator = SeparatorCli::new(config.separation.clone());
            let mut synthesizer = SynthesizerCli::new(config.synthesis.clone());

            let mut pipeline = Pipeline::new(
                &config,
                media.as_ref(),
                &separator,
                &mut synthesizer,
                video,
                subtitle,
                project_name,
                mode,
                force,
            )?;

            let result = pipeline.run().await;
            synthesizer.unload().await?;

            let final_video = result?;
            println!("Dubbed video: {}", final_video.display());
        }

        Commands::Batch { descriptor, full, force } => {
            let mode = if full { RunMode::Full } else { RunMode::Demo };

            let media = MediaProcessorFactory::create_processor(
                config.media.clone(),
                config.audio.clone(),
            );
            media.check_availability()?;
            let separator = SeparatorCli::new(config.separation.clone());

            // One engine for all entries; loading it per project would pay
            // the accelerator warm-up cost repeatedly
            let mut synthesizer = SynthesizerCli::new(config.synthesis.clone());

            let runner = BatchRunner::new(descriptor, mode, force, &config, media.as_ref(), &separator);
            let result = runner.run(&mut synthesizer).await;
            synthesizer.unload().await?;
            result?;
        }

        Commands::Inspect {
            subtitle,
            start_time,
            end_time,
            max_segments,
        } => {
            let extractor = SubtitleExtractor::new(config.subtitle.clone());
            let segments = extractor.extract(
                &subtitle,
                start_time,
                end_time.unwrap_or(f64::INFINITY),
                max_segments,
            )?;

            if segments.is_empty() {
                println!("No dubbable segments found.");
                return Ok(());
            }

            println!("{} segments:", segments.len());
            for seg in &segments {
                println!(
                    "[{:4}] {:8.2}s - {:8.2}s ({:5.2}s)",
                    seg.id, seg.start_time, seg.end_time, seg.duration
                );
                if !seg.source_text.is_empty() {
                    println!("       source: {}", seg.source_text);
                }
                println!("       target: {}", seg.target_text);
            }

            let (clip_start, clip_end) = extractor.derive_clip_window(&segments);
            println!("Clip window: {:.2}s - {:.2}s", clip_start, clip_end);
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".autodub").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "autodub.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Create console layer
    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer);

    subscriber
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
