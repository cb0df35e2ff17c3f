use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dub a single video from its bilingual subtitle file
    Run {
        /// Input video file
        #[arg(short, long)]
        video: PathBuf,

        /// Bilingual subtitle file (SRT)
        #[arg(short, long)]
        subtitle: PathBuf,

        /// Output directory for the dubbed video
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Project name (defaults to the video file stem)
        #[arg(short, long)]
        project_name: Option<String>,

        /// Process the full video instead of the preview window
        #[arg(long)]
        full: bool,

        /// Preview window start in seconds
        #[arg(long)]
        start_time: Option<f64>,

        /// Preview window end in seconds
        #[arg(long)]
        end_time: Option<f64>,

        /// Maximum number of segments in preview mode
        #[arg(long)]
        max_segments: Option<usize>,

        /// Discard all previous state and artifacts before starting
        #[arg(long)]
        force: bool,
    },

    /// Process every entry in a batch descriptor file
    Batch {
        /// Batch descriptor (JSON with video/subtitle entries)
        #[arg(short, long)]
        descriptor: PathBuf,

        /// Process the full video instead of the preview window
        #[arg(long)]
        full: bool,

        /// Reprocess entries regardless of their recorded status
        #[arg(long)]
        force: bool,
    },

    /// Parse a subtitle file and list the segments that would be dubbed
    Inspect {
        /// Bilingual subtitle file (SRT)
        #[arg(short, long)]
        subtitle: PathBuf,

        /// Window start in seconds
        #[arg(long, default_value = "0")]
        start_time: f64,

        /// Window end in seconds
        #[arg(long)]
        end_time: Option<f64>,

        /// Maximum number of segments
        #[arg(long)]
        max_segments: Option<usize>,
    },
}
