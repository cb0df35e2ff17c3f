// Media processing layer
//
// Everything that touches ffmpeg/ffprobe directly lives here:
// - Commands: command builders and the loudnorm measurement parser
// - Processor: the ffmpeg-backed implementation of the MediaProcessor trait

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::Path;

pub use commands::*;
pub use processor::*;

use crate::config::{AudioConfig, MediaConfig};
use crate::error::Result;

/// Boundary contract with the media encode/decode/filter collaborator.
///
/// Each operation either fully succeeds (the artifact exists and is
/// well-formed) or fails atomically with stderr as the only error channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Check that the media binaries are on the path
    fn check_availability(&self) -> Result<()>;

    /// Duration of a media file in seconds
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Produce a trimmed copy of the source video covering the clip window
    async fn clip_video(&self, input: &Path, output: &Path, start: f64, duration: f64) -> Result<()>;

    /// Extract the full audio track of a video
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()>;

    /// Cut and sanitize a voice-cloning reference clip from the vocal track
    async fn prepare_reference(
        &self,
        vocal: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> Result<()>;

    /// Tempo-adjust (optional) and loudness-normalize a synthesized clip
    async fn post_process(
        &self,
        input: &Path,
        output: &Path,
        speed: Option<f64>,
        target_lufs: f64,
    ) -> Result<()>;

    /// Replace a video's audio track
    async fn mux_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;
}

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default ffmpeg-based media processor
    pub fn create_processor(media: MediaConfig, audio: AudioConfig) -> Box<dyn MediaProcessor> {
        Box::new(processor::FfmpegProcessor::new(media, audio))
    }
}
