use async_trait::async_trait;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

use crate::config::{AudioConfig, MediaConfig};
use crate::error::{Result, AutodubError};
use super::{parse_loudness_measurement, MediaCommandBuilder, MediaProcessor};

/// FFmpeg-backed media processor
pub struct FfmpegProcessor {
    config: MediaConfig,
    audio: AudioConfig,
    ffmpeg: MediaCommandBuilder,
    ffprobe: MediaCommandBuilder,
}

impl FfmpegProcessor {
    pub fn new(config: MediaConfig, audio: AudioConfig) -> Self {
        let ffmpeg = MediaCommandBuilder::new(&config.ffmpeg_path);
        let ffprobe = MediaCommandBuilder::new(&config.ffprobe_path);

        Self {
            config,
            audio,
            ffmpeg,
            ffprobe,
        }
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    fn check_availability(&self) -> Result<()> {
        let output = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .output()
            .map_err(|e| AutodubError::Media(format!("ffmpeg not found: {}", e)))?;

        if output.status.success() {
            info!("Media processor is available");
            Ok(())
        } else {
            Err(AutodubError::Media("ffmpeg version check failed".to_string()))
        }
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let stdout = self
            .ffprobe
            .custom("Duration probe")
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(path.to_string_lossy().to_string())
            .execute_capturing_stdout()?;

        stdout
            .trim()
            .parse::<f64>()
            .map_err(|e| AutodubError::Media(format!("Unparseable duration for {}: {}", path.display(), e)))
    }

    async fn clip_video(&self, input: &Path, output: &Path, start: f64, duration: f64) -> Result<()> {
        info!(
            "Clipping video: {:.2}s - {:.2}s ({:.1}s)",
            start,
            start + duration,
            duration
        );
        Self::ensure_parent(output)?;

        // Seek before the input so timestamps restart at zero; audio is
        // re-encoded because stream-copy after a seek can drop leading frames
        self.ffmpeg
            .custom("Video clipping")
            .overwrite()
            .seek(start)
            .input(input)
            .duration(duration)
            .copy_video()
            .audio_codec("aac")
            .audio_bitrate("192k")
            .map("0:v:0")
            .map("0:a:0")
            .output(output)
            .execute()
    }

    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        info!("Extracting audio from {}", video.display());
        Self::ensure_parent(output)?;

        self.ffmpeg
            .custom("Audio extraction")
            .overwrite()
            .input(video)
            .no_video()
            .audio_codec("pcm_s16le")
            .audio_sample_rate(44100)
            .audio_channels(2)
            .output(output)
            .execute()
    }

    async fn prepare_reference(
        &self,
        vocal: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> Result<()> {
        Self::ensure_parent(output)?;

        // Small symmetric buffer so word edges survive the cut
        let buffer = self.audio.segment_buffer_secs;
        let start = (start - buffer).max(0.0);
        let duration = duration + buffer * 2.0;

        // Highpass + denoise + edge fades keep the synthesizer's reference
        // free of rumble and boundary clicks
        let filter_chain = format!(
            "highpass=f=80,afftdn=nr={}:nf=-25,afade=t=in:d=0.01,areverse,afade=t=in:d=0.01,areverse",
            self.audio.denoise_strength
        );

        self.ffmpeg
            .custom("Reference clip preparation")
            .overwrite()
            .seek(start)
            .duration(duration)
            .input(vocal)
            .audio_filter(filter_chain)
            .audio_sample_rate(self.audio.sample_rate)
            .audio_channels(1)
            .output(output)
            .execute()
    }

    async fn post_process(
        &self,
        input: &Path,
        output: &Path,
        speed: Option<f64>,
        target_lufs: f64,
    ) -> Result<()> {
        Self::ensure_parent(output)?;

        // Both passes share the pre-filters so the measurement matches what
        // the apply pass actually hears
        let mut pre_filters = Vec::new();
        if let Some(speed) = speed {
            let speed = speed.clamp(0.5, 2.0);
            pre_filters.push(format!("atempo={}", speed));
        }
        pre_filters.push("highpass=f=80".to_string());

        let tp = -2.0;
        let lra = 7;

        // Pass 1: measure
        let measure_chain = {
            let mut filters = pre_filters.clone();
            filters.push(format!(
                "loudnorm=I={}:TP={}:LRA={}:print_format=json",
                target_lufs, tp, lra
            ));
            filters.join(",")
        };
        let stderr = self
            .ffmpeg
            .custom("Loudness measurement")
            .overwrite()
            .input(input)
            .arg("-filter:a")
            .arg(measure_chain)
            .arg("-f")
            .arg("null")
            .arg("-")
            .execute_capturing_stderr()?;

        let measured = parse_loudness_measurement(&stderr)?;
        debug!(
            "Measured loudness: I={} TP={} LRA={}",
            measured.input_i, measured.input_tp, measured.input_lra
        );

        // Pass 2: normalize with the measured values, linear gain preferred
        let apply_chain = {
            let mut filters = pre_filters;
            filters.push(format!(
                "loudnorm=I={}:TP={}:LRA={}:measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:linear=true",
                target_lufs, tp, lra,
                measured.input_i, measured.input_tp, measured.input_lra, measured.input_thresh
            ));
            filters.push("afade=t=in:d=0.02".to_string());
            filters.push("areverse,afade=t=in:d=0.02,areverse".to_string());
            filters.join(",")
        };

        self.ffmpeg
            .custom("Audio post-processing")
            .overwrite()
            .input(input)
            .arg("-filter:a")
            .arg(apply_chain)
            .audio_sample_rate(self.audio.sample_rate)
            .no_video()
            .output(output)
            .execute()
    }

    async fn mux_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        info!("Muxing audio onto {}", video.display());
        Self::ensure_parent(output)?;

        // 48 kHz AAC for player compatibility; +faststart for MP4 streaming
        self.ffmpeg
            .custom("Audio mux")
            .overwrite()
            .input(video)
            .input(audio)
            .copy_video()
            .audio_codec("aac")
            .audio_bitrate("192k")
            .audio_sample_rate(48000)
            .map("0:v:0")
            .map("1:a:0")
            .arg("-shortest")
            .arg("-movflags")
            .arg("+faststart")
            .output(output)
            .execute()
    }
}
