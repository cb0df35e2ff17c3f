use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, AutodubError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub media: MediaConfig,
    pub synthesis: SynthesisConfig,
    pub separation: SeparationConfig,
    pub audio: AudioConfig,
    pub speed: SpeedConfig,
    pub gap: GapConfig,
    pub subtitle: SubtitleConfig,
    pub demo: DemoConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Path to the TTS binary (voice-cloning synthesis CLI)
    pub binary_path: String,
    /// Model directory passed to the synthesizer
    pub model_dir: PathBuf,
    /// Extra arguments appended to every synthesis invocation
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationConfig {
    /// Path to the vocal separator binary
    pub binary_path: String,
    /// Separation model filename (MDX-Net family)
    pub model_filename: String,
    /// Local directory holding downloaded separation models
    pub model_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Working sample rate, matches the synthesizer output
    pub sample_rate: u32,
    /// afftdn noise reduction strength (0-100)
    pub denoise_strength: u32,
    /// Symmetric buffer around each reference cut (seconds)
    pub segment_buffer_secs: f64,
    /// Target loudness for synthesized clips (LUFS, EBU R128)
    pub target_loudness_lufs: f64,
    /// Background level relative to voice in the final mix
    pub bgm_mix_volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedConfig {
    /// Duration ratio band within which no tempo adjustment happens (0.1 = ±10%)
    pub no_adjust_threshold: f64,
    /// Slowest allowed atempo value
    pub min_atempo: f64,
    /// Fastest allowed atempo value
    pub max_atempo: f64,
    /// Safety margin kept before the next segment's start (seconds)
    pub overlap_margin_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapConfig {
    /// Merge occupied spans closer than this (seconds)
    pub merge_threshold_secs: f64,
    /// Fade duration at span boundaries (seconds)
    pub fade_secs: f64,
    /// Safety margin added around each occupied span (seconds)
    pub span_margin_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleConfig {
    /// Two cues whose start times differ by less than this are treated as a
    /// bilingual pair (seconds)
    pub pair_window_secs: f64,
    /// Padding added on both ends of the derived clip window (seconds)
    pub clip_padding_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Demo window start (seconds), skips the opening
    pub start_time: f64,
    /// Demo window end (seconds)
    pub end_time: f64,
    /// Maximum number of segments processed in demo mode
    pub max_segments: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for all intermediate artifacts
    pub work_dir: PathBuf,
    /// Final output directory
    pub output_dir: PathBuf,
}

impl PathsConfig {
    pub fn intermediate_dir(&self) -> PathBuf {
        self.work_dir.join("intermediate")
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.work_dir.join("segments")
    }

    pub fn dub_segments_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: MediaConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
            },
            synthesis: SynthesisConfig {
                binary_path: "index-tts".to_string(),
                model_dir: PathBuf::from("checkpoints"),
                extra_args: vec![],
            },
            separation: SeparationConfig {
                binary_path: "audio-separator".to_string(),
                model_filename: "UVR-MDX-NET-Inst_HQ_3.onnx".to_string(),
                model_dir: PathBuf::from("models"),
            },
            audio: AudioConfig {
                sample_rate: 22050,
                denoise_strength: 15,
                segment_buffer_secs: 0.05,
                target_loudness_lufs: -16.0,
                bgm_mix_volume: 0.8,
            },
            speed: SpeedConfig {
                no_adjust_threshold: 0.1,
                min_atempo: 0.8,
                max_atempo: 1.25,
                overlap_margin_secs: 0.05,
            },
            gap: GapConfig {
                merge_threshold_secs: 0.30,
                fade_secs: 0.15,
                span_margin_secs: 0.03,
            },
            subtitle: SubtitleConfig {
                pair_window_secs: 0.01,
                clip_padding_secs: 2.0,
            },
            demo: DemoConfig {
                start_time: 60.0,
                end_time: 120.0,
                max_segments: 5,
            },
            paths: PathsConfig {
                work_dir: PathBuf::from("temp"),
                output_dir: PathBuf::from("output"),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AutodubError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| AutodubError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AutodubError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| AutodubError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Create every working directory the pipeline writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.paths.work_dir.clone(),
            self.paths.intermediate_dir(),
            self.paths.segments_dir(),
            self.paths.dub_segments_dir(),
            self.paths.output_dir.clone(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
