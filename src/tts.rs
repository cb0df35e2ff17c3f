//! Speech-synthesis collaborator.
//!
//! The synthesizer clones the voice in a reference clip onto new target
//! text. Load/unload is an explicit lifecycle: the engine holds exclusive
//! accelerator memory, so the pipeline loads it lazily before the first
//! synthesis and the driver frees it at shutdown. A batch driver may keep
//! one engine alive across projects; segment checkpointing does not depend
//! on engine lifetime.

use async_trait::async_trait;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

use crate::config::SynthesisConfig;
use crate::error::{Result, AutodubError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send {
    /// Prepare the engine. Must be called before the first synthesis.
    async fn load(&mut self) -> Result<()>;

    /// Synthesize `text` in the voice of `ref_audio` into `output`.
    async fn synthesize(&mut self, text: &str, ref_audio: &Path, output: &Path) -> Result<()>;

    /// Release the engine and its accelerator memory.
    async fn unload(&mut self) -> Result<()>;

    fn is_loaded(&self) -> bool;
}

/// Subprocess-backed synthesizer driving an external voice-cloning TTS CLI.
pub struct SynthesizerCli {
    config: SynthesisConfig,
    loaded: bool,
}

impl SynthesizerCli {
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config,
            loaded: false,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for SynthesizerCli {
    async fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        info!("Loading synthesis engine ({})", self.config.binary_path);

        let output = Command::new(&self.config.binary_path)
            .arg("--version")
            .output()
            .map_err(|e| AutodubError::Synthesis(format!("Synthesizer not found: {}", e)))?;

        if !output.status.success() {
            return Err(AutodubError::Synthesis(
                "Synthesizer version check failed".to_string(),
            ));
        }

        self.loaded = true;
        Ok(())
    }

    async fn synthesize(&mut self, text: &str, ref_audio: &Path, output: &Path) -> Result<()> {
        if !self.loaded {
            self.load().await?;
        }

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        debug!("Synthesizing: {}", text);

        let result = Command::new(&self.config.binary_path)
            .arg("--text")
            .arg(text)
            .arg("--ref-audio")
            .arg(ref_audio)
            .arg("--output")
            .arg(output)
            .arg("--model-dir")
            .arg(&self.config.model_dir)
            .args(&self.config.extra_args)
            .output()
            .map_err(|e| AutodubError::Synthesis(format!("Failed to run synthesizer: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(AutodubError::Synthesis(format!(
                "Synthesis failed: {}",
                stderr
            )));
        }

        if !output.exists() {
            return Err(AutodubError::Synthesis(format!(
                "Synthesizer reported success but produced no file at {}",
                output.display()
            )));
        }

        Ok(())
    }

    async fn unload(&mut self) -> Result<()> {
        if self.loaded {
            self.loaded = false;
            info!("Synthesis engine released");
        }
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}
