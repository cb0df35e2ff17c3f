//! Batch processing front door.
//!
//! Reads a JSON descriptor listing (video, subtitle) pairs and runs the
//! dubbing pipeline over each, persisting per-entry status after every
//! transition. One synthesis engine is shared across all entries to
//! amortize its load cost; per-project checkpointing does not depend on it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Result, AutodubError};
use crate::media::MediaProcessor;
use crate::pipeline::{Pipeline, RunMode};
use crate::separate::VocalSeparator;
use crate::tts::SpeechSynthesizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub video: PathBuf,
    pub subtitle: PathBuf,
    #[serde(default = "default_batch_status")]
    pub status: BatchStatus,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_batch_status() -> BatchStatus {
    BatchStatus::Pending
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub entries: Vec<BatchEntry>,
}

impl BatchDescriptor {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| AutodubError::Config(format!("Invalid batch descriptor: {}", e)))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

/// Completed entries are skipped unless the run is forced; interrupted
/// (`processing`) and failed entries are retried.
fn needs_processing(entry: &BatchEntry, force: bool) -> bool {
    force
        || matches!(
            entry.status,
            BatchStatus::Pending | BatchStatus::Processing | BatchStatus::Error
        )
}

pub struct BatchRunner<'a> {
    descriptor_path: PathBuf,
    mode: RunMode,
    force: bool,
    config: &'a Config,
    media: &'a dyn MediaProcessor,
    separator: &'a dyn VocalSeparator,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        descriptor_path: PathBuf,
        mode: RunMode,
        force: bool,
        config: &'a Config,
        media: &'a dyn MediaProcessor,
        separator: &'a dyn VocalSeparator,
    ) -> Self {
        Self {
            descriptor_path,
            mode,
            force,
            config,
            media,
            separator,
        }
    }

    pub async fn run(&self, synthesizer: &mut dyn SpeechSynthesizer) -> Result<()> {
        let mut descriptor = BatchDescriptor::load(&self.descriptor_path)?;

        if descriptor.entries.is_empty() {
            info!("Batch descriptor has no entries");
            return Ok(());
        }

        let to_process: Vec<usize> = descriptor
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| needs_processing(e, self.force))
            .map(|(i, _)| i)
            .collect();

        if to_process.is_empty() {
            info!("All batch entries already completed; set status to pending or use --force to redo");
            return Ok(());
        }

        info!(
            "Batch: {} entries total, processing {}",
            descriptor.entries.len(),
            to_process.len()
        );

        for (seq, idx) in to_process.iter().enumerate() {
            let (video, subtitle) = {
                let entry = &descriptor.entries[*idx];
                (entry.video.clone(), entry.subtitle.clone())
            };

            info!("[{}/{}] {}", seq + 1, to_process.len(), video.display());

            if !video.exists() {
                let entry = &mut descriptor.entries[*idx];
                entry.status = BatchStatus::Error;
                entry.error = Some(format!("Video file not found: {}", video.display()));
                error!("{}", entry.error.as_deref().unwrap_or_default());
                descriptor.save(&self.descriptor_path)?;
                continue;
            }
            if !subtitle.exists() {
                let entry = &mut descriptor.entries[*idx];
                entry.status = BatchStatus::Error;
                entry.error = Some(format!("Subtitle file not found: {}", subtitle.display()));
                error!("{}", entry.error.as_deref().unwrap_or_default());
                descriptor.save(&self.descriptor_path)?;
                continue;
            }

            {
                let entry = &mut descriptor.entries[*idx];
                entry.status = BatchStatus::Processing;
                entry.error = None;
            }
            descriptor.save(&self.descriptor_path)?;

            let result = match Pipeline::new(
                self.config,
                self.media,
                self.separator,
                &mut *synthesizer,
                video.clone(),
                subtitle.clone(),
                None,
                self.mode,
                self.force,
            ) {
                Ok(mut pipeline) => pipeline.run().await,
                Err(e) => Err(e),
            };

            let entry = &mut descriptor.entries[*idx];
            match result {
                Ok(output) => {
                    entry.status = BatchStatus::Completed;
                    entry.output = Some(output);
                    entry.error = None;
                }
                Err(e) => {
                    error!("Entry failed: {}", e);
                    entry.status = BatchStatus::Error;
                    entry.error = Some(e.to_string());
                }
            }
            descriptor.save(&self.descriptor_path)?;
        }

        let completed = descriptor
            .entries
            .iter()
            .filter(|e| e.status == BatchStatus::Completed)
            .count();
        let errors = descriptor
            .entries
            .iter()
            .filter(|e| e.status == BatchStatus::Error)
            .count();
        let pending = descriptor.entries.len() - completed - errors;

        info!(
            "Batch complete: {} succeeded, {} failed, {} pending",
            completed, errors, pending
        );
        Ok(())
    }
}
