//! Vocal/background separation collaborator.
//!
//! Wraps an external MDX-Net separator CLI. Its outputs are discovered by
//! the separator's fixed `(Vocals)`/`(Instrumental)` naming convention and
//! renamed to stable project paths. Separation failure is recoverable: the
//! pipeline falls back to the original mixed audio.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

use crate::config::SeparationConfig;
use crate::error::{Result, AutodubError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VocalSeparator: Send + Sync {
    /// Split a mixed audio file into (vocals, background) inside `out_dir`.
    async fn separate(&self, mixed: &Path, out_dir: &Path) -> Result<(PathBuf, PathBuf)>;
}

pub struct SeparatorCli {
    config: SeparationConfig,
}

impl SeparatorCli {
    pub fn new(config: SeparationConfig) -> Self {
        Self { config }
    }

    /// Find the separator's `(Vocals)`/`(Instrumental)` outputs for `stem`.
    fn discover_outputs(out_dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf)> {
        let mut vocals = None;
        let mut instrumental = None;

        for entry in std::fs::read_dir(out_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(stem) {
                continue;
            }
            if name.contains("(Vocals)") {
                vocals = Some(entry.path());
            } else if name.contains("(Instrumental)") {
                instrumental = Some(entry.path());
            }
        }

        match (vocals, instrumental) {
            (Some(v), Some(i)) => Ok((v, i)),
            _ => Err(AutodubError::Separation(format!(
                "Separator outputs not found in {}",
                out_dir.display()
            ))),
        }
    }
}

#[async_trait]
impl VocalSeparator for SeparatorCli {
    async fn separate(&self, mixed: &Path, out_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(out_dir)?;

        info!("Separating vocals from {}", mixed.display());

        let output = Command::new(&self.config.binary_path)
            .arg(mixed)
            .arg("--output_dir")
            .arg(out_dir)
            .arg("--model_filename")
            .arg(&self.config.model_filename)
            .arg("--model_file_dir")
            .arg(&self.config.model_dir)
            .arg("--output_format")
            .arg("wav")
            .arg("--normalization")
            .arg("0.9")
            .output()
            .map_err(|e| AutodubError::Separation(format!("Failed to run separator: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(AutodubError::Separation(format!(
                "Separator exited with {}: {}",
                output.status, tail
            )));
        }

        let stem = mixed
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let (raw_vocals, raw_instrumental) = Self::discover_outputs(out_dir, &stem)?;

        // Rename to stable paths so later runs can find them without
        // re-running the separator
        let vocals = out_dir.join(format!("{}_vocals.wav", stem));
        let bgm = out_dir.join(format!("{}_bgm.wav", stem));
        std::fs::rename(&raw_vocals, &vocals)?;
        std::fs::rename(&raw_instrumental, &bgm)?;

        info!("Separation complete: {} / {}", vocals.display(), bgm.display());
        Ok((vocals, bgm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mk = |name: &str| std::fs::write(dir.path().join(name), b"").unwrap();
        mk("ep01_full_(Vocals)_UVR.wav");
        mk("ep01_full_(Instrumental)_UVR.wav");
        mk("unrelated_(Vocals).wav");

        let (v, i) = SeparatorCli::discover_outputs(dir.path(), "ep01_full").unwrap();
        assert!(v.to_string_lossy().contains("ep01_full_(Vocals)"));
        assert!(i.to_string_lossy().contains("ep01_full_(Instrumental)"));
    }

    #[test]
    fn test_discover_outputs_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ep01_full_(Vocals).wav"), b"").unwrap();

        assert!(SeparatorCli::discover_outputs(dir.path(), "ep01_full").is_err());
    }
}
