use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{AutodubError, Result};
use crate::segment::Segment;

/// The six pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Clip,
    ExtractVocals,
    PrepareSegments,
    Synthesize,
    Compose,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Parse,
        Stage::Clip,
        Stage::ExtractVocals,
        Stage::PrepareSegments,
        Stage::Synthesize,
        Stage::Compose,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// Durable per-project pipeline state, one JSON file per project.
///
/// Saved after every segment-level and stage-level transition, so a crash
/// loses at most one unit of work. Stage flags are never trusted blindly;
/// the controller re-derives completion from flag + on-disk artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub project_name: String,
    pub video_source: PathBuf,
    pub subtitle_source: PathBuf,
    pub status: ProjectStatus,

    #[serde(default)]
    pub clipped_video: Option<PathBuf>,
    #[serde(default)]
    pub vocal_track: Option<PathBuf>,
    #[serde(default)]
    pub bgm_track: Option<PathBuf>,
    #[serde(default)]
    pub dubbed_track: Option<PathBuf>,
    #[serde(default)]
    pub final_video: Option<PathBuf>,

    #[serde(default)]
    pub clip_start: f64,
    #[serde(default)]
    pub clip_end: f64,

    #[serde(default = "default_stages")]
    pub stages: BTreeMap<Stage, StageStatus>,

    #[serde(default)]
    pub segments: Vec<Segment>,

    #[serde(default)]
    pub error_msg: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_stages() -> BTreeMap<Stage, StageStatus> {
    Stage::ALL.iter().map(|s| (*s, StageStatus::Pending)).collect()
}

impl ProjectManifest {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(
        project_name: &str,
        video_source: P,
        subtitle_source: Q,
    ) -> Self {
        let now = Utc::now();
        Self {
            project_name: project_name.to_string(),
            video_source: video_source.into(),
            subtitle_source: subtitle_source.into(),
            status: ProjectStatus::Pending,
            clipped_video: None,
            vocal_track: None,
            bgm_track: None,
            dubbed_track: None,
            final_video: None,
            clip_start: 0.0,
            clip_end: 0.0,
            stages: default_stages(),
            segments: Vec::new(),
            error_msg: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Manifest file path for a project, derived from the project name.
    pub fn path_for(work_dir: &Path, project_name: &str) -> PathBuf {
        work_dir.join(format!("{}_manifest.json", project_name))
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        self.stages.get(&stage).copied().unwrap_or(StageStatus::Pending)
    }

    pub fn set_stage(&mut self, stage: Stage, status: StageStatus) {
        self.stages.insert(stage, status);
    }

    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut value: serde_json::Value = serde_json::from_str(&content)?;
        normalize_legacy_stages(&mut value);
        serde_json::from_value(value)
            .map_err(|e| AutodubError::Manifest(format!("Invalid manifest schema: {}", e)))
    }

    /// Load an existing manifest, falling back to a fresh one when the file
    /// is missing or unreadable.
    pub fn load_or_create<P: Into<PathBuf>, Q: Into<PathBuf>>(
        path: &Path,
        project_name: &str,
        video_source: P,
        subtitle_source: Q,
    ) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(manifest) => return manifest,
                Err(e) => {
                    warn!("Failed to load manifest at {} ({}), starting fresh", path.display(), e);
                }
            }
        }
        Self::new(project_name, video_source, subtitle_source)
    }
}

/// Older manifests stored a stage's status as a nested object
/// `{"status": "...", "files": [...]}`; the current schema is the bare
/// status string. Flatten both shapes here so deserialization and all
/// business logic see a single representation.
fn normalize_legacy_stages(value: &mut serde_json::Value) {
    let Some(stages) = value.get_mut("stages").and_then(|s| s.as_object_mut()) else {
        return;
    };
    for (_, status) in stages.iter_mut() {
        if status.is_object() {
            let bare = status
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("pending")
                .to_string();
            *status = serde_json::Value::String(bare);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentStatus;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = ProjectManifest::path_for(dir.path(), "ep01");

        let mut manifest = ProjectManifest::new("ep01", "ep01.mkv", "ep01.srt");
        manifest.clip_start = 58.0;
        manifest.clip_end = 122.0;
        manifest.set_stage(Stage::Clip, StageStatus::Completed);
        manifest.segments.push(Segment::new(1, 60.0, 62.0, "src".into(), "目标".into()));
        manifest.save(&path).unwrap();

        let loaded = ProjectManifest::load(&path).unwrap();
        assert_eq!(loaded.project_name, "ep01");
        assert_eq!(loaded.stage_status(Stage::Clip), StageStatus::Completed);
        assert_eq!(loaded.stage_status(Stage::Synthesize), StageStatus::Pending);
        assert_eq!(loaded.segments.len(), 1);
        assert_eq!(loaded.segments[0].status, SegmentStatus::Pending);
        assert_eq!(loaded.clip_end, 122.0);
    }

    #[test]
    fn test_load_normalizes_legacy_stage_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy_manifest.json");

        let legacy = serde_json::json!({
            "project_name": "legacy",
            "video_source": "legacy.mkv",
            "subtitle_source": "legacy.srt",
            "status": "processing",
            "clip_start": 0.0,
            "clip_end": 30.0,
            "stages": {
                "parse": {"status": "completed", "files": ["a.json"]},
                "clip": {"status": "pending", "files": []},
                "extract_vocals": "completed",
                "prepare_segments": "pending",
                "synthesize": "pending",
                "compose": "pending"
            },
            "segments": [],
            "created_at": "2025-11-02T10:00:00Z",
            "updated_at": "2025-11-02T10:05:00Z"
        });
        std::fs::write(&path, serde_json::to_string_pretty(&legacy).unwrap()).unwrap();

        let manifest = ProjectManifest::load(&path).unwrap();
        assert_eq!(manifest.stage_status(Stage::Parse), StageStatus::Completed);
        assert_eq!(manifest.stage_status(Stage::Clip), StageStatus::Pending);
        assert_eq!(manifest.stage_status(Stage::ExtractVocals), StageStatus::Completed);
    }

    #[test]
    fn test_load_or_create_falls_back_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken_manifest.json");
        std::fs::write(&path, "not json at all").unwrap();

        let manifest = ProjectManifest::load_or_create(&path, "fresh", "v.mkv", "s.srt");
        assert_eq!(manifest.project_name, "fresh");
        assert_eq!(manifest.status, ProjectStatus::Pending);
    }
}
