//! Six-stage dubbing pipeline controller.
//!
//! Stages run in fixed order: parse -> clip -> extract-vocals ->
//! prepare-segments -> synthesize -> compose. A stage only runs when its
//! manifest flag plus the on-disk artifact it claims do not already satisfy
//! it (double verification), and the manifest is persisted after every
//! segment- and stage-level transition, so re-invoking the pipeline resumes
//! at the last durable checkpoint.

use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{Config, SpeedConfig};
use crate::error::{Result, AutodubError};
use crate::manifest::{ProjectManifest, ProjectStatus, Stage, StageStatus};
use crate::media::MediaProcessor;
use crate::mixer::Mixer;
use crate::segment::{reconcile, SegmentStatus};
use crate::separate::VocalSeparator;
use crate::subtitle::SubtitleExtractor;
use crate::tts::SpeechSynthesizer;

/// A previously clipped video whose duration differs from the requested
/// window by more than this is considered stale. Absorbs encoding and
/// padding slack.
const WINDOW_TOLERANCE_SECS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Process only the configured preview window
    Demo,
    /// Process the full video duration
    Full,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    media: &'a dyn MediaProcessor,
    separator: &'a dyn VocalSeparator,
    synthesizer: &'a mut dyn SpeechSynthesizer,
    mixer: Mixer,

    video_path: PathBuf,
    subtitle_path: PathBuf,
    project_name: String,
    manifest_path: PathBuf,
    manifest: ProjectManifest,
    mode: RunMode,
}

impl<'a> Pipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a Config,
        media: &'a dyn MediaProcessor,
        separator: &'a dyn VocalSeparator,
        synthesizer: &'a mut dyn SpeechSynthesizer,
        video_path: PathBuf,
        subtitle_path: PathBuf,
        project_name: Option<String>,
        mode: RunMode,
        force: bool,
    ) -> Result<Self> {
        if !video_path.exists() {
            return Err(AutodubError::FileNotFound(video_path.display().to_string()));
        }
        if !subtitle_path.exists() {
            return Err(AutodubError::FileNotFound(subtitle_path.display().to_string()));
        }

        let project_name = match project_name {
            Some(name) => name,
            None => video_path
                .file_stem()
                .ok_or_else(|| AutodubError::Config("Invalid video filename".to_string()))?
                .to_string_lossy()
                .to_string(),
        };

        config.ensure_dirs()?;
        let manifest_path = ProjectManifest::path_for(&config.paths.work_dir, &project_name);

        let manifest = if force {
            info!("Force restart requested, discarding previous state");
            Self::clean_project_files(config, &project_name, &manifest_path);
            ProjectManifest::new(&project_name, &video_path, &subtitle_path)
        } else {
            ProjectManifest::load_or_create(&manifest_path, &project_name, &video_path, &subtitle_path)
        };

        let mixer = Mixer::new(
            &config.media.ffmpeg_path,
            config.audio.sample_rate,
            config.gap.clone(),
            config.paths.intermediate_dir(),
        );

        Ok(Self {
            config,
            media,
            separator,
            synthesizer,
            mixer,
            video_path,
            subtitle_path,
            project_name,
            manifest_path,
            manifest,
            mode,
        })
    }

    pub fn manifest(&self) -> &ProjectManifest {
        &self.manifest
    }

    /// Run the full pipeline, resuming from the last durable checkpoint.
    /// Returns the final dubbed video path.
    pub async fn run(&mut self) -> Result<PathBuf> {
        self.manifest.status = ProjectStatus::Processing;
        self.manifest.error_msg = None;
        self.save_manifest()?;

        info!(
            "Dubbing project {} ({} mode)",
            self.project_name,
            match self.mode {
                RunMode::Demo => "demo",
                RunMode::Full => "full",
            }
        );

        match self.run_stages().await {
            Ok(final_video) => {
                self.manifest.status = ProjectStatus::Completed;
                self.save_manifest()?;
                self.log_summary();
                info!("Dubbing complete: {}", final_video.display());
                Ok(final_video)
            }
            Err(e) => {
                self.manifest.status = ProjectStatus::Error;
                self.manifest.error_msg = Some(e.to_string());
                self.save_manifest()?;
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<PathBuf> {
        // Parsing is cheap and must re-derive the clip window, so it always runs
        self.stage_parse().await?;
        self.invalidate_on_window_change().await?;

        if self.stage_completed(Stage::Clip) {
            info!("[2/6] Clip already verified, skipping");
        } else {
            self.stage_clip().await?;
        }

        if self.stage_completed(Stage::ExtractVocals) {
            info!("[3/6] Vocal extraction already verified, skipping");
        } else {
            self.stage_extract_vocals().await?;
        }

        // Segment stages re-run and skip at segment granularity
        self.stage_prepare_segments().await?;
        self.stage_synthesize().await?;

        if self.stage_completed(Stage::Compose) {
            info!("[6/6] Composition already verified, skipping");
        } else {
            self.stage_compose().await?;
        }

        self.manifest
            .final_video
            .clone()
            .ok_or_else(|| AutodubError::Media("Composition finished without a final video".to_string()))
    }

    /// A stage counts as complete only when the manifest flag says so AND
    /// the artifact it claims to have produced is present on disk.
    fn stage_completed(&self, stage: Stage) -> bool {
        if self.manifest.stage_status(stage) != StageStatus::Completed {
            return false;
        }
        let artifact = match stage {
            Stage::Clip => &self.manifest.clipped_video,
            Stage::ExtractVocals => &self.manifest.vocal_track,
            Stage::Compose => &self.manifest.final_video,
            // parse re-runs every time; segment stages verify per segment
            _ => return true,
        };
        artifact.as_ref().map(|p| p.exists()).unwrap_or(false)
    }

    fn save_manifest(&mut self) -> Result<()> {
        self.manifest.save(&self.manifest_path)
    }

    // -- Stage 1: parse ----------------------------------------------------

    async fn stage_parse(&mut self) -> Result<()> {
        info!("[1/6] Parsing subtitles");

        let extractor = SubtitleExtractor::new(self.config.subtitle.clone());
        let mut segments = match self.mode {
            RunMode::Demo => {
                let demo = &self.config.demo;
                extractor.extract(
                    &self.subtitle_path,
                    demo.start_time,
                    demo.end_time,
                    Some(demo.max_segments),
                )?
            }
            RunMode::Full => extractor.extract(&self.subtitle_path, 0.0, f64::INFINITY, None)?,
        };

        if segments.is_empty() {
            return Err(AutodubError::Subtitle(
                "No usable subtitle segments found".to_string(),
            ));
        }

        let (clip_start, clip_end) = match self.mode {
            RunMode::Demo => extractor.derive_clip_window(&segments),
            RunMode::Full => (0.0, self.media.probe_duration(&self.video_path).await?),
        };

        let carried = reconcile(&self.manifest.segments, &mut segments);

        self.manifest.segments = segments;
        self.manifest.clip_start = clip_start;
        self.manifest.clip_end = clip_end;
        self.manifest.set_stage(Stage::Parse, StageStatus::Completed);
        self.save_manifest()?;

        info!(
            "Parsed {} segments (recovered {}), window {:.2}s - {:.2}s",
            self.manifest.segments.len(),
            carried,
            clip_start,
            clip_end
        );
        Ok(())
    }

    // -- Window invalidation ----------------------------------------------

    /// Detect a clip-window change (e.g. demo -> full switch) by comparing
    /// the previous clip's actual duration against the new window, and drop
    /// every artifact whose correctness depends on the window.
    async fn invalidate_on_window_change(&mut self) -> Result<()> {
        let Some(clipped) = self.manifest.clipped_video.clone() else {
            return Ok(());
        };
        if !clipped.exists() {
            return Ok(());
        }

        let expected = self.manifest.clip_end - self.manifest.clip_start;
        let actual = match self.media.probe_duration(&clipped).await {
            Ok(d) => d,
            // An unreadable clip will be caught by stage verification
            Err(_) => return Ok(()),
        };

        if (actual - expected).abs() <= WINDOW_TOLERANCE_SECS {
            return Ok(());
        }

        warn!(
            "Clip window changed (existing clip {:.1}s, new window {:.1}s); invalidating derived artifacts",
            actual, expected
        );

        let stale = [
            self.manifest.clipped_video.take(),
            self.manifest.vocal_track.take(),
            self.manifest.bgm_track.take(),
            self.manifest.dubbed_track.take(),
            self.manifest.final_video.take(),
        ];
        for path in stale.into_iter().flatten() {
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
        let full_audio = self
            .config
            .paths
            .intermediate_dir()
            .join(format!("{}_full.wav", self.project_name));
        if full_audio.exists() {
            let _ = std::fs::remove_file(full_audio);
        }

        for stage in [
            Stage::Clip,
            Stage::ExtractVocals,
            Stage::PrepareSegments,
            Stage::Synthesize,
            Stage::Compose,
        ] {
            self.manifest.set_stage(stage, StageStatus::Pending);
        }

        for seg in &mut self.manifest.segments {
            seg.reset_processing_fields();
        }
        self.remove_prefixed_files(&self.config.paths.segments_dir());
        self.remove_prefixed_files(&self.config.paths.dub_segments_dir());

        self.save_manifest()?;
        info!("Stages 2-6 reset, reprocessing from the clip stage");
        Ok(())
    }

    /// Remove this project's files from a per-segment artifact directory.
    fn remove_prefixed_files(&self, dir: &Path) {
        let prefix = format!("{}_", self.project_name);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    // -- Stage 2: clip -----------------------------------------------------

    async fn stage_clip(&mut self) -> Result<()> {
        info!("[2/6] Clipping video");

        let clipped = self
            .config
            .paths
            .intermediate_dir()
            .join(format!("{}_clip.mp4", self.project_name));

        if clipped.exists() {
            info!("Clip already on disk: {}", clipped.display());
            self.manifest.clipped_video = Some(clipped);
            self.manifest.set_stage(Stage::Clip, StageStatus::Completed);
            self.save_manifest()?;
            return Ok(());
        }

        let start = self.manifest.clip_start;
        let duration = self.manifest.clip_end - start;
        self.media
            .clip_video(&self.video_path, &clipped, start, duration)
            .await?;

        self.manifest.clipped_video = Some(clipped);
        self.manifest.set_stage(Stage::Clip, StageStatus::Completed);
        self.save_manifest()?;
        Ok(())
    }

    // -- Stage 3: extract vocals -------------------------------------------

    async fn stage_extract_vocals(&mut self) -> Result<()> {
        info!("[3/6] Extracting audio and separating vocals");

        let inter = self.config.paths.intermediate_dir();
        let full = inter.join(format!("{}_full.wav", self.project_name));
        let vocals = inter.join(format!("{}_full_vocals.wav", self.project_name));
        let bgm = inter.join(format!("{}_full_bgm.wav", self.project_name));

        if vocals.exists() && bgm.exists() {
            info!("Separated tracks already on disk, skipping");
            self.manifest.vocal_track = Some(vocals);
            self.manifest.bgm_track = Some(bgm);
            self.manifest.set_stage(Stage::ExtractVocals, StageStatus::Completed);
            self.save_manifest()?;
            return Ok(());
        }

        let clipped = self
            .manifest
            .clipped_video
            .clone()
            .ok_or_else(|| AutodubError::Media("No clipped video to extract audio from".to_string()))?;

        if !full.exists() {
            self.media.extract_audio(&clipped, &full).await?;
        }

        match self.separator.separate(&full, &inter).await {
            Ok((v, b)) => {
                self.manifest.vocal_track = Some(v);
                self.manifest.bgm_track = Some(b);
                self.manifest.set_stage(Stage::ExtractVocals, StageStatus::Completed);
            }
            Err(e) => {
                // Degraded mode: the full mix stands in for the vocal track
                // and composition proceeds without a background track. The
                // stage flag stays pending so a later run retries separation.
                warn!("Vocal separation failed ({}), falling back to the full mix", e);
                self.manifest.vocal_track = Some(full);
                self.manifest.bgm_track = None;
            }
        }
        self.save_manifest()?;
        Ok(())
    }

    // -- Stage 4: prepare segments -----------------------------------------

    async fn stage_prepare_segments(&mut self) -> Result<()> {
        info!("[4/6] Preparing reference clips");

        let vocal = self
            .manifest
            .vocal_track
            .clone()
            .ok_or_else(|| AutodubError::Media("No vocal track for reference preparation".to_string()))?;
        let time_offset = self.manifest.clip_start;
        let segments_dir = self.config.paths.segments_dir();

        let total = self.manifest.segments.len();
        let progress = ProgressBar::new(total as u64);
        let mut skipped = 0usize;

        for i in 0..total {
            progress.inc(1);

            let (id, start, duration) = {
                let seg = &self.manifest.segments[i];
                (seg.id, seg.start_time, seg.duration)
            };

            let expected_ref = segments_dir.join(format!("{}_ref_{:04}.wav", self.project_name, id));
            if expected_ref.exists() {
                self.manifest.segments[i].ref_audio_path = Some(expected_ref);
                skipped += 1;
                continue;
            }

            match self
                .media
                .prepare_reference(&vocal, &expected_ref, start - time_offset, duration)
                .await
            {
                Ok(()) => {
                    self.manifest.segments[i].ref_audio_path = Some(expected_ref);
                }
                Err(e) => {
                    warn!("Reference preparation failed for segment {}: {}", id, e);
                    let seg = &mut self.manifest.segments[i];
                    seg.status = SegmentStatus::Error;
                    seg.error_msg = Some(e.to_string());
                }
            }
            self.save_manifest()?;
        }
        progress.finish_and_clear();

        self.manifest.set_stage(Stage::PrepareSegments, StageStatus::Completed);
        self.save_manifest()?;

        if skipped > 0 {
            info!("Reused {} existing reference clips, prepared {}", skipped, total - skipped);
        } else {
            info!("Prepared {} reference clips", total);
        }
        Ok(())
    }

    // -- Stage 5: synthesize -----------------------------------------------

    async fn stage_synthesize(&mut self) -> Result<()> {
        info!("[5/6] Synthesizing dubbed speech");

        let needs_work = self.manifest.segments.iter().any(|s| {
            !s.is_verified_success() && s.status != SegmentStatus::Error && s.ref_audio_path.is_some()
        });
        if !needs_work {
            info!("All segments already synthesized, skipping");
            self.manifest.set_stage(Stage::Synthesize, StageStatus::Completed);
            self.save_manifest()?;
            return Ok(());
        }

        // Loading holds accelerator memory; only do it when work remains
        if !self.synthesizer.is_loaded() {
            self.synthesizer.load().await?;
        }

        let dub_dir = self.config.paths.dub_segments_dir();
        let total = self.manifest.segments.len();
        let progress = ProgressBar::new(total as u64);

        for i in 0..total {
            progress.inc(1);

            let (id, text, ref_audio, start, slot_duration) = {
                let seg = &self.manifest.segments[i];
                if seg.is_verified_success() || seg.status == SegmentStatus::Error {
                    continue;
                }
                let Some(ref_audio) = seg.ref_audio_path.clone() else {
                    continue;
                };
                (seg.id, seg.target_text.clone(), ref_audio, seg.start_time, seg.duration)
            };

            self.manifest.segments[i].status = SegmentStatus::Processing;
            self.save_manifest()?;

            let raw_output = dub_dir.join(format!("{}_dub_{:04}.wav", self.project_name, id));
            if let Err(e) = self.synthesizer.synthesize(&text, &ref_audio, &raw_output).await {
                warn!("Synthesis failed for segment {}: {}", id, e);
                let seg = &mut self.manifest.segments[i];
                seg.status = SegmentStatus::Error;
                seg.error_msg = Some(e.to_string());
                self.save_manifest()?;
                continue;
            }

            {
                let seg = &mut self.manifest.segments[i];
                seg.output_audio_path = Some(raw_output.clone());
                seg.status = SegmentStatus::Success;
            }

            if let Err(e) = self.post_process_segment(i, &raw_output, start, slot_duration).await {
                warn!(
                    "Post-processing failed for segment {} ({}), keeping the raw synthesis clip",
                    id, e
                );
            }
            self.save_manifest()?;
        }
        progress.finish_and_clear();

        let success = self
            .manifest
            .segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Success)
            .count();
        info!("Synthesis complete: {}/{} segments", success, total);

        self.manifest.set_stage(Stage::Synthesize, StageStatus::Completed);
        self.save_manifest()?;
        Ok(())
    }

    /// Duration-match the synthesized clip to its subtitle slot and
    /// normalize its loudness.
    async fn post_process_segment(
        &mut self,
        i: usize,
        raw_output: &Path,
        start: f64,
        slot_duration: f64,
    ) -> Result<()> {
        let actual = self.media.probe_duration(raw_output).await?;
        self.manifest.segments[i].actual_duration = Some(actual);

        let next_start = self.manifest.segments[i + 1..]
            .iter()
            .find(|s| s.status != SegmentStatus::Error)
            .map(|s| s.start_time);
        let speed = compute_speed_adjustment(actual, slot_duration, start, next_start, &self.config.speed);

        let id = self.manifest.segments[i].id;
        let final_output = self
            .config
            .paths
            .dub_segments_dir()
            .join(format!("{}_dub_{:04}_final.wav", self.project_name, id));

        self.media
            .post_process(raw_output, &final_output, speed, self.config.audio.target_loudness_lufs)
            .await?;

        let final_duration = self.media.probe_duration(&final_output).await?;
        let seg = &mut self.manifest.segments[i];
        seg.output_audio_path = Some(final_output);
        seg.actual_duration = Some(final_duration);
        Ok(())
    }

    // -- Stage 6: compose --------------------------------------------------

    async fn stage_compose(&mut self) -> Result<()> {
        info!("[6/6] Composing and exporting");

        let total_duration = self.manifest.clip_end - self.manifest.clip_start;
        let time_offset = self.manifest.clip_start;
        let inter = self.config.paths.intermediate_dir();

        let dub_track = self
            .config
            .paths
            .work_dir
            .join(format!("{}_dub.wav", self.project_name));
        self.mixer
            .compose_dub_track(&self.manifest.segments, total_duration, &dub_track, time_offset)?;
        self.manifest.dubbed_track = Some(dub_track.clone());
        self.save_manifest()?;

        // Preserve untranscribed vocal content (laughter, singing) under a
        // ducking envelope and sum it with the dialogue track
        let mut voice_track = dub_track.clone();
        if let Some(vocal) = self.manifest.vocal_track.clone().filter(|p| p.exists()) {
            let gap = inter.join(format!("{}_gap_vocal.wav", self.project_name));
            let combined = inter.join(format!("{}_combined_dub.wav", self.project_name));
            let result = self
                .mixer
                .compose_gap_track(&vocal, &self.manifest.segments, total_duration, &gap, time_offset)
                .and_then(|_| self.mixer.mix_voice_tracks(&dub_track, &gap, &combined, 1.0, 1.0));
            match result {
                Ok(()) => voice_track = combined,
                Err(e) => warn!("Gap vocal processing failed ({}), using the dub track only", e),
            }
        }

        let final_audio = match self.manifest.bgm_track.clone().filter(|p| p.exists()) {
            Some(bgm) => {
                let mixed = inter.join(format!("{}_mixed.wav", self.project_name));
                match self.mixer.mix_with_background(
                    &voice_track,
                    &bgm,
                    &mixed,
                    1.0,
                    self.config.audio.bgm_mix_volume,
                ) {
                    Ok(()) => mixed,
                    Err(e) => {
                        warn!("Background mix failed ({}), using the voice track only", e);
                        voice_track
                    }
                }
            }
            None => voice_track,
        };

        let clipped = self
            .manifest
            .clipped_video
            .clone()
            .ok_or_else(|| AutodubError::Media("No clipped video to mux onto".to_string()))?;
        let final_video = self
            .config
            .paths
            .output_dir
            .join(format!("{}_dubbed.mp4", self.project_name));
        self.media.mux_audio(&clipped, &final_audio, &final_video).await?;

        self.manifest.final_video = Some(final_video);
        self.manifest.set_stage(Stage::Compose, StageStatus::Completed);
        self.save_manifest()?;
        Ok(())
    }

    // -- Housekeeping ------------------------------------------------------

    fn log_summary(&self) {
        let success = self
            .manifest
            .segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Success)
            .count();
        let errors = self
            .manifest
            .segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Error)
            .count();
        let pending = self.manifest.segments.len() - success - errors;

        info!("Segments: {} succeeded, {} failed, {} pending", success, errors, pending);
        if errors > 0 {
            warn!("Failed segments remain silent in the final track");
        }
    }

    /// Delete the manifest and every artifact matching this project's naming
    /// convention. Only called on an explicit force restart.
    fn clean_project_files(config: &Config, project_name: &str, manifest_path: &Path) {
        let mut removed = 0usize;

        if manifest_path.exists() && std::fs::remove_file(manifest_path).is_ok() {
            removed += 1;
        }

        let prefix = format!("{}_", project_name);
        for entry in WalkDir::new(&config.paths.work_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if entry.file_name().to_string_lossy().starts_with(&prefix)
                && std::fs::remove_file(entry.path()).is_ok()
            {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} stale project files", removed);
        }
    }
}

/// Playback-speed multiplier bringing a synthesized clip back into its
/// subtitle slot.
///
/// No adjustment inside the tolerance band. Outside it, the ratio is clamped
/// to the natural-sounding atempo range, then capped further so the
/// stretched clip cannot run past the start of the next non-error segment:
/// when the clamped value would overlap, the multiplier is recomputed from
/// the available headroom (bounded by atempo's 2.0 hard limit).
fn compute_speed_adjustment(
    actual_duration: f64,
    slot_duration: f64,
    segment_start: f64,
    next_segment_start: Option<f64>,
    speed: &SpeedConfig,
) -> Option<f64> {
    if slot_duration <= 0.0 {
        return None;
    }
    let ratio = actual_duration / slot_duration;
    if ratio >= 1.0 - speed.no_adjust_threshold && ratio <= 1.0 + speed.no_adjust_threshold {
        return None;
    }

    let mut multiplier = ratio.clamp(speed.min_atempo, speed.max_atempo);

    if let Some(next_start) = next_segment_start {
        let headroom = next_start - segment_start - speed.overlap_margin_secs;
        let adjusted = actual_duration / multiplier;
        if adjusted > headroom && headroom > 0.0 {
            multiplier = (actual_duration / headroom).min(2.0);
        }
    }

    Some(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::media::MockMediaProcessor;
    use crate::segment::Segment;
    use crate::separate::MockVocalSeparator;
    use crate::tts::MockSpeechSynthesizer;
    use std::path::PathBuf;

    fn speed_config() -> SpeedConfig {
        SpeedConfig {
            no_adjust_threshold: 0.1,
            min_atempo: 0.8,
            max_atempo: 1.25,
            overlap_margin_secs: 0.05,
        }
    }

    #[test]
    fn test_speed_within_tolerance_is_unadjusted() {
        assert_eq!(
            compute_speed_adjustment(2.05, 2.0, 10.0, Some(15.0), &speed_config()),
            None
        );
    }

    #[test]
    fn test_speed_clamped_to_atempo_range() {
        // 2.6s into a 2.0s slot wants 1.3x but clamps to 1.25; the rendered
        // duration 2.08s still fits before the next segment at 12.3s
        let speed = compute_speed_adjustment(2.6, 2.0, 10.0, Some(12.3), &speed_config()).unwrap();
        assert!((speed - 1.25).abs() < 1e-9);
        let rendered = 2.6 / speed;
        assert!(rendered <= 12.3 - 10.0 - 0.05);
        assert!(speed >= 2.6 / 2.25 - 1e-9);

        // Too-slow clips speed down no further than min_atempo
        let speed = compute_speed_adjustment(1.0, 2.0, 10.0, None, &speed_config()).unwrap();
        assert!((speed - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_speed_recomputed_from_headroom_on_overlap() {
        // Clamped 1.25x would render 2.08s but the next segment starts at
        // 11.5s, leaving only 1.45s; the multiplier grows to fit
        let speed = compute_speed_adjustment(2.6, 2.0, 10.0, Some(11.5), &speed_config()).unwrap();
        assert!((speed - 2.6 / 1.45).abs() < 1e-9);

        // atempo cannot exceed 2.0 even when headroom demands it
        let speed = compute_speed_adjustment(4.0, 2.0, 10.0, Some(11.0), &speed_config()).unwrap();
        assert!((speed - 2.0).abs() < 1e-9);
    }

    // -- Controller resume behavior ---------------------------------------

    struct Fixture {
        config: Config,
        _dir: tempfile::TempDir,
        video: PathBuf,
        subtitle: PathBuf,
    }

    /// A project directory with one demo-window segment ("你好" at 61s).
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let mut config = Config::default();
        config.paths.work_dir = root.join("temp");
        config.paths.output_dir = root.join("out");
        config.ensure_dirs().unwrap();

        let video = root.join("ep01.mkv");
        std::fs::write(&video, b"fake video").unwrap();
        let subtitle = root.join("ep01.srt");
        std::fs::write(
            &subtitle,
            "1\n00:01:01,000 --> 00:01:03,000\n\u{4f60}\u{597d}\n",
        )
        .unwrap();

        Fixture {
            config,
            _dir: dir,
            video,
            subtitle,
        }
    }

    /// Write a manifest plus on-disk artifacts describing a fully completed
    /// run of the fixture project. Returns the final video path.
    fn write_completed_state(f: &Fixture) -> PathBuf {
        let inter = f.config.paths.intermediate_dir();
        let clipped = inter.join("ep01_clip.mp4");
        let vocal = inter.join("ep01_full_vocals.wav");
        let bgm = inter.join("ep01_full_bgm.wav");
        let final_video = f.config.paths.output_dir.join("ep01_dubbed.mp4");
        let ref_clip = f.config.paths.segments_dir().join("ep01_ref_0001.wav");
        let dub_clip = f.config.paths.dub_segments_dir().join("ep01_dub_0001_final.wav");
        for p in [&clipped, &vocal, &bgm, &final_video, &ref_clip, &dub_clip] {
            std::fs::write(p, b"artifact").unwrap();
        }

        let mut seg = Segment::new(1, 61.0, 63.0, String::new(), "你好".to_string());
        seg.status = SegmentStatus::Success;
        seg.ref_audio_path = Some(ref_clip);
        seg.output_audio_path = Some(dub_clip);
        seg.actual_duration = Some(1.9);

        let mut manifest = ProjectManifest::new("ep01", &f.video, &f.subtitle);
        manifest.status = ProjectStatus::Completed;
        manifest.clipped_video = Some(clipped);
        manifest.vocal_track = Some(vocal);
        manifest.bgm_track = Some(bgm);
        manifest.final_video = Some(final_video.clone());
        // Demo window derived from the single segment: (61-2, 63+2)
        manifest.clip_start = 59.0;
        manifest.clip_end = 65.0;
        for stage in Stage::ALL {
            manifest.set_stage(stage, StageStatus::Completed);
        }
        manifest.segments = vec![seg];
        manifest
            .save(ProjectManifest::path_for(&f.config.paths.work_dir, "ep01"))
            .unwrap();

        final_video
    }

    #[tokio::test]
    async fn test_resume_of_completed_project_does_no_external_work() {
        let f = fixture();
        let final_video = write_completed_state(&f);

        // Only the window-invalidation probe of the existing clip is
        // allowed; any other collaborator call panics the mock.
        let mut media = MockMediaProcessor::new();
        media.expect_probe_duration().returning(|_| Ok(6.0));
        let separator = MockVocalSeparator::new();
        let mut synthesizer = MockSpeechSynthesizer::new();

        let mut pipeline = Pipeline::new(
            &f.config,
            &media,
            &separator,
            &mut synthesizer,
            f.video.clone(),
            f.subtitle.clone(),
            None,
            RunMode::Demo,
            false,
        )
        .unwrap();

        let result = pipeline.run().await.unwrap();
        assert_eq!(result, final_video);
        assert_eq!(pipeline.manifest().status, ProjectStatus::Completed);
        assert_eq!(pipeline.manifest().segments[0].status, SegmentStatus::Success);
    }

    #[tokio::test]
    async fn test_window_change_invalidates_downstream_stages() {
        let f = fixture();
        write_completed_state(&f);

        // The existing clip is 60s long but the demo window wants 6s
        let mut media = MockMediaProcessor::new();
        media.expect_probe_duration().returning(|_| Ok(60.0));
        let separator = MockVocalSeparator::new();
        let mut synthesizer = MockSpeechSynthesizer::new();

        let mut pipeline = Pipeline::new(
            &f.config,
            &media,
            &separator,
            &mut synthesizer,
            f.video.clone(),
            f.subtitle.clone(),
            None,
            RunMode::Demo,
            false,
        )
        .unwrap();

        pipeline.stage_parse().await.unwrap();
        pipeline.invalidate_on_window_change().await.unwrap();

        let manifest = pipeline.manifest();
        for stage in [Stage::Clip, Stage::ExtractVocals, Stage::PrepareSegments, Stage::Synthesize] {
            assert_eq!(manifest.stage_status(stage), StageStatus::Pending);
        }
        assert!(manifest.clipped_video.is_none());
        assert!(manifest.vocal_track.is_none());
        assert_eq!(manifest.segments[0].status, SegmentStatus::Pending);
        assert!(manifest.segments[0].ref_audio_path.is_none());
        assert!(!f
            .config
            .paths
            .segments_dir()
            .join("ep01_ref_0001.wav")
            .exists());
    }

    #[tokio::test]
    async fn test_window_within_tolerance_leaves_stages_untouched() {
        let f = fixture();
        write_completed_state(&f);

        // 6.0s window vs 7.5s clip: within the 2s tolerance
        let mut media = MockMediaProcessor::new();
        media.expect_probe_duration().returning(|_| Ok(7.5));
        let separator = MockVocalSeparator::new();
        let mut synthesizer = MockSpeechSynthesizer::new();

        let mut pipeline = Pipeline::new(
            &f.config,
            &media,
            &separator,
            &mut synthesizer,
            f.video.clone(),
            f.subtitle.clone(),
            None,
            RunMode::Demo,
            false,
        )
        .unwrap();

        pipeline.stage_parse().await.unwrap();
        pipeline.invalidate_on_window_change().await.unwrap();

        let manifest = pipeline.manifest();
        for stage in Stage::ALL {
            assert_eq!(manifest.stage_status(stage), StageStatus::Completed);
        }
        assert!(manifest.clipped_video.is_some());
        assert_eq!(manifest.segments[0].status, SegmentStatus::Success);
    }

    #[tokio::test]
    async fn test_force_restart_discards_state_and_artifacts() {
        let f = fixture();
        write_completed_state(&f);

        let media = MockMediaProcessor::new();
        let separator = MockVocalSeparator::new();
        let mut synthesizer = MockSpeechSynthesizer::new();

        let pipeline = Pipeline::new(
            &f.config,
            &media,
            &separator,
            &mut synthesizer,
            f.video.clone(),
            f.subtitle.clone(),
            None,
            RunMode::Demo,
            true,
        )
        .unwrap();

        assert_eq!(pipeline.manifest().status, ProjectStatus::Pending);
        assert!(pipeline.manifest().segments.is_empty());
        assert!(!f
            .config
            .paths
            .intermediate_dir()
            .join("ep01_clip.mp4")
            .exists());
        assert!(!f
            .config
            .paths
            .segments_dir()
            .join("ep01_ref_0001.wav")
            .exists());
    }
}
