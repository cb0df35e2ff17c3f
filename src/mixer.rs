//! Timeline composition.
//!
//! Places synthesized clips on a silent base to build the dubbed dialogue
//! track, derives the complementary gap-vocal track that preserves
//! untranscribed vocal content (laughter, singing, ambient voice) under a
//! smooth ducking envelope, and mixes the result with the background track.
//!
//! All mixing is a plain linear sum with `normalize=0`: automatic gain
//! normalization attenuates dialogue loudness unpredictably, so per-segment
//! loudness set during post-processing is preserved verbatim.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::GapConfig;
use crate::error::{Result, AutodubError};
use crate::media::{MediaCommand, MediaCommandBuilder};
use crate::segment::{Segment, SegmentStatus};

/// Mixing more inputs than this in one ffmpeg invocation overflows
/// command-line limits; larger sets are rendered in batches and summed.
const MIX_BATCH_SIZE: usize = 50;

/// A ducking trapezoid around one occupied span: it ramps from 0 to 1 over
/// `[fade_in_start, span_start]`, holds 1 across the span, and ramps back to
/// 0 over `[span_end, fade_out_end]`. The gap envelope is
/// `1 - max(trapezoids)`.
#[derive(Debug, Clone, PartialEq)]
struct Trapezoid {
    fade_in_start: f64,
    span_start: f64,
    span_end: f64,
    fade_out_end: f64,
}

impl Trapezoid {
    fn around(span: (f64, f64), fade: f64, total_duration: f64) -> Self {
        Self {
            fade_in_start: (span.0 - fade).max(0.0),
            span_start: span.0,
            span_end: span.1,
            fade_out_end: (span.1 + fade).min(total_duration),
        }
    }

    /// Value of this trapezoid at time `t`.
    fn value(&self, t: f64) -> f64 {
        let fade_in = self.span_start - self.fade_in_start;
        let fade_out = self.fade_out_end - self.span_end;

        let left = if fade_in < 0.001 {
            1.0
        } else {
            ((t - self.fade_in_start) / fade_in).clamp(0.0, 1.0)
        };
        let right = if fade_out < 0.001 {
            1.0
        } else {
            ((self.fade_out_end - t) / fade_out).clamp(0.0, 1.0)
        };
        left * right
    }

    /// The same ramp as an ffmpeg volume expression term.
    fn to_expr(&self) -> String {
        let fade_in = self.span_start - self.fade_in_start;
        let fade_out = self.fade_out_end - self.span_end;

        let left = if fade_in < 0.001 {
            "1".to_string()
        } else {
            format!("clip((t-{:.4})/{:.4},0,1)", self.fade_in_start, fade_in)
        };
        let right = if fade_out < 0.001 {
            "1".to_string()
        } else {
            format!("clip(({:.4}-t)/{:.4},0,1)", self.fade_out_end, fade_out)
        };

        match (left.as_str(), right.as_str()) {
            ("1", "1") => "1".to_string(),
            ("1", _) => right,
            (_, "1") => left,
            _ => format!("{}*{}", left, right),
        }
    }
}

/// Merge spans whose gap is at most `merge_threshold`, so close-together
/// dialogue lines form one continuous ducked region instead of a rapidly
/// flickering envelope.
fn merge_spans(mut spans: Vec<(f64, f64)>, merge_threshold: f64) -> Vec<(f64, f64)> {
    spans.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged: Vec<(f64, f64)> = Vec::new();
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 + merge_threshold => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Build the full gap-envelope expression `1 - max_i(trap_i(t))`. FFmpeg's
/// `max()` takes two arguments, so the terms are nested right-to-left.
fn build_envelope_expr(trapezoids: &[Trapezoid]) -> String {
    let Some((last, rest)) = trapezoids.split_last() else {
        return "1".to_string();
    };

    let mut max_expr = last.to_expr();
    for trap in rest.iter().rev() {
        max_expr = format!("max({},{})", trap.to_expr(), max_expr);
    }
    format!("1-{}", max_expr)
}

/// Gap envelope value at `t`, the reference for what the ffmpeg expression
/// computes.
fn envelope_value(trapezoids: &[Trapezoid], t: f64) -> f64 {
    1.0 - trapezoids.iter().map(|tr| tr.value(t)).fold(0.0, f64::max)
}

/// One successfully synthesized clip as it lands on the timeline.
struct PlacedClip<'a> {
    start_time: f64,
    rendered: f64,
    path: &'a Path,
}

pub struct Mixer {
    ffmpeg: MediaCommandBuilder,
    sample_rate: u32,
    gap: GapConfig,
    intermediate_dir: PathBuf,
}

impl Mixer {
    pub fn new(ffmpeg_path: &str, sample_rate: u32, gap: GapConfig, intermediate_dir: PathBuf) -> Self {
        Self {
            ffmpeg: MediaCommandBuilder::new(ffmpeg_path),
            sample_rate,
            gap,
            intermediate_dir,
        }
    }

    /// Successful segments reduced to what composition needs: where the
    /// clip goes, how long it actually runs, and where its file lives.
    fn placed(segments: &[Segment]) -> Vec<PlacedClip<'_>> {
        segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Success)
            .filter_map(|s| {
                s.output_audio_path.as_deref().map(|path| PlacedClip {
                    start_time: s.start_time,
                    rendered: s.actual_duration.unwrap_or(s.duration),
                    path,
                })
            })
            .collect()
    }

    /// Build the dubbed dialogue track: every successful clip placed at
    /// `start_time - time_offset` over silence, summed without level
    /// normalization.
    pub fn compose_dub_track(
        &self,
        segments: &[Segment],
        total_duration: f64,
        output: &Path,
        time_offset: f64,
    ) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let valid = Self::placed(segments);
        if valid.is_empty() {
            return Err(AutodubError::Media(
                "No successfully dubbed segments to compose".to_string(),
            ));
        }

        if valid.len() <= MIX_BATCH_SIZE {
            return self.mix_onto_silence(&valid, total_duration, output, time_offset);
        }

        info!(
            "Composing {} segments in batches of {}",
            valid.len(),
            MIX_BATCH_SIZE
        );

        // Stale batch files from an interrupted run must not leak into this mix
        for entry in std::fs::read_dir(&self.intermediate_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("batch_") && name.ends_with(".wav") {
                let _ = std::fs::remove_file(entry.path());
            }
        }

        // Each batch renders against the full-length silent base, so the
        // batch tracks are already time-aligned and their sum equals a
        // single-pass mix of all segments
        let mut batch_files = Vec::new();
        for (batch_idx, batch) in valid.chunks(MIX_BATCH_SIZE).enumerate() {
            let batch_output = self.intermediate_dir.join(format!("batch_{}.wav", batch_idx));
            self.mix_onto_silence(batch, total_duration, &batch_output, time_offset)?;
            batch_files.push(batch_output);
        }

        let mut cmd = self.ffmpeg.custom("Batch track summation").overwrite();
        for bf in &batch_files {
            cmd = cmd.input(bf);
        }
        let mix_inputs: String = (0..batch_files.len()).map(|i| format!("[{}:a]", i)).collect();
        let graph = format!(
            "{}amix=inputs={}:duration=first:dropout_transition=0:normalize=0[aout]",
            mix_inputs,
            batch_files.len()
        );
        cmd.filter_complex(graph)
            .map("[aout]")
            .audio_sample_rate(self.sample_rate)
            .audio_channels(1)
            .output(output)
            .execute()?;

        for bf in batch_files {
            let _ = std::fs::remove_file(bf);
        }

        Ok(())
    }

    /// One ffmpeg invocation: silent base + adelay-ed clips, amixed.
    fn mix_onto_silence(
        &self,
        clips: &[PlacedClip<'_>],
        total_duration: f64,
        output: &Path,
        time_offset: f64,
    ) -> Result<()> {
        let mut cmd: MediaCommand = self
            .ffmpeg
            .custom("Dub track composition")
            .overwrite()
            .silent_input(self.sample_rate, total_duration);

        for clip in clips {
            cmd = cmd.input(clip.path);
        }

        let mut filter_parts = Vec::new();
        let mut delay_outputs = String::new();
        for (i, clip) in clips.iter().enumerate() {
            let input_idx = i + 1; // input 0 is the silent base
            let delay_ms = (((clip.start_time - time_offset) * 1000.0) as i64).max(0);
            filter_parts.push(format!(
                "[{}:a]adelay={}|{},apad=whole_dur={}[a{}]",
                input_idx, delay_ms, delay_ms, total_duration, i
            ));
            delay_outputs.push_str(&format!("[a{}]", i));
        }

        filter_parts.push(format!(
            "[0:a]{}amix=inputs={}:duration=first:dropout_transition=0:normalize=0[aout]",
            delay_outputs,
            clips.len() + 1
        ));

        cmd.filter_complex(filter_parts.join(";"))
            .map("[aout]")
            .audio_sample_rate(self.sample_rate)
            .audio_channels(1)
            .output(output)
            .execute()
    }

    /// Build the gap-vocal track: the original vocal with a smooth volume
    /// envelope that ducks only where dubbed dialogue now plays. With no
    /// successful segments the input is passed through verbatim.
    pub fn compose_gap_track(
        &self,
        vocal: &Path,
        segments: &[Segment],
        total_duration: f64,
        output: &Path,
        time_offset: f64,
    ) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let valid = Self::placed(segments);
        if valid.is_empty() {
            std::fs::copy(vocal, output)?;
            return Ok(());
        }

        let margin = self.gap.span_margin_secs;
        let mut spans = Vec::new();
        for clip in &valid {
            let start = (clip.start_time - time_offset - margin).max(0.0);
            let end = (clip.start_time - time_offset + clip.rendered + margin).min(total_duration);
            if end > start {
                spans.push((start, end));
            }
        }
        if spans.is_empty() {
            std::fs::copy(vocal, output)?;
            return Ok(());
        }

        let merged = merge_spans(spans, self.gap.merge_threshold_secs);
        let trapezoids: Vec<Trapezoid> = merged
            .iter()
            .map(|span| Trapezoid::around(*span, self.gap.fade_secs, total_duration))
            .collect();

        info!(
            "Gap vocal: {} segments -> {} ducked regions (fade {:.0}ms, merge {:.0}ms)",
            valid.len(),
            merged.len(),
            self.gap.fade_secs * 1000.0,
            self.gap.merge_threshold_secs * 1000.0
        );

        // The expression grows with the region count; hand it to ffmpeg via
        // a filter script file instead of the command line
        let expr = build_envelope_expr(&trapezoids);
        let mut script = tempfile::Builder::new()
            .prefix("ffmpeg_filter_")
            .suffix(".txt")
            .tempfile_in(output.parent().unwrap_or(Path::new(".")))?;
        write!(script, "volume='{}':eval=frame", expr)?;
        script.flush()?;

        self.ffmpeg
            .custom("Gap vocal envelope")
            .overwrite()
            .input(vocal)
            .audio_filter_script(script.path())
            .audio_sample_rate(self.sample_rate)
            .audio_channels(1)
            .duration(total_duration)
            .output(output)
            .execute()
    }

    /// Sum the dub track and the gap-vocal track, mono output.
    pub fn mix_voice_tracks(
        &self,
        track_a: &Path,
        track_b: &Path,
        output: &Path,
        volume_a: f64,
        volume_b: f64,
    ) -> Result<()> {
        self.mix_two(track_a, track_b, output, volume_a, volume_b, 1, "Voice track mix")
    }

    /// Sum the voice track with the background, stereo output, the
    /// background attenuated relative to voice.
    pub fn mix_with_background(
        &self,
        voice: &Path,
        bgm: &Path,
        output: &Path,
        voice_volume: f64,
        bgm_volume: f64,
    ) -> Result<()> {
        info!("Mixing background (voice {:.1}x, bgm {:.1}x)", voice_volume, bgm_volume);
        self.mix_two(voice, bgm, output, voice_volume, bgm_volume, 2, "Background mix")
    }

    fn mix_two(
        &self,
        track_a: &Path,
        track_b: &Path,
        output: &Path,
        volume_a: f64,
        volume_b: f64,
        channels: u32,
        description: &str,
    ) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let graph = format!(
            "[0:a]volume={}[a];[1:a]volume={}[b];[a][b]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]",
            volume_a, volume_b
        );

        self.ffmpeg
            .custom(description)
            .overwrite()
            .input(track_a)
            .input(track_b)
            .filter_complex(graph)
            .map("[aout]")
            .audio_sample_rate(self.sample_rate)
            .audio_channels(channels)
            .output(output)
            .execute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentStatus;

    fn gap_config() -> GapConfig {
        GapConfig {
            merge_threshold_secs: 0.30,
            fade_secs: 0.15,
            span_margin_secs: 0.03,
        }
    }

    fn success_segment(id: u32, start: f64, duration: f64) -> Segment {
        let mut seg = Segment::new(id, start, start + duration, String::new(), "词".to_string());
        seg.status = SegmentStatus::Success;
        seg.output_audio_path = Some(PathBuf::from(format!("dub_{:04}.wav", id)));
        seg.actual_duration = Some(duration);
        seg
    }

    #[test]
    fn test_merge_spans_merges_close_neighbors() {
        let spans = vec![(10.0, 12.0), (12.2, 14.0), (20.0, 21.0)];
        let merged = merge_spans(spans, 0.30);
        assert_eq!(merged, vec![(10.0, 14.0), (20.0, 21.0)]);
    }

    #[test]
    fn test_merge_spans_keeps_distant_spans() {
        let spans = vec![(0.0, 1.0), (2.0, 3.0)];
        let merged = merge_spans(spans, 0.30);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_spans_sorts_input() {
        let spans = vec![(5.0, 6.0), (0.0, 1.0)];
        let merged = merge_spans(spans, 0.1);
        assert_eq!(merged, vec![(0.0, 1.0), (5.0, 6.0)]);
    }

    #[test]
    fn test_envelope_far_from_spans_is_full_volume() {
        let traps = vec![Trapezoid::around((10.0, 12.0), 0.15, 100.0)];
        assert_eq!(envelope_value(&traps, 50.0), 1.0);
        assert_eq!(envelope_value(&traps, 0.0), 1.0);
    }

    #[test]
    fn test_envelope_inside_span_is_silent() {
        let traps = vec![Trapezoid::around((10.0, 14.0), 0.15, 100.0)];
        assert_eq!(envelope_value(&traps, 12.0), 0.0);
    }

    #[test]
    fn test_envelope_is_continuous_across_fade_boundary() {
        let traps = vec![Trapezoid::around((10.0, 14.0), 0.15, 100.0)];
        // Sample both sides of the fade-in start and the span start; no jump
        // larger than the slope times the step
        let eps = 0.001;
        for boundary in [9.85, 10.0, 14.0, 14.15] {
            let before = envelope_value(&traps, boundary - eps);
            let after = envelope_value(&traps, boundary + eps);
            assert!(
                (before - after).abs() < 0.05,
                "discontinuity at {}: {} -> {}",
                boundary,
                before,
                after
            );
        }
        // And the ramp midpoint sits between the extremes
        let mid = envelope_value(&traps, 9.925);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn test_envelope_expr_structure() {
        let traps = vec![
            Trapezoid::around((10.0, 12.0), 0.15, 100.0),
            Trapezoid::around((20.0, 22.0), 0.15, 100.0),
        ];
        let expr = build_envelope_expr(&traps);
        assert!(expr.starts_with("1-max("));
        assert!(expr.contains("clip((t-9.8500)/0.1500,0,1)"));
        assert!(expr.contains("clip((12.1500-t)/0.1500,0,1)"));
    }

    #[test]
    fn test_envelope_expr_clamps_at_track_start() {
        // A span at t=0 has no room to fade in; the left ramp collapses to 1
        let trap = Trapezoid::around((0.0, 2.0), 0.15, 100.0);
        assert!(!trap.to_expr().contains("(t-0.0000)/0.0000"));
        assert!((trap.value(1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_batch_partitioning_covers_all_segments() {
        let segments: Vec<Segment> = (1..=120)
            .map(|i| success_segment(i, i as f64 * 3.0, 2.0))
            .collect();
        let valid = Mixer::placed(&segments);
        assert_eq!(valid.len(), 120);

        let chunks: Vec<_> = valid.chunks(MIX_BATCH_SIZE).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 50);
        assert_eq!(chunks[2].len(), 20);
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 120);
    }

    #[test]
    fn test_placed_filters_failed_segments() {
        let mut failed = success_segment(2, 5.0, 2.0);
        failed.status = SegmentStatus::Error;
        failed.output_audio_path = None;
        let segments = vec![success_segment(1, 0.0, 2.0), failed];

        let valid = Mixer::placed(&segments);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].path, Path::new("dub_0001.wav"));
    }

    #[test]
    fn test_gap_track_copies_input_when_nothing_succeeded() {
        let dir = tempfile::tempdir().unwrap();
        let vocal = dir.path().join("vocal.wav");
        std::fs::write(&vocal, b"fake wav bytes").unwrap();
        let output = dir.path().join("gap.wav");

        let mixer = Mixer::new("ffmpeg", 22050, gap_config(), dir.path().to_path_buf());
        let mut seg = success_segment(1, 0.0, 2.0);
        seg.status = SegmentStatus::Pending;

        mixer
            .compose_gap_track(&vocal, &[seg], 30.0, &output, 0.0)
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"fake wav bytes");
    }
}
