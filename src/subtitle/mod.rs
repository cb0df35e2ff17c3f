//! Bilingual subtitle extraction.
//!
//! Parses an SRT file into the ordered [`Segment`] sequence the pipeline
//! works on: cues are cleaned of sound-cue annotations, dual-language lines
//! are paired, non-target-language cues are dropped, and numeric tokens in
//! the accepted target text are rewritten for synthesis.

pub mod numerals;

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::debug;

use crate::config::SubtitleConfig;
use crate::error::{AutodubError, Result};
use crate::segment::Segment;

/// Parenthetical/bracketed/braced spans (half- and full-width) and
/// music-note-delimited spans mark non-speech sound cues. Book-title marks
/// 《》 are deliberately not stripped; their content is usually spoken.
static ANNOTATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\(\[\{（【].*?[\)\]\}）】]|♪.*?♪|♪+").expect("annotation regex"));

static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->\s*(\d{2}):(\d{2}):(\d{2})[,.](\d{1,3})")
        .expect("timestamp regex")
});

/// One raw timed-text cue as read from the subtitle file.
#[derive(Debug, Clone)]
struct Cue {
    start: f64,
    end: f64,
    text: String,
}

/// Strip sound-cue annotations and surrounding whitespace.
fn clean_text(text: &str) -> String {
    ANNOTATION_RE.replace_all(text, "").trim().to_string()
}

/// A line is target-language when it contains any CJK unified ideograph.
fn contains_target_script(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

fn timestamp_to_secs(h: &str, m: &str, s: &str, ms: &str) -> f64 {
    let h: f64 = h.parse().unwrap_or(0.0);
    let m: f64 = m.parse().unwrap_or(0.0);
    let s: f64 = s.parse().unwrap_or(0.0);
    // "5" in a 3-digit field means 500ms in some writers; normalize by width
    let millis: f64 = format!("{:0<3}", ms).parse().unwrap_or(0.0);
    h * 3600.0 + m * 60.0 + s + millis / 1000.0
}

/// Parse SRT content into cues sorted by start time.
fn parse_cues(content: &str) -> Vec<Cue> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in content.split("\n\n") {
        let mut start = None;
        let mut end = None;
        let mut text_lines = Vec::new();

        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(caps) = TIMESTAMP_RE.captures(line) {
                start = Some(timestamp_to_secs(&caps[1], &caps[2], &caps[3], &caps[4]));
                end = Some(timestamp_to_secs(&caps[5], &caps[6], &caps[7], &caps[8]));
            } else if start.is_some() && !line.trim().is_empty() {
                text_lines.push(line.trim().to_string());
            }
        }

        if let (Some(start), Some(end)) = (start, end) {
            cues.push(Cue {
                start,
                end,
                text: text_lines.join("\n"),
            });
        }
    }

    cues.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    cues
}

pub struct SubtitleExtractor {
    config: SubtitleConfig,
}

impl SubtitleExtractor {
    pub fn new(config: SubtitleConfig) -> Self {
        Self { config }
    }

    /// Extract dubbing segments from a subtitle file.
    ///
    /// Cues starting before `start_time` are skipped; extraction stops at the
    /// first cue starting at or after `end_time`; `max_segments` caps the
    /// result (evaluated after pairing consumes a cue pair). Ids are assigned
    /// sequentially from 1 over the accepted cues.
    pub fn extract<P: AsRef<Path>>(
        &self,
        subtitle_path: P,
        start_time: f64,
        end_time: f64,
        max_segments: Option<usize>,
    ) -> Result<Vec<Segment>> {
        let content = std::fs::read_to_string(subtitle_path.as_ref()).map_err(|e| {
            AutodubError::Subtitle(format!(
                "Failed to read subtitle file {}: {}",
                subtitle_path.as_ref().display(),
                e
            ))
        })?;

        let cues = parse_cues(&content);
        debug!("Parsed {} raw cues", cues.len());
        Ok(self.accept_cues(&cues, start_time, end_time, max_segments))
    }

    fn accept_cues(
        &self,
        cues: &[Cue],
        start_time: f64,
        end_time: f64,
        max_segments: Option<usize>,
    ) -> Vec<Segment> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut next_id = 1u32;
        let cap_reached =
            |segments: &Vec<Segment>| max_segments.map(|m| segments.len() >= m).unwrap_or(false);

        let mut i = 0;
        while i < cues.len() {
            let cue = &cues[i];

            if cue.start < start_time {
                i += 1;
                continue;
            }
            if cue.start >= end_time {
                break;
            }

            let raw = cue.text.trim();
            if raw.is_empty() {
                i += 1;
                continue;
            }

            // Bilingual cue with an internal line break: split and classify
            // each line by script.
            if raw.contains('\n') {
                let mut target_parts = Vec::new();
                let mut source_parts = Vec::new();
                for part in raw.split('\n') {
                    let cleaned = clean_text(part);
                    if cleaned.is_empty() {
                        continue;
                    }
                    if contains_target_script(&cleaned) {
                        target_parts.push(cleaned);
                    } else {
                        source_parts.push(cleaned);
                    }
                }

                let target_text = target_parts.join(" ");
                if target_text.is_empty() {
                    i += 1;
                    continue;
                }

                segments.push(Segment::new(
                    next_id,
                    cue.start,
                    cue.end,
                    source_parts.join(" "),
                    numerals::convert_numbers(&target_text),
                ));
                next_id += 1;
                i += 1;
                if cap_reached(&segments) {
                    break;
                }
                continue;
            }

            let cleaned = clean_text(raw);
            let is_target = contains_target_script(&cleaned);

            // Two cues at (nearly) the same start time form a bilingual pair.
            let mut source_text = String::new();
            let mut target_text = String::new();
            let mut paired = false;

            if i + 1 < cues.len() {
                let next = &cues[i + 1];
                let next_raw = next.text.trim();
                if (next.start - cue.start).abs() < self.config.pair_window_secs && !next_raw.is_empty() {
                    let next_cleaned = clean_text(next_raw);
                    let next_is_target = contains_target_script(&next_cleaned);

                    if !is_target && next_is_target {
                        source_text = cleaned.clone();
                        target_text = next_cleaned;
                        paired = true;
                    } else if is_target && !next_is_target {
                        source_text = next_cleaned;
                        target_text = cleaned.clone();
                        paired = true;
                    } else if is_target && next_is_target {
                        // Stacked duplicate target lines: keep the first
                        target_text = cleaned.clone();
                        paired = true;
                    }
                    if paired {
                        i += 2;
                    }
                }
            }

            if !paired {
                if is_target {
                    target_text = cleaned;
                    i += 1;
                } else {
                    // Nothing to dub in this cue
                    i += 1;
                    continue;
                }
            }

            // Cleaning can empty a cue that only carried annotations
            if target_text.is_empty() {
                continue;
            }

            segments.push(Segment::new(
                next_id,
                cue.start,
                cue.end,
                source_text,
                numerals::convert_numbers(&target_text),
            ));
            next_id += 1;

            if cap_reached(&segments) {
                break;
            }
        }

        segments
    }

    /// The minimal time window covering all segments, expanded by the
    /// configured padding on both ends and floored at zero.
    pub fn derive_clip_window(&self, segments: &[Segment]) -> (f64, f64) {
        derive_clip_window(segments, self.config.clip_padding_secs)
    }
}

pub fn derive_clip_window(segments: &[Segment], padding: f64) -> (f64, f64) {
    if segments.is_empty() {
        return (0.0, 60.0);
    }
    let first = segments.iter().map(|s| s.start_time).fold(f64::INFINITY, f64::min);
    let last = segments.iter().map(|s| s.end_time).fold(f64::NEG_INFINITY, f64::max);
    ((first - padding).max(0.0), last + padding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentStatus;

    fn extractor() -> SubtitleExtractor {
        SubtitleExtractor::new(SubtitleConfig {
            pair_window_secs: 0.01,
            clip_padding_secs: 2.0,
        })
    }

    const BILINGUAL_SRT: &str = "\
1
00:00:01,000 --> 00:00:03,000
안녕하세요

2
00:00:01,000 --> 00:00:03,000
你好

3
00:00:05,000 --> 00:00:07,500
这是第2集
감사합니다

4
00:00:09,000 --> 00:00:10,000
(웃음)

5
00:00:12,000 --> 00:00:13,000
단독 자막

6
00:00:15,000 --> 00:00:16,000
再见
";

    #[test]
    fn test_extract_pairs_and_filters() {
        let segments = extractor()
            .accept_cues(&parse_cues(BILINGUAL_SRT), 0.0, f64::INFINITY, None);

        // Paired cue, inline bilingual cue, and lone target cue survive;
        // annotation-only and source-only cues are dropped.
        assert_eq!(segments.len(), 3);

        assert_eq!(segments[0].id, 1);
        assert_eq!(segments[0].target_text, "你好");
        assert_eq!(segments[0].source_text, "안녕하세요");

        assert_eq!(segments[1].target_text, "这是第二集");
        assert_eq!(segments[1].source_text, "감사합니다");

        assert_eq!(segments[2].id, 3);
        assert_eq!(segments[2].target_text, "再见");
        assert!(segments[2].source_text.is_empty());
    }

    #[test]
    fn test_extract_invariants() {
        let segments = extractor()
            .accept_cues(&parse_cues(BILINGUAL_SRT), 0.0, f64::INFINITY, Some(2));

        assert!(segments.len() <= 2);
        for (idx, seg) in segments.iter().enumerate() {
            assert_eq!(seg.id as usize, idx + 1);
            assert!(!seg.target_text.is_empty());
            assert!(seg.start_time < seg.end_time);
            assert_eq!(seg.status, SegmentStatus::Pending);
        }
    }

    #[test]
    fn test_extract_window() {
        let cues = parse_cues(BILINGUAL_SRT);

        // Window starting after the paired cue drops it
        let segments = extractor().accept_cues(&cues, 4.0, f64::INFINITY, None);
        assert_eq!(segments[0].target_text, "这是第二集");

        // Extraction stops at the first cue at or past end_time
        let segments = extractor().accept_cues(&cues, 0.0, 15.0, None);
        assert!(segments.iter().all(|s| s.start_time < 15.0));
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let cues = parse_cues(BILINGUAL_SRT);
        let a = extractor().accept_cues(&cues, 0.0, f64::INFINITY, None);
        let b = extractor().accept_cues(&cues, 0.0, f64::INFINITY, None);

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.start_time.to_bits(), y.start_time.to_bits());
            assert_eq!(x.end_time.to_bits(), y.end_time.to_bits());
            assert_eq!(x.target_text, y.target_text);
            assert_eq!(x.source_text, y.source_text);
        }
    }

    #[test]
    fn test_clean_text_strips_annotations() {
        assert_eq!(clean_text("（笑声）你好"), "你好");
        assert_eq!(clean_text("你好 [music]"), "你好");
        assert_eq!(clean_text("♪歌声♪"), "");
        assert_eq!(clean_text("《书名》留下"), "《书名》留下");
    }

    #[test]
    fn test_derive_clip_window() {
        let segments = vec![
            Segment::new(1, 10.0, 12.0, String::new(), "一".to_string()),
            Segment::new(2, 20.0, 24.0, String::new(), "二".to_string()),
        ];

        let window = derive_clip_window(&segments, 2.0);
        assert_eq!(window, (8.0, 26.0));

        // Same input, same window
        assert_eq!(derive_clip_window(&segments, 2.0), window);

        // Padding never pushes the start below zero
        let early = vec![Segment::new(1, 0.5, 2.0, String::new(), "早".to_string())];
        assert_eq!(derive_clip_window(&early, 2.0).0, 0.0);
    }

    #[test]
    fn test_parse_cues_sorts_by_start() {
        let srt = "\
1
00:00:10,000 --> 00:00:11,000
后面

2
00:00:01,000 --> 00:00:02,000
前面
";
        let cues = parse_cues(srt);
        assert_eq!(cues.len(), 2);
        assert!(cues[0].start < cues[1].start);
    }
}
