use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Processing state of a single segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Pending,
    Processing,
    Success,
    Error,
}

/// One subtitle-derived utterance with its own synthesis lifecycle.
///
/// Identity is the 1-based `id`, assigned at extraction time and stable only
/// within one extraction run. Carry-over across re-parses is keyed on
/// `(start_time, target_text)` instead, see [`reconcile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    /// Original-language line, may be empty
    pub source_text: String,
    /// Synthesis text, never empty after extraction
    pub target_text: String,

    #[serde(default)]
    pub ref_audio_path: Option<PathBuf>,
    #[serde(default)]
    pub output_audio_path: Option<PathBuf>,
    #[serde(default)]
    pub actual_duration: Option<f64>,
    #[serde(default = "default_status")]
    pub status: SegmentStatus,
    #[serde(default)]
    pub error_msg: Option<String>,
}

fn default_status() -> SegmentStatus {
    SegmentStatus::Pending
}

impl Segment {
    pub fn new(id: u32, start_time: f64, end_time: f64, source_text: String, target_text: String) -> Self {
        Self {
            id,
            start_time,
            end_time,
            duration: end_time - start_time,
            source_text,
            target_text,
            ref_audio_path: None,
            output_audio_path: None,
            actual_duration: None,
            status: SegmentStatus::Pending,
            error_msg: None,
        }
    }

    /// True when the segment claims success and its output clip is actually
    /// on disk. A crash between the state update and the file write can leave
    /// the two out of sync, so callers re-verify instead of trusting the flag.
    pub fn is_verified_success(&self) -> bool {
        self.status == SegmentStatus::Success
            && self
                .output_audio_path
                .as_ref()
                .map(|p| p.exists())
                .unwrap_or(false)
    }

    /// Clear all processing state back to pending. Used when the clip window
    /// changes and every derived clip becomes stale.
    pub fn reset_processing_fields(&mut self) {
        self.ref_audio_path = None;
        self.output_audio_path = None;
        self.actual_duration = None;
        self.status = SegmentStatus::Pending;
        self.error_msg = None;
    }
}

/// Key matching old and new segments across a re-parse. Start times come out
/// of the same subtitle file, so bit-equality on the float is intentional.
fn carry_key(seg: &Segment) -> (u64, String) {
    (seg.start_time.to_bits(), seg.target_text.clone())
}

/// Copy carry-over fields from a previous segment set onto a freshly parsed
/// one, so already-synthesized lines are not redone after a re-parse.
///
/// Only segments that previously reached `Success` are carried. Returns the
/// number of segments whose state was recovered.
pub fn reconcile(old_segments: &[Segment], new_segments: &mut [Segment]) -> usize {
    let recovered: std::collections::HashMap<(u64, String), &Segment> = old_segments
        .iter()
        .filter(|s| s.status == SegmentStatus::Success)
        .map(|s| (carry_key(s), s))
        .collect();

    let mut carried = 0;
    for seg in new_segments.iter_mut() {
        let key = carry_key(seg);
        if let Some(old) = recovered.get(&key) {
            seg.status = old.status;
            seg.ref_audio_path = old.ref_audio_path.clone();
            seg.output_audio_path = old.output_audio_path.clone();
            seg.actual_duration = old.actual_duration;
            carried += 1;
        }
    }
    carried
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: u32, start: f64, text: &str) -> Segment {
        Segment::new(id, start, start + 2.0, String::new(), text.to_string())
    }

    #[test]
    fn test_reconcile_carries_success_state() {
        let mut old = seg(1, 10.0, "你好");
        old.status = SegmentStatus::Success;
        old.output_audio_path = Some(PathBuf::from("dub_0001.wav"));
        old.actual_duration = Some(1.8);

        let mut new_segments = vec![seg(1, 10.0, "你好"), seg(2, 13.0, "再见")];
        let carried = reconcile(&[old], &mut new_segments);

        assert_eq!(carried, 1);
        assert_eq!(new_segments[0].status, SegmentStatus::Success);
        assert_eq!(new_segments[0].actual_duration, Some(1.8));
        assert_eq!(new_segments[1].status, SegmentStatus::Pending);
    }

    #[test]
    fn test_reconcile_ignores_failed_segments() {
        let mut old = seg(1, 10.0, "你好");
        old.status = SegmentStatus::Error;
        old.error_msg = Some("synthesis failed".to_string());

        let mut new_segments = vec![seg(1, 10.0, "你好")];
        let carried = reconcile(&[old], &mut new_segments);

        assert_eq!(carried, 0);
        assert_eq!(new_segments[0].status, SegmentStatus::Pending);
        assert_eq!(new_segments[0].error_msg, None);
    }

    #[test]
    fn test_reconcile_requires_matching_text_and_time() {
        let mut old = seg(1, 10.0, "你好");
        old.status = SegmentStatus::Success;

        // Same time, different text: retranslated line must be re-synthesized
        let mut new_segments = vec![seg(1, 10.0, "您好")];
        assert_eq!(reconcile(&[old.clone()], &mut new_segments), 0);

        // Same text, shifted time: retimed line must be re-synthesized
        let mut new_segments = vec![seg(1, 10.5, "你好")];
        assert_eq!(reconcile(&[old], &mut new_segments), 0);
    }

    #[test]
    fn test_reset_processing_fields() {
        let mut s = seg(1, 0.0, "测试");
        s.status = SegmentStatus::Error;
        s.ref_audio_path = Some(PathBuf::from("ref_0001.wav"));
        s.error_msg = Some("boom".to_string());

        s.reset_processing_fields();

        assert_eq!(s.status, SegmentStatus::Pending);
        assert!(s.ref_audio_path.is_none());
        assert!(s.error_msg.is_none());
        // Parse-time fields survive
        assert_eq!(s.target_text, "测试");
    }
}
