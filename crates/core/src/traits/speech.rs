//! Speech processing traits

use crate::AudioFrame;

/// Result of classifying one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadDecision {
    pub is_speech: bool,
    /// Speech probability in [0.0, 1.0]
    pub confidence: f32,
}

impl VadDecision {
    pub fn new(is_speech: bool, confidence: f32) -> Self {
        Self {
            is_speech,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn silence() -> Self {
        Self::new(false, 0.0)
    }
}

/// Voice Activity Detection interface
///
/// A pure per-frame classifier. Thresholds for turn-taking and barge-in are
/// applied by the consumers, not by the detector, so the same decision stream
/// can feed both.
pub trait VoiceActivityDetector: Send + Sync + 'static {
    fn classify(&self, frame: &AudioFrame) -> VadDecision;

    /// Detector name for logging
    fn name(&self) -> &str {
        "vad"
    }
}
