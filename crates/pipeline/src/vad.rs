//! Energy-based voice activity detection
//!
//! Maps frame RMS energy onto a confidence ramp between a noise floor and a
//! speech ceiling. Good enough for a headset or a quiet room; model-backed
//! detectors plug in through the same trait.

use serde::{Deserialize, Serialize};
use voice_tutor_core::{AudioFrame, VadDecision, VoiceActivityDetector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyVadConfig {
    /// Energy at or below which confidence is 0.0
    pub floor_db: f32,
    /// Energy at or above which confidence is 1.0
    pub ceiling_db: f32,
    /// Confidence from which a frame counts as speech
    pub speech_threshold: f32,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            floor_db: -50.0,
            ceiling_db: -20.0,
            speech_threshold: voice_tutor_config::constants::session::SPEECH_THRESHOLD,
        }
    }
}

pub struct EnergyVad {
    config: EnergyVadConfig,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self { config }
    }

    fn confidence(&self, energy_db: f32) -> f32 {
        let span = self.config.ceiling_db - self.config.floor_db;
        if span <= 0.0 {
            return if energy_db >= self.config.ceiling_db { 1.0 } else { 0.0 };
        }
        ((energy_db - self.config.floor_db) / span).clamp(0.0, 1.0)
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(EnergyVadConfig::default())
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&self, frame: &AudioFrame) -> VadDecision {
        let confidence = self.confidence(frame.energy_db);
        VadDecision::new(confidence >= self.config.speech_threshold, confidence)
    }

    fn name(&self) -> &str {
        "energy"
    }
}
