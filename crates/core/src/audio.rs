//! Audio frame types and utilities

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - Standard speech recognition
    #[default]
    Hz16000,
    /// 22.05kHz - TTS output
    Hz22050,
    /// 24kHz - Common neural TTS output
    Hz24000,
    /// 48kHz - Browser capture
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz48000 => 48000,
        }
    }
}

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// A fixed-duration, timestamped block of captured audio.
///
/// Samples are f32 normalized to [-1.0, 1.0] and shared behind an `Arc` so a
/// frame can be fanned out to the VAD, the barge-in monitor and the pre-roll
/// buffer without copying.
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw audio samples
    pub samples: Arc<[f32]>,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Number of channels
    pub channels: Channels,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Capture timestamp in milliseconds on the capture clock
    pub timestamp_ms: u64,
    /// Duration of this frame in milliseconds
    pub duration_ms: u64,
    /// Energy level in dB
    pub energy_db: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("duration_ms", &self.duration_ms)
            .field("energy_db", &self.energy_db)
            .finish()
    }
}

impl AudioFrame {
    /// Create a new audio frame from f32 samples
    pub fn new(
        samples: Vec<f32>,
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
        timestamp_ms: u64,
    ) -> Self {
        let per_second = sample_rate.as_u32() as u64 * channels.count() as u64;
        let duration_ms = samples.len() as u64 * 1000 / per_second.max(1);
        let energy_db = Self::calculate_energy_db(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            sequence,
            timestamp_ms,
            duration_ms,
            energy_db,
        }
    }

    /// Timestamp just past the last sample of this frame
    pub fn end_ms(&self) -> u64 {
        self.timestamp_ms + self.duration_ms
    }

    /// Calculate RMS energy in decibels
    fn calculate_energy_db(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return -96.0;
        }

        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();

        if rms > 0.0 {
            20.0 * rms.log10()
        } else {
            -96.0
        }
    }
}

/// Join the samples of consecutive frames into one utterance buffer.
pub fn concat_samples<'a, I>(frames: I) -> Vec<f32>
where
    I: IntoIterator<Item = &'a AudioFrame>,
{
    let mut out = Vec::new();
    for frame in frames {
        out.extend_from_slice(&frame.samples);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 320], SampleRate::Hz16000, Channels::Mono, 0, 0);
        assert_eq!(frame.duration_ms, 20);
        assert_eq!(frame.end_ms(), 20);
    }

    #[test]
    fn test_concat_samples() {
        let a = AudioFrame::new(vec![0.1; 4], SampleRate::Hz16000, Channels::Mono, 0, 0);
        let b = AudioFrame::new(vec![0.2; 2], SampleRate::Hz16000, Channels::Mono, 1, 0);
        let joined = concat_samples([&a, &b]);
        assert_eq!(joined.len(), 6);
        assert_eq!(joined[5], 0.2);
    }
}
