//! Audio frame intake
//!
//! The capture subsystem hands frames to [`FrameSource::submit_frame`]. Each
//! frame is classified once and fanned out to every subscriber (turn gating in
//! the session, the barge-in monitor while the AI speaks).

use parking_lot::Mutex;
use tokio::sync::broadcast;
use voice_tutor_core::{AudioFrame, VadDecision, VoiceActivityDetector};

use crate::PipelineError;
use std::sync::Arc;

const OBSERVATION_CAPACITY: usize = 256;

/// A frame together with its VAD classification
#[derive(Debug, Clone)]
pub struct VadObservation {
    pub frame: AudioFrame,
    pub decision: VadDecision,
}

impl VadObservation {
    pub fn confidence(&self) -> f32 {
        self.decision.confidence
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.frame.timestamp_ms
    }
}

pub struct FrameSource {
    vad: Arc<dyn VoiceActivityDetector>,
    tx: broadcast::Sender<VadObservation>,
    last_timestamp_ms: Mutex<Option<u64>>,
}

impl FrameSource {
    pub fn new(vad: Arc<dyn VoiceActivityDetector>) -> Self {
        let (tx, _) = broadcast::channel(OBSERVATION_CAPACITY);
        Self {
            vad,
            tx,
            last_timestamp_ms: Mutex::new(None),
        }
    }

    /// Classify and publish one frame.
    ///
    /// Frames must arrive with strictly increasing timestamps; an out-of-order
    /// frame is rejected and not published. Having no subscribers is not an
    /// error.
    pub fn submit_frame(&self, frame: AudioFrame) -> Result<VadDecision, PipelineError> {
        if frame.samples.is_empty() {
            return Err(PipelineError::EmptyFrame);
        }

        {
            let mut last = self.last_timestamp_ms.lock();
            if let Some(previous) = *last {
                if frame.timestamp_ms <= previous {
                    tracing::warn!(
                        previous,
                        got = frame.timestamp_ms,
                        sequence = frame.sequence,
                        "Dropping out-of-order audio frame"
                    );
                    return Err(PipelineError::NonMonotonicTimestamp {
                        previous,
                        got: frame.timestamp_ms,
                    });
                }
            }
            *last = Some(frame.timestamp_ms);
        }

        let decision = self.vad.classify(&frame);
        tracing::trace!(
            sequence = frame.sequence,
            confidence = decision.confidence,
            is_speech = decision.is_speech,
            "Frame classified"
        );
        let _ = self.tx.send(VadObservation { frame, decision });
        Ok(decision)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VadObservation> {
        self.tx.subscribe()
    }

    pub fn vad_name(&self) -> &str {
        self.vad.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnergyVad;
    use voice_tutor_core::{Channels, SampleRate};

    fn frame(ts: u64) -> AudioFrame {
        AudioFrame::new(vec![0.3; 320], SampleRate::Hz16000, Channels::Mono, ts / 20, ts)
    }

    #[tokio::test]
    async fn test_submit_publishes_to_subscribers() {
        let source = FrameSource::new(Arc::new(EnergyVad::default()));
        let mut rx = source.subscribe();

        let decision = source.submit_frame(frame(0)).unwrap();
        assert!(decision.is_speech);

        let obs = rx.recv().await.unwrap();
        assert_eq!(obs.timestamp_ms(), 0);
        assert!(obs.decision.is_speech);
    }

    #[test]
    fn test_rejects_non_monotonic_timestamps() {
        let source = FrameSource::new(Arc::new(EnergyVad::default()));
        source.submit_frame(frame(40)).unwrap();
        assert_eq!(
            source.submit_frame(frame(40)),
            Err(PipelineError::NonMonotonicTimestamp { previous: 40, got: 40 })
        );
        assert!(source.submit_frame(frame(20)).is_err());
        assert!(source.submit_frame(frame(60)).is_ok());
    }

    #[test]
    fn test_submit_without_subscribers() {
        let source = FrameSource::new(Arc::new(EnergyVad::default()));
        assert!(source.submit_frame(frame(0)).is_ok());
    }

    #[test]
    fn test_empty_frame_rejected() {
        let source = FrameSource::new(Arc::new(EnergyVad::default()));
        let empty = AudioFrame::new(Vec::new(), SampleRate::Hz16000, Channels::Mono, 0, 0);
        assert_eq!(source.submit_frame(empty), Err(PipelineError::EmptyFrame));
    }
}
