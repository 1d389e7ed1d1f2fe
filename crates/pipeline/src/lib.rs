//! Audio pipeline for the voice tutor
//!
//! This crate provides the real-time audio side of a session:
//! - Frame intake with VAD classification (`FrameSource`)
//! - An energy-based VAD for deployments without a model
//! - A frame-clocked playback queue (`QueuedPlayback`)
//! - Two-stage barge-in detection (`BargeInDetector`, `BargeInMonitor`)

pub mod barge_in;
pub mod frame_source;
pub mod playback;
pub mod vad;

pub use barge_in::{
    BargeInDetector, BargeInEvent, BargeInEventKind, BargeInMonitor, BargeInMonitorConfig,
    BargeInWindow, PauseHandle, WindowState,
};
pub use frame_source::{FrameSource, VadObservation};
pub use playback::{PlaybackOutputFrame, QueuedPlayback};
pub use vad::{EnergyVad, EnergyVadConfig};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Frame timestamp went backwards: {got}ms after {previous}ms")]
    NonMonotonicTimestamp { previous: u64, got: u64 },

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for voice_tutor_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::ChannelClosed => voice_tutor_core::Error::ChannelClosed,
            other => voice_tutor_core::Error::Other(other.to_string()),
        }
    }
}
