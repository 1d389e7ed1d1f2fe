//! Core traits and types for the voice tutor
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frames
//! - Capability kinds and the provider request/response envelope
//! - Turns and latency accounting
//! - The error taxonomy
//! - Traits for the external collaborators (VAD, providers, playback, telemetry)

pub mod audio;
pub mod capability;
pub mod conversation;
pub mod error;
pub mod traits;

pub use audio::{concat_samples, AudioFrame, Channels, SampleRate};
pub use capability::{CapabilityKind, HealthStatus, ProviderRequest, ProviderResponse};
pub use conversation::{Message, Role, Turn, TurnLatency};
pub use error::{AttemptRecord, CapabilityError, Error, PlaybackError, ProviderError, Result};

pub use traits::{
    AttemptOutcome, AudioSegment, NoopTelemetry, PlaybackController, PlaybackEvent,
    PlaybackPosition, ProviderAdapter, TelemetryEvent, TelemetrySink, VadDecision,
    VoiceActivityDetector,
};
