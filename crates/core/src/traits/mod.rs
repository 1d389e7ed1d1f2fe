//! Core traits for the session orchestrator
//!
//! Every external collaborator sits behind one of these traits so that it can
//! be swapped by configuration and mocked in tests.
//!
//! ```text
//! Speech:
//!   - VoiceActivityDetector: frame -> (is_speech, confidence)
//!
//! Providers:
//!   - ProviderAdapter: capability-tagged STT / TTS / LLM backend
//!
//! Output:
//!   - PlaybackController: segment queue with pause / resume / stop
//!
//! Observability:
//!   - TelemetrySink: fire-and-forget structured events
//! ```

mod playback;
mod provider;
mod speech;
mod telemetry;

pub use playback::{AudioSegment, PlaybackController, PlaybackEvent, PlaybackPosition};
pub use provider::ProviderAdapter;
pub use speech::{VadDecision, VoiceActivityDetector};
pub use telemetry::{AttemptOutcome, NoopTelemetry, TelemetryEvent, TelemetrySink};
