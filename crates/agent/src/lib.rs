//! Voice tutor session orchestration
//!
//! Features:
//! - Total turn-taking state machine
//! - Session loop driving VAD gating, provider resolution and playback
//! - Two-stage barge-in handling with resumption of the interrupted response
//! - Configurable resume-vs-interjection policy
//! - Telemetry sinks backed by tracing and metrics

pub mod response;
pub mod resume_policy;
pub mod session;
pub mod state;
pub mod telemetry;

pub use response::{split_segments, ResponseGenerator, ResponseStream};
pub use resume_policy::{ResumeDecision, ResumePolicy};
pub use session::{OrchestratorConfig, SessionCommand, SessionEvent, SessionHandle, SessionOrchestrator};
pub use state::{transition, SessionState, TurnEvent};
pub use telemetry::{ChannelTelemetry, TracingTelemetry};

use thiserror::Error;
use voice_tutor_core::CapabilityError;
use voice_tutor_pipeline::PipelineError;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Session has shut down")]
    SessionClosed,

    #[error("Nothing to present")]
    EmptyPresentation,

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),
}

impl From<AgentError> for voice_tutor_core::Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Pipeline(e) => e.into(),
            AgentError::Capability(e) => voice_tutor_core::Error::Capability(e),
            AgentError::SessionClosed => voice_tutor_core::Error::ChannelClosed,
            other => voice_tutor_core::Error::Other(other.to_string()),
        }
    }
}
