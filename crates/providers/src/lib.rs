//! Provider resolution for STT, TTS and LLM backends
//!
//! Features:
//! - Capability-tagged registry of candidate adapters
//! - Lock-free health tracking with cooldown expiry
//! - Layered candidate ordering (overrides, routing rules, defaults, fallback order)
//! - Strictly sequential fallback with a full causal chain on exhaustion
//! - HTTP adapter and background health probing

pub mod health;
pub mod http;
pub mod prober;
pub mod registry;
pub mod resolver;
pub mod routing;
pub mod stub;

pub use health::{HealthSnapshot, ProviderHealthRegistry};
pub use http::HttpProviderAdapter;
pub use prober::HealthProber;
pub use registry::{CandidateView, ProviderCandidate, ProviderRegistry};
pub use resolver::{FallbackChain, ProviderResolver, Resolved, SessionConditions};
pub use routing::RoutingPolicy;
pub use stub::{ScriptedProvider, StubProvider};

use thiserror::Error;
use voice_tutor_core::CapabilityKind;

/// Errors raised while assembling providers at startup
#[derive(Error, Debug)]
pub enum ProviderSetupError {
    #[error("Duplicate provider id: {0}")]
    DuplicateId(String),

    #[error("Provider {id} is declared as {declared} but its adapter serves {actual}")]
    KindMismatch {
        id: String,
        declared: CapabilityKind,
        actual: CapabilityKind,
    },

    #[error("No adapter available for provider {0}")]
    MissingAdapter(String),

    #[error("HTTP client error: {0}")]
    Http(String),
}

impl From<ProviderSetupError> for voice_tutor_core::Error {
    fn from(err: ProviderSetupError) -> Self {
        voice_tutor_core::Error::Config(err.to_string())
    }
}
