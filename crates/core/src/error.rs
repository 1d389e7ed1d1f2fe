//! Error taxonomy shared across the workspace

use crate::capability::CapabilityKind;
use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A recoverable failure of a single provider invocation.
///
/// These are absorbed by the fallback chain and only reach a session when
/// every candidate for a capability has failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("rate limited")]
    RateLimited,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether retrying the same provider later could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimited
                | ProviderError::Unreachable(_)
                | ProviderError::Unavailable(_)
        )
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "timeout",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::Auth(_) => "auth",
            ProviderError::QuotaExceeded => "quota",
            ProviderError::Unreachable(_) => "unreachable",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Unavailable(_) => "unavailable",
        }
    }
}

/// One failed attempt in a fallback chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub provider_id: String,
    pub error: ProviderError,
    pub elapsed_ms: u64,
}

impl std::fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}ms): {}", self.provider_id, self.elapsed_ms, self.error)
    }
}

/// Failure to obtain a capability at all
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    /// Every candidate was tried and failed. `attempts` is the causal chain in
    /// invocation order.
    #[error("all {kind} candidates exhausted: [{}]", format_chain(.attempts))]
    Exhausted {
        kind: CapabilityKind,
        attempts: Vec<AttemptRecord>,
    },

    /// No candidate is registered for the capability
    #[error("no {0} provider configured")]
    NotConfigured(CapabilityKind),
}

impl CapabilityError {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            CapabilityError::Exhausted { kind, .. } => *kind,
            CapabilityError::NotConfigured(kind) => *kind,
        }
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            CapabilityError::Exhausted { attempts, .. } => attempts,
            CapabilityError::NotConfigured(_) => &[],
        }
    }
}

fn format_chain(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Playback subsystem errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("playback stopped")]
    Closed,

    #[error("invalid segment: {0}")]
    InvalidSegment(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout(100).is_transient());
        assert!(ProviderError::RateLimited.is_transient());
        assert!(!ProviderError::Auth("bad key".into()).is_transient());
        assert!(!ProviderError::QuotaExceeded.is_transient());
    }

    #[test]
    fn test_exhausted_message_carries_chain() {
        let err = CapabilityError::Exhausted {
            kind: CapabilityKind::Stt,
            attempts: vec![
                AttemptRecord {
                    provider_id: "a".into(),
                    error: ProviderError::Timeout(4000),
                    elapsed_ms: 4000,
                },
                AttemptRecord {
                    provider_id: "b".into(),
                    error: ProviderError::Auth("expired".into()),
                    elapsed_ms: 12,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("all stt candidates exhausted"));
        assert!(msg.contains("a (4000ms): timed out after 4000ms -> b (12ms)"));
        assert_eq!(err.attempts().len(), 2);
    }
}
