//! Capability kinds and the provider request/response envelope

use crate::conversation::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three backend capabilities a session orchestrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// Speech-to-text
    Stt,
    /// Text-to-speech
    Tts,
    /// Language model generation
    Llm,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [CapabilityKind::Stt, CapabilityKind::Tts, CapabilityKind::Llm];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Stt => "stt",
            CapabilityKind::Tts => "tts",
            CapabilityKind::Llm => "llm",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CapabilityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stt" => Ok(CapabilityKind::Stt),
            "tts" => Ok(CapabilityKind::Tts),
            "llm" => Ok(CapabilityKind::Llm),
            other => Err(format!("unknown capability kind '{}'", other)),
        }
    }
}

/// Health of a provider candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// Failed recently; excluded from ordinary ordering until cooldown expiry
    /// or a successful probe.
    Unhealthy,
    /// Cooldown expired; eligible again but not yet proven healthy.
    Cooldown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Cooldown => "cooldown",
        }
    }
}

/// A capability request as handed to a provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", rename_all = "lowercase")]
pub enum ProviderRequest {
    /// Transcribe one captured utterance
    #[serde(rename = "stt")]
    Transcribe { samples: Vec<f32>, sample_rate: u32 },
    /// Generate a reply from conversation context
    #[serde(rename = "llm")]
    Generate { messages: Vec<Message> },
    /// Synthesize one segment of text
    #[serde(rename = "tts")]
    Synthesize { text: String },
}

impl ProviderRequest {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            ProviderRequest::Transcribe { .. } => CapabilityKind::Stt,
            ProviderRequest::Generate { .. } => CapabilityKind::Llm,
            ProviderRequest::Synthesize { .. } => CapabilityKind::Tts,
        }
    }
}

/// A provider's successful answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderResponse {
    Transcript { text: String, confidence: f32 },
    Text { text: String },
    Audio { samples: Vec<f32>, sample_rate: u32 },
}

impl ProviderResponse {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            ProviderResponse::Transcript { .. } => CapabilityKind::Stt,
            ProviderResponse::Text { .. } => CapabilityKind::Llm,
            ProviderResponse::Audio { .. } => CapabilityKind::Tts,
        }
    }
}
