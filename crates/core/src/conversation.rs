//! Conversation types: turns, latency accounting and LLM context messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a context message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of LLM context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-stage latency of one turn, measured from the end of user speech.
///
/// A stage that never ran (e.g. no LLM call for a scripted presentation, or an
/// STT failure cutting the turn short) stays `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLatency {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_first_segment_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_to_end_ms: Option<u64>,
}

/// One user-utterance / AI-response cycle.
///
/// Created when the end of user speech is detected, closed when the AI
/// finishes speaking or is itself interrupted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_utterance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    pub interrupted: bool,
    /// The user's utterance cut into AI speech rather than following it
    #[serde(default)]
    pub barge_in: bool,
    #[serde(default)]
    pub latency: TurnLatency,
}

impl Turn {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            user_utterance: None,
            ai_response: None,
            interrupted: false,
            barge_in: false,
            latency: TurnLatency::default(),
        }
    }

    /// Append spoken AI text; segments arrive one at a time as they play.
    pub fn push_ai_text(&mut self, text: &str) {
        match &mut self.ai_response {
            Some(existing) => {
                if !existing.is_empty() {
                    existing.push(' ');
                }
                existing.push_str(text);
            },
            None => self.ai_response = Some(text.to_string()),
        }
    }

    /// Context messages contributed by this turn
    pub fn to_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(2);
        if let Some(user) = self.user_utterance.as_deref().filter(|u| !u.is_empty()) {
            out.push(Message::user(user));
        }
        if let Some(ai) = self.ai_response.as_deref().filter(|a| !a.is_empty()) {
            out.push(Message::assistant(ai));
        }
        out
    }
}
