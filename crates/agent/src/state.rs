//! Turn-taking state machine
//!
//! ```text
//! Idle -> UserSpeaking -> Processing -> AIThinking -> AISpeaking -> Idle
//!              ^                                          |
//!              +------------- confirmed barge-in ---------+
//! ```
//!
//! [`transition`] is a pure, total function: every `(state, event)` pair has a
//! next state, and pairs without a listed transition leave the state as is.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    UserSpeaking,
    Processing,
    AIThinking,
    AISpeaking,
}

impl SessionState {
    pub const ALL: [SessionState; 5] = [
        SessionState::Idle,
        SessionState::UserSpeaking,
        SessionState::Processing,
        SessionState::AIThinking,
        SessionState::AISpeaking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::UserSpeaking => "user_speaking",
            SessionState::Processing => "processing",
            SessionState::AIThinking => "ai_thinking",
            SessionState::AISpeaking => "ai_speaking",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    /// VAD confidence crossed the turn-taking threshold
    SpeechDetected,
    /// Trailing silence reached the silence timeout
    SilenceTimeout,
    TranscriptReady,
    /// STT succeeded but heard nothing
    EmptyTranscript,
    /// Every STT candidate failed
    TranscriptionFailed,
    /// The first segment of a response is ready to play
    ResponseReady,
    /// Every LLM or TTS candidate failed before anything could play
    GenerationFailed,
    PlaybackComplete,
    BargeInConfirmed,
    /// Continue a response that an answered interjection interrupted
    ResumeInterrupted,
    /// Speak prepared text without an LLM call
    PresentRequested,
    Reset,
}

impl TurnEvent {
    pub const ALL: [TurnEvent; 12] = [
        TurnEvent::SpeechDetected,
        TurnEvent::SilenceTimeout,
        TurnEvent::TranscriptReady,
        TurnEvent::EmptyTranscript,
        TurnEvent::TranscriptionFailed,
        TurnEvent::ResponseReady,
        TurnEvent::GenerationFailed,
        TurnEvent::PlaybackComplete,
        TurnEvent::BargeInConfirmed,
        TurnEvent::ResumeInterrupted,
        TurnEvent::PresentRequested,
        TurnEvent::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnEvent::SpeechDetected => "speech_detected",
            TurnEvent::SilenceTimeout => "silence_timeout",
            TurnEvent::TranscriptReady => "transcript_ready",
            TurnEvent::EmptyTranscript => "empty_transcript",
            TurnEvent::TranscriptionFailed => "transcription_failed",
            TurnEvent::ResponseReady => "response_ready",
            TurnEvent::GenerationFailed => "generation_failed",
            TurnEvent::PlaybackComplete => "playback_complete",
            TurnEvent::BargeInConfirmed => "barge_in_confirmed",
            TurnEvent::ResumeInterrupted => "resume_interrupted",
            TurnEvent::PresentRequested => "present_requested",
            TurnEvent::Reset => "reset",
        }
    }
}

pub fn transition(state: SessionState, event: TurnEvent) -> SessionState {
    use SessionState::*;
    use TurnEvent::*;

    match (state, event) {
        (_, Reset) => Idle,

        (Idle, SpeechDetected) => UserSpeaking,
        (Idle, PresentRequested) => AIThinking,
        (Idle, ResumeInterrupted) => AISpeaking,

        (UserSpeaking, SilenceTimeout) => Processing,

        (Processing, TranscriptReady) => AIThinking,
        (Processing, EmptyTranscript) => Idle,
        (Processing, TranscriptionFailed) => Idle,
        (Processing, ResumeInterrupted) => AISpeaking,

        (AIThinking, ResponseReady) => AISpeaking,
        (AIThinking, GenerationFailed) => Idle,

        (AISpeaking, PlaybackComplete) => Idle,
        (AISpeaking, BargeInConfirmed) => UserSpeaking,

        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;
    use TurnEvent::*;

    #[test]
    fn test_main_loop() {
        let mut state = Idle;
        for event in [
            SpeechDetected,
            SilenceTimeout,
            TranscriptReady,
            ResponseReady,
            PlaybackComplete,
        ] {
            state = transition(state, event);
        }
        assert_eq!(state, Idle);
    }

    #[test]
    fn test_barge_in_reenters_user_speaking() {
        assert_eq!(transition(AISpeaking, BargeInConfirmed), UserSpeaking);
        assert_eq!(transition(UserSpeaking, SilenceTimeout), Processing);
        assert_eq!(transition(Processing, ResumeInterrupted), AISpeaking);
    }

    #[test]
    fn test_failures_return_to_idle() {
        assert_eq!(transition(Processing, TranscriptionFailed), Idle);
        assert_eq!(transition(AIThinking, GenerationFailed), Idle);
    }

    #[test]
    fn test_barge_in_outside_speaking_is_ignored() {
        for state in [Idle, UserSpeaking, Processing, AIThinking] {
            assert_eq!(transition(state, BargeInConfirmed), state);
        }
    }

    #[test]
    fn test_total_over_all_pairs() {
        for state in SessionState::ALL {
            for event in TurnEvent::ALL {
                let next = transition(state, event);
                assert!(SessionState::ALL.contains(&next));
                if event == Reset {
                    assert_eq!(next, Idle);
                }
            }
        }
    }

    #[test]
    fn test_speech_while_thinking_does_not_preempt() {
        assert_eq!(transition(AIThinking, SpeechDetected), AIThinking);
        assert_eq!(transition(Processing, SpeechDetected), Processing);
    }
}
