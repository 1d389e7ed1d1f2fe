//! Centralized default values
//!
//! Single source of truth for the numbers the settings fall back to. Other
//! crates use these in their own `Default` impls so a component built without
//! a `Settings` behaves the same as one built from an empty config file.

/// Turn-taking
pub mod session {
    /// Silence that closes a user utterance
    pub const SILENCE_TIMEOUT_MS: u64 = 1000;

    /// Baseline VAD confidence for turn-taking
    pub const SPEECH_THRESHOLD: f32 = 0.5;

    /// Silence after an interjection answer that resumes the interrupted response
    pub const RESUME_AFTER_SILENCE_MS: u64 = 1500;

    /// Closed turns kept as LLM context
    pub const MAX_CONTEXT_TURNS: usize = 6;

    pub const SYSTEM_PROMPT: &str = "You are a patient spoken-language tutor. \
        Answer in short, clear sentences suitable for reading aloud.";
}

/// Barge-in detection
pub mod barge_in {
    /// Higher than the turn-taking threshold to reject speaker echo
    pub const THRESHOLD: f32 = 0.7;

    /// Stage 2 confirmation timer
    pub const CONFIRM_WINDOW_MS: u64 = 600;

    /// Stage 1 sustained-confidence window
    pub const MIN_SUSTAIN_MS: u64 = 60;

    /// Audio kept while the AI speaks so a confirmed interruption keeps its onset
    pub const PREROLL_MS: u64 = 1000;
}

/// Degraded answers used when a capability is exhausted
pub mod degraded {
    pub const STT: &str = "Sorry, I didn't catch that. Could you say it again?";
    pub const LLM: &str = "I'm having trouble thinking right now. Let's try that again in a moment.";
    pub const TTS: &str = "I can't speak right now, so here is my answer in text.";
}

/// Continuation cues that resume an interrupted explanation
pub mod resume {
    pub const CONTINUATION_CUES: &[&str] = &[
        "continue",
        "go on",
        "keep going",
        "carry on",
        "ok",
        "okay",
        "got it",
        "thanks",
        "thank you",
        "makes sense",
        "i see",
        "right",
        "sure",
        "yes",
        "yeah",
        "mm hmm",
    ];

    /// Longer utterances are treated as a new question
    pub const MAX_CUE_WORDS: usize = 4;
}

/// Provider resolution
pub mod providers {
    pub const TIMEOUT_MS: u64 = 4000;
    pub const HEALTH_COOLDOWN_MS: u64 = 30_000;
    pub const PROBE_INTERVAL_MS: u64 = 15_000;
    pub const DEFAULT_PRIORITY: u32 = 100;
}

/// Playback clock
pub mod playback {
    pub const FRAME_MS: u64 = 20;
    pub const MAX_FRAME_MS: u64 = 100;
}

/// Server endpoints
pub mod endpoints {
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8080;
}
