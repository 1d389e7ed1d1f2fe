//! Resume-vs-interjection policy
//!
//! After a barge-in has been answered, the next thing the user says either
//! asks for the interrupted explanation to continue or starts another
//! question. Silence (or an empty transcript) always resumes; everything else
//! is decided by the configured [`ResumeMode`].

use unicode_segmentation::UnicodeSegmentation;
use voice_tutor_config::{ResumeMode, ResumePolicyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    Resume,
    Interject,
}

#[derive(Debug, Clone)]
pub struct ResumePolicy {
    mode: ResumeMode,
    /// Normalized, each cue as its word sequence
    cues: Vec<Vec<String>>,
    max_cue_words: usize,
}

impl ResumePolicy {
    pub fn new(mode: ResumeMode, cues: &[String], max_cue_words: usize) -> Self {
        Self {
            mode,
            cues: cues
                .iter()
                .map(|c| words(c))
                .filter(|c| !c.is_empty())
                .collect(),
            max_cue_words,
        }
    }

    pub fn from_config(config: &ResumePolicyConfig) -> Self {
        Self::new(config.mode, &config.continuation_cues, config.max_cue_words)
    }

    pub fn mode(&self) -> ResumeMode {
        self.mode
    }

    pub fn decide(&self, utterance: &str) -> ResumeDecision {
        let words = words(utterance);
        if words.is_empty() {
            return ResumeDecision::Resume;
        }
        match self.mode {
            ResumeMode::AlwaysResume => ResumeDecision::Resume,
            ResumeMode::AlwaysInterject => ResumeDecision::Interject,
            ResumeMode::ContinuationCue if self.is_continuation_cue(&words) => ResumeDecision::Resume,
            ResumeMode::ContinuationCue => ResumeDecision::Interject,
        }
    }

    /// A short utterance made up of nothing but cue phrases ("ok, go on")
    fn is_continuation_cue(&self, words: &[String]) -> bool {
        if words.len() > self.max_cue_words {
            return false;
        }
        let mut rest = words;
        while !rest.is_empty() {
            let matched = self
                .cues
                .iter()
                .filter(|cue| rest.starts_with(cue))
                .map(|cue| cue.len())
                .max();
            match matched {
                Some(len) => rest = &rest[len..],
                None => return false,
            }
        }
        true
    }
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self::from_config(&ResumePolicyConfig::default())
    }
}

fn words(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}
