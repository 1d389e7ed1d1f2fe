//! Response generation
//!
//! A response is produced in two steps: one LLM call yields the full text,
//! which is split into sentence segments; audio is then synthesized lazily,
//! one segment at a time, as the playback pump asks for it. Synthesized audio
//! is cached so an interrupted response can be restarted from any segment
//! without calling TTS again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use voice_tutor_core::{AudioSegment, CapabilityError, Message, PlaybackPosition, Turn};
use voice_tutor_providers::{ProviderResolver, Resolved, SessionConditions};

const SENTENCE_TERMINATORS: [char; 4] = ['.', '?', '!', '\n'];
/// Shorter fragments are folded into the following sentence
const MIN_SEGMENT_CHARS: usize = 3;

/// Split text into speakable sentence segments
pub fn split_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut graphemes = text.graphemes(true).peekable();

    while let Some(grapheme) = graphemes.next() {
        current.push_str(grapheme);
        let terminal = grapheme
            .chars()
            .next()
            .map(|c| SENTENCE_TERMINATORS.contains(&c))
            .unwrap_or(false);
        let at_boundary = graphemes
            .peek()
            .map(|next| next.chars().all(char::is_whitespace))
            .unwrap_or(true);

        if terminal && at_boundary {
            let trimmed = current.trim();
            if trimmed.chars().count() >= MIN_SEGMENT_CHARS {
                segments.push(trimmed.to_string());
                current.clear();
            }
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        match segments.last_mut() {
            Some(last) if rest.chars().count() < MIN_SEGMENT_CHARS => {
                last.push(' ');
                last.push_str(rest);
            },
            _ => segments.push(rest.to_string()),
        }
    }
    segments
}

struct CachedAudio {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

/// A lazy, restartable sequence of text/audio segments.
///
/// `next_segment` synthesizes (or replays from cache) the segment under the
/// cursor. `rewind_to` moves the cursor back so the sequence can be replayed
/// from a recorded playback position.
pub struct ResponseStream {
    id: u64,
    segments: Vec<String>,
    audio: Vec<Option<CachedAudio>>,
    cursor: usize,
    start_offset_ms: u64,
    resolver: Arc<ProviderResolver>,
    conditions: Arc<SessionConditions>,
}

impl ResponseStream {
    pub fn new(
        id: u64,
        segments: Vec<String>,
        resolver: Arc<ProviderResolver>,
        conditions: Arc<SessionConditions>,
    ) -> Self {
        let audio = segments.iter().map(|_| None).collect();
        Self {
            id,
            segments,
            audio,
            cursor: 0,
            start_offset_ms: 0,
            resolver,
            conditions,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn full_text(&self) -> String {
        self.segments.join(" ")
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Restart from `position`; the next segment begins at its offset
    pub fn rewind_to(&mut self, position: PlaybackPosition) {
        self.cursor = position.segment_index.min(self.segments.len());
        self.start_offset_ms = position.offset_ms;
    }

    /// Produce the segment under the cursor, tagged with `response_id`.
    ///
    /// Returns `None` once every segment has been produced. A synthesis
    /// failure leaves the cursor in place.
    pub async fn next_segment(
        &mut self,
        response_id: u64,
    ) -> Option<Result<AudioSegment, CapabilityError>> {
        let index = self.cursor;
        let text = self.segments.get(index)?.clone();

        if self.audio[index].is_none() {
            match self.resolver.synthesize(&text, &self.conditions).await {
                Ok(Resolved {
                    value: (samples, sample_rate),
                    provider_id,
                    elapsed_ms,
                    ..
                }) => {
                    tracing::debug!(
                        response_id,
                        index,
                        provider = %provider_id,
                        elapsed_ms,
                        "Segment synthesized"
                    );
                    self.audio[index] = Some(CachedAudio {
                        samples: samples.into(),
                        sample_rate,
                    });
                },
                Err(e) => return Some(Err(e)),
            }
        }

        let cached = self.audio[index].as_ref()?;
        let segment = AudioSegment {
            response_id,
            index,
            text,
            samples: Arc::clone(&cached.samples),
            sample_rate: cached.sample_rate,
            start_offset_ms: std::mem::take(&mut self.start_offset_ms),
        };
        self.cursor += 1;
        Some(Ok(segment))
    }
}

/// Builds LLM prompts from recent turns and turns answers into streams
pub struct ResponseGenerator {
    resolver: Arc<ProviderResolver>,
    conditions: Arc<SessionConditions>,
    system_prompt: String,
    max_context_turns: usize,
    next_id: AtomicU64,
}

impl ResponseGenerator {
    pub fn new(
        resolver: Arc<ProviderResolver>,
        conditions: Arc<SessionConditions>,
        system_prompt: impl Into<String>,
        max_context_turns: usize,
    ) -> Self {
        Self {
            resolver,
            conditions,
            system_prompt: system_prompt.into(),
            max_context_turns,
            next_id: AtomicU64::new(1),
        }
    }

    /// Prompt for one answer. `interrupted_segment` is the text that was
    /// playing when the user barged in; the model is told where it was cut off.
    pub fn build_messages(
        &self,
        transcript: &str,
        context: &[Turn],
        interrupted_segment: Option<&str>,
    ) -> Vec<Message> {
        let mut messages = vec![Message::system(&self.system_prompt)];
        let skip = context.len().saturating_sub(self.max_context_turns);
        messages.extend(context.iter().skip(skip).flat_map(Turn::to_messages));
        if let Some(segment) = interrupted_segment {
            messages.push(Message::system(format!(
                "The student interrupted you while you were saying: \"{segment}\". \
                 Answer the interruption briefly; the explanation resumes afterwards."
            )));
        }
        messages.push(Message::user(transcript));
        messages
    }

    /// One LLM call, then a lazy stream over the answer's segments.
    /// Also returns the LLM latency.
    pub async fn generate_response(
        &self,
        transcript: &str,
        context: &[Turn],
        interrupted_segment: Option<&str>,
    ) -> Result<(ResponseStream, u64), CapabilityError> {
        let messages = self.build_messages(transcript, context, interrupted_segment);
        let resolved = self.resolver.generate(messages, &self.conditions).await?;
        tracing::debug!(
            provider = %resolved.provider_id,
            elapsed_ms = resolved.elapsed_ms,
            chars = resolved.value.len(),
            "Response generated"
        );
        Ok((self.present(&resolved.value), resolved.elapsed_ms))
    }

    /// A stream over prepared text, with no LLM call
    pub fn present(&self, text: &str) -> ResponseStream {
        ResponseStream::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            split_segments(text),
            Arc::clone(&self.resolver),
            Arc::clone(&self.conditions),
        )
    }
}
