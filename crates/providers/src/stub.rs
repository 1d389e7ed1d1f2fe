//! In-process adapters for offline sessions and tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use voice_tutor_core::{
    CapabilityKind, HealthStatus, Message, ProviderAdapter, ProviderError, ProviderRequest,
    ProviderResponse, Role,
};

const STUB_SAMPLE_RATE: u32 = 16000;
const STUB_MS_PER_CHAR: u64 = 60;
const STUB_TONE_HZ: f32 = 220.0;

/// Deterministic adapter that needs no network.
///
/// STT yields a fixed transcript, LLM echoes the last user message and TTS
/// produces a quiet tone whose length scales with the text.
pub struct StubProvider {
    id: String,
    kind: CapabilityKind,
    transcript: String,
}

impl StubProvider {
    pub fn new(id: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            transcript: "hello".to_string(),
        }
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = transcript.into();
        self
    }
}

#[async_trait]
impl ProviderAdapter for StubProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    async fn invoke(
        &self,
        request: &ProviderRequest,
        _timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        if request.kind() != self.kind {
            return Err(ProviderError::InvalidResponse(format!(
                "{} cannot serve {} requests",
                self.id,
                request.kind()
            )));
        }
        Ok(default_response(request, &self.transcript))
    }
}

fn default_response(request: &ProviderRequest, transcript: &str) -> ProviderResponse {
    match request {
        ProviderRequest::Transcribe { .. } => ProviderResponse::Transcript {
            text: transcript.to_string(),
            confidence: 1.0,
        },
        ProviderRequest::Generate { messages } => ProviderResponse::Text {
            text: echo(messages),
        },
        ProviderRequest::Synthesize { text } => ProviderResponse::Audio {
            samples: tone(text),
            sample_rate: STUB_SAMPLE_RATE,
        },
    }
}

fn echo(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| format!("You said: {}", m.content))
        .unwrap_or_else(|| "Let's begin.".to_string())
}

fn tone(text: &str) -> Vec<f32> {
    let duration_ms = (text.chars().count() as u64).max(1) * STUB_MS_PER_CHAR;
    let len = (STUB_SAMPLE_RATE as u64 * duration_ms / 1000) as usize;
    let step = 2.0 * std::f32::consts::PI * STUB_TONE_HZ / STUB_SAMPLE_RATE as f32;
    (0..len).map(|i| 0.1 * (step * i as f32).sin()).collect()
}

#[derive(Debug, Clone)]
enum Outcome {
    Respond(ProviderResponse),
    Fail(ProviderError),
    Hang,
}

/// Adapter driven by a script of outcomes, for exercising fallback paths.
///
/// Queued outcomes are consumed one per call; once the queue is empty every
/// call gets the default outcome (a plausible response for the kind, unless
/// overridden).
pub struct ScriptedProvider {
    id: String,
    kind: CapabilityKind,
    queue: Mutex<VecDeque<Outcome>>,
    default: Mutex<Option<Outcome>>,
    probe: Mutex<HealthStatus>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            queue: Mutex::new(VecDeque::new()),
            default: Mutex::new(None),
            probe: Mutex::new(HealthStatus::Healthy),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call answers with `response`
    pub fn respond(self, response: ProviderResponse) -> Self {
        *self.default.lock() = Some(Outcome::Respond(response));
        self
    }

    /// Every call fails with `error`
    pub fn fail_with(self, error: ProviderError) -> Self {
        *self.default.lock() = Some(Outcome::Fail(error));
        self
    }

    /// Every call hangs until the caller gives up
    pub fn hang(self) -> Self {
        *self.default.lock() = Some(Outcome::Hang);
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn then_respond(self, response: ProviderResponse) -> Self {
        self.queue.lock().push_back(Outcome::Respond(response));
        self
    }

    pub fn then_fail(self, error: ProviderError) -> Self {
        self.queue.lock().push_back(Outcome::Fail(error));
        self
    }

    pub fn set_failing(&self, error: ProviderError) {
        *self.default.lock() = Some(Outcome::Fail(error));
    }

    pub fn set_responding(&self, response: ProviderResponse) {
        *self.default.lock() = Some(Outcome::Respond(response));
    }

    pub fn set_probe(&self, status: HealthStatus) {
        *self.probe.lock() = status;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    async fn invoke(
        &self,
        request: &ProviderRequest,
        _timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let outcome = self
            .queue
            .lock()
            .pop_front()
            .or_else(|| self.default.lock().clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            Some(Outcome::Respond(response)) => Ok(response),
            Some(Outcome::Fail(error)) => Err(error),
            Some(Outcome::Hang) => {
                std::future::pending::<()>().await;
                Err(ProviderError::Timeout(0))
            },
            None => Ok(default_response(request, "hello")),
        }
    }

    async fn health_probe(&self) -> HealthStatus {
        *self.probe.lock()
    }
}
