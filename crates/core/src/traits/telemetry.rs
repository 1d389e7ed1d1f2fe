//! Telemetry sink trait

use crate::capability::CapabilityKind;
use crate::conversation::TurnLatency;

/// Outcome of one provider attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
        }
    }
}

/// Structured events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    StateTransition {
        from: &'static str,
        to: &'static str,
        trigger: &'static str,
    },
    FallbackAttempt {
        kind: CapabilityKind,
        provider_id: String,
        attempt: usize,
        outcome: AttemptOutcome,
        elapsed_ms: u64,
        error: Option<String>,
    },
    BargeInResolved {
        window_id: u64,
        outcome: &'static str,
        confidence: f32,
    },
    TurnCompleted {
        turn_id: u64,
        interrupted: bool,
        latency: TurnLatency,
    },
}

/// Fire-and-forget telemetry. Implementations must not block and must swallow
/// their own failures.
pub trait TelemetrySink: Send + Sync + 'static {
    fn emit(&self, event: TelemetryEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _event: TelemetryEvent) {}
}
