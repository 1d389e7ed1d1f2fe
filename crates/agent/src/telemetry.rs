//! Telemetry sinks
//!
//! [`TracingTelemetry`] turns events into structured logs and `metrics`
//! counters/histograms; the exporter (if any) is installed by the binary.
//! [`ChannelTelemetry`] republishes events on a broadcast channel for tests
//! and UIs. Neither can fail in a way the session observes.

use metrics::{counter, histogram};
use tokio::sync::broadcast;
use voice_tutor_core::{AttemptOutcome, TelemetryEvent, TelemetrySink};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

fn record_stage(stage: &'static str, ms: Option<u64>) {
    if let Some(ms) = ms {
        histogram!("voice_tutor_stage_latency_seconds", "stage" => stage).record(ms as f64 / 1000.0);
    }
}

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::StateTransition { from, to, trigger } => {
                tracing::debug!(from, to, trigger, "State transition");
                counter!("voice_tutor_state_transitions_total", "from" => from, "to" => to).increment(1);
            },
            TelemetryEvent::FallbackAttempt {
                kind,
                provider_id,
                attempt,
                outcome,
                elapsed_ms,
                error,
            } => {
                match (&outcome, &error) {
                    (AttemptOutcome::Failure, Some(error)) => tracing::info!(
                        kind = kind.as_str(),
                        provider = %provider_id,
                        attempt,
                        elapsed_ms,
                        error = %error,
                        "Fallback attempt failed"
                    ),
                    _ => tracing::debug!(
                        kind = kind.as_str(),
                        provider = %provider_id,
                        attempt,
                        elapsed_ms,
                        outcome = outcome.as_str(),
                        "Fallback attempt"
                    ),
                }
                counter!(
                    "voice_tutor_fallback_attempts_total",
                    "kind" => kind.as_str(),
                    "provider" => provider_id,
                    "outcome" => outcome.as_str()
                )
                .increment(1);
            },
            TelemetryEvent::BargeInResolved {
                window_id,
                outcome,
                confidence,
            } => {
                tracing::info!(window_id, outcome, confidence, "Barge-in resolved");
                counter!("voice_tutor_barge_in_total", "outcome" => outcome).increment(1);
            },
            TelemetryEvent::TurnCompleted {
                turn_id,
                interrupted,
                latency,
            } => {
                tracing::info!(
                    turn_id,
                    interrupted,
                    stt_ms = ?latency.stt_ms,
                    llm_ms = ?latency.llm_ms,
                    tts_first_segment_ms = ?latency.tts_first_segment_ms,
                    end_to_end_ms = ?latency.end_to_end_ms,
                    "Turn completed"
                );
                record_stage("stt", latency.stt_ms);
                record_stage("llm", latency.llm_ms);
                record_stage("tts_first_segment", latency.tts_first_segment_ms);
                record_stage("end_to_end", latency.end_to_end_ms);
            },
        }
    }
}

/// Republishes every event; lagging or absent subscribers lose events.
#[derive(Debug, Clone)]
pub struct ChannelTelemetry {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl ChannelTelemetry {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_tutor_core::{CapabilityKind, TurnLatency};

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let sink = TracingTelemetry::new();
        sink.emit(TelemetryEvent::StateTransition {
            from: "idle",
            to: "user_speaking",
            trigger: "speech_detected",
        });
        sink.emit(TelemetryEvent::FallbackAttempt {
            kind: CapabilityKind::Stt,
            provider_id: "a".into(),
            attempt: 0,
            outcome: AttemptOutcome::Failure,
            elapsed_ms: 10,
            error: Some("timed out".into()),
        });
        sink.emit(TelemetryEvent::TurnCompleted {
            turn_id: 1,
            interrupted: false,
            latency: TurnLatency {
                stt_ms: Some(100),
                ..Default::default()
            },
        });
    }

    #[test]
    fn test_channel_sink_without_subscribers() {
        let sink = ChannelTelemetry::new();
        sink.emit(TelemetryEvent::BargeInResolved {
            window_id: 1,
            outcome: "false_positive",
            confidence: 0.8,
        });

        let mut rx = sink.subscribe();
        sink.emit(TelemetryEvent::BargeInResolved {
            window_id: 2,
            outcome: "confirmed",
            confidence: 0.9,
        });
        assert!(matches!(
            rx.try_recv(),
            Ok(TelemetryEvent::BargeInResolved { window_id: 2, .. })
        ));
    }
}
