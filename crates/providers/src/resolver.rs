//! Provider resolution with sequential fallback
//!
//! One resolution walks the planned candidate list strictly in order, one
//! invocation at a time, each under a bounded timeout. The first success wins
//! and marks its provider healthy; every failure marks its provider unhealthy
//! for a cooldown and is appended to the chain. Exhausting the list returns a
//! terminal [`CapabilityError::Exhausted`] carrying every attempt.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use voice_tutor_config::{ConditionSnapshot, NetworkType, ProvidersConfig, ThermalState};
use voice_tutor_core::{
    AttemptOutcome, AttemptRecord, CapabilityError, CapabilityKind, HealthStatus, Message,
    ProviderError, ProviderRequest, ProviderResponse, TelemetryEvent, TelemetrySink,
};

use crate::health::ProviderHealthRegistry;
use crate::registry::ProviderRegistry;
use crate::routing::RoutingPolicy;

/// Live conditions of one session, read by routing rules
pub struct SessionConditions {
    started_at: Instant,
    state: Mutex<ConditionState>,
}

struct ConditionState {
    thermal: ThermalState,
    network: NetworkType,
    remaining_budget: Option<f64>,
}

impl SessionConditions {
    pub fn new(budget: Option<f64>) -> Self {
        Self {
            started_at: Instant::now(),
            state: Mutex::new(ConditionState {
                thermal: ThermalState::default(),
                network: NetworkType::default(),
                remaining_budget: budget,
            }),
        }
    }

    pub fn set_thermal(&self, thermal: ThermalState) {
        self.state.lock().thermal = thermal;
    }

    pub fn set_network(&self, network: NetworkType) {
        self.state.lock().network = network;
    }

    /// Charge a successful invocation against the session budget
    pub fn debit(&self, cost: f64) {
        if cost <= 0.0 {
            return;
        }
        if let Some(remaining) = self.state.lock().remaining_budget.as_mut() {
            *remaining -= cost;
        }
    }

    pub fn remaining_budget(&self) -> Option<f64> {
        self.state.lock().remaining_budget
    }

    pub fn snapshot(&self) -> ConditionSnapshot {
        let state = self.state.lock();
        ConditionSnapshot {
            thermal: state.thermal,
            network: state.network,
            remaining_budget: state.remaining_budget,
            session_elapsed_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}

impl Default for SessionConditions {
    fn default() -> Self {
        Self::new(None)
    }
}

/// The attempts made while resolving one request. Built per request and
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackChain {
    pub kind: CapabilityKind,
    /// Planned order
    pub ordered: Vec<String>,
    /// Invoked so far, in order
    pub tried: Vec<String>,
    pub last_error: Option<ProviderError>,
    /// Failed attempts, in order
    pub attempts: Vec<AttemptRecord>,
}

impl FallbackChain {
    fn new(kind: CapabilityKind, ordered: Vec<String>) -> Self {
        Self {
            kind,
            ordered,
            tried: Vec::new(),
            last_error: None,
            attempts: Vec::new(),
        }
    }
}

/// A successful resolution
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub provider_id: String,
    pub elapsed_ms: u64,
    pub chain: FallbackChain,
}

/// The reloadable part of resolution
struct Routing {
    policy: RoutingPolicy,
    timeout: Duration,
}

pub struct ProviderResolver {
    registry: Arc<ProviderRegistry>,
    health: Arc<ProviderHealthRegistry>,
    routing: RwLock<Routing>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ProviderResolver {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<ProviderHealthRegistry>,
        policy: RoutingPolicy,
        timeout: Duration,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        for id in registry.ids() {
            health.register(id);
        }
        Self {
            registry,
            health,
            routing: RwLock::new(Routing { policy, timeout }),
            telemetry,
        }
    }

    /// Build the registry-independent parts from configuration
    pub fn from_config(
        config: &ProvidersConfig,
        registry: Arc<ProviderRegistry>,
        health: Arc<ProviderHealthRegistry>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self::new(
            registry,
            health,
            RoutingPolicy::from_config(config),
            Duration::from_millis(config.timeout_ms),
            telemetry,
        )
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<ProviderHealthRegistry> {
        &self.health
    }

    pub fn timeout(&self) -> Duration {
        self.routing.read().timeout
    }

    /// Swap in routing rules, per-attempt timeout and health cooldown from
    /// new settings. The candidate set itself is fixed at startup, and
    /// resolutions already walking their chain finish under the old rules.
    pub fn reconfigure(&self, config: &ProvidersConfig) {
        *self.routing.write() = Routing {
            policy: RoutingPolicy::from_config(config),
            timeout: Duration::from_millis(config.timeout_ms),
        };
        self.health
            .set_cooldown(Duration::from_millis(config.health_cooldown_ms));
        tracing::info!(
            timeout_ms = config.timeout_ms,
            cooldown_ms = config.health_cooldown_ms,
            "Provider routing reconfigured"
        );
    }

    /// Candidate order a request of `kind` would use right now
    pub fn plan(&self, kind: CapabilityKind, conditions: &SessionConditions) -> Vec<String> {
        self.routing
            .read()
            .policy
            .plan(kind, &self.registry, &self.health, &conditions.snapshot())
            .into_iter()
            .map(|c| c.id.clone())
            .collect()
    }

    /// Candidates of `kind` currently outside their cooldown
    pub fn eligible_count(&self, kind: CapabilityKind) -> usize {
        self.registry
            .candidates(kind)
            .iter()
            .filter(|c| self.health.is_eligible(&c.id))
            .count()
    }

    pub fn any_eligible(&self, kind: CapabilityKind) -> bool {
        self.eligible_count(kind) > 0
    }

    /// Resolve a raw request, accepting any response of the request's kind
    pub async fn resolve(
        &self,
        request: &ProviderRequest,
        conditions: &SessionConditions,
    ) -> Result<Resolved<ProviderResponse>, CapabilityError> {
        let kind = request.kind();
        self.resolve_with(request, conditions, move |response| {
            if response.kind() == kind {
                Ok(response)
            } else {
                Err(ProviderError::InvalidResponse(format!(
                    "expected a {} response, got {}",
                    kind,
                    response.kind()
                )))
            }
        })
        .await
    }

    /// Resolve a request, with `extract` validating each response. A response
    /// `extract` rejects counts as that candidate failing.
    pub async fn resolve_with<T, F>(
        &self,
        request: &ProviderRequest,
        conditions: &SessionConditions,
        extract: F,
    ) -> Result<Resolved<T>, CapabilityError>
    where
        F: Fn(ProviderResponse) -> Result<T, ProviderError>,
    {
        let kind = request.kind();
        if self.registry.candidates(kind).is_empty() {
            return Err(CapabilityError::NotConfigured(kind));
        }

        let started = Instant::now();
        let (ordered, timeout) = {
            let routing = self.routing.read();
            let ordered = routing
                .policy
                .plan(kind, &self.registry, &self.health, &conditions.snapshot());
            (ordered, routing.timeout)
        };
        let mut chain = FallbackChain::new(kind, ordered.iter().map(|c| c.id.clone()).collect());

        for (attempt, candidate) in ordered.iter().enumerate() {
            chain.tried.push(candidate.id.clone());
            let attempt_started = Instant::now();

            let outcome = match tokio::time::timeout(timeout, candidate.adapter.invoke(request, timeout)).await {
                Ok(result) => result.and_then(&extract),
                Err(_) => Err(ProviderError::Timeout(timeout.as_millis() as u64)),
            };
            let elapsed_ms = attempt_started.elapsed().as_millis() as u64;

            match outcome {
                Ok(value) => {
                    self.health.record_success(&candidate.id);
                    conditions.debit(candidate.cost_per_unit);
                    self.telemetry.emit(TelemetryEvent::FallbackAttempt {
                        kind,
                        provider_id: candidate.id.clone(),
                        attempt,
                        outcome: AttemptOutcome::Success,
                        elapsed_ms,
                        error: None,
                    });
                    tracing::debug!(
                        kind = %kind,
                        provider = %candidate.id,
                        attempt,
                        elapsed_ms,
                        "Capability resolved"
                    );
                    return Ok(Resolved {
                        value,
                        provider_id: candidate.id.clone(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        chain,
                    });
                },
                Err(error) => {
                    self.health.record_failure(&candidate.id);
                    tracing::warn!(
                        kind = %kind,
                        provider = %candidate.id,
                        attempt,
                        elapsed_ms,
                        transient = error.is_transient(),
                        error = %error,
                        "Provider attempt failed, falling back"
                    );
                    self.telemetry.emit(TelemetryEvent::FallbackAttempt {
                        kind,
                        provider_id: candidate.id.clone(),
                        attempt,
                        outcome: AttemptOutcome::Failure,
                        elapsed_ms,
                        error: Some(error.to_string()),
                    });
                    chain.attempts.push(AttemptRecord {
                        provider_id: candidate.id.clone(),
                        error: error.clone(),
                        elapsed_ms,
                    });
                    chain.last_error = Some(error);
                },
            }
        }

        let error = CapabilityError::Exhausted {
            kind,
            attempts: chain.attempts,
        };
        tracing::error!(kind = %kind, chain = %error, "All provider candidates exhausted");
        Err(error)
    }

    pub async fn transcribe(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        conditions: &SessionConditions,
    ) -> Result<Resolved<String>, CapabilityError> {
        let request = ProviderRequest::Transcribe {
            samples,
            sample_rate,
        };
        self.resolve_with(&request, conditions, |response| match response {
            ProviderResponse::Transcript { text, .. } => Ok(text),
            other => Err(unexpected(CapabilityKind::Stt, &other)),
        })
        .await
    }

    pub async fn generate(
        &self,
        messages: Vec<Message>,
        conditions: &SessionConditions,
    ) -> Result<Resolved<String>, CapabilityError> {
        let request = ProviderRequest::Generate { messages };
        self.resolve_with(&request, conditions, |response| match response {
            ProviderResponse::Text { text } if !text.trim().is_empty() => Ok(text),
            ProviderResponse::Text { .. } => Err(ProviderError::InvalidResponse(
                "empty completion".to_string(),
            )),
            other => Err(unexpected(CapabilityKind::Llm, &other)),
        })
        .await
    }

    /// Synthesize one segment; yields samples and their sample rate
    pub async fn synthesize(
        &self,
        text: &str,
        conditions: &SessionConditions,
    ) -> Result<Resolved<(Vec<f32>, u32)>, CapabilityError> {
        let request = ProviderRequest::Synthesize {
            text: text.to_string(),
        };
        self.resolve_with(&request, conditions, |response| match response {
            ProviderResponse::Audio {
                samples,
                sample_rate,
            } if sample_rate > 0 => Ok((samples, sample_rate)),
            ProviderResponse::Audio { .. } => Err(ProviderError::InvalidResponse(
                "audio with zero sample rate".to_string(),
            )),
            other => Err(unexpected(CapabilityKind::Tts, &other)),
        })
        .await
    }

    /// Run one provider's health probe and apply the result
    pub async fn probe(&self, id: &str) -> Option<HealthStatus> {
        let candidate = self.registry.get(id)?;
        let status = tokio::time::timeout(self.timeout(), candidate.adapter.health_probe())
            .await
            .unwrap_or(HealthStatus::Unhealthy);
        self.health.record_probe(id, status);
        tracing::debug!(provider = %id, status = status.as_str(), "Health probe");
        Some(status)
    }
}

fn unexpected(expected: CapabilityKind, got: &ProviderResponse) -> ProviderError {
    ProviderError::InvalidResponse(format!(
        "expected a {} response, got {}",
        expected,
        got.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderCandidate;
    use crate::stub::ScriptedProvider;
    use voice_tutor_core::NoopTelemetry;

    fn resolver(providers: &[Arc<ScriptedProvider>]) -> ProviderResolver {
        let mut registry = ProviderRegistry::new();
        for (i, provider) in providers.iter().enumerate() {
            registry
                .register(ProviderCandidate::new(provider.clone(), i as u32))
                .unwrap();
        }
        ProviderResolver::new(
            Arc::new(registry),
            Arc::new(ProviderHealthRegistry::new(Duration::from_secs(30))),
            RoutingPolicy::default(),
            Duration::from_millis(4000),
            Arc::new(NoopTelemetry),
        )
    }

    fn transcript(text: &str) -> ProviderResponse {
        ProviderResponse::Transcript {
            text: text.to_string(),
            confidence: 0.9,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_past_timeout_and_auth_error() {
        let a = Arc::new(ScriptedProvider::new("A", CapabilityKind::Stt).hang());
        let b = Arc::new(
            ScriptedProvider::new("B", CapabilityKind::Stt)
                .fail_with(ProviderError::Auth("revoked".into())),
        );
        let c = Arc::new(ScriptedProvider::new("C", CapabilityKind::Stt).respond(transcript("hello")));
        let resolver = resolver(&[a.clone(), b.clone(), c.clone()]);

        let resolved = resolver
            .transcribe(vec![0.0; 160], 16000, &SessionConditions::default())
            .await
            .unwrap();

        assert_eq!(resolved.value, "hello");
        assert_eq!(resolved.provider_id, "C");
        assert_eq!(resolved.chain.tried, vec!["A", "B", "C"]);
        assert_eq!(resolved.chain.attempts.len(), 2);
        assert_eq!(resolved.chain.attempts[0].error, ProviderError::Timeout(4000));
        assert_eq!(
            resolved.chain.last_error,
            Some(ProviderError::Auth("revoked".into()))
        );

        assert_eq!(resolver.health().status("A"), HealthStatus::Unhealthy);
        assert_eq!(resolver.health().status("B"), HealthStatus::Unhealthy);
        assert_eq!(resolver.health().status("C"), HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_carries_causal_chain() {
        let a = Arc::new(
            ScriptedProvider::new("A", CapabilityKind::Llm)
                .fail_with(ProviderError::Unreachable("connection refused".into())),
        );
        let b = Arc::new(ScriptedProvider::new("B", CapabilityKind::Llm).fail_with(ProviderError::QuotaExceeded));
        let resolver = resolver(&[a, b]);

        let err = resolver
            .generate(vec![Message::user("hi")], &SessionConditions::default())
            .await
            .unwrap_err();

        match err {
            CapabilityError::Exhausted { kind, attempts } => {
                assert_eq!(kind, CapabilityKind::Llm);
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].provider_id, "A");
                assert_eq!(attempts[1].provider_id, "B");
                assert_eq!(attempts[1].error, ProviderError::QuotaExceeded);
            },
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_failing_candidates_each_tried_once() {
        let providers: Vec<_> = (0..5)
            .map(|i| {
                Arc::new(
                    ScriptedProvider::new(format!("p{}", i), CapabilityKind::Tts)
                        .fail_with(ProviderError::Unavailable("503".into())),
                )
            })
            .collect();
        let resolver = resolver(&providers);

        let err = resolver
            .synthesize("hello", &SessionConditions::default())
            .await
            .unwrap_err();

        assert_eq!(err.attempts().len(), 5);
        let mut ids: Vec<_> = err.attempts().iter().map(|a| a.provider_id.clone()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        for provider in &providers {
            assert_eq!(provider.calls(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_response_kind_is_a_failure() {
        let a = Arc::new(
            ScriptedProvider::new("A", CapabilityKind::Tts).respond(ProviderResponse::Text { text: "oops".into() }),
        );
        let b = Arc::new(ScriptedProvider::new("B", CapabilityKind::Tts).respond(ProviderResponse::Audio {
            samples: vec![0.0; 160],
            sample_rate: 16000,
        }));
        let resolver = resolver(&[a, b]);

        let resolved = resolver
            .synthesize("hi", &SessionConditions::default())
            .await
            .unwrap();
        assert_eq!(resolved.provider_id, "B");
        assert!(matches!(
            resolved.chain.attempts[0].error,
            ProviderError::InvalidResponse(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_debits_budget() {
        let a = Arc::new(ScriptedProvider::new("A", CapabilityKind::Stt).respond(transcript("ok")));
        let mut registry = ProviderRegistry::new();
        registry
            .register(ProviderCandidate::new(a, 1).with_cost(0.25))
            .unwrap();
        let resolver = ProviderResolver::new(
            Arc::new(registry),
            Arc::new(ProviderHealthRegistry::new(Duration::from_secs(30))),
            RoutingPolicy::default(),
            Duration::from_secs(4),
            Arc::new(NoopTelemetry),
        );
        let conditions = SessionConditions::new(Some(1.0));

        resolver.transcribe(vec![0.0; 10], 16000, &conditions).await.unwrap();
        assert_eq!(conditions.remaining_budget(), Some(0.75));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_configured() {
        let resolver = resolver(&[]);
        let err = resolver
            .transcribe(vec![0.0; 10], 16000, &SessionConditions::default())
            .await
            .unwrap_err();
        assert_eq!(err, CapabilityError::NotConfigured(CapabilityKind::Stt));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_inputs_plan_identically() {
        let a = Arc::new(ScriptedProvider::new("A", CapabilityKind::Stt));
        let b = Arc::new(ScriptedProvider::new("B", CapabilityKind::Stt));
        let resolver = resolver(&[a, b]);
        let conditions = SessionConditions::default();
        resolver.health().record_failure("A");

        let first = resolver.plan(CapabilityKind::Stt, &conditions);
        let second = resolver.plan(CapabilityKind::Stt, &conditions);
        assert_eq!(first, second);
        assert_eq!(first, vec!["B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_restores_health() {
        let a = Arc::new(ScriptedProvider::new("A", CapabilityKind::Stt));
        let resolver = resolver(&[a.clone()]);
        resolver.health().record_failure("A");

        assert_eq!(resolver.probe("A").await, Some(HealthStatus::Healthy));
        assert_eq!(resolver.health().status("A"), HealthStatus::Healthy);

        a.set_probe(HealthStatus::Unhealthy);
        assert_eq!(resolver.probe("A").await, Some(HealthStatus::Unhealthy));
        assert_eq!(resolver.health().status("A"), HealthStatus::Unhealthy);

        assert_eq!(resolver.probe("missing").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_changes_routing_and_timeout() {
        let a = Arc::new(ScriptedProvider::new("A", CapabilityKind::Stt).hang());
        let b = Arc::new(ScriptedProvider::new("B", CapabilityKind::Stt).respond(transcript("late")));
        let resolver = resolver(&[a, b]);
        let conditions = SessionConditions::default();
        assert_eq!(resolver.plan(CapabilityKind::Stt, &conditions), vec!["A", "B"]);

        let mut config = ProvidersConfig::default();
        config.timeout_ms = 250;
        config.health_cooldown_ms = 5_000;
        config.overrides.insert(CapabilityKind::Stt, "B".to_string());
        resolver.reconfigure(&config);

        assert_eq!(resolver.timeout(), Duration::from_millis(250));
        assert_eq!(resolver.health().cooldown(), Duration::from_millis(5_000));
        assert_eq!(resolver.plan(CapabilityKind::Stt, &conditions), vec!["B", "A"]);

        let pinned = resolver.transcribe(vec![0.0; 10], 16000, &conditions).await.unwrap();
        assert_eq!(pinned.provider_id, "B");
        assert!(pinned.chain.attempts.is_empty());

        config.overrides.clear();
        resolver.reconfigure(&config);
        let resolved = resolver.transcribe(vec![0.0; 10], 16000, &conditions).await.unwrap();
        assert_eq!(resolved.provider_id, "B");
        assert_eq!(resolved.chain.attempts[0].error, ProviderError::Timeout(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eligibility_follows_health() {
        let a = Arc::new(ScriptedProvider::new("A", CapabilityKind::Tts));
        let resolver = resolver(&[a]);
        assert!(resolver.any_eligible(CapabilityKind::Tts));
        assert!(!resolver.any_eligible(CapabilityKind::Llm));

        resolver.health().record_failure("A");
        assert_eq!(resolver.eligible_count(CapabilityKind::Tts), 0);
        assert!(!resolver.any_eligible(CapabilityKind::Tts));
    }
}
