//! HTTP Endpoints
//!
//! Diagnostics API: liveness, Prometheus metrics, and the provider table with
//! live health and on-demand probing.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use voice_tutor_core::{CapabilityKind, HealthStatus};
use voice_tutor_providers::{CandidateView, HealthSnapshot};

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::ServerError;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/providers", get(list_providers))
        .route("/providers/plan", get(provider_plans))
        .route("/providers/:id/probe", post(probe_provider))
        .route("/admin/reload-config", post(reload_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct CapabilityHealth {
    candidates: usize,
    eligible: usize,
}

/// Healthy when every capability has at least one eligible candidate
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let registry = state.resolver.registry();

    let mut capabilities = BTreeMap::new();
    let mut all_served = true;
    for kind in CapabilityKind::ALL {
        let candidates = registry.candidates(kind);
        let eligible = state.resolver.eligible_count(kind);
        all_served &= eligible > 0;
        capabilities.insert(
            kind.as_str(),
            CapabilityHealth {
                candidates: candidates.len(),
                eligible,
            },
        );
    }

    let status = if all_served {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if all_served { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.get_config().environment,
        "uptime_secs": state.uptime_secs(),
        "capabilities": capabilities,
    });
    (status, Json(body))
}

async fn list_providers(State(state): State<AppState>) -> Json<Vec<CandidateView>> {
    let resolver = &state.resolver;
    Json(resolver.registry().views(resolver.health()))
}

async fn provider_plans(State(state): State<AppState>) -> Json<BTreeMap<CapabilityKind, Vec<String>>> {
    Json(state.current_plans().into_iter().collect())
}

#[derive(Debug, Serialize)]
struct ProbeResult {
    id: String,
    probed: HealthStatus,
    health: HealthSnapshot,
}

async fn probe_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProbeResult>, ServerError> {
    let probed = state
        .resolver
        .probe(&id)
        .await
        .ok_or_else(|| ServerError::UnknownProvider(id.clone()))?;
    tracing::info!(provider = %id, status = probed.as_str(), "Manual health probe");
    Ok(Json(ProbeResult {
        health: state.resolver.health().snapshot(&id),
        id,
        probed,
    }))
}

async fn reload_config(State(state): State<AppState>) -> Result<StatusCode, ServerError> {
    state.reload_config().map_err(ServerError::Internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use voice_tutor_config::Settings;
    use voice_tutor_core::{NoopTelemetry, ProviderError};
    use voice_tutor_providers::{
        ProviderCandidate, ProviderHealthRegistry, ProviderRegistry, ProviderResolver,
        RoutingPolicy, ScriptedProvider, StubProvider,
    };

    fn state_with(stt: Arc<ScriptedProvider>) -> AppState {
        let mut registry = ProviderRegistry::new();
        registry.register(ProviderCandidate::new(stt, 0)).unwrap();
        for kind in [CapabilityKind::Llm, CapabilityKind::Tts] {
            registry
                .register(ProviderCandidate::new(
                    Arc::new(StubProvider::new(kind.as_str(), kind)),
                    0,
                ))
                .unwrap();
        }
        let resolver = ProviderResolver::new(
            Arc::new(registry),
            Arc::new(ProviderHealthRegistry::new(Duration::from_secs(30))),
            RoutingPolicy::default(),
            Duration::from_millis(500),
            Arc::new(NoopTelemetry),
        );
        AppState::new(Settings::default(), Arc::new(resolver))
    }

    async fn call(state: AppState, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_reports_capabilities() {
        let state = state_with(Arc::new(ScriptedProvider::new("stt", CapabilityKind::Stt)));
        let (status, body) = call(state, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["capabilities"]["stt"]["eligible"], 1);
    }

    #[tokio::test]
    async fn test_health_degrades_when_a_capability_has_no_eligible_candidate() {
        let state = state_with(Arc::new(ScriptedProvider::new("stt", CapabilityKind::Stt)));
        state.resolver.health().record_failure("stt");
        let (status, body) = call(state, "GET", "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_providers_lists_live_health() {
        let state = state_with(Arc::new(ScriptedProvider::new("stt", CapabilityKind::Stt)));
        state.resolver.health().record_failure("stt");
        let (status, body) = call(state, "GET", "/providers").await;
        assert_eq!(status, StatusCode::OK);
        let providers = body.as_array().unwrap();
        assert_eq!(providers.len(), 3);
        let stt = providers.iter().find(|p| p["id"] == "stt").unwrap();
        assert_eq!(stt["health"]["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_probe_restores_provider() {
        let stt = Arc::new(
            ScriptedProvider::new("stt", CapabilityKind::Stt)
                .fail_with(ProviderError::Unavailable("down".into())),
        );
        let state = state_with(stt.clone());
        state.resolver.health().record_failure("stt");

        let (status, body) = call(state.clone(), "POST", "/providers/stt/probe").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["probed"], "healthy");
        assert_eq!(body["health"]["status"], "healthy");
        assert!(state.resolver.health().is_eligible("stt"));
    }

    #[tokio::test]
    async fn test_probe_unknown_provider_is_not_found() {
        let state = state_with(Arc::new(ScriptedProvider::new("stt", CapabilityKind::Stt)));
        let (status, body) = call(state, "POST", "/providers/nope/probe").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_plans_follow_health() {
        let state = state_with(Arc::new(ScriptedProvider::new("stt", CapabilityKind::Stt)));
        let (_, body) = call(state, "GET", "/providers/plan").await;
        assert_eq!(body["llm"], serde_json::json!(["llm"]));
    }

    #[tokio::test]
    async fn test_applied_settings_reach_the_resolver() {
        let state = state_with(Arc::new(ScriptedProvider::new("stt", CapabilityKind::Stt)));
        let mut settings = Settings::default();
        settings.providers.timeout_ms = 1_500;
        settings.providers.health_cooldown_ms = 2_000;
        state.apply_settings(settings);

        assert_eq!(state.resolver.timeout(), Duration::from_millis(1_500));
        assert_eq!(state.resolver.health().cooldown(), Duration::from_millis(2_000));
        assert_eq!(state.get_config().providers.timeout_ms, 1_500);
    }
}
