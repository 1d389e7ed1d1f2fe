//! Prometheus metrics endpoint
//!
//! The recorder is process-global; `metrics` macros elsewhere in the
//! workspace write into it once installed.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::ServerError;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Call once at startup.
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;

    register_default_metrics();

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Zero-valued series so dashboards have something to draw before traffic
fn register_default_metrics() {
    for outcome in ["confirmed", "false_positive"] {
        counter!("voice_tutor_barge_in_total", "outcome" => outcome).absolute(0);
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}
