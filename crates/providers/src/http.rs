//! Generic JSON-over-HTTP provider adapter
//!
//! The request body is the serialized [`ProviderRequest`] and the reply is a
//! serialized [`ProviderResponse`]. Vendor-specific formats live behind a
//! gateway exposing this shape. `GET {endpoint}/health` is the liveness probe.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;

use voice_tutor_core::{
    CapabilityKind, HealthStatus, ProviderAdapter, ProviderError, ProviderRequest,
    ProviderResponse,
};

use crate::ProviderSetupError;

pub struct HttpProviderAdapter {
    id: String,
    kind: CapabilityKind,
    endpoint: String,
    client: Client,
}

impl HttpProviderAdapter {
    pub fn new(
        id: String,
        kind: CapabilityKind,
        endpoint: String,
        api_key: Option<String>,
    ) -> Result<Self, ProviderSetupError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ProviderSetupError::Http(format!("Invalid API key for {}: {}", id, e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderSetupError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            id,
            kind,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.endpoint)
    }
}

/// Map a non-success status to the provider error taxonomy
pub fn map_status(status: StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(format!("{}: {}", status, body)),
        402 => ProviderError::QuotaExceeded,
        429 => ProviderError::RateLimited,
        408 | 504 => ProviderError::Timeout(0),
        s if s >= 500 => ProviderError::Unavailable(format!("{}: {}", status, body)),
        _ => ProviderError::InvalidResponse(format!("{}: {}", status, body)),
    }
}

fn map_transport(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout.as_millis() as u64)
    } else if err.is_connect() {
        ProviderError::Unreachable(err.to_string())
    } else if err.is_decode() {
        ProviderError::InvalidResponse(err.to_string())
    } else {
        ProviderError::Unreachable(err.to_string())
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    async fn invoke(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| map_transport(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        response
            .json::<ProviderResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn health_probe(&self) -> HealthStatus {
        match self.client.get(self.health_url()).send().await {
            Ok(r) if r.status().is_success() => HealthStatus::Healthy,
            Ok(r) if r.status() == StatusCode::TOO_MANY_REQUESTS => HealthStatus::Cooldown,
            Ok(_) | Err(_) => HealthStatus::Unhealthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::get, routing::post, Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "bad key"),
            ProviderError::Auth(_)
        ));
        assert_eq!(
            map_status(StatusCode::PAYMENT_REQUIRED, ""),
            ProviderError::QuotaExceeded
        );
        assert_eq!(
            map_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited
        );
        assert!(matches!(
            map_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "nope"),
            ProviderError::InvalidResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_round_trip_against_local_server() {
        let router = Router::new()
            .route(
                "/stt",
                post(|Json(request): Json<ProviderRequest>| async move {
                    let text = match request {
                        ProviderRequest::Transcribe { samples, .. } => format!("{} samples", samples.len()),
                        _ => "wrong".to_string(),
                    };
                    Json(ProviderResponse::Transcript {
                        text,
                        confidence: 0.9,
                    })
                }),
            )
            .route("/stt/health", get(|| async { "ok" }));
        let base = serve(router).await;

        let adapter =
            HttpProviderAdapter::new("remote".into(), CapabilityKind::Stt, format!("{}/stt", base), None)
                .unwrap();
        let response = adapter
            .invoke(
                &ProviderRequest::Transcribe {
                    samples: vec![0.0; 3],
                    sample_rate: 16000,
                },
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        assert_eq!(
            response,
            ProviderResponse::Transcript {
                text: "3 samples".into(),
                confidence: 0.9
            }
        );
        assert_eq!(adapter.health_probe().await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_error_status_is_classified() {
        let router = Router::new().route(
            "/tts",
            post(|| async { (AxumStatus::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = serve(router).await;

        let adapter =
            HttpProviderAdapter::new("remote".into(), CapabilityKind::Tts, format!("{}/tts", base), None)
                .unwrap();
        let err = adapter
            .invoke(
                &ProviderRequest::Synthesize { text: "hi".into() },
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();

        assert_eq!(err, ProviderError::RateLimited);
        assert_eq!(adapter.health_probe().await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let adapter = HttpProviderAdapter::new(
            "gone".into(),
            CapabilityKind::Llm,
            "http://127.0.0.1:1".into(),
            Some("secret".into()),
        )
        .unwrap();
        let err = adapter
            .invoke(
                &ProviderRequest::Generate { messages: vec![] },
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable(_)));
    }
}
