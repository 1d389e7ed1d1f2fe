//! Provider adapter trait

use crate::capability::{CapabilityKind, HealthStatus, ProviderRequest, ProviderResponse};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::time::Duration;

/// A single STT, TTS or LLM backend.
///
/// Adapters hide vendor wire formats. They receive a capability request and a
/// time budget and either answer or fail with a [`ProviderError`]; ordering,
/// retries and health bookkeeping belong to the resolver.
///
/// # Example
///
/// ```ignore
/// let adapter: Arc<dyn ProviderAdapter> = Arc::new(HttpProviderAdapter::new(cfg)?);
/// let reply = adapter
///     .invoke(&ProviderRequest::Synthesize { text: "Hello".into() }, Duration::from_secs(4))
///     .await?;
/// ```
#[async_trait]
pub trait ProviderAdapter: Send + Sync + 'static {
    /// Stable identifier, unique across all capabilities
    fn id(&self) -> &str;

    /// The capability this adapter serves
    fn kind(&self) -> CapabilityKind;

    /// Perform one request. `timeout` is advisory for the adapter; the
    /// resolver enforces it independently.
    async fn invoke(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Cheap liveness check
    async fn health_probe(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}
