//! Voice Tutor Server Entry Point

use anyhow::Context;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_tutor_agent::TracingTelemetry;
use voice_tutor_config::{load_settings, ProvidersConfig, Settings};
use voice_tutor_core::{CapabilityKind, ProviderAdapter};
use voice_tutor_providers::{
    HealthProber, ProviderHealthRegistry, ProviderRegistry, ProviderResolver, StubProvider,
};
use voice_tutor_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.toml > config/default.toml > defaults
    let env = std::env::var("VOICE_TUTOR_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        },
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };

    init_tracing(&config);
    tracing::info!("Starting Voice Tutor Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        config_path = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        init_metrics()?;
        tracing::info!("Initialized Prometheus metrics at /metrics");
    }

    let registry = ProviderRegistry::from_config(&config.providers, local_adapters(&config.providers))
        .context("Failed to build provider registry")?;
    // A session cannot run without all three capabilities
    registry
        .validate(&CapabilityKind::ALL)
        .context("Provider configuration is incomplete")?;
    tracing::info!(providers = registry.len(), "Provider registry ready");

    let health = Arc::new(ProviderHealthRegistry::new(Duration::from_millis(
        config.providers.health_cooldown_ms,
    )));
    let resolver = Arc::new(ProviderResolver::from_config(
        &config.providers,
        Arc::new(registry),
        health,
        Arc::new(TracingTelemetry::new()),
    ));

    let cancel = CancellationToken::new();
    let prober = HealthProber::new(
        Arc::clone(&resolver),
        Duration::from_millis(config.providers.probe_interval_ms),
    )
    .spawn(cancel.child_token());

    let state = AppState::new(config.clone(), resolver).with_env(env);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Err(e) = prober.await {
        tracing::warn!(error = %e, "Health prober ended abnormally");
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Candidates without an endpoint run in-process
fn local_adapters(config: &ProvidersConfig) -> HashMap<String, Arc<dyn ProviderAdapter>> {
    config
        .candidates
        .iter()
        .filter(|c| c.endpoint.is_none())
        .map(|c| {
            tracing::warn!(provider = %c.id, kind = %c.kind, "No endpoint configured, using local stub adapter");
            let adapter: Arc<dyn ProviderAdapter> = Arc::new(StubProvider::new(c.id.clone(), c.kind));
            (c.id.clone(), adapter)
        })
        .collect()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("voice_tutor={},tower_http=debug", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
