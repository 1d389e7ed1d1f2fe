//! Application State
//!
//! Shared state across all handlers.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

use voice_tutor_config::{load_settings, Settings};
use voice_tutor_core::CapabilityKind;
use voice_tutor_providers::{ProviderResolver, SessionConditions};

#[derive(Clone)]
pub struct AppState {
    /// Wrapped for hot reload. The provider candidate set is fixed at
    /// startup; routing, timeouts and cooldown follow each reload.
    pub config: Arc<RwLock<Settings>>,
    pub resolver: Arc<ProviderResolver>,
    started_at: Instant,
    env: Option<String>,
}

impl AppState {
    pub fn new(config: Settings, resolver: Arc<ProviderResolver>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            resolver,
            started_at: Instant::now(),
            env: None,
        }
    }

    /// Remember the environment name so `reload_config` reads the same files
    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env;
        self
    }

    pub fn reload_config(&self) -> Result<(), String> {
        let new_config = load_settings(self.env.as_deref())
            .map_err(|e| format!("Failed to reload config: {}", e))?;
        self.apply_settings(new_config);
        tracing::info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Install validated settings and push the provider section into the resolver
    pub fn apply_settings(&self, settings: Settings) {
        self.resolver.reconfigure(&settings.providers);
        *self.config.write() = settings;
    }

    pub fn get_config(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.config.read()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Candidate order each capability would use right now, under neutral
    /// session conditions
    pub fn current_plans(&self) -> Vec<(CapabilityKind, Vec<String>)> {
        let conditions = SessionConditions::new(self.get_config().providers.cost_budget);
        CapabilityKind::ALL
            .iter()
            .map(|kind| (*kind, self.resolver.plan(*kind, &conditions)))
            .collect()
    }
}
