//! Background health probing
//!
//! Providers marked unhealthy recover on their own once the cooldown lapses.
//! The prober shortens that path: it periodically probes every candidate that
//! is not currently healthy and lets a passing probe restore it early.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use voice_tutor_core::HealthStatus;

use crate::resolver::ProviderResolver;

pub struct HealthProber {
    resolver: Arc<ProviderResolver>,
    interval: Duration,
}

impl HealthProber {
    pub fn new(resolver: Arc<ProviderResolver>, interval: Duration) -> Self {
        Self { resolver, interval }
    }

    /// Probe every provider not currently healthy; returns how many were probed
    pub async fn probe_once(&self) -> usize {
        let pending: Vec<String> = self
            .resolver
            .registry()
            .ids()
            .filter(|id| self.resolver.health().status(id) != HealthStatus::Healthy)
            .map(str::to_string)
            .collect();

        for id in &pending {
            self.resolver.probe(id).await;
        }
        pending.len()
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Health prober stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let probed = self.probe_once().await;
                        if probed > 0 {
                            tracing::debug!(probed, "Health probe round complete");
                        }
                    }
                }
            }
        })
    }
}
