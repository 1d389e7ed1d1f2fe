//! Candidate ordering for a capability request
//!
//! Highest precedence first:
//! 1. global override
//! 2. per-capability override
//! 3. first matching routing rule (ascending rule priority)
//! 4. declared default for the capability
//! 5. remaining candidates in declared fallback order
//!
//! Overrides are taken as given. Everything else is filtered to eligible
//! candidates: not `Unhealthy`, and not network-bound while offline. When that
//! leaves nothing eligible, the least-recently-failed candidate is appended as
//! a last resort. Each provider appears at most once.

use std::collections::BTreeMap;
use std::sync::Arc;

use voice_tutor_config::{ConditionSnapshot, ProvidersConfig, RoutingRule};
use voice_tutor_core::CapabilityKind;

use crate::health::ProviderHealthRegistry;
use crate::registry::{ProviderCandidate, ProviderRegistry};

#[derive(Debug, Clone, Default)]
pub struct RoutingPolicy {
    pub global_override: Option<String>,
    pub overrides: BTreeMap<CapabilityKind, String>,
    pub defaults: BTreeMap<CapabilityKind, String>,
    /// Sorted by ascending priority, declaration order on ties
    rules: Vec<RoutingRule>,
}

impl RoutingPolicy {
    pub fn new(
        global_override: Option<String>,
        overrides: BTreeMap<CapabilityKind, String>,
        defaults: BTreeMap<CapabilityKind, String>,
        rules: Vec<RoutingRule>,
    ) -> Self {
        let mut rules = rules;
        rules.sort_by_key(|r| r.priority);
        Self {
            global_override,
            overrides,
            defaults,
            rules,
        }
    }

    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self::new(
            config.global_override.clone(),
            config.overrides.clone(),
            config.defaults.clone(),
            config.routing_rules.clone(),
        )
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Ordered, de-duplicated candidates for one request of `kind`.
    ///
    /// Pure given the registry, the health state at call time and the
    /// condition snapshot, so identical inputs yield identical orderings.
    pub fn plan(
        &self,
        kind: CapabilityKind,
        registry: &ProviderRegistry,
        health: &ProviderHealthRegistry,
        conditions: &ConditionSnapshot,
    ) -> Vec<Arc<ProviderCandidate>> {
        let pool = registry.candidates(kind);
        let find = |id: &str| pool.iter().find(|c| c.id == id);
        let eligible = |c: &ProviderCandidate| {
            health.is_eligible(&c.id) && (conditions.network.is_online() || !c.requires_network)
        };

        let mut ordered: Vec<Arc<ProviderCandidate>> = Vec::with_capacity(pool.len());

        if let Some(c) = self.global_override.as_deref().and_then(find) {
            push_unique(&mut ordered, c);
        }

        if let Some(c) = self.overrides.get(&kind).and_then(|id| find(id)) {
            push_unique(&mut ordered, c);
        }

        let routed = self.rules.iter().find_map(|rule| {
            find(&rule.target_provider_id)
                .filter(|c| eligible(c) && rule.condition.matches(conditions))
        });
        if let Some(c) = routed {
            push_unique(&mut ordered, c);
        }

        if let Some(c) = self
            .defaults
            .get(&kind)
            .and_then(|id| find(id))
            .filter(|c| eligible(c))
        {
            push_unique(&mut ordered, c);
        }

        for c in pool.iter().filter(|c| eligible(c)) {
            push_unique(&mut ordered, c);
        }

        if !ordered.iter().any(|c| eligible(c)) {
            let reachable = |c: &&Arc<ProviderCandidate>| {
                conditions.network.is_online() || !c.requires_network
            };
            let fallback_pool: Vec<&Arc<ProviderCandidate>> = if pool.iter().any(|c| reachable(&c)) {
                pool.iter().filter(reachable).collect()
            } else {
                pool.iter().collect()
            };
            // Never-failed sorts first; ties keep declared order
            let last_resort = fallback_pool
                .into_iter()
                .filter(|c| !ordered.iter().any(|o| o.id == c.id))
                .min_by_key(|c| health.last_failure_ms(&c.id));
            if let Some(c) = last_resort {
                tracing::debug!(
                    kind = %kind,
                    provider = %c.id,
                    "No eligible candidate; using least-recently-failed provider"
                );
                push_unique(&mut ordered, c);
            }
        }

        ordered
    }
}

fn push_unique(ordered: &mut Vec<Arc<ProviderCandidate>>, candidate: &Arc<ProviderCandidate>) {
    if !ordered.iter().any(|o| o.id == candidate.id) {
        ordered.push(Arc::clone(candidate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubProvider;
    use std::time::Duration;
    use voice_tutor_config::{NetworkType, RoutingCondition, ThermalState};

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for (id, priority, network) in [("cloud", 1, true), ("backup", 2, true), ("local", 3, false)] {
            let mut candidate =
                ProviderCandidate::new(Arc::new(StubProvider::new(id, CapabilityKind::Stt)), priority);
            candidate.requires_network = network;
            registry.register(candidate).unwrap();
        }
        registry
    }

    fn ids(plan: &[Arc<ProviderCandidate>]) -> Vec<&str> {
        plan.iter().map(|c| c.id.as_str()).collect()
    }

    fn health() -> ProviderHealthRegistry {
        ProviderHealthRegistry::new(Duration::from_secs(30))
    }

    #[test]
    fn test_declared_order_by_default() {
        let plan = RoutingPolicy::default().plan(
            CapabilityKind::Stt,
            &registry(),
            &health(),
            &ConditionSnapshot::default(),
        );
        assert_eq!(ids(&plan), vec!["cloud", "backup", "local"]);
    }

    #[test]
    fn test_precedence_layers() {
        let mut defaults = BTreeMap::new();
        defaults.insert(CapabilityKind::Stt, "backup".to_string());
        let mut overrides = BTreeMap::new();
        overrides.insert(CapabilityKind::Stt, "local".to_string());
        let rules = vec![RoutingRule {
            condition: RoutingCondition::ThermalAtLeast { level: ThermalState::Serious },
            target_provider_id: "backup".to_string(),
            priority: 1,
        }];

        let policy = RoutingPolicy::new(None, overrides, defaults, rules);
        let plan = policy.plan(
            CapabilityKind::Stt,
            &registry(),
            &health(),
            &ConditionSnapshot::default(),
        );
        assert_eq!(ids(&plan), vec!["local", "backup", "cloud"]);
    }

    #[test]
    fn test_global_override_ignored_for_other_kinds() {
        let policy = RoutingPolicy::new(
            Some("some-tts".to_string()),
            BTreeMap::new(),
            BTreeMap::new(),
            Vec::new(),
        );
        let plan = policy.plan(
            CapabilityKind::Stt,
            &registry(),
            &health(),
            &ConditionSnapshot::default(),
        );
        assert_eq!(ids(&plan), vec!["cloud", "backup", "local"]);
    }

    #[test]
    fn test_first_matching_rule_by_priority() {
        let rules = vec![
            RoutingRule {
                condition: RoutingCondition::Always,
                target_provider_id: "backup".to_string(),
                priority: 20,
            },
            RoutingRule {
                condition: RoutingCondition::NetworkIn { networks: vec![NetworkType::Cellular] },
                target_provider_id: "local".to_string(),
                priority: 10,
            },
        ];
        let policy = RoutingPolicy::new(None, BTreeMap::new(), BTreeMap::new(), rules);
        let conditions = ConditionSnapshot {
            network: NetworkType::Cellular,
            ..Default::default()
        };
        let plan = policy.plan(CapabilityKind::Stt, &registry(), &health(), &conditions);
        assert_eq!(ids(&plan), vec!["local", "cloud", "backup"]);
    }

    #[test]
    fn test_unhealthy_filtered_and_rule_skipped() {
        let health = health();
        health.record_failure("cloud");
        let rules = vec![RoutingRule {
            condition: RoutingCondition::Always,
            target_provider_id: "cloud".to_string(),
            priority: 1,
        }];
        let policy = RoutingPolicy::new(None, BTreeMap::new(), BTreeMap::new(), rules);
        let plan = policy.plan(
            CapabilityKind::Stt,
            &registry(),
            &health,
            &ConditionSnapshot::default(),
        );
        assert_eq!(ids(&plan), vec!["backup", "local"]);
    }

    #[test]
    fn test_offline_skips_network_candidates() {
        let conditions = ConditionSnapshot {
            network: NetworkType::Offline,
            ..Default::default()
        };
        let plan = RoutingPolicy::default().plan(CapabilityKind::Stt, &registry(), &health(), &conditions);
        assert_eq!(ids(&plan), vec!["local"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_resort_is_least_recently_failed() {
        let health = health();
        health.record_failure("backup");
        tokio::time::advance(Duration::from_millis(10)).await;
        health.record_failure("cloud");
        tokio::time::advance(Duration::from_millis(10)).await;
        health.record_failure("local");

        let plan = RoutingPolicy::default().plan(
            CapabilityKind::Stt,
            &registry(),
            &health,
            &ConditionSnapshot::default(),
        );
        assert_eq!(ids(&plan), vec!["backup"]);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let registry = registry();
        let health = health();
        health.record_failure("backup");
        let policy = RoutingPolicy::default();
        let conditions = ConditionSnapshot::default();
        let first = ids(&policy.plan(CapabilityKind::Stt, &registry, &health, &conditions))
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let second = ids(&policy.plan(CapabilityKind::Stt, &registry, &health, &conditions))
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        assert_eq!(first, second);
        assert_eq!(first, vec!["cloud", "local"]);
    }
}
