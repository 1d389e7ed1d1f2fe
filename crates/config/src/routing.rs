//! Routing rules and the runtime conditions they are evaluated against

use serde::{Deserialize, Serialize};

/// Device thermal pressure, ordered from coolest to hottest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

/// Network currently available to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    #[default]
    Wifi,
    Ethernet,
    Cellular,
    Offline,
}

impl NetworkType {
    pub fn is_online(&self) -> bool {
        !matches!(self, NetworkType::Offline)
    }
}

/// Point-in-time view of the conditions routing rules look at
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConditionSnapshot {
    pub thermal: ThermalState,
    pub network: NetworkType,
    /// `None` when the session has no budget
    pub remaining_budget: Option<f64>,
    pub session_elapsed_ms: u64,
}

/// Predicate over [`ConditionSnapshot`].
///
/// ```toml
/// [[providers.routing_rules]]
/// target_provider_id = "local-whisper"
/// priority = 10
/// condition = { type = "network_in", networks = ["offline", "cellular"] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingCondition {
    ThermalAtLeast { level: ThermalState },
    NetworkIn { networks: Vec<NetworkType> },
    BudgetBelow { amount: f64 },
    SessionLongerThanMs { ms: u64 },
    All { conditions: Vec<RoutingCondition> },
    Any { conditions: Vec<RoutingCondition> },
    Always,
}

impl RoutingCondition {
    pub fn matches(&self, snapshot: &ConditionSnapshot) -> bool {
        match self {
            RoutingCondition::ThermalAtLeast { level } => snapshot.thermal >= *level,
            RoutingCondition::NetworkIn { networks } => networks.contains(&snapshot.network),
            RoutingCondition::BudgetBelow { amount } => snapshot
                .remaining_budget
                .map(|remaining| remaining < *amount)
                .unwrap_or(false),
            RoutingCondition::SessionLongerThanMs { ms } => snapshot.session_elapsed_ms > *ms,
            RoutingCondition::All { conditions } => conditions.iter().all(|c| c.matches(snapshot)),
            RoutingCondition::Any { conditions } => conditions.iter().any(|c| c.matches(snapshot)),
            RoutingCondition::Always => true,
        }
    }
}

/// Send requests to `target_provider_id` while `condition` holds.
///
/// Rules are evaluated by ascending `priority`; the first match wins. A rule
/// only applies to requests of its target's capability kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub condition: RoutingCondition,
    pub target_provider_id: String,
    #[serde(default)]
    pub priority: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ConditionSnapshot {
        ConditionSnapshot {
            thermal: ThermalState::Fair,
            network: NetworkType::Cellular,
            remaining_budget: Some(0.5),
            session_elapsed_ms: 120_000,
        }
    }

    #[test]
    fn test_leaf_conditions() {
        let s = snapshot();
        assert!(RoutingCondition::ThermalAtLeast { level: ThermalState::Fair }.matches(&s));
        assert!(!RoutingCondition::ThermalAtLeast { level: ThermalState::Serious }.matches(&s));
        assert!(RoutingCondition::NetworkIn {
            networks: vec![NetworkType::Cellular, NetworkType::Offline]
        }
        .matches(&s));
        assert!(RoutingCondition::BudgetBelow { amount: 1.0 }.matches(&s));
        assert!(!RoutingCondition::BudgetBelow { amount: 0.1 }.matches(&s));
        assert!(RoutingCondition::SessionLongerThanMs { ms: 60_000 }.matches(&s));
    }

    #[test]
    fn test_budget_below_without_budget_never_matches() {
        let s = ConditionSnapshot {
            remaining_budget: None,
            ..snapshot()
        };
        assert!(!RoutingCondition::BudgetBelow { amount: 1_000.0 }.matches(&s));
    }

    #[test]
    fn test_composite_conditions() {
        let s = snapshot();
        let all = RoutingCondition::All {
            conditions: vec![
                RoutingCondition::Always,
                RoutingCondition::ThermalAtLeast { level: ThermalState::Critical },
            ],
        };
        let any = RoutingCondition::Any {
            conditions: vec![
                RoutingCondition::ThermalAtLeast { level: ThermalState::Critical },
                RoutingCondition::NetworkIn { networks: vec![NetworkType::Cellular] },
            ],
        };
        assert!(!all.matches(&s));
        assert!(any.matches(&s));
    }

    #[test]
    fn test_rule_from_toml() {
        let rule: RoutingRule = toml::from_str(
            r#"
            target_provider_id = "local-stt"
            priority = 5
            condition = { type = "network_in", networks = ["offline"] }
            "#,
        )
        .unwrap();
        assert_eq!(rule.priority, 5);
        assert_eq!(
            rule.condition,
            RoutingCondition::NetworkIn { networks: vec![NetworkType::Offline] }
        );
    }
}
