//! Capability-tagged registry of provider candidates

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use voice_tutor_config::{CandidateConfig, ProvidersConfig};
use voice_tutor_core::{CapabilityError, CapabilityKind, ProviderAdapter};

use crate::health::{HealthSnapshot, ProviderHealthRegistry};
use crate::http::HttpProviderAdapter;
use crate::ProviderSetupError;

/// A registered provider and its declared routing attributes.
///
/// Live health is not stored here; it is read from the
/// [`ProviderHealthRegistry`] so that candidate lists stay immutable.
pub struct ProviderCandidate {
    pub id: String,
    pub kind: CapabilityKind,
    /// Declared fallback order; lower goes first
    pub priority: u32,
    pub requires_network: bool,
    pub cost_per_unit: f64,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl std::fmt::Debug for ProviderCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCandidate")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("requires_network", &self.requires_network)
            .field("cost_per_unit", &self.cost_per_unit)
            .finish()
    }
}

impl ProviderCandidate {
    /// Candidate taking its id and kind from the adapter
    pub fn new(adapter: Arc<dyn ProviderAdapter>, priority: u32) -> Self {
        Self {
            id: adapter.id().to_string(),
            kind: adapter.kind(),
            priority,
            requires_network: true,
            cost_per_unit: 0.0,
            adapter,
        }
    }

    pub fn offline(mut self) -> Self {
        self.requires_network = false;
        self
    }

    pub fn with_cost(mut self, cost_per_unit: f64) -> Self {
        self.cost_per_unit = cost_per_unit;
        self
    }

    fn from_config(config: &CandidateConfig, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            id: config.id.clone(),
            kind: config.kind,
            priority: config.priority,
            requires_network: config.requires_network,
            cost_per_unit: config.cost_per_unit,
            adapter,
        }
    }
}

/// Serializable view of a candidate with its live health
#[derive(Debug, Clone, Serialize)]
pub struct CandidateView {
    pub id: String,
    pub kind: CapabilityKind,
    pub priority: u32,
    pub requires_network: bool,
    pub cost_per_unit: f64,
    pub health: HealthSnapshot,
}

#[derive(Default)]
pub struct ProviderRegistry {
    by_kind: BTreeMap<CapabilityKind, Vec<Arc<ProviderCandidate>>>,
    by_id: HashMap<String, Arc<ProviderCandidate>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate. Candidates of a kind are kept in declared fallback
    /// order: ascending priority, then registration order.
    pub fn register(&mut self, candidate: ProviderCandidate) -> Result<(), ProviderSetupError> {
        if self.by_id.contains_key(&candidate.id) {
            return Err(ProviderSetupError::DuplicateId(candidate.id));
        }
        if candidate.adapter.kind() != candidate.kind {
            return Err(ProviderSetupError::KindMismatch {
                id: candidate.id,
                declared: candidate.kind,
                actual: candidate.adapter.kind(),
            });
        }

        let candidate = Arc::new(candidate);
        let list = self.by_kind.entry(candidate.kind).or_default();
        let at = list.partition_point(|c| c.priority <= candidate.priority);
        list.insert(at, Arc::clone(&candidate));
        self.by_id.insert(candidate.id.clone(), candidate);
        Ok(())
    }

    /// Build from configuration. Candidates with an `endpoint` get an HTTP
    /// adapter; others must be supplied in `adapters`, keyed by id.
    pub fn from_config(
        config: &ProvidersConfig,
        mut adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    ) -> Result<Self, ProviderSetupError> {
        let mut registry = Self::new();
        for candidate in &config.candidates {
            let adapter: Arc<dyn ProviderAdapter> = match &candidate.endpoint {
                Some(endpoint) => {
                    let api_key = candidate
                        .api_key_env
                        .as_deref()
                        .and_then(|var| std::env::var(var).ok());
                    Arc::new(HttpProviderAdapter::new(
                        candidate.id.clone(),
                        candidate.kind,
                        endpoint.clone(),
                        api_key,
                    )?)
                },
                None => adapters
                    .remove(&candidate.id)
                    .ok_or_else(|| ProviderSetupError::MissingAdapter(candidate.id.clone()))?,
            };
            registry.register(ProviderCandidate::from_config(candidate, adapter))?;
        }
        Ok(registry)
    }

    pub fn candidates(&self, kind: CapabilityKind) -> &[Arc<ProviderCandidate>] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ProviderCandidate>> {
        self.by_id.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_kind.values().flatten().map(|c| c.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Every kind in `required` must have at least one candidate. A missing
    /// capability is a configuration error, fatal at startup.
    pub fn validate(&self, required: &[CapabilityKind]) -> Result<(), CapabilityError> {
        match required.iter().find(|kind| self.candidates(**kind).is_empty()) {
            Some(kind) => Err(CapabilityError::NotConfigured(*kind)),
            None => Ok(()),
        }
    }

    pub fn views(&self, health: &ProviderHealthRegistry) -> Vec<CandidateView> {
        self.by_kind
            .values()
            .flatten()
            .map(|c| CandidateView {
                id: c.id.clone(),
                kind: c.kind,
                priority: c.priority,
                requires_network: c.requires_network,
                cost_per_unit: c.cost_per_unit,
                health: health.snapshot(&c.id),
            })
            .collect()
    }
}
