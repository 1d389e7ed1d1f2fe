//! Provider health registry
//!
//! Each provider's health lives in a single `AtomicU64` word packing the
//! stored status (low 2 bits) with the cooldown deadline in milliseconds since
//! the registry epoch (high bits). Every update is a compare-and-swap on that
//! word, so concurrent resolutions touching the same provider never lose an
//! update and never observe a status torn from its deadline.
//!
//! ```text
//! HEALTHY ──[failure]──► UNHEALTHY (until now + cooldown)
//!    ▲                        │
//!    │                  [cooldown expiry]
//!    │                        ▼
//!    └──[success/probe]── COOLDOWN (eligible, reads as Cooldown)
//! ```
//!
//! Within its cooldown an unhealthy provider only returns to healthy through
//! an explicit successful probe.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use voice_tutor_core::HealthStatus;

const STATUS_HEALTHY: u64 = 0;
const STATUS_UNHEALTHY: u64 = 1;
const STATUS_COOLDOWN: u64 = 2;
const STATUS_MASK: u64 = 0b11;

fn pack(status: u64, until_ms: u64) -> u64 {
    (until_ms << 2) | status
}

fn unpack(word: u64) -> (u64, u64) {
    (word & STATUS_MASK, word >> 2)
}

fn encode(status: HealthStatus) -> u64 {
    match status {
        HealthStatus::Healthy => STATUS_HEALTHY,
        HealthStatus::Unhealthy => STATUS_UNHEALTHY,
        HealthStatus::Cooldown => STATUS_COOLDOWN,
    }
}

#[derive(Default)]
struct HealthCell {
    word: AtomicU64,
    /// Millisecond of the last failure plus one; zero means never failed
    last_failure: AtomicU64,
    consecutive_failures: AtomicU64,
}

/// Point-in-time health of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unhealthy_for_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_ago_ms: Option<u64>,
    pub consecutive_failures: u64,
}

pub struct ProviderHealthRegistry {
    cells: DashMap<String, Arc<HealthCell>>,
    cooldown_ms: AtomicU64,
    epoch: Instant,
}

impl ProviderHealthRegistry {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cells: DashMap::new(),
            cooldown_ms: AtomicU64::new(cooldown.as_millis() as u64),
            epoch: Instant::now(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms.load(Ordering::Relaxed))
    }

    /// Applies to failures recorded from now on; running cooldowns keep their deadline
    pub fn set_cooldown(&self, cooldown: Duration) {
        self.cooldown_ms.store(cooldown.as_millis() as u64, Ordering::Relaxed);
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn cell(&self, id: &str) -> Arc<HealthCell> {
        if let Some(cell) = self.cells.get(id) {
            return Arc::clone(cell.value());
        }
        Arc::clone(self.cells.entry(id.to_string()).or_default().value())
    }

    fn effective(word: u64, now_ms: u64) -> HealthStatus {
        match unpack(word) {
            (STATUS_UNHEALTHY, until) if now_ms >= until => HealthStatus::Cooldown,
            (STATUS_UNHEALTHY, _) => HealthStatus::Unhealthy,
            (STATUS_COOLDOWN, _) => HealthStatus::Cooldown,
            _ => HealthStatus::Healthy,
        }
    }

    /// Start tracking a provider as healthy. Re-registering keeps existing state.
    pub fn register(&self, id: &str) {
        self.cells.entry(id.to_string()).or_default();
    }

    /// Effective status: an unhealthy provider whose cooldown has expired
    /// reads as `Cooldown`. Unknown providers read as healthy.
    pub fn status(&self, id: &str) -> HealthStatus {
        match self.cells.get(id) {
            Some(cell) => Self::effective(cell.word.load(Ordering::Acquire), self.now_ms()),
            None => HealthStatus::Healthy,
        }
    }

    pub fn is_eligible(&self, id: &str) -> bool {
        self.status(id) != HealthStatus::Unhealthy
    }

    /// Milliseconds since the registry epoch of the last failure
    pub fn last_failure_ms(&self, id: &str) -> Option<u64> {
        self.cells
            .get(id)
            .and_then(|cell| cell.last_failure.load(Ordering::Acquire).checked_sub(1))
    }

    pub fn snapshot(&self, id: &str) -> HealthSnapshot {
        let now = self.now_ms();
        match self.cells.get(id) {
            Some(cell) => {
                let word = cell.word.load(Ordering::Acquire);
                let status = Self::effective(word, now);
                let (_, until) = unpack(word);
                HealthSnapshot {
                    status,
                    unhealthy_for_ms: (status == HealthStatus::Unhealthy)
                        .then(|| until.saturating_sub(now)),
                    last_failure_ago_ms: cell
                        .last_failure
                        .load(Ordering::Acquire)
                        .checked_sub(1)
                        .map(|at| now.saturating_sub(at)),
                    consecutive_failures: cell.consecutive_failures.load(Ordering::Acquire),
                }
            },
            None => HealthSnapshot {
                status: HealthStatus::Healthy,
                unhealthy_for_ms: None,
                last_failure_ago_ms: None,
                consecutive_failures: 0,
            },
        }
    }

    /// Atomically move from `expected` to `new`, comparing against the
    /// effective status. Returns false if the provider was not in `expected`.
    pub fn compare_and_set(&self, id: &str, expected: HealthStatus, new: HealthStatus) -> bool {
        let cell = self.cell(id);
        let now = self.now_ms();
        let until = if new == HealthStatus::Unhealthy {
            now + self.cooldown_ms.load(Ordering::Relaxed)
        } else {
            0
        };
        cell.word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                (Self::effective(word, now) == expected).then(|| pack(encode(new), until))
            })
            .is_ok()
    }

    /// Mark unhealthy for one cooldown interval from now
    pub fn record_failure(&self, id: &str) {
        let cell = self.cell(id);
        let now = self.now_ms();
        let until = now + self.cooldown_ms.load(Ordering::Relaxed);
        // A racing failure may have pushed the deadline further out; keep the later one
        let _ = cell.word.fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
            let (status, current_until) = unpack(word);
            let until = if status == STATUS_UNHEALTHY {
                until.max(current_until)
            } else {
                until
            };
            Some(pack(STATUS_UNHEALTHY, until))
        });
        cell.last_failure.fetch_max(now + 1, Ordering::AcqRel);
        cell.consecutive_failures.fetch_add(1, Ordering::AcqRel);
    }

    /// A successful invocation. Restores health unless the provider is still
    /// inside its cooldown, which only a probe may cut short. Returns whether
    /// the provider is now healthy.
    pub fn record_success(&self, id: &str) -> bool {
        let cell = self.cell(id);
        let now = self.now_ms();
        let restored = cell
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                match Self::effective(word, now) {
                    HealthStatus::Unhealthy => None,
                    _ => Some(pack(STATUS_HEALTHY, 0)),
                }
            })
            .is_ok();
        if restored {
            cell.consecutive_failures.store(0, Ordering::Release);
        }
        restored
    }

    /// Apply the result of an explicit health probe
    pub fn record_probe(&self, id: &str, result: HealthStatus) {
        match result {
            HealthStatus::Healthy => {
                let cell = self.cell(id);
                cell.word.store(pack(STATUS_HEALTHY, 0), Ordering::Release);
                cell.consecutive_failures.store(0, Ordering::Release);
            },
            HealthStatus::Unhealthy => self.record_failure(id),
            HealthStatus::Cooldown => {},
        }
    }
}
