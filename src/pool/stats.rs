use crate::pool::connection::HealthState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Entry counts by health state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub connecting: usize,
    pub healthy: usize,
    pub unstable: usize,
    pub failed: usize,
}

impl HealthSummary {
    pub fn total(&self) -> usize {
        self.connecting + self.healthy + self.unstable + self.failed
    }

    pub(crate) fn count(&mut self, health: HealthState) {
        match health {
            HealthState::Connecting => self.connecting += 1,
            HealthState::Healthy => self.healthy += 1,
            HealthState::Unstable => self.unstable += 1,
            HealthState::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub port: u16,
    pub health: HealthState,
    pub age_ms: u64,
    pub idle_ms: u64,
}

/// Point-in-time view of the pool, for observability only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_connections: usize,
    pub max_connections: usize,
    pub health: HealthSummary,
    pub total_created: u64,
    pub total_evicted: u64,
    pub total_failed_connects: u64,
    pub total_recovered: u64,
    pub total_cleaned: u64,
    /// Sorted by port
    pub connections: Vec<ConnectionStats>,
}

/// Lifetime counters
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub created: AtomicU64,
    pub evicted: AtomicU64,
    pub failed_connects: AtomicU64,
    pub recovered: AtomicU64,
    pub cleaned: AtomicU64,
}

impl PoolCounters {
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
