// Anonymity metrics: sink contract and snapshot type
//
// The engine reports every routed path to a MetricsSink and never reads the
// result back. Statistical scores are left at zero until an aggregator that
// actually computes them is plugged in.

use crate::routing::path::{Path, Schedule};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot returned by [`crate::RoutingEngine::anonymity_score`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnonymityMetrics {
    pub fragment_linkability: f64,
    pub timing_correlation: f64,
    pub path_uniqueness: f64,
    pub batch_entropy: f64,
    /// Routed paths per relay id
    pub relay_distribution: HashMap<String, u64>,
}

pub trait MetricsSink: Send + Sync {
    /// Record a routed path. Fire-and-forget.
    fn update(&self, path: &Path, schedule: &Schedule);

    fn snapshot(&self) -> AnonymityMetrics {
        AnonymityMetrics::default()
    }
}

/// Default sink
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn update(&self, _path: &Path, _schedule: &Schedule) {}
}

/// Counts relay usage and routed paths
///
/// Only `relay_distribution` is populated in snapshots.
#[derive(Debug, Default)]
pub struct RelayUsageMetrics {
    usage: DashMap<String, u64>,
    paths: AtomicU64,
    batches: DashMap<String, u64>,
}

impl RelayUsageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths_recorded(&self) -> u64 {
        self.paths.load(Ordering::Relaxed)
    }

    pub fn usage_of(&self, relay_id: &str) -> u64 {
        self.usage.get(relay_id).map(|u| *u).unwrap_or(0)
    }

    /// Distinct batch identifiers seen so far
    pub fn distinct_batches(&self) -> usize {
        self.batches.len()
    }
}

impl MetricsSink for RelayUsageMetrics {
    fn update(&self, path: &Path, schedule: &Schedule) {
        // A relay counts once per path even if listed twice.
        let unique: HashSet<&str> = path.relay_ids().collect();
        for relay_id in unique {
            *self.usage.entry(relay_id.to_string()).or_insert(0) += 1;
        }
        *self.batches.entry(schedule.batch_id.clone()).or_insert(0) += 1;
        self.paths.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AnonymityMetrics {
        AnonymityMetrics {
            relay_distribution: self
                .usage
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            ..AnonymityMetrics::default()
        }
    }
}
