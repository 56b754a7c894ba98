// In-process collaborators for simulation and tests

use super::{FailureHandler, Ledger, Receipt, ReceiptStatus, RelayDirectory, ServiceError};
use crate::fragment::Fragment;
use crate::relay::Relay;
use crate::routing::RoutingError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Relay directory backed by a fixed list
#[derive(Default)]
pub struct StaticDirectory {
    relays: RwLock<Vec<Relay>>,
}

impl StaticDirectory {
    pub fn new(relays: Vec<Relay>) -> Self {
        Self {
            relays: RwLock::new(relays),
        }
    }

    /// Swap in a new directory listing
    pub fn replace(&self, relays: Vec<Relay>) {
        *self.relays.write() = relays;
    }

    pub fn len(&self) -> usize {
        self.relays.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.read().is_empty()
    }
}

#[async_trait]
impl RelayDirectory for StaticDirectory {
    async fn list_available_relays(&self) -> Result<Vec<Relay>, ServiceError> {
        Ok(self.relays.read().clone())
    }
}

/// Ledger that records marks in memory
pub struct MemoryLedger {
    block_height: AtomicU64,
    status: RwLock<ReceiptStatus>,
    marks: DashMap<String, String>,
}

impl MemoryLedger {
    pub fn new(block_height: u64) -> Self {
        Self {
            block_height: AtomicU64::new(block_height),
            status: RwLock::new(ReceiptStatus::Success),
            marks: DashMap::new(),
        }
    }

    pub fn set_block_height(&self, height: u64) {
        self.block_height.store(height, Ordering::Release);
    }

    pub fn advance(&self, blocks: u64) -> u64 {
        self.block_height.fetch_add(blocks, Ordering::AcqRel) + blocks
    }

    /// Status returned by subsequent `mark_routed` calls
    pub fn set_receipt_status(&self, status: ReceiptStatus) {
        *self.status.write() = status;
    }

    /// Content hash recorded for a fragment, if marked
    pub fn mark_of(&self, fragment_id: &str) -> Option<String> {
        self.marks.get(fragment_id).map(|m| m.value().clone())
    }

    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn mark_routed(&self, fragment_id: &str, content_hash: &str) -> Result<Receipt, ServiceError> {
        let status = *self.status.read();
        if status == ReceiptStatus::Success {
            self.marks
                .insert(fragment_id.to_string(), content_hash.to_string());
        }
        Ok(Receipt {
            status,
            block_height: self.block_height.load(Ordering::Acquire),
        })
    }

    async fn current_block_height(&self) -> Result<u64, ServiceError> {
        Ok(self.block_height.load(Ordering::Acquire))
    }
}

/// Failure handler that logs and counts failures per fragment
///
/// Never retries on its own: the route call fails, and the fragment is
/// reported permanently failed once it has failed more than `max_retries`
/// times or hit a non-retryable error. Callers ask `may_retry` before routing
/// it again.
pub struct LoggingFailureHandler {
    max_retries: u32,
    attempts: DashMap<String, Attempts>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Attempts {
    failures: u32,
    fatal: bool,
}

impl LoggingFailureHandler {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: DashMap::new(),
        }
    }

    pub fn failures_of(&self, fragment_id: &str) -> u32 {
        self.attempts.get(fragment_id).map(|a| a.failures).unwrap_or(0)
    }

    pub fn is_permanently_failed(&self, fragment_id: &str) -> bool {
        self.attempts
            .get(fragment_id)
            .map(|a| a.fatal || a.failures > self.max_retries)
            .unwrap_or(false)
    }

    /// Whether another attempt is allowed for this fragment
    pub fn may_retry(&self, fragment_id: &str) -> bool {
        !self.is_permanently_failed(fragment_id)
    }
}

#[async_trait]
impl FailureHandler for LoggingFailureHandler {
    async fn handle_failure(&self, fragment: &Fragment, error: &RoutingError) -> bool {
        let failures = {
            let mut entry = self.attempts.entry(fragment.id.clone()).or_default();
            entry.failures += 1;
            entry.fatal |= !error.is_retryable();
            entry.failures
        };
        if failures > self.max_retries || !error.is_retryable() {
            warn!(
                "Fragment {} failed permanently after {} attempt(s): {}",
                fragment.id, failures, error
            );
        } else {
            warn!(
                "Fragment {} failed (attempt {}/{}): {}",
                fragment.id,
                failures,
                self.max_retries + 1,
                error
            );
        }
        false
    }
}
