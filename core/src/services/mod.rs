// External collaborators: contracts consumed by the routing engine
//
// The engine never performs network I/O itself. Relay discovery, plan
// persistence, ledger access and failure policy all sit behind these traits.
// Implementations own their timeouts and retries; any error they return is a
// routing failure to the engine.

pub mod memory;
pub mod store;

pub use memory::{LoggingFailureHandler, MemoryLedger, StaticDirectory};
pub use store::{BackendPlanStore, MemoryStorage, RoutingPlan, SledStorage, StorageBackend};

use crate::fragment::Fragment;
use crate::relay::Relay;
use crate::routing::path::{Path, Schedule};
use crate::routing::RoutingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Relay directory unavailable: {0}")]
    Directory(String),
    #[error("Routing plan persistence failed: {0}")]
    Persistence(String),
    #[error("Ledger call failed: {0}")]
    OnChain(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Ledger acknowledgement of a `mark_routed` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: ReceiptStatus,
    /// Block the mark was included in
    pub block_height: u64,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Source of relay snapshots
#[async_trait]
pub trait RelayDirectory: Send + Sync {
    async fn list_available_relays(&self) -> Result<Vec<Relay>, ServiceError>;
}

/// Persists routing plans and returns their content hash
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn store(
        &self,
        fragment: &Fragment,
        path: &Path,
        schedule: &Schedule,
    ) -> Result<String, ServiceError>;
}

/// On-chain access
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn mark_routed(&self, fragment_id: &str, content_hash: &str) -> Result<Receipt, ServiceError>;
    async fn current_block_height(&self) -> Result<u64, ServiceError>;
}

/// Decides what a routing failure means for a fragment
///
/// The returned bool becomes the outcome of the route call.
#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn handle_failure(&self, fragment: &Fragment, error: &RoutingError) -> bool;
}
