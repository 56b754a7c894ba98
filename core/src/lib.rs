// Veilroute Core: anonymous fragment routing
//
// Splits value into fragments and routes each one over a stake-weighted,
// diverse relay path with onion layers and randomized release timing.
// Network, storage and chain access stay behind collaborator traits.

pub mod fragment;
pub mod metrics;
pub mod policy;
pub mod privacy;
pub mod relay;
pub mod routing;
pub mod services;

pub use fragment::{split_amount, Amount, AmountError, Fragment, SplitError};
pub use metrics::{AnonymityMetrics, MetricsSink, NoopMetrics, RelayUsageMetrics};
pub use policy::{PolicyError, SecurityPolicy};
pub use privacy::{OnionEncryptor, OnionError, TransmissionScheduler};
pub use relay::{PathDiversityTracker, Relay, RelaySelector, SelectionError};
pub use routing::{EphemeralKey, Path, RoutingEngine, RoutingError, Schedule};
pub use services::{
    BackendPlanStore, FailureHandler, Ledger, LoggingFailureHandler, MemoryLedger, MemoryStorage,
    PlanStore, Receipt, ReceiptStatus, RelayDirectory, RoutingPlan, ServiceError, SledStorage,
    StaticDirectory, StorageBackend,
};
