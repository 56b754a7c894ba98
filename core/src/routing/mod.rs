//! Fragment routing: paths, their schedules, and the engine that drives a
//! fragment from pending to routed.
//!
//! A route call runs remix check, relay selection, onion encryption,
//! scheduling, optional dummy injection, persistence and the ledger mark, in
//! that order. Any failure is handed to the failure handler and turned into a
//! `false` outcome; nothing escapes the engine as an error.

pub mod engine;
pub mod path;

pub use engine::RoutingEngine;
pub use path::{EphemeralKey, Path, Schedule};

use crate::privacy::OnionError;
use crate::relay::SelectionError;
use crate::services::ServiceError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Insufficient relays: required {required}, available {available}")]
    InsufficientRelays { required: usize, available: usize },
    #[error(
        "Relay diversity exhausted: required {required}, selected {selected} of {eligible} eligible"
    )]
    DiversityExhausted {
        required: usize,
        eligible: usize,
        selected: usize,
    },
    #[error("Crypto backend failure: {0}")]
    CryptoBackend(String),
    #[error("Persistence failure: {0}")]
    Persistence(String),
    #[error("On-chain failure: {0}")]
    OnChain(String),
    #[error("Relay directory failure: {0}")]
    Directory(String),
    #[error("Relay {0} has no free connection slots")]
    RelaySaturated(String),
    #[error("Policy violation: {0}")]
    PolicyViolation(String),
}

impl RoutingError {
    /// Whether retrying the same fragment can succeed without outside change
    ///
    /// Crypto failures are fatal and policy violations are internal bugs.
    /// Everything else may clear up on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RoutingError::CryptoBackend(_) | RoutingError::PolicyViolation(_)
        )
    }
}

impl From<SelectionError> for RoutingError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::InsufficientRelays { required, eligible } => {
                RoutingError::InsufficientRelays {
                    required,
                    available: eligible,
                }
            }
            SelectionError::DiversityExhausted {
                required,
                eligible,
                selected,
            } => RoutingError::DiversityExhausted {
                required,
                eligible,
                selected,
            },
        }
    }
}

impl From<OnionError> for RoutingError {
    fn from(err: OnionError) -> Self {
        RoutingError::CryptoBackend(err.to_string())
    }
}

impl From<ServiceError> for RoutingError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Directory(e) => RoutingError::Directory(e),
            ServiceError::Persistence(e) | ServiceError::Storage(e) => RoutingError::Persistence(e),
            ServiceError::OnChain(e) => RoutingError::OnChain(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_errors_keep_their_counts() {
        let err: RoutingError = SelectionError::InsufficientRelays {
            required: 3,
            eligible: 2,
        }
        .into();
        assert_eq!(
            err,
            RoutingError::InsufficientRelays {
                required: 3,
                available: 2
            }
        );

        let err: RoutingError = SelectionError::DiversityExhausted {
            required: 4,
            eligible: 9,
            selected: 1,
        }
        .into();
        assert_eq!(
            err,
            RoutingError::DiversityExhausted {
                required: 4,
                eligible: 9,
                selected: 1
            }
        );
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Relay diversity exhausted: required 4, selected 1 of 9 eligible"
        );
    }

    #[test]
    fn test_service_errors_map_by_kind() {
        assert_eq!(
            RoutingError::from(ServiceError::Storage("io".into())),
            RoutingError::Persistence("io".into())
        );
        assert_eq!(
            RoutingError::from(ServiceError::OnChain("nonce".into())),
            RoutingError::OnChain("nonce".into())
        );
    }

    #[test]
    fn test_retryable() {
        assert!(RoutingError::OnChain("x".into()).is_retryable());
        assert!(RoutingError::RelaySaturated("r".into()).is_retryable());
        assert!(!RoutingError::from(OnionError::EmptyPath).is_retryable());
        assert!(!RoutingError::PolicyViolation("x".into()).is_retryable());
    }
}
