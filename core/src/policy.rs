// Security Policy: thresholds governing path construction and release timing
//
// Loaded once at startup and shared read-only for the lifetime of the process.

use crate::fragment::Amount;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid policy: {0}")]
    InvalidConfig(String),
    #[error("Failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse policy file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Static routing thresholds
///
/// Every field has a default, so a JSON file only needs to name the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Fewest relays in a path
    pub min_path_length: usize,
    /// Most relays in a path
    pub max_path_length: usize,
    /// Probability that a hop carries a cover-traffic flag
    pub cover_traffic_ratio: f64,
    /// Lower bound of the batch window (seconds)
    pub min_batch_window: u64,
    /// Upper bound of the batch window (seconds)
    pub max_batch_window: u64,
    /// Minimum stake a relay must hold to be eligible
    pub min_relay_stake: Amount,
    /// Relays at or above this many connections are ineligible
    pub max_relay_connections: u32,
    /// Minimum reputation score (0.0 to 1.0)
    pub reputation_threshold: f64,
    /// Relays at or above this many failed attempts are ineligible
    pub slash_threshold: u32,
    /// Retry budget handed to the failure handler
    pub max_retries: u32,
    /// Half-width of the uniform jitter interval
    pub timing_jitter: f64,
    /// Probability of injecting dummy fragments alongside a real one
    pub dummy_fragment_ratio: f64,
    /// Age in blocks after which an unremixed fragment is forcibly remixed
    pub forced_remix_blocks: u64,
    /// Mean of the exponential per-hop delay component (seconds)
    pub exp_delay_mean_secs: f64,
    /// Lifetime of a path and its ephemeral keys (seconds)
    pub path_ttl_secs: u64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            min_path_length: 3,
            max_path_length: 5,
            cover_traffic_ratio: 0.20,
            min_batch_window: 30,
            max_batch_window: 120,
            min_relay_stake: Amount::from_whole(100),
            max_relay_connections: 50,
            reputation_threshold: 0.8,
            slash_threshold: 3,
            max_retries: 2,
            timing_jitter: 0.1,
            dummy_fragment_ratio: 0.15,
            forced_remix_blocks: 100,
            exp_delay_mean_secs: 30.0,
            path_ttl_secs: 3600,
        }
    }
}

impl SecurityPolicy {
    /// Read a policy from a JSON file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let contents = std::fs::read_to_string(path)?;
        let policy: SecurityPolicy = serde_json::from_str(&contents)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Validate policy bounds
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.min_path_length == 0 {
            return Err(PolicyError::InvalidConfig(
                "min_path_length must be greater than 0".to_string(),
            ));
        }
        if self.min_path_length > self.max_path_length {
            return Err(PolicyError::InvalidConfig(
                "min_path_length must not exceed max_path_length".to_string(),
            ));
        }
        if self.min_batch_window == 0 || self.min_batch_window > self.max_batch_window {
            return Err(PolicyError::InvalidConfig(
                "batch window bounds must satisfy 0 < min <= max".to_string(),
            ));
        }
        for (name, value) in [
            ("cover_traffic_ratio", self.cover_traffic_ratio),
            ("dummy_fragment_ratio", self.dummy_fragment_ratio),
            ("reputation_threshold", self.reputation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PolicyError::InvalidConfig(format!(
                    "{} must be within [0, 1]",
                    name
                )));
            }
        }
        if !(0.0..1.0).contains(&self.timing_jitter) {
            return Err(PolicyError::InvalidConfig(
                "timing_jitter must be within [0, 1)".to_string(),
            ));
        }
        if self.exp_delay_mean_secs <= 0.0 {
            return Err(PolicyError::InvalidConfig(
                "exp_delay_mean_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_policy_default() {
        let policy = SecurityPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.min_path_length, 3);
        assert_eq!(policy.max_path_length, 5);
        assert_eq!(policy.max_relay_connections, 50);
        assert_eq!(policy.forced_remix_blocks, 100);
    }

    #[test]
    fn test_policy_invalid_path_order() {
        let policy = SecurityPolicy {
            min_path_length: 5,
            max_path_length: 3,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_invalid_ratio() {
        let policy = SecurityPolicy {
            cover_traffic_ratio: 1.5,
            ..Default::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("cover_traffic_ratio"));
    }

    #[test]
    fn test_policy_invalid_batch_window() {
        let policy = SecurityPolicy {
            min_batch_window: 200,
            max_batch_window: 120,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_partial_json_uses_defaults() {
        let policy: SecurityPolicy =
            serde_json::from_str(r#"{"max_path_length": 4, "dummy_fragment_ratio": 0.0}"#).unwrap();
        assert_eq!(policy.max_path_length, 4);
        assert_eq!(policy.dummy_fragment_ratio, 0.0);
        assert_eq!(policy.min_path_length, 3);
        assert_eq!(policy.slash_threshold, 3);
    }

    #[test]
    fn test_policy_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"min_path_length": 0}}"#).unwrap();
        assert!(matches!(
            SecurityPolicy::load(file.path()),
            Err(PolicyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_policy_load_roundtrip_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let policy = SecurityPolicy {
            timing_jitter: 0.05,
            ..Default::default()
        };
        write!(file, "{}", serde_json::to_string(&policy).unwrap()).unwrap();
        assert_eq!(SecurityPolicy::load(file.path()).unwrap(), policy);
    }
}
