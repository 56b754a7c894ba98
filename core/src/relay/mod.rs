// Relays: intermediary nodes that forward fragments one hop at a time
//
// Relay records are snapshots taken from the external directory. The selector
// treats them as values for the duration of one routing decision; the only
// process-local mutable relay state lives in the connection ledger and the
// diversity tracker.

pub mod history;
pub mod load;
pub mod selector;

pub use history::{PathDiversityTracker, PATH_HISTORY_CAPACITY};
pub use load::ConnectionLedger;
pub use selector::{RelaySelector, SelectionError};

use crate::fragment::Amount;
use crate::policy::SecurityPolicy;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relay {
    /// Unique relay identifier
    pub id: String,
    /// Network address (`ip`, `ip:port` or `host:port`)
    pub address: String,
    /// Advertised bandwidth in bytes per second
    pub bandwidth: u64,
    /// Reputation score (0.0 to 1.0)
    pub reputation: f64,
    /// Unix timestamp of last observed activity
    pub last_active: u64,
    /// Amount staked by the relay operator
    pub stake: Amount,
    /// Current connection count reported by the directory
    #[serde(default)]
    pub connections: u32,
    /// Failed forwarding attempts reported by the directory
    #[serde(default)]
    pub failed_attempts: u32,
}

impl Relay {
    /// Check the four eligibility predicates against a policy
    pub fn is_eligible(&self, policy: &SecurityPolicy) -> bool {
        self.stake >= policy.min_relay_stake
            && self.reputation >= policy.reputation_threshold
            && self.connections < policy.max_relay_connections
            && self.failed_attempts < policy.slash_threshold
    }

    /// Selection weight: stake × reputation / (connections + 1)
    pub fn weight(&self) -> f64 {
        self.stake.to_f64() * self.reputation / (self.connections as f64 + 1.0)
    }

    /// Network grouping used for path diversity
    pub fn network_group(&self) -> String {
        network_group(&self.address)
    }
}

/// Derive the network grouping of an address
///
/// IPv4 addresses group by /16, IPv6 by /32. Host names group by their
/// registrable domain (last two labels).
pub fn network_group(address: &str) -> String {
    let address = address.trim();

    let ip = address
        .parse::<SocketAddr>()
        .map(|s| s.ip())
        .or_else(|_| address.parse::<IpAddr>());

    match ip {
        Ok(IpAddr::V4(v4)) => {
            let o = v4.octets();
            format!("ipv4:{}.{}", o[0], o[1])
        }
        Ok(IpAddr::V6(v6)) => {
            let s = v6.segments();
            format!("ipv6:{:x}:{:x}", s[0], s[1])
        }
        Err(_) => {
            let host = match address.rsplit_once(':') {
                Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
                _ => address,
            };
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            let labels: Vec<&str> = host.rsplit('.').take(2).collect();
            let domain: Vec<&str> = labels.into_iter().rev().collect();
            format!("host:{}", domain.join("."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(stake: u64, reputation: f64, connections: u32, failed: u32) -> Relay {
        Relay {
            id: "r".to_string(),
            address: "10.0.0.1:9000".to_string(),
            bandwidth: 1_000_000,
            reputation,
            last_active: 0,
            stake: Amount::from_whole(stake),
            connections,
            failed_attempts: failed,
        }
    }

    #[test]
    fn test_relay_eligibility_thresholds() {
        let policy = SecurityPolicy::default();
        assert!(relay(100, 0.8, 49, 2).is_eligible(&policy));
        assert!(!relay(99, 0.9, 0, 0).is_eligible(&policy));
        assert!(!relay(500, 0.79, 0, 0).is_eligible(&policy));
        assert!(!relay(500, 0.9, 50, 0).is_eligible(&policy));
        assert!(!relay(500, 0.9, 0, 3).is_eligible(&policy));
    }

    #[test]
    fn test_relay_weight_penalizes_connections() {
        let idle = relay(200, 0.9, 0, 0);
        let busy = relay(200, 0.9, 3, 0);
        assert!((idle.weight() - 180.0).abs() < 1e-9);
        assert!((busy.weight() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_network_group_ipv4() {
        assert_eq!(network_group("192.168.4.7:9000"), "ipv4:192.168");
        assert_eq!(network_group("192.168.200.1"), "ipv4:192.168");
        assert_ne!(network_group("192.169.4.7"), network_group("192.168.4.7"));
    }

    #[test]
    fn test_network_group_ipv6() {
        assert_eq!(network_group("[2001:db8::1]:443"), "ipv6:2001:db8");
        assert_eq!(network_group("2001:db8:ffff::2"), "ipv6:2001:db8");
    }

    #[test]
    fn test_network_group_hostname() {
        assert_eq!(network_group("relay1.Example.org:9000"), "host:example.org");
        assert_eq!(network_group("relay2.example.org"), "host:example.org");
        assert_eq!(network_group("localhost"), "host:localhost");
    }
}
