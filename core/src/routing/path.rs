// Routing plan data: paths, their per-hop key material, and release schedules

use crate::policy::SecurityPolicy;
use crate::relay::Relay;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Per-hop key record
///
/// Created fresh for every path and never persisted. `layer_key` holds the
/// private half of the onion layer keypair once the layers are built.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralKey {
    pub public_key: [u8; 32],
    pub private_key: [u8; 32],
    pub nonce: u64,
    /// Unix timestamp after which the key must not be used
    pub expiry: u64,
    pub layer_key: Vec<u8>,
}

impl EphemeralKey {
    pub fn generate(expiry: u64) -> Self {
        let mut rng = rand::rngs::OsRng;
        let secret = StaticSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);
        Self {
            public_key: public.to_bytes(),
            private_key: secret.to_bytes(),
            nonce: rng.next_u64(),
            expiry,
            layer_key: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry
    }
}

impl fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKey")
            .field("public_key", &hex::encode(self.public_key))
            .field("nonce", &self.nonce)
            .field("expiry", &self.expiry)
            .field("has_layer_key", &!self.layer_key.is_empty())
            .finish_non_exhaustive()
    }
}

/// Ordered relay path for one fragment
#[derive(Debug, Clone)]
pub struct Path {
    pub fragment_id: String,
    /// Relays in hop order (first hop first)
    pub relays: Vec<Relay>,
    /// One key record per relay, same order
    pub keys: Vec<EphemeralKey>,
    pub created_at: u64,
    pub expires_at: u64,
    /// Layer ciphertexts, innermost (last hop) first
    pub onion_layers: Vec<Vec<u8>>,
}

impl Path {
    /// Build an unencrypted path with one fresh key record per relay
    pub fn new(fragment_id: impl Into<String>, relays: Vec<Relay>, created_at: u64, ttl_secs: u64) -> Self {
        let expires_at = created_at.saturating_add(ttl_secs);
        let keys = relays.iter().map(|_| EphemeralKey::generate(expires_at)).collect();
        Self {
            fragment_id: fragment_id.into(),
            relays,
            keys,
            created_at,
            expires_at,
            onion_layers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub fn relay_ids(&self) -> impl Iterator<Item = &str> {
        self.relays.iter().map(|r| r.id.as_str())
    }

    /// The layer handed to the first hop
    pub fn outermost_layer(&self) -> Option<&[u8]> {
        self.onion_layers.last().map(Vec::as_slice)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Check structural invariants of an encrypted path
    pub fn check_invariants(&self, policy: &SecurityPolicy) -> Result<(), String> {
        let len = self.relays.len();
        if len < policy.min_path_length || len > policy.max_path_length {
            return Err(format!(
                "path length {} outside [{}, {}]",
                len, policy.min_path_length, policy.max_path_length
            ));
        }
        if self.keys.len() != len || self.onion_layers.len() != len {
            return Err(format!(
                "path arrays disagree: relays {}, keys {}, layers {}",
                len,
                self.keys.len(),
                self.onion_layers.len()
            ));
        }
        Ok(())
    }
}

/// Per-hop release schedule for a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub path_id: String,
    /// Base delay shared by every hop (seconds)
    pub base_delay: u64,
    /// Per-hop delay (seconds), each at least `base_delay`
    pub delays: Vec<u64>,
    pub cover_traffic: Vec<bool>,
    pub batch_id: String,
    /// Per-hop jitter within [-timing_jitter, timing_jitter]
    pub jitter: Vec<f64>,
}

impl Schedule {
    pub fn hops(&self) -> usize {
        self.delays.len()
    }

    /// Whether every per-hop array matches `hops`
    pub fn is_consistent(&self, hops: usize) -> bool {
        self.delays.len() == hops && self.cover_traffic.len() == hops && self.jitter.len() == hops
    }
}
