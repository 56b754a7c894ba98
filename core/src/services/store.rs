// Routing plan storage: content-addressed plans over a key/value backend
//
// Only the public part of a plan is written: relay ids, hop public keys,
// onion layers and the schedule. Layer keys never leave the process.

use super::{PlanStore, ServiceError};
use crate::fragment::Fragment;
use crate::routing::path::{Path, Schedule};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Key prefix under which plans are stored
const PLAN_PREFIX: &[u8] = b"plan:";

/// Unified storage trait for plan persistence
pub trait StorageBackend: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ServiceError>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ServiceError>;
    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, ServiceError>;
    fn flush(&self) -> Result<(), ServiceError>;
}

/// In-memory storage, used for tests and ephemeral runs
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ServiceError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, ServiceError> {
        Ok(self.data.read().keys().filter(|k| k.starts_with(prefix)).count())
    }

    fn flush(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, ServiceError> {
        let db = sled::open(path).map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(Self { db })
    }
}

impl StorageBackend for SledStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ServiceError> {
        self.db
            .insert(key, value)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
        let value = self
            .db
            .get(key)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize, ServiceError> {
        Ok(self.db.scan_prefix(prefix).count())
    }

    fn flush(&self) -> Result<(), ServiceError> {
        self.db
            .flush()
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Persisted form of a routing plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub fragment: Fragment,
    pub relay_ids: Vec<String>,
    pub hop_public_keys: Vec<[u8; 32]>,
    pub created_at: u64,
    pub expires_at: u64,
    pub onion_layers: Vec<Vec<u8>>,
    pub schedule: Schedule,
}

impl RoutingPlan {
    pub fn from_parts(fragment: &Fragment, path: &Path, schedule: &Schedule) -> Self {
        Self {
            fragment: fragment.clone(),
            relay_ids: path.relay_ids().map(str::to_string).collect(),
            hop_public_keys: path.keys.iter().map(|k| k.public_key).collect(),
            created_at: path.created_at,
            expires_at: path.expires_at,
            onion_layers: path.onion_layers.clone(),
            schedule: schedule.clone(),
        }
    }

    /// Canonical encoding and its hex blake3 content hash
    pub fn encode(&self) -> Result<(Vec<u8>, String), ServiceError> {
        let bytes = bincode::serialize(self).map_err(|e| ServiceError::Persistence(e.to_string()))?;
        let hash = blake3::hash(&bytes).to_hex().to_string();
        Ok((bytes, hash))
    }
}

/// [`PlanStore`] over any [`StorageBackend`]
///
/// Plans are keyed by content hash, so storing the same plan twice is a
/// no-op that returns the same hash.
pub struct BackendPlanStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> BackendPlanStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn get_plan(&self, content_hash: &str) -> Result<Option<RoutingPlan>, ServiceError> {
        let key = plan_key(content_hash);
        match self.backend.get(&key)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| ServiceError::Persistence(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn plan_count(&self) -> Result<usize, ServiceError> {
        self.backend.count_prefix(PLAN_PREFIX)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: StorageBackend> PlanStore for BackendPlanStore<B> {
    async fn store(
        &self,
        fragment: &Fragment,
        path: &Path,
        schedule: &Schedule,
    ) -> Result<String, ServiceError> {
        let plan = RoutingPlan::from_parts(fragment, path, schedule);
        let (bytes, hash) = plan.encode()?;
        let key = plan_key(&hash);

        if self.backend.get(&key)?.is_none() {
            self.backend
                .put(&key, &bytes)
                .map_err(|e| ServiceError::Persistence(e.to_string()))?;
            self.backend.flush()?;
        }
        debug!("Stored routing plan {} for fragment {}", hash, fragment.id);
        Ok(hash)
    }
}

fn plan_key(content_hash: &str) -> Vec<u8> {
    let mut key = PLAN_PREFIX.to_vec();
    key.extend_from_slice(content_hash.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Amount;
    use crate::relay::Relay;

    fn sample() -> (Fragment, Path, Schedule) {
        let fragment = Fragment::new("frag", "0xabc", "ETH", Amount::from_whole(1), 7);
        let relays = (0..3)
            .map(|i| Relay {
                id: format!("relay_{}", i),
                address: format!("10.{}.0.1", i),
                bandwidth: 0,
                reputation: 0.9,
                last_active: 0,
                stake: Amount::from_whole(150),
                connections: 0,
                failed_attempts: 0,
            })
            .collect();
        let mut path = Path::new("frag", relays, 100, 60);
        path.onion_layers = vec![vec![1; 8], vec![2; 8], vec![3; 8]];
        for key in path.keys.iter_mut() {
            key.layer_key = vec![0xAA; 32];
        }
        let schedule = Schedule {
            path_id: "frag".to_string(),
            base_delay: 30,
            delays: vec![30, 31, 32],
            cover_traffic: vec![false; 3],
            batch_id: "batch_9".to_string(),
            jitter: vec![0.0; 3],
        };
        (fragment, path, schedule)
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let store = BackendPlanStore::new(MemoryStorage::new());
        let (fragment, path, schedule) = sample();
        let first = store.store(&fragment, &path, &schedule).await.unwrap();
        let second = store.store(&fragment, &path, &schedule).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_eq!(store.plan_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stored_plan_has_no_layer_keys() {
        let store = BackendPlanStore::new(MemoryStorage::new());
        let (fragment, path, schedule) = sample();
        let hash = store.store(&fragment, &path, &schedule).await.unwrap();

        let plan = store.get_plan(&hash).unwrap().unwrap();
        assert_eq!(plan.relay_ids, vec!["relay_0", "relay_1", "relay_2"]);
        assert_eq!(plan.schedule, schedule);

        let raw = store.backend().get(&plan_key(&hash)).unwrap().unwrap();
        assert!(!raw.windows(32).any(|w| w == [0xAA; 32]));
        for key in &path.keys {
            assert!(!raw.windows(32).any(|w| w == key.private_key));
        }
    }

    #[tokio::test]
    async fn test_sled_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackendPlanStore::new(SledStorage::open(dir.path().join("plans")).unwrap());
        let (fragment, path, schedule) = sample();
        let hash = store.store(&fragment, &path, &schedule).await.unwrap();
        assert_eq!(store.get_plan(&hash).unwrap().unwrap().fragment, fragment);
        assert!(store.get_plan("missing").unwrap().is_none());
    }
}
