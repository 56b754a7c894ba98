// Connection Ledger: connections committed to relays by this process
//
// Directory snapshots report a connection count per relay, but paths built
// here add load the directory has not observed yet. The ledger keeps that
// overlay as one atomic counter per relay. Commit is a compare-and-swap loop
// on a single relay's counter so concurrent routing decisions only contend
// when they pick the same relay.

use super::Relay;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
pub struct ConnectionLedger {
    committed: DashMap<String, AtomicU32>,
}

impl ConnectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections committed locally to a relay
    pub fn committed(&self, relay_id: &str) -> u32 {
        self.committed
            .get(relay_id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Return a copy of `relay` with locally committed connections added
    pub fn overlay(&self, relay: &Relay) -> Relay {
        let mut adjusted = relay.clone();
        adjusted.connections = adjusted
            .connections
            .saturating_add(self.committed(&relay.id));
        adjusted
    }

    /// Reserve one connection slot on `relay`
    ///
    /// Fails if the snapshot count plus committed connections has already
    /// reached `max_connections`.
    pub fn try_commit(&self, relay: &Relay, max_connections: u32) -> bool {
        let counter = self
            .committed
            .entry(relay.id.clone())
            .or_insert_with(|| AtomicU32::new(0))
            .downgrade();

        let mut current = counter.load(Ordering::Acquire);
        loop {
            if relay.connections.saturating_add(current) >= max_connections {
                return false;
            }
            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Reserve a slot on every relay, or on none of them
    ///
    /// Returns the id of the first relay that could not be committed.
    pub fn try_commit_all(&self, relays: &[Relay], max_connections: u32) -> Result<(), String> {
        for (i, relay) in relays.iter().enumerate() {
            if !self.try_commit(relay, max_connections) {
                for committed in &relays[..i] {
                    self.release(&committed.id);
                }
                return Err(relay.id.clone());
            }
        }
        Ok(())
    }

    /// Give back one slot on a relay
    pub fn release(&self, relay_id: &str) {
        if let Some(counter) = self.committed.get(relay_id) {
            let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
        }
    }

    pub fn release_all<'a>(&self, relay_ids: impl IntoIterator<Item = &'a str>) {
        for relay_id in relay_ids {
            self.release(relay_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Amount;
    use std::sync::Arc;

    fn relay(id: &str, connections: u32) -> Relay {
        Relay {
            id: id.to_string(),
            address: "10.0.0.1".to_string(),
            bandwidth: 0,
            reputation: 0.9,
            last_active: 0,
            stake: Amount::from_whole(200),
            connections,
            failed_attempts: 0,
        }
    }

    #[test]
    fn test_commit_respects_max() {
        let ledger = ConnectionLedger::new();
        let r = relay("r1", 48);
        assert!(ledger.try_commit(&r, 50));
        assert!(ledger.try_commit(&r, 50));
        assert!(!ledger.try_commit(&r, 50));
        assert_eq!(ledger.committed("r1"), 2);
        assert_eq!(ledger.overlay(&r).connections, 50);
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let ledger = ConnectionLedger::new();
        let r = relay("r1", 0);
        assert!(ledger.try_commit(&r, 50));
        ledger.release("r1");
        ledger.release("r1");
        ledger.release("unknown");
        assert_eq!(ledger.committed("r1"), 0);
    }

    #[test]
    fn test_commit_all_rolls_back() {
        let ledger = ConnectionLedger::new();
        let relays = vec![relay("a", 0), relay("b", 0), relay("full", 50)];
        assert_eq!(ledger.try_commit_all(&relays, 50), Err("full".to_string()));
        assert_eq!(ledger.committed("a"), 0);
        assert_eq!(ledger.committed("b"), 0);
    }

    #[test]
    fn test_concurrent_commits_never_exceed_max() {
        let ledger = Arc::new(ConnectionLedger::new());
        let r = relay("hot", 40);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let r = r.clone();
                std::thread::spawn(move || (0..10).filter(|_| ledger.try_commit(&r, 50)).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 10);
        assert_eq!(ledger.committed("hot"), 10);
    }
}
