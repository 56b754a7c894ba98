// Path Diversity Tracker: bounded per-relay routing history
//
// Each relay keeps the ids of the most recent fragments routed through it.
// The index is a concurrent map; every relay's history sits behind its own
// lock so appends for disjoint relay sets never contend.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Maximum fragment ids remembered per relay
pub const PATH_HISTORY_CAPACITY: usize = 100;

pub struct PathDiversityTracker {
    history: DashMap<String, Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for PathDiversityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PathDiversityTracker {
    pub fn new() -> Self {
        Self::with_capacity(PATH_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a fragment id to a relay's history, evicting the oldest entry
    /// once the relay is at capacity
    pub fn record(&self, relay_id: &str, fragment_id: &str) {
        if let Some(entry) = self.history.get(relay_id) {
            push_bounded(&mut entry.lock(), fragment_id, self.capacity);
            return;
        }
        let entry = self
            .history
            .entry(relay_id.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.capacity)));
        push_bounded(&mut entry.lock(), fragment_id, self.capacity);
    }

    /// Record a fragment against every relay it was routed through
    pub fn record_path<'a>(&self, relay_ids: impl IntoIterator<Item = &'a str>, fragment_id: &str) {
        for relay_id in relay_ids {
            self.record(relay_id, fragment_id);
        }
    }

    /// Whether `candidate_id` appears in `relay_id`'s history
    pub fn contains(&self, relay_id: &str, candidate_id: &str) -> bool {
        self.history
            .get(relay_id)
            .map(|entry| entry.lock().iter().any(|id| id == candidate_id))
            .unwrap_or(false)
    }

    /// Snapshot of a relay's history, oldest first
    pub fn history_of(&self, relay_id: &str) -> Vec<String> {
        self.history
            .get(relay_id)
            .map(|entry| entry.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len_of(&self, relay_id: &str) -> usize {
        self.history
            .get(relay_id)
            .map(|entry| entry.lock().len())
            .unwrap_or(0)
    }

    /// Number of relays with any recorded history
    pub fn tracked_relays(&self) -> usize {
        self.history.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn push_bounded(queue: &mut VecDeque<String>, fragment_id: &str, capacity: usize) {
    while queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(fragment_id.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_and_contains() {
        let tracker = PathDiversityTracker::new();
        tracker.record("relay_a", "frag_1");
        assert!(tracker.contains("relay_a", "frag_1"));
        assert!(!tracker.contains("relay_a", "frag_2"));
        assert!(!tracker.contains("relay_b", "frag_1"));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let tracker = PathDiversityTracker::new();
        for i in 0..=PATH_HISTORY_CAPACITY {
            tracker.record("relay_a", &format!("frag_{}", i));
        }
        assert_eq!(tracker.len_of("relay_a"), PATH_HISTORY_CAPACITY);
        assert!(!tracker.contains("relay_a", "frag_0"));
        assert!(tracker.contains("relay_a", "frag_1"));
        assert!(tracker.contains("relay_a", &format!("frag_{}", PATH_HISTORY_CAPACITY)));
    }

    #[test]
    fn test_history_order_is_fifo() {
        let tracker = PathDiversityTracker::with_capacity(3);
        for id in ["a", "b", "c", "d"] {
            tracker.record("relay", id);
        }
        assert_eq!(tracker.history_of("relay"), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_record_path() {
        let tracker = PathDiversityTracker::new();
        tracker.record_path(["r1", "r2", "r3"], "frag");
        assert_eq!(tracker.tracked_relays(), 3);
        assert!(tracker.contains("r2", "frag"));
    }

    #[test]
    fn test_concurrent_appends_stay_bounded() {
        let tracker = Arc::new(PathDiversityTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        tracker.record("shared", &format!("t{}_{}", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.len_of("shared"), PATH_HISTORY_CAPACITY);
    }
}
