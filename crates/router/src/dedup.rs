//! Deduplication middleware cache (§4.8 step 3). A bounded map keyed by
//! cross-source key paired with an access-order list capped at
//! `max_entries` — eviction is oldest-inserted-first, not a true
//! intrusive LRU reordered on every hit, which the design notes call out
//! as an acceptable simplification over a sketch-with-TTL-buckets.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(5 * 60), max_entries: 10_000 }
    }
}

struct Inner {
    entries: HashMap<String, Instant>,
    order: VecDeque<String>,
}

pub struct Deduplicator {
    inner: Mutex<Inner>,
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(config.max_entries.min(1024)),
                order: VecDeque::new(),
            }),
            config,
        }
    }

    /// `true` if `key` is first-seen within the TTL window (dispatch
    /// should proceed), `false` if it's a repeat (ack without dispatch).
    pub fn check_and_mark(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if let Some(seen_at) = inner.entries.get(key) {
            if now.duration_since(*seen_at) < self.config.ttl {
                return false;
            }
        }

        if !inner.entries.contains_key(key) {
            if inner.entries.len() >= self.config.max_entries {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.entries.remove(&oldest);
                }
            }
            inner.order.push_back(key.to_string());
        }
        inner.entries.insert(key.to_string(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_seen_dispatches_repeat_does_not() {
        let dedup = Deduplicator::new(DedupConfig::default());
        assert!(dedup.check_and_mark("k1"));
        assert!(!dedup.check_and_mark("k1"));
        assert!(dedup.check_and_mark("k2"));
    }

    #[test]
    fn expired_entry_dispatches_again() {
        let dedup = Deduplicator::new(DedupConfig { ttl: Duration::from_millis(10), max_entries: 10 });
        assert!(dedup.check_and_mark("k1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(dedup.check_and_mark("k1"));
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let dedup = Deduplicator::new(DedupConfig { ttl: Duration::from_secs(60), max_entries: 2 });
        assert!(dedup.check_and_mark("k1"));
        assert!(dedup.check_and_mark("k2"));
        assert!(dedup.check_and_mark("k3"));
        assert_eq!(dedup.len(), 2);
        // k1 was evicted, so it dispatches again as first-seen.
        assert!(dedup.check_and_mark("k1"));
    }

    #[test]
    fn seed_s2_cross_source_dedup_fires_once() {
        let dedup = Deduplicator::new(DedupConfig::default());
        let cross_source_key = "default:12345:54321:d1:2024-01-15T10:32:00Z";
        assert!(dedup.check_and_mark(cross_source_key));
        assert!(!dedup.check_and_mark(cross_source_key));
    }

    #[test]
    fn seed_s3_distinct_machine_ids_both_dispatch() {
        let dedup = Deduplicator::new(DedupConfig::default());
        assert!(dedup.check_and_mark("default:12345:54321:d1:2024-01-15T10:32:00Z"));
        assert!(dedup.check_and_mark("default:12345:54321:d2:2024-01-15T10:32:00Z"));
    }
}
