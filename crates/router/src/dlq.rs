//! DLQ & retry policy (C7): per-event retry bookkeeping and the bounded
//! map the retry middleware consults to decide whether a message's next
//! attempt is due. Final quarantine — publishing to the poison-queue
//! subject — is the DLQ middleware's job (see [`crate::middleware`]);
//! this module only tracks state leading up to that decision.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use model::MediaEvent;
use parking_lot::Mutex;
use resilience::{calculate_backoff, ErrorCategory};

#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub event: MediaEvent,
    pub first_seen: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: String,
    pub category: ErrorCategory,
    next_attempt_at: Instant,
}

#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub max_entries: usize,
    pub retention: Duration,
    pub initial_backoff: Duration,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            retention: Duration::from_secs(24 * 60 * 60),
            initial_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DlqStats {
    pub total_entries: usize,
    pub dropped_entries: u64,
}

struct Inner {
    entries: HashMap<String, DlqEntry>,
    order: VecDeque<String>,
    inserted_at: HashMap<String, Instant>,
    dropped_entries: u64,
}

/// Bounded map keyed by `event_id`. Capacity is enforced oldest-first:
/// once `max_entries` is reached, the oldest entry is evicted and
/// `dropped_entries` increments.
pub struct DlqHandler {
    inner: Mutex<Inner>,
    config: DlqConfig,
}

impl DlqHandler {
    pub fn new(config: DlqConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                inserted_at: HashMap::new(),
                dropped_entries: 0,
            }),
            config,
        }
    }

    pub fn add_entry(&self, event: MediaEvent, error: String, category: ErrorCategory) {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let event_id = event.event_id.clone();

        if let Some(existing) = inner.entries.get_mut(&event_id) {
            existing.last_attempt = now;
            existing.last_error = error;
            existing.category = category;
            return;
        }

        if inner.entries.len() >= self.config.max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                inner.inserted_at.remove(&oldest);
                inner.dropped_entries += 1;
            }
        }

        inner.entries.insert(
            event_id.clone(),
            DlqEntry {
                event,
                first_seen: now,
                last_attempt: now,
                retry_count: 0,
                last_error: error,
                category,
                next_attempt_at: Instant::now() + self.config.initial_backoff,
            },
        );
        inner.order.push_back(event_id.clone());
        inner.inserted_at.insert(event_id, Instant::now());
    }

    pub fn get_entry(&self, event_id: &str) -> Option<DlqEntry> {
        self.inner.lock().entries.get(event_id).cloned()
    }

    pub fn increment_retry(&self, event_id: &str) -> Option<u32> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(event_id)?;
        entry.retry_count += 1;
        entry.last_attempt = Utc::now();
        entry.next_attempt_at =
            Instant::now() + calculate_backoff(self.config.initial_backoff * entry.retry_count.max(1), true);
        Some(entry.retry_count)
    }

    pub fn remove_entry(&self, event_id: &str) -> Option<DlqEntry> {
        let mut inner = self.inner.lock();
        inner.inserted_at.remove(event_id);
        inner.order.retain(|id| id != event_id);
        inner.entries.remove(event_id)
    }

    pub fn list_entries(&self) -> Vec<DlqEntry> {
        self.inner.lock().entries.values().cloned().collect()
    }

    /// Entries whose backoff has elapsed and are due for another attempt.
    pub fn get_pending_retries(&self) -> Vec<DlqEntry> {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.next_attempt_at <= now)
            .cloned()
            .collect()
    }

    /// Evict entries older than `retention`.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock();
        let retention = self.config.retention;
        let expired: Vec<String> = inner
            .inserted_at
            .iter()
            .filter(|(_, inserted)| inserted.elapsed() > retention)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            inner.entries.remove(id);
            inner.inserted_at.remove(id);
            inner.order.retain(|existing| existing != id);
        }
        expired.len()
    }

    pub fn stats(&self) -> DlqStats {
        let inner = self.inner.lock();
        DlqStats { total_entries: inner.entries.len(), dropped_entries: inner.dropped_entries }
    }
}
