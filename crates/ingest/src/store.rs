//! The columnar store interface the appender calls into. Only the insert
//! contract is consumed here; the store owns upsert semantics on
//! `correlation_key`.

use async_trait::async_trait;
use model::MediaEvent;

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_media_events(&self, events: &[MediaEvent]) -> Result<(), anyhow::Error>;
}

/// In-memory store used by tests and as the default when no external store
/// is wired. Upserts on `correlation_key`, the same way any real
/// implementation must.
#[derive(Default)]
pub struct InMemoryStore {
    rows: parking_lot::Mutex<std::collections::HashMap<String, MediaEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<MediaEvent> {
        self.rows.lock().values().cloned().collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_media_events(&self, events: &[MediaEvent]) -> Result<(), anyhow::Error> {
        let mut rows = self.rows.lock();
        for event in events {
            let key = event
                .correlation_key
                .clone()
                .unwrap_or_else(|| event.generate_correlation_key());
            rows.insert(key, event.clone());
        }
        Ok(())
    }
}
