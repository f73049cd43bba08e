//! Outbox repository (C12): `store`/`get_pending`/`get_by_id`/
//! `mark_delivered`/`mark_failed`/`size`, abstracted so the forwarder can
//! run against an in-memory fake in tests and a durable table in
//! production, the same split `SqlxOutboxRepository` and its trait make.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::OutboxResult;
use crate::message::{OutboxMessage, OutboxStatus};

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn store(&self, message: OutboxMessage) -> OutboxResult<()>;
    async fn get_pending(&self, limit: usize) -> OutboxResult<Vec<OutboxMessage>>;
    async fn get_by_id(&self, id: &str) -> OutboxResult<Option<OutboxMessage>>;
    async fn mark_delivered(&self, id: &str) -> OutboxResult<()>;
    async fn mark_failed(&self, id: &str, error: &str) -> OutboxResult<()>;
    async fn size(&self) -> OutboxResult<usize>;

    /// Pending count and the age in seconds of the oldest pending entry
    /// (0 if none pending) — feeds the forwarder's metrics and the
    /// `/admin/outbox/stats` surface.
    async fn pending_stats(&self) -> OutboxResult<(usize, i64)>;
}

pub struct InMemoryOutboxRepository {
    inner: Mutex<HashMap<String, OutboxMessage>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }
}

impl Default for InMemoryOutboxRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn store(&self, message: OutboxMessage) -> OutboxResult<()> {
        self.inner.lock().insert(message.id.clone(), message);
        Ok(())
    }

    async fn get_pending(&self, limit: usize) -> OutboxResult<Vec<OutboxMessage>> {
        let inner = self.inner.lock();
        let mut pending: Vec<OutboxMessage> = inner
            .values()
            .filter(|m| m.status != OutboxStatus::Delivered)
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn get_by_id(&self, id: &str) -> OutboxResult<Option<OutboxMessage>> {
        Ok(self.inner.lock().get(id).cloned())
    }

    async fn mark_delivered(&self, id: &str) -> OutboxResult<()> {
        let mut inner = self.inner.lock();
        let message =
            inner.get_mut(id).ok_or_else(|| crate::error::OutboxError::NotFound(id.to_string()))?;
        message.status = OutboxStatus::Delivered;
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> OutboxResult<()> {
        let mut inner = self.inner.lock();
        let message =
            inner.get_mut(id).ok_or_else(|| crate::error::OutboxError::NotFound(id.to_string()))?;
        message.status = OutboxStatus::Failed;
        message.retry_count += 1;
        message.last_error = Some(error.to_string());
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn size(&self) -> OutboxResult<usize> {
        Ok(self.inner.lock().len())
    }

    async fn pending_stats(&self) -> OutboxResult<(usize, i64)> {
        let inner = self.inner.lock();
        let pending: Vec<&OutboxMessage> =
            inner.values().filter(|m| m.status != OutboxStatus::Delivered).collect();
        if pending.is_empty() {
            return Ok((0, 0));
        }
        let oldest = pending.iter().map(|m| m.created_at).min().unwrap();
        let age = (Utc::now() - oldest).num_seconds().max(0);
        Ok((pending.len(), age))
    }
}
