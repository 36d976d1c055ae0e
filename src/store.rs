//! Storage seam (spec.md §4.6): the durable side of the Message Service and
//! Audit Log. `Store` is a trait object so the in-memory reference
//! implementation can be swapped for a durable one without touching any
//! other component.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::audit::AuditEntry;
use crate::error::CoreResult;

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredMessage {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn put_message(&self, author: &str, body: &str) -> CoreResult<StoredMessage>;
    async fn update_message(&self, id: u64, body: &str) -> CoreResult<StoredMessage>;
    async fn delete_message(&self, id: u64) -> CoreResult<()>;
    async fn get_message_author(&self, id: u64) -> CoreResult<String>;
    /// Newest-first (spec.md §4.5); `offset` is zero-based.
    async fn list_messages(&self, offset: u64, limit: u64) -> CoreResult<(Vec<StoredMessage>, u64)>;

    async fn append_audit(&self, entry: &AuditEntry) -> CoreResult<()>;
    /// Oldest-first, i.e. forward pagination by time (spec.md §4.6); `offset` is zero-based.
    async fn list_audit(&self, offset: u64, limit: u64) -> CoreResult<(Vec<AuditEntry>, u64)>;
}

struct Messages {
    by_id: BTreeMap<u64, StoredMessage>,
    next_id: AtomicU64,
}

struct Audit {
    entries: BTreeMap<u64, AuditEntry>,
}

/// Reference `Store`: two `Mutex`-guarded `BTreeMap`s, good enough to back
/// every test in this crate and a single-process deployment.
pub struct InMemoryStore {
    messages: Mutex<Messages>,
    audit: Mutex<Audit>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Messages { by_id: BTreeMap::new(), next_id: AtomicU64::new(1) }),
            audit: Mutex::new(Audit { entries: BTreeMap::new() }),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn paginate<T: Clone>(items: impl Iterator<Item = T>, offset: u64, limit: u64) -> (Vec<T>, u64) {
    let all: Vec<T> = items.collect();
    let total = all.len() as u64;
    let limit = limit.max(1);
    let start = offset as usize;
    if start >= all.len() {
        return (Vec::new(), total);
    }
    let end = (start + limit as usize).min(all.len());
    (all[start..end].to_vec(), total)
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_message(&self, author: &str, body: &str) -> CoreResult<StoredMessage> {
        let mut messages = self.messages.lock().unwrap();
        let id = messages.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let message = StoredMessage { id, author: author.to_string(), body: body.to_string(), created_at: now, updated_at: now };
        messages.by_id.insert(id, message.clone());
        Ok(message)
    }

    async fn update_message(&self, id: u64, body: &str) -> CoreResult<StoredMessage> {
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .by_id
            .get_mut(&id)
            .ok_or_else(|| crate::error::CoreError::not_found(format!("no such message: {id}")))?;
        message.body = body.to_string();
        message.updated_at = Utc::now();
        Ok(message.clone())
    }

    async fn delete_message(&self, id: u64) -> CoreResult<()> {
        let mut messages = self.messages.lock().unwrap();
        messages
            .by_id
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| crate::error::CoreError::not_found(format!("no such message: {id}")))
    }

    async fn get_message_author(&self, id: u64) -> CoreResult<String> {
        let messages = self.messages.lock().unwrap();
        messages
            .by_id
            .get(&id)
            .map(|m| m.author.clone())
            .ok_or_else(|| crate::error::CoreError::not_found(format!("no such message: {id}")))
    }

    async fn list_messages(&self, offset: u64, limit: u64) -> CoreResult<(Vec<StoredMessage>, u64)> {
        let messages = self.messages.lock().unwrap();
        Ok(paginate(messages.by_id.values().rev().cloned(), offset, limit))
    }

    async fn append_audit(&self, entry: &AuditEntry) -> CoreResult<()> {
        let mut audit = self.audit.lock().unwrap();
        audit.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn list_audit(&self, offset: u64, limit: u64) -> CoreResult<(Vec<AuditEntry>, u64)> {
        let audit = self.audit.lock().unwrap();
        Ok(paginate(audit.entries.values().cloned(), offset, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_update_delete_round_trip() {
        let store = InMemoryStore::new();
        let created = store.put_message("alice", "hello").await.unwrap();
        assert_eq!(store.get_message_author(created.id).await.unwrap(), "alice");

        let updated = store.update_message(created.id, "hello, edited").await.unwrap();
        assert_eq!(updated.body, "hello, edited");
        assert!(updated.updated_at >= updated.created_at);

        store.delete_message(created.id).await.unwrap();
        assert!(store.get_message_author(created.id).await.is_err());
    }

    #[tokio::test]
    async fn list_messages_paginates_newest_first() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.put_message("alice", &format!("msg {i}")).await.unwrap();
        }
        let (first, total) = store.list_messages(0, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.iter().map(|m| &m.body).collect::<Vec<_>>(), vec!["msg 4", "msg 3"]);
        let (last, _) = store.list_messages(4, 2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].body, "msg 0");
    }

    #[tokio::test]
    async fn update_missing_message_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.update_message(999, "x").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }
}
