//! Message Service (spec.md §4.5): the single critical section for every
//! mutation — authorize, check lock ownership, mutate the store, audit,
//! publish. Reads never touch the writer lock at all.

use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditAction, AuditLog};
use crate::error::{validate_pagination, CoreError, CoreResult};
use crate::event_bus::{Event, EventBus};
use crate::store::{Store, StoredMessage};
use crate::writer_lock::WriterLock;

#[derive(Debug, Clone, serde::Serialize)]
pub struct MessagePage {
    pub items: Vec<StoredMessage>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub has_more: bool,
}

pub struct MessageService {
    store: Arc<dyn Store>,
    lock: Arc<WriterLock>,
    audit: Arc<AuditLog>,
    bus: Arc<EventBus>,
}

impl MessageService {
    pub fn new(store: Arc<dyn Store>, lock: Arc<WriterLock>, audit: Arc<AuditLog>, bus: Arc<EventBus>) -> Self {
        Self { store, lock, audit, bus }
    }

    /// Reads are unconditional: any authenticated principal may list
    /// messages regardless of who (if anyone) holds the writer lock.
    /// `page` is 1-based per spec.md §6.1; `page=1` is the newest.
    pub async fn list(&self, page: u64, limit: u64) -> CoreResult<MessagePage> {
        validate_pagination(page, limit)?;
        let offset = (page - 1) * limit;
        let (items, total) = self.store.list_messages(offset, limit).await?;
        let has_more = offset + items.len() as u64 < total;
        Ok(MessagePage { items, page, limit, total, has_more })
    }

    /// Author immutability (spec.md §9 Open Question #4) is enforced
    /// structurally: `author` always comes from the caller's own resolved
    /// identity, never from a request payload field, so there is no code
    /// path that could let one principal author a message as another.
    pub async fn create(&self, username: &str, body: &str) -> CoreResult<StoredMessage> {
        validate_body(body)?;
        self.lock.check_owner(username)?;

        let message = self.store.put_message(username, body).await?;
        self.audit
            .append(AuditAction::Create, Some(username.to_string()), format!("id={}", message.id), 0)
            .await;
        self.bus.publish(Event::MessageCreated {
            id: message.id,
            author: message.author.clone(),
            body: message.body.clone(),
            ts: message.created_at,
        });
        info!(username, id = message.id, "message created");
        Ok(message)
    }

    pub async fn update(&self, username: &str, id: u64, body: &str) -> CoreResult<StoredMessage> {
        validate_body(body)?;
        self.lock.check_owner(username)?;

        let author = self.store.get_message_author(id).await?;
        if author != username {
            return Err(CoreError::forbidden("cannot edit another principal's message"));
        }

        let message = self.store.update_message(id, body).await?;
        self.audit.append(AuditAction::Update, Some(username.to_string()), format!("id={id}"), 0).await;
        self.bus.publish(Event::MessageUpdated {
            id: message.id,
            author: message.author.clone(),
            body: message.body.clone(),
            ts: message.updated_at,
        });
        info!(username, id, "message updated");
        Ok(message)
    }

    pub async fn delete(&self, username: &str, id: u64) -> CoreResult<()> {
        self.lock.check_owner(username)?;

        let author = self.store.get_message_author(id).await?;
        if author != username {
            return Err(CoreError::forbidden("cannot delete another principal's message"));
        }

        self.store.delete_message(id).await?;
        self.audit.append(AuditAction::Delete, Some(username.to_string()), format!("id={id}"), 0).await;
        self.bus.publish(Event::MessageDeleted { id, ts: chrono::Utc::now() });
        info!(username, id, "message deleted");
        Ok(())
    }
}

fn validate_body(body: &str) -> CoreResult<()> {
    if body.trim().is_empty() {
        return Err(CoreError::invalid_input("message body must not be empty"));
    }
    if body.chars().count() > 2_000 {
        return Err(CoreError::invalid_input("message body exceeds maximum length"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::store::InMemoryStore;

    fn service() -> (MessageService, Arc<WriterLock>) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let audit = Arc::new(AuditLog::new(store.clone(), 1_000));
        let bus = Arc::new(EventBus::new(16));
        let lock = Arc::new(WriterLock::new(audit.clone(), bus.clone()));
        (MessageService::new(store, lock.clone(), audit, bus), lock)
    }

    #[tokio::test]
    async fn create_requires_holding_the_lock() {
        let (svc, _lock) = service();
        let err = svc.create("alice", "hello").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SemaphoreNotHeld);
    }

    #[tokio::test]
    async fn holder_can_create_then_edit_own_message() {
        let (svc, lock) = service();
        lock.try_acquire("alice", Role::Writer).await.unwrap();
        let created = svc.create("alice", "hello").await.unwrap();
        let updated = svc.update("alice", created.id, "hello, edited").await.unwrap();
        assert_eq!(updated.body, "hello, edited");
    }

    #[tokio::test]
    async fn non_author_cannot_edit_even_while_holding_the_lock() {
        let (svc, lock) = service();
        lock.try_acquire("alice", Role::Writer).await.unwrap();
        let created = svc.create("alice", "hello").await.unwrap();
        lock.release("alice").await.unwrap();

        lock.try_acquire("bob", Role::Writer).await.unwrap();
        let err = svc.update("bob", created.id, "hijacked").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let (svc, lock) = service();
        lock.try_acquire("alice", Role::Writer).await.unwrap();
        let err = svc.create("alice", "   ").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn list_does_not_require_the_lock() {
        let (svc, _lock) = service();
        let page = svc.list(1, 10).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn list_rejects_out_of_range_page_or_limit() {
        let (svc, _lock) = service();
        assert_eq!(svc.list(0, 10).await.unwrap_err().kind, crate::error::ErrorKind::InvalidInput);
        assert_eq!(svc.list(1, 0).await.unwrap_err().kind, crate::error::ErrorKind::InvalidInput);
        assert_eq!(svc.list(1, 101).await.unwrap_err().kind, crate::error::ErrorKind::InvalidInput);
    }
}
