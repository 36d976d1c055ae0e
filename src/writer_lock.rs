//! Writer Lock (spec.md §4.3): the binary mutual-exclusion primitive. The
//! most important component of the core — its `(status, writer_enabled)`
//! pair is the sole externally observable lock state, and every transition
//! is atomic with respect to concurrent callers.
//!
//! Per spec.md §2's dependency order (2.3 depends on 2.6 and 2.4), the lock
//! owns its own audit append and event publication as part of each
//! transition's critical section — no other component may observe a
//! transition without also observing its audit entry.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::audit::{AuditAction, AuditLog};
use crate::error::{CoreError, CoreResult};
use crate::event_bus::{Event, EventBus, WriterChangeKind};
use crate::identity::Role;

#[derive(Debug, Clone, PartialEq)]
pub enum LockStatus {
    Free,
    Held { owner: String, acquired_at: DateTime<Utc> },
}

/// A point-in-time view of the lock, safe to hand out without holding any
/// internal lock.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LockSnapshot {
    pub lock_value: u8, // 0 = Held, 1 = Free (spec.md §3.1)
    pub holder: Option<String>,
    pub writer_enabled: bool,
    pub ts: DateTime<Utc>,
}

struct Inner {
    status: LockStatus,
    writer_enabled: bool,
}

impl Inner {
    fn snapshot(&self) -> LockSnapshot {
        let (lock_value, holder) = match &self.status {
            LockStatus::Free => (1, None),
            LockStatus::Held { owner, .. } => (0, Some(owner.clone())),
        };
        LockSnapshot { lock_value, holder, writer_enabled: self.writer_enabled, ts: Utc::now() }
    }
}

pub struct WriterLock {
    inner: Mutex<Inner>,
    audit: Arc<AuditLog>,
    bus: Arc<EventBus>,
}

impl WriterLock {
    pub fn new(audit: Arc<AuditLog>, bus: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(Inner { status: LockStatus::Free, writer_enabled: true }),
            audit,
            bus,
        }
    }

    pub fn status(&self) -> LockSnapshot {
        self.inner.lock().unwrap().snapshot()
    }

    pub fn current_owner(&self) -> Option<String> {
        match &self.inner.lock().unwrap().status {
            LockStatus::Held { owner, .. } => Some(owner.clone()),
            LockStatus::Free => None,
        }
    }

    /// §4.3.1 `Free --try_acquire(u)--> Held{u}` / contention outcomes. The
    /// `role(u)∈{writer,admin}` guard only gates the `Free`-state transition
    /// per the FSM table — a `Held` state reports `semaphore-unavailable`
    /// regardless of the caller's role, since the `Held{v}` row's guard is
    /// `—` and its only emission names the holder, not the caller.
    pub async fn try_acquire(&self, username: &str, role: Role) -> CoreResult<LockSnapshot> {
        enum Outcome {
            Acquired(LockSnapshot),
            Disabled,
            Forbidden,
            HeldBy(String),
        }

        let outcome = {
            let mut inner = self.inner.lock().unwrap();
            match &inner.status {
                LockStatus::Held { owner, .. } => Outcome::HeldBy(owner.clone()),
                LockStatus::Free if !matches!(role, Role::Writer | Role::Admin) => Outcome::Forbidden,
                LockStatus::Free if !inner.writer_enabled => Outcome::Disabled,
                LockStatus::Free => {
                    inner.status = LockStatus::Held { owner: username.to_string(), acquired_at: Utc::now() };
                    Outcome::Acquired(inner.snapshot())
                }
            }
        };

        match outcome {
            Outcome::Acquired(snapshot) => {
                self.audit
                    .append(AuditAction::Acquire, Some(username.to_string()), format!("owner={username}"), 0)
                    .await;
                self.bus.publish(Event::WriterChanged {
                    event: WriterChangeKind::Acquired,
                    principal: username.to_string(),
                    ts: snapshot.ts,
                });
                info!(username, "writer lock acquired");
                Ok(snapshot)
            }
            Outcome::Disabled => Err(CoreError::writer_disabled()),
            Outcome::Forbidden => Err(CoreError::forbidden("reader role cannot acquire the writer lock")),
            Outcome::HeldBy(owner) => Err(CoreError::semaphore_unavailable(&owner)),
        }
    }

    /// §4.3.2 ownership validation, used standalone by `release` and inline
    /// by the Message Service before every mutation.
    pub fn check_owner(&self, username: &str) -> CoreResult<()> {
        let inner = self.inner.lock().unwrap();
        match &inner.status {
            LockStatus::Free => Err(CoreError::semaphore_not_held()),
            LockStatus::Held { owner, .. } if owner == username => Ok(()),
            LockStatus::Held { .. } => Err(CoreError::semaphore_not_held()),
        }
    }

    pub async fn release(&self, username: &str) -> CoreResult<()> {
        let released = {
            let mut inner = self.inner.lock().unwrap();
            match &inner.status {
                LockStatus::Held { owner, .. } if owner == username => {
                    inner.status = LockStatus::Free;
                    true
                }
                LockStatus::Held { .. } => false,
                LockStatus::Free => return Err(CoreError::semaphore_not_held()),
            }
        };

        if !released {
            return Err(CoreError::semaphore_not_held());
        }

        self.emit_release(username, "reason=release").await;
        Ok(())
    }

    /// §4.3.3: force-release a lock whose holder has no remaining activity.
    pub async fn client_vanished(&self, username: &str) -> bool {
        let released = {
            let mut inner = self.inner.lock().unwrap();
            match &inner.status {
                LockStatus::Held { owner, .. } if owner == username => {
                    inner.status = LockStatus::Free;
                    true
                }
                _ => false,
            }
        };

        if released {
            self.emit_release(username, "reason=client-gone").await;
        }
        released
    }

    async fn emit_release(&self, username: &str, content: &str) {
        self.audit
            .append(AuditAction::Release, Some(username.to_string()), content.to_string(), 1)
            .await;
        self.bus.publish(Event::WriterChanged {
            event: WriterChangeKind::Released,
            principal: username.to_string(),
            ts: Utc::now(),
        });
        info!(username, content, "writer lock released");
    }

    /// §4.3.1 admin transitions. Disabling force-releases a held lock
    /// (spec.md §9 Open Question #1's resolution, confirmed by scenario S3).
    pub async fn admin_set_enabled(&self, admin: &str, enabled: bool) -> CoreResult<LockSnapshot> {
        let (prev_owner, snapshot) = {
            let mut inner = self.inner.lock().unwrap();
            let prev_owner = if !enabled {
                match std::mem::replace(&mut inner.status, LockStatus::Free) {
                    LockStatus::Held { owner, .. } => Some(owner),
                    LockStatus::Free => None,
                }
            } else {
                None
            };
            inner.writer_enabled = enabled;
            (prev_owner, inner.snapshot())
        };

        if let Some(owner) = &prev_owner {
            self.audit
                .append(AuditAction::AdminForceRelease, Some(admin.to_string()), format!("target={owner}"), 1)
                .await;
            self.bus.publish(Event::WriterChanged {
                event: WriterChangeKind::Forced,
                principal: owner.clone(),
                ts: snapshot.ts,
            });
        }

        self.audit
            .append(
                AuditAction::AdminToggle,
                Some(admin.to_string()),
                format!("enabled={enabled}"),
                snapshot.lock_value,
            )
            .await;
        self.bus.publish(Event::AdminToggle { admin: admin.to_string(), enabled, ts: snapshot.ts });

        info!(admin, enabled, forced_release = prev_owner.is_some(), "writer_enabled toggled");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn lock() -> (Arc<WriterLock>, Arc<AuditLog>, Arc<EventBus>) {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(AuditLog::new(store, 1_000));
        let bus = Arc::new(EventBus::new(16));
        (Arc::new(WriterLock::new(audit.clone(), bus.clone())), audit, bus)
    }

    #[tokio::test]
    async fn acquire_then_release_returns_to_free() {
        let (lock, _audit, _bus) = lock();
        let before_enabled = lock.status().writer_enabled;
        lock.try_acquire("writer1", Role::Writer).await.unwrap();
        lock.release("writer1").await.unwrap();
        let status = lock.status();
        assert_eq!(status.lock_value, 1);
        assert_eq!(status.writer_enabled, before_enabled);
    }

    #[tokio::test]
    async fn second_acquire_is_rejected_with_holder() {
        let (lock, _audit, _bus) = lock();
        lock.try_acquire("writer1", Role::Writer).await.unwrap();
        let err = lock.try_acquire("writer2", Role::Writer).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SemaphoreUnavailable);
        assert!(err.message.contains("writer1"));
    }

    #[tokio::test]
    async fn release_by_non_holder_is_rejected_and_state_unchanged() {
        let (lock, _audit, _bus) = lock();
        lock.try_acquire("writer1", Role::Writer).await.unwrap();
        let err = lock.release("writer2").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SemaphoreNotHeld);
        assert_eq!(lock.current_owner().as_deref(), Some("writer1"));
    }

    #[tokio::test]
    async fn reader_cannot_acquire_a_free_lock() {
        let (lock, _audit, _bus) = lock();
        let err = lock.try_acquire("reader1", Role::Reader).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Forbidden);
    }

    /// The `Held{v}` row of the FSM table has no role guard — a reader
    /// hitting an already-held lock must see the same `semaphore-unavailable`
    /// a contending writer would, not `forbidden`.
    #[tokio::test]
    async fn reader_hitting_a_held_lock_sees_contention_not_forbidden() {
        let (lock, _audit, _bus) = lock();
        lock.try_acquire("writer1", Role::Writer).await.unwrap();
        let err = lock.try_acquire("reader1", Role::Reader).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SemaphoreUnavailable);
        assert!(err.message.contains("writer1"));
    }

    #[tokio::test]
    async fn disabling_forces_release_and_blocks_new_acquires() {
        let (lock, _audit, _bus) = lock();
        lock.try_acquire("writer1", Role::Writer).await.unwrap();
        let snapshot = lock.admin_set_enabled("admin1", false).await.unwrap();
        assert_eq!(snapshot.lock_value, 1);
        assert!(!snapshot.writer_enabled);
        let err = lock.try_acquire("writer2", Role::Writer).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::WriterDisabled);
    }

    #[tokio::test]
    async fn client_vanished_only_releases_matching_owner() {
        let (lock, _audit, _bus) = lock();
        lock.try_acquire("writer1", Role::Writer).await.unwrap();
        assert!(!lock.client_vanished("writer2").await);
        assert!(lock.client_vanished("writer1").await);
        assert_eq!(lock.status().lock_value, 1);
    }
}
