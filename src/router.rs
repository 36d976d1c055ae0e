//! Command Router (spec.md §4.7): the single entry point every transport
//! calls through. Binds identity, sessions, the writer lock, messages, the
//! audit log and the event bus together, dispatches the twelve named
//! commands, and renders the `{ok,data}` / `{ok:false,error}` envelope.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::audit::{AuditAction, AuditLog};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::event_bus::EventBus;
use crate::identity::{IdentityRegistry, Role};
use crate::messages::MessageService;
use crate::presence::PresenceTracker;
use crate::session::SessionAuthority;
use crate::writer_lock::WriterLock;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after: Option<u64>,
}

impl From<CoreError> for ErrorBody {
    fn from(e: CoreError) -> Self {
        Self { kind: e.kind, message: e.message, retry_after: e.retry_after }
    }
}

/// Uniform response wrapper: `{"ok":true,"data":...}` or
/// `{"ok":false,"error":{...}}` (spec.md §5).
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Ok { ok: bool, data: Value },
    Err { ok: bool, error: ErrorBody },
}

fn ok(data: impl Serialize) -> Envelope {
    Envelope::Ok { ok: true, data: serde_json::to_value(data).unwrap_or(Value::Null) }
}

fn err(e: CoreError) -> Envelope {
    Envelope::Err { ok: false, error: e.into() }
}

/// An authenticated caller's identity, as resolved from a bearer token by
/// the transport layer before a command reaches the router.
#[derive(Debug, Clone)]
pub struct Caller {
    pub username: String,
    pub role: Role,
}

pub struct Router {
    identity: Arc<IdentityRegistry>,
    sessions: Arc<SessionAuthority>,
    lock: Arc<WriterLock>,
    messages: Arc<MessageService>,
    audit: Arc<AuditLog>,
    bus: Arc<EventBus>,
    presence: Arc<PresenceTracker>,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<IdentityRegistry>,
        sessions: Arc<SessionAuthority>,
        lock: Arc<WriterLock>,
        messages: Arc<MessageService>,
        audit: Arc<AuditLog>,
        bus: Arc<EventBus>,
        presence: Arc<PresenceTracker>,
    ) -> Self {
        Self { identity, sessions, lock, messages, audit, bus, presence }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn lock(&self) -> &Arc<WriterLock> {
        &self.lock
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    /// Resolve a bearer token into a `Caller`, the transport's sole
    /// authentication seam.
    pub fn authenticate(&self, token: &str) -> CoreResult<Caller> {
        let (username, role) = self.sessions.resolve(token)?;
        Ok(Caller { username, role })
    }

    /// `role` defaults to `reader` when the caller omits it (spec.md §6.1).
    /// Response payload is `{username, role, token}`, same shape as `login` —
    /// registering immediately authenticates the caller.
    pub async fn register(&self, username: &str, password: &str, role: Option<Role>) -> Envelope {
        match self.identity.register(username, password, role.unwrap_or_default()) {
            Ok(summary) => {
                let token = match self.sessions.issue(&summary) {
                    Ok(t) => t,
                    Err(e) => return err(e),
                };
                self.presence.on_request(username);
                let lock_value = self.lock.status().lock_value;
                self.audit.append(AuditAction::Register, Some(username.to_string()), "ok".into(), lock_value).await;
                info!(username, "principal registered");
                ok(serde_json::json!({ "username": summary.username, "role": summary.role, "token": token }))
            }
            Err(e) => err(e),
        }
    }

    /// Response payload is `{username, role, token}` (spec.md §6.1).
    pub async fn login(&self, username: &str, password: &str) -> Envelope {
        match self.identity.authenticate(username, password) {
            Ok(summary) => {
                self.presence.on_request(username);
                let token = match self.sessions.issue(&summary) {
                    Ok(t) => t,
                    Err(e) => return err(e),
                };
                let lock_value = self.lock.status().lock_value;
                self.audit.append(AuditAction::Login, Some(username.to_string()), "ok".into(), lock_value).await;
                info!(username, "login succeeded");
                ok(serde_json::json!({ "username": summary.username, "role": summary.role, "token": token }))
            }
            Err(e) => {
                let action = if e.kind == ErrorKind::AccountLocked { AuditAction::Lockout } else { AuditAction::LoginFailed };
                let lock_value = self.lock.status().lock_value;
                self.audit.append(action, Some(username.to_string()), e.message.clone(), lock_value).await;
                warn!(username, kind = ?e.kind, "login failed");
                err(e)
            }
        }
    }

    pub async fn logout(&self, caller: &Caller) -> Envelope {
        self.lock.client_vanished(&caller.username).await;
        self.presence.on_logout(&caller.username);
        ok(Value::Null)
    }

    pub async fn list_messages(&self, caller: &Caller, page: u64, limit: u64) -> Envelope {
        self.presence.on_request(&caller.username);
        match self.messages.list(page, limit).await {
            Ok(page) => ok(page),
            Err(e) => err(e),
        }
    }

    pub async fn create_message(&self, caller: &Caller, body: &str) -> Envelope {
        self.presence.on_request(&caller.username);
        match self.messages.create(&caller.username, body).await {
            Ok(message) => ok(message),
            Err(e) => err(e),
        }
    }

    pub async fn update_message(&self, caller: &Caller, id: u64, body: &str) -> Envelope {
        self.presence.on_request(&caller.username);
        match self.messages.update(&caller.username, id, body).await {
            Ok(message) => ok(message),
            Err(e) => err(e),
        }
    }

    pub async fn delete_message(&self, caller: &Caller, id: u64) -> Envelope {
        self.presence.on_request(&caller.username);
        match self.messages.delete(&caller.username, id).await {
            Ok(()) => ok(Value::Null),
            Err(e) => err(e),
        }
    }

    /// Response payload is `{owner, acquired_at}` (spec.md §6.1), not the
    /// full lock snapshot — `snapshot.ts` is the moment of acquisition and
    /// `snapshot.holder` is always `Some` on the success path.
    pub async fn acquire_writer(&self, caller: &Caller) -> Envelope {
        self.presence.on_request(&caller.username);
        match self.lock.try_acquire(&caller.username, caller.role).await {
            Ok(snapshot) => ok(serde_json::json!({ "owner": snapshot.holder, "acquired_at": snapshot.ts })),
            Err(e) => err(e),
        }
    }

    pub async fn release_writer(&self, caller: &Caller) -> Envelope {
        self.presence.on_request(&caller.username);
        match self.lock.release(&caller.username).await {
            Ok(()) => ok(Value::Null),
            Err(e) => err(e),
        }
    }

    pub async fn get_status(&self, caller: &Caller) -> Envelope {
        self.presence.on_request(&caller.username);
        ok(self.lock.status())
    }

    pub async fn list_audit(&self, caller: &Caller, page: u64, limit: u64) -> Envelope {
        self.presence.on_request(&caller.username);
        if caller.role != Role::Admin {
            return err(CoreError::forbidden("only admins may read the audit log"));
        }
        match self.audit.list(page, limit).await {
            Ok((items, total)) => {
                let has_more = (page.saturating_sub(1)).saturating_mul(limit) + items.len() as u64 < total;
                ok(serde_json::json!({
                    "items": items,
                    "page": page,
                    "limit": limit,
                    "total": total,
                    "has_more": has_more,
                }))
            }
            Err(e) => err(e),
        }
    }

    /// Response payload is `{writer_enabled}` (spec.md §6.1).
    pub async fn set_writer_enabled(&self, caller: &Caller, enabled: bool) -> Envelope {
        self.presence.on_request(&caller.username);
        if caller.role != Role::Admin {
            return err(CoreError::forbidden("only admins may toggle writer availability"));
        }
        match self.lock.admin_set_enabled(&caller.username, enabled).await {
            Ok(snapshot) => ok(serde_json::json!({ "writer_enabled": snapshot.writer_enabled })),
            Err(e) => err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrincipalSummary;
    use crate::password::Pbkdf2Hasher;
    use crate::session::JwtSigner;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn router() -> Router {
        let store: Arc<dyn crate::store::Store> = Arc::new(InMemoryStore::new());
        let audit = Arc::new(AuditLog::new(store.clone(), 1_000));
        let bus = Arc::new(EventBus::new(16));
        let identity = Arc::new(IdentityRegistry::new(Arc::new(Pbkdf2Hasher::new(1_000)), 5, Duration::from_secs(900)));
        let signer: Arc<dyn crate::session::TokenSigner> = Arc::new(JwtSigner::new("test-secret"));
        let sessions = Arc::new(SessionAuthority::new(identity.clone(), signer, Duration::from_secs(3600)));
        let lock = Arc::new(WriterLock::new(audit.clone(), bus.clone()));
        let messages = Arc::new(MessageService::new(store, lock.clone(), audit.clone(), bus.clone()));
        let presence = Arc::new(PresenceTracker::new(Duration::from_secs(30)));
        Router::new(identity, sessions, lock, messages, audit, bus, presence)
    }

    fn caller(username: &str, role: Role) -> Caller {
        Caller { username: username.to_string(), role }
    }

    #[tokio::test]
    async fn register_then_login_round_trip() {
        let router = router();
        assert!(matches!(router.register("alice", "password1", None).await, Envelope::Ok { .. }));
        let login = router.login("alice", "password1").await;
        assert!(matches!(login, Envelope::Ok { .. }));
    }

    #[tokio::test]
    async fn failed_login_is_audited_and_does_not_crash_the_router() {
        let router = router();
        router.register("alice", "password1", None).await;
        let login = router.login("alice", "wrong-password").await;
        assert!(matches!(login, Envelope::Err { .. }));
        let (entries, _total) = router.audit.list(1, 10).await.unwrap();
        assert!(entries.iter().any(|e| e.action == AuditAction::LoginFailed));
    }

    #[tokio::test]
    async fn non_admin_cannot_read_audit_log_or_toggle_writer() {
        let router = router();
        let writer = caller("bob", Role::Writer);
        assert!(matches!(router.list_audit(&writer, 0, 10).await, Envelope::Err { .. }));
        assert!(matches!(router.set_writer_enabled(&writer, false).await, Envelope::Err { .. }));
    }

    #[tokio::test]
    async fn acquire_create_release_flow_end_to_end() {
        let router = router();
        let writer = caller("alice", Role::Writer);
        assert!(matches!(router.acquire_writer(&writer).await, Envelope::Ok { .. }));
        assert!(matches!(router.create_message(&writer, "hello").await, Envelope::Ok { .. }));
        assert!(matches!(router.release_writer(&writer).await, Envelope::Ok { .. }));

        let _ = PrincipalSummary { username: writer.username.clone(), role: writer.role };
    }
}
