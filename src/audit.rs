//! Audit Log (spec.md §4.6): an append-only record of every mutation and
//! authentication attempt.
//!
//! Modeled on the teacher's `AuditLogger` (single serialized append path,
//! failures logged but never propagated to the caller) minus its SHA-256
//! chaining — spec.md's Audit Entry has no hash field and makes no
//! tamper-evidence claim, so that part of the teacher's design is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{validate_pagination, CoreResult};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Read,
    Acquire,
    Release,
    AdminToggle,
    AdminForceRelease,
    Login,
    LoginFailed,
    Register,
    Lockout,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub action: AuditAction,
    pub principal: Option<String>,
    pub content: String,
    /// The writer lock's `lock_value` at the moment this entry was recorded
    /// (spec.md §3.1); `1` for entries unrelated to the lock.
    pub lock_value: u8,
}

/// Append-only audit log. Durable appends go through `Store`; if the store
/// fails, the entry still lands in an in-memory ring buffer so a caller
/// never loses visibility into what just happened, and the log keeps
/// accepting new entries rather than blocking the operation it's auditing.
pub struct AuditLog {
    store: Arc<dyn Store>,
    next_id: AtomicU64,
    degraded: Mutex<VecDeque<AuditEntry>>,
    ring_capacity: usize,
}

impl AuditLog {
    pub fn new(store: Arc<dyn Store>, ring_capacity: usize) -> Self {
        Self { store, next_id: AtomicU64::new(1), degraded: Mutex::new(VecDeque::new()), ring_capacity }
    }

    /// Record one entry. Infallible from the caller's perspective — a store
    /// failure degrades to the in-memory ring buffer with a `warn!`, it
    /// never unwinds the operation being audited.
    pub async fn append(&self, action: AuditAction, principal: Option<String>, content: String, lock_value: u8) -> AuditEntry {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = AuditEntry { id, ts: Utc::now(), action, principal, content, lock_value };

        if let Err(e) = self.store.append_audit(&entry).await {
            warn!(id, ?action, "audit store append failed, degrading to in-memory ring: {e}");
            let mut degraded = self.degraded.lock().unwrap();
            if degraded.len() >= self.ring_capacity {
                degraded.pop_front();
            }
            degraded.push_back(entry.clone());
        }

        entry
    }

    /// Read back a page of entries, oldest-first (forward pagination by
    /// time, spec.md §1). `page` is 1-based; prefers the durable store,
    /// falling back to the degraded ring only when the store itself is
    /// unreachable, since an entry recorded there was never written to the
    /// store in the first place.
    pub async fn list(&self, page: u64, limit: u64) -> CoreResult<(Vec<AuditEntry>, u64)> {
        validate_pagination(page, limit)?;
        let offset = page.saturating_sub(1).saturating_mul(limit);
        match self.store.list_audit(offset, limit).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("audit store read failed, serving degraded ring: {e}");
                let degraded = self.degraded.lock().unwrap();
                let all: Vec<AuditEntry> = degraded.iter().cloned().collect();
                let total = all.len() as u64;
                let start = offset as usize;
                let page_items = if start >= all.len() {
                    Vec::new()
                } else {
                    let end = (start + limit as usize).min(all.len());
                    all[start..end].to_vec()
                };
                Ok((page_items, total))
            }
        }
    }
}
