//! Identity Registry (spec.md §4.1): principal records, credential
//! verification, and the lockout counter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::password::PasswordHasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Reader,
    Writer,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
            Role::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

/// One principal's durable record. Never destroyed once created (spec.md §3.1).
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    pub password_hash: Vec<u8>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalSummary {
    pub username: String,
    pub role: Role,
}

impl From<&Principal> for PrincipalSummary {
    fn from(p: &Principal) -> Self {
        Self { username: p.username.clone(), role: p.role }
    }
}

fn validate_username(username: &str) -> CoreResult<()> {
    let len = username.chars().count();
    if !(3..=50).contains(&len) {
        return Err(CoreError::invalid_input("username must be 3-50 characters"));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(CoreError::invalid_input(
            "username may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> CoreResult<()> {
    let len = password.chars().count();
    if !(6..=128).contains(&len) {
        return Err(CoreError::invalid_input("password must be 6-128 characters"));
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(CoreError::new(
            crate::error::ErrorKind::InvalidInput,
            "password must contain at least one letter and one digit",
        ));
    }
    Ok(())
}

pub struct IdentityRegistry {
    principals: Mutex<HashMap<String, Principal>>,
    hasher: Arc<dyn PasswordHasher>,
    /// A hash of an unguessable, never-registered password. Used to run a
    /// constant-time dummy verification when an account is locked, so
    /// response timing does not leak username existence or lock state.
    dummy_hash: Vec<u8>,
    lockout_threshold: u32,
    lockout_duration: ChronoDuration,
}

impl IdentityRegistry {
    pub fn new(hasher: Arc<dyn PasswordHasher>, lockout_threshold: u32, lockout_duration: std::time::Duration) -> Self {
        let dummy_hash = hasher.hash("__dummy-credential-check__");
        Self {
            principals: Mutex::new(HashMap::new()),
            hasher,
            dummy_hash,
            lockout_threshold,
            lockout_duration: ChronoDuration::from_std(lockout_duration)
                .unwrap_or_else(|_| ChronoDuration::seconds(900)),
        }
    }

    pub fn register(&self, username: &str, password: &str, role: Role) -> CoreResult<PrincipalSummary> {
        validate_username(username)?;
        validate_password(password)?;

        let mut principals = self.principals.lock().unwrap();
        if principals.contains_key(username) {
            return Err(CoreError::new(
                crate::error::ErrorKind::InvalidInput,
                "username-taken",
            ));
        }

        let principal = Principal {
            username: username.to_string(),
            password_hash: self.hasher.hash(password),
            role,
            created_at: Utc::now(),
            last_login_at: None,
            failed_attempts: 0,
            locked_until: None,
        };
        let summary = PrincipalSummary::from(&principal);
        principals.insert(username.to_string(), principal);
        info!(username, %role, "principal registered");
        Ok(summary)
    }

    /// Authenticate a principal. Runs a constant-time dummy check while
    /// locked out so timing does not reveal whether the username exists or
    /// is currently locked.
    pub fn authenticate(&self, username: &str, password: &str) -> CoreResult<PrincipalSummary> {
        let mut principals = self.principals.lock().unwrap();
        let now = Utc::now();

        let Some(principal) = principals.get_mut(username) else {
            // Unknown username: still pay the hashing cost so existence
            // cannot be inferred from response latency.
            let _ = self.hasher.verify(password, &self.dummy_hash);
            return Err(CoreError::invalid_credentials());
        };

        if let Some(locked_until) = principal.locked_until {
            if now < locked_until {
                let _ = self.hasher.verify(password, &self.dummy_hash);
                let retry_after = (locked_until - now).num_seconds().max(0) as u64;
                return Err(CoreError::account_locked(retry_after));
            }
        }

        if !self.hasher.verify(password, &principal.password_hash) {
            principal.failed_attempts += 1;
            if principal.failed_attempts >= self.lockout_threshold {
                principal.locked_until = Some(now + self.lockout_duration);
                principal.failed_attempts = 0;
                warn!(username, "account locked out after repeated failures");
            }
            return Err(CoreError::invalid_credentials());
        }

        principal.failed_attempts = 0;
        principal.locked_until = None;
        principal.last_login_at = Some(now);
        let summary = PrincipalSummary::from(&*principal);
        info!(username, "authenticated");
        Ok(summary)
    }

    pub fn lookup(&self, username: &str) -> CoreResult<PrincipalSummary> {
        let principals = self.principals.lock().unwrap();
        principals
            .get(username)
            .map(PrincipalSummary::from)
            .ok_or_else(|| CoreError::not_found(format!("no such user: {username}")))
    }

    /// True if `username` is currently locked out (used by the router to
    /// decide whether a `LOCKOUT` audit entry is new this call).
    pub fn is_locked(&self, username: &str) -> bool {
        let principals = self.principals.lock().unwrap();
        principals
            .get(username)
            .and_then(|p| p.locked_until)
            .map(|until| Utc::now() < until)
            .unwrap_or(false)
    }

    pub fn current_role(&self, username: &str) -> Option<Role> {
        let principals = self.principals.lock().unwrap();
        principals.get(username).map(|p| p.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::Pbkdf2Hasher;

    fn registry() -> IdentityRegistry {
        IdentityRegistry::new(Arc::new(Pbkdf2Hasher::new(1_000)), 5, std::time::Duration::from_secs(900))
    }

    #[test]
    fn register_then_authenticate_succeeds() {
        let reg = registry();
        reg.register("alice", "password1", Role::Reader).unwrap();
        let summary = reg.authenticate("alice", "password1").unwrap();
        assert_eq!(summary.username, "alice");
        assert_eq!(summary.role, Role::Reader);
    }

    #[test]
    fn register_rejects_duplicate_username() {
        let reg = registry();
        reg.register("alice", "password1", Role::Reader).unwrap();
        let err = reg.register("alice", "password2", Role::Reader).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn register_rejects_short_username() {
        let reg = registry();
        let err = reg.register("ab", "password1", Role::Reader).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn register_rejects_weak_password() {
        let reg = registry();
        let err = reg.register("alice", "allletters", Role::Reader).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn lockout_after_five_failures() {
        let reg = registry();
        reg.register("alice", "password1", Role::Reader).unwrap();
        for _ in 0..5 {
            let _ = reg.authenticate("alice", "wrong-password");
        }
        let err = reg.authenticate("alice", "password1").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AccountLocked);
        assert!(err.retry_after.unwrap() > 0);
    }

    #[test]
    fn unknown_username_is_invalid_credentials_not_not_found() {
        let reg = registry();
        let err = reg.authenticate("ghost", "whatever1").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidCredentials);
    }
}
