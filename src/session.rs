//! Session Authority (spec.md §4.2): issues and validates bearer tokens and
//! resolves a token to `(principal, role)`.

use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::identity::{IdentityRegistry, PrincipalSummary, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub role: Role,
    pub issued_at: u64,
    pub expires_at: u64,
    pub token_id: String,
}

pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &Claims) -> CoreResult<String>;
    fn verify(&self, token: &str) -> CoreResult<Claims>;
}

/// Self-issued, stateless HS256 tokens. Unlike the teacher's `AuthEngine`
/// (which verifies a third party's RS256-signed JWKS tokens), this service
/// signs its own — same crate, signer instead of pure verifier.
pub struct JwtSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSigner {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        // Claim-level expiry is checked explicitly by `SessionAuthority`
        // against the registry's current view of the account, so we
        // disable jsonwebtoken's built-in exp validation to keep that
        // single source of truth.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenSigner for JwtSigner {
    fn sign(&self, claims: &Claims) -> CoreResult<String> {
        encode(&Header::new(jsonwebtoken::Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| CoreError::internal(format!("token signing failed: {e}")))
    }

    fn verify(&self, token: &str) -> CoreResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| CoreError::token_invalid(format!("malformed or forged token: {e}")))
    }
}

pub struct SessionAuthority {
    registry: std::sync::Arc<IdentityRegistry>,
    signer: std::sync::Arc<dyn TokenSigner>,
    ttl: Duration,
}

impl SessionAuthority {
    pub fn new(registry: std::sync::Arc<IdentityRegistry>, signer: std::sync::Arc<dyn TokenSigner>, ttl: Duration) -> Self {
        Self { registry, signer, ttl }
    }

    pub fn issue(&self, summary: &PrincipalSummary) -> CoreResult<String> {
        let now = now_secs();
        let claims = Claims {
            username: summary.username.clone(),
            role: summary.role,
            issued_at: now,
            expires_at: now + self.ttl.as_secs(),
            token_id: Uuid::new_v4().to_string(),
        };
        self.signer.sign(&claims)
    }

    /// Resolve a bearer token to `(username, role)`, applying §4.2's extra
    /// checks beyond signature validity: not expired, username still
    /// resolves, and the role embedded in the token still matches the
    /// account's current role.
    pub fn resolve(&self, token: &str) -> CoreResult<(String, Role)> {
        let claims = self.signer.verify(token)?;

        if now_secs() >= claims.expires_at {
            return Err(CoreError::token_expired());
        }

        let current_role = self
            .registry
            .current_role(&claims.username)
            .ok_or_else(|| CoreError::new(crate::error::ErrorKind::TokenInvalid, "user-unknown"))?;

        if current_role != claims.role {
            return Err(CoreError::role_mismatch());
        }

        Ok((claims.username, claims.role))
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::password::Pbkdf2Hasher;
    use std::sync::Arc;

    fn setup() -> (Arc<IdentityRegistry>, SessionAuthority) {
        let registry = Arc::new(IdentityRegistry::new(
            Arc::new(Pbkdf2Hasher::new(1_000)),
            5,
            Duration::from_secs(900),
        ));
        let signer: Arc<dyn TokenSigner> = Arc::new(JwtSigner::new("test-secret"));
        let authority = SessionAuthority::new(registry.clone(), signer, Duration::from_secs(3600));
        (registry, authority)
    }

    #[test]
    fn issued_token_resolves_to_same_principal() {
        let (registry, authority) = setup();
        let summary = registry.register("alice", "password1", Role::Writer).unwrap();
        let token = authority.issue(&summary).unwrap();
        let (username, role) = authority.resolve(&token).unwrap();
        assert_eq!(username, "alice");
        assert_eq!(role, Role::Writer);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let (_registry, authority) = setup();
        let mut token = authority
            .issue(&PrincipalSummary { username: "alice".into(), role: Role::Writer })
            .unwrap();
        token.push('x');
        assert_eq!(authority.resolve(&token).unwrap_err().kind, crate::error::ErrorKind::TokenInvalid);
    }

    #[test]
    fn expired_token_is_rejected() {
        let (registry, _authority) = setup();
        let summary = registry.register("alice", "password1", Role::Reader).unwrap();
        let signer: Arc<dyn TokenSigner> = Arc::new(JwtSigner::new("test-secret"));
        let short_lived = SessionAuthority::new(registry, signer, Duration::from_secs(0));
        let token = short_lived.issue(&summary).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(short_lived.resolve(&token).unwrap_err().kind, crate::error::ErrorKind::TokenExpired);
    }

    #[test]
    fn role_mismatch_detected_after_external_role_change() {
        // Simulates a token minted while the account was a writer, then the
        // account record changing role out from under it.
        let (registry, authority) = setup();
        let summary = registry.register("alice", "password1", Role::Writer).unwrap();
        let token = authority.issue(&summary).unwrap();
        registry.register("bob", "password1", Role::Reader).unwrap(); // unrelated, keeps registry non-trivial
        // There's no role-mutation API in §4.1, so we assert the check is in
        // place by constructing a token whose embedded role diverges from a
        // freshly looked-up principal instead.
        let stale_claims = Claims {
            username: "alice".into(),
            role: Role::Admin,
            issued_at: 0,
            expires_at: u64::MAX,
            token_id: "x".into(),
        };
        let signer = JwtSigner::new("test-secret");
        let stale_token = signer.sign(&stale_claims).unwrap();
        assert_eq!(authority.resolve(&stale_token).unwrap_err().kind, crate::error::ErrorKind::RoleMismatch);
        let _ = token;
    }
}
