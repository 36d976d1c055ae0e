//! PBKDF2-HMAC-SHA256 `PasswordHasher` (spec.md §4.1, §9).
//!
//! Stored hash layout is `salt(16) || derived_key(32)`. Verification uses a
//! constant-time comparison so a mismatched hash never short-circuits early.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Vec<u8>;
    fn verify(&self, password: &str, hash: &[u8]) -> bool;
}

pub struct Pbkdf2Hasher {
    iterations: u32,
}

impl Pbkdf2Hasher {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    fn derive(&self, password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, self.iterations, &mut key);
        key
    }
}

impl PasswordHasher for Pbkdf2Hasher {
    fn hash(&self, password: &str) -> Vec<u8> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut key = self.derive(password, &salt);
        let mut out = Vec::with_capacity(SALT_LEN + KEY_LEN);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&key);
        key.zeroize();
        out
    }

    fn verify(&self, password: &str, hash: &[u8]) -> bool {
        if hash.len() != SALT_LEN + KEY_LEN {
            return false;
        }
        let (salt, expected) = hash.split_at(SALT_LEN);
        let mut actual = self.derive(password, salt);
        let matches = actual.ct_eq(expected).into();
        actual.zeroize();
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Pbkdf2Hasher {
        // Keep iteration count low in tests so the suite stays fast; the
        // production default lives in `config::Config`.
        Pbkdf2Hasher::new(1_000)
    }

    #[test]
    fn verify_accepts_correct_password() {
        let h = hasher();
        let stored = h.hash("correct horse battery staple");
        assert!(h.verify("correct horse battery staple", &stored));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let h = hasher();
        let stored = h.hash("correct horse battery staple");
        assert!(!h.verify("wrong password", &stored));
    }

    #[test]
    fn hashes_are_salted() {
        let h = hasher();
        let a = h.hash("same password");
        let b = h.hash("same password");
        assert_ne!(a, b, "two hashes of the same password must differ (random salt)");
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        let h = hasher();
        assert!(!h.verify("anything", &[1, 2, 3]));
    }

    #[test]
    fn higher_iteration_count_takes_longer() {
        let cheap = Pbkdf2Hasher::new(1_000);
        let expensive = Pbkdf2Hasher::new(100_000);
        let start = std::time::Instant::now();
        let _ = cheap.hash("password");
        let cheap_elapsed = start.elapsed();

        let start = std::time::Instant::now();
        let _ = expensive.hash("password");
        let expensive_elapsed = start.elapsed();

        assert!(
            expensive_elapsed > cheap_elapsed,
            "100x the iterations should take meaningfully longer"
        );
    }
}
