//! Ambient configuration. Every tunable the spec calls out as "default N" is
//! overridable via environment variable, falling back to the documented
//! default.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the reference HTTP/WebSocket transport binds to.
    pub bind_addr: String,
    /// Secret used to sign/verify session tokens. In a real multi-instance
    /// deployment this must be shared out of band; here it defaults to a
    /// process-local random value (logged once as a warning).
    pub jwt_secret: String,
    /// Session token lifetime (§4.2).
    pub token_ttl: Duration,
    /// Consecutive failed logins before lockout (§4.1).
    pub lockout_threshold: u32,
    /// Lockout duration once triggered (§4.1).
    pub lockout_duration: Duration,
    /// Per-subscriber bounded queue capacity (§4.4).
    pub bus_queue_capacity: usize,
    /// Periodic lock-state reconciliation interval (§4.4).
    pub bus_reconcile_interval: Duration,
    /// Grace window before an absent principal's held lock is force-released
    /// (§4.3.3 / §4.7).
    pub presence_grace: Duration,
    /// Bound on the degraded in-memory audit ring buffer (§4.6 / §7).
    pub audit_ring_capacity: usize,
    /// PBKDF2-HMAC-SHA256 iteration count for password hashing (§4.1).
    pub pbkdf2_iterations: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| {
                use rand::RngCore;
                let mut bytes = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                hex_encode(&bytes)
            }),
            token_ttl: Duration::from_secs(env_or("TOKEN_TTL_SECS", 3600)),
            lockout_threshold: env_or("LOCKOUT_THRESHOLD", 5),
            lockout_duration: Duration::from_secs(env_or("LOCKOUT_DURATION_SECS", 900)),
            bus_queue_capacity: env_or("BUS_QUEUE_CAPACITY", 256),
            bus_reconcile_interval: Duration::from_secs(env_or("BUS_RECONCILE_INTERVAL_SECS", 2)),
            presence_grace: Duration::from_secs(env_or("PRESENCE_GRACE_SECS", 30)),
            audit_ring_capacity: env_or("AUDIT_RING_CAPACITY", 10_000),
            pbkdf2_iterations: env_or("PBKDF2_ITERATIONS", 210_000),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.lockout_threshold, 5);
        assert_eq!(cfg.lockout_duration, Duration::from_secs(900));
        assert_eq!(cfg.bus_queue_capacity, 256);
        assert_eq!(cfg.presence_grace, Duration::from_secs(30));
    }
}
