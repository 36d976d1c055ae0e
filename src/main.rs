use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use writer_lock_chat::audit::AuditLog;
use writer_lock_chat::event_bus::EventBus;
use writer_lock_chat::identity::IdentityRegistry;
use writer_lock_chat::messages::MessageService;
use writer_lock_chat::password::Pbkdf2Hasher;
use writer_lock_chat::presence::PresenceTracker;
use writer_lock_chat::router::Router;
use writer_lock_chat::session::{JwtSigner, SessionAuthority};
use writer_lock_chat::store::{InMemoryStore, Store};
use writer_lock_chat::transport;
use writer_lock_chat::writer_lock::WriterLock;
use writer_lock_chat::Config;

/// Periodically re-publishes the current lock state so a subscriber that
/// missed a transition (due to a reconnect or a dropped-oldest overflow)
/// converges on the truth within one interval, without the Event Bus
/// needing a reference back to the Writer Lock (spec.md §4.4). Only emits
/// when the state actually changed since the last tick (`reconcile_lock_state`).
async fn spawn_lock_reconciler(lock: Arc<WriterLock>, bus: Arc<EventBus>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        bus.reconcile_lock_state(lock.status());
    }
}

/// Sweeps presence state and force-releases the writer lock for any
/// principal that just transitioned to `Absent` (spec.md §4.3.3, §4.7).
async fn spawn_presence_sweeper(presence: Arc<PresenceTracker>, lock: Arc<WriterLock>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for username in presence.sweep() {
            if lock.client_vanished(&username).await {
                info!(username, "writer lock force-released after presence timeout");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "writer_lock_chat=info".into()),
        )
        .init();

    let config = Config::default();
    if std::env::var("JWT_SECRET").is_err() {
        warn!("JWT_SECRET not set — using a random process-local secret; tokens will not survive a restart");
    }

    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let audit = Arc::new(AuditLog::new(store.clone(), config.audit_ring_capacity));
    let bus = Arc::new(EventBus::new(config.bus_queue_capacity));

    let hasher = Arc::new(Pbkdf2Hasher::new(config.pbkdf2_iterations));
    let identity = Arc::new(IdentityRegistry::new(hasher, config.lockout_threshold, config.lockout_duration));
    let signer = Arc::new(JwtSigner::new(&config.jwt_secret));
    let sessions = Arc::new(SessionAuthority::new(identity.clone(), signer, config.token_ttl));

    let lock = Arc::new(WriterLock::new(audit.clone(), bus.clone()));
    let messages = Arc::new(MessageService::new(store, lock.clone(), audit.clone(), bus.clone()));
    let presence = Arc::new(PresenceTracker::new(config.presence_grace));

    let router = Arc::new(Router::new(identity, sessions, lock.clone(), messages, audit, bus.clone(), presence.clone()));

    tokio::spawn(spawn_lock_reconciler(lock.clone(), bus.clone(), config.bus_reconcile_interval));
    tokio::spawn(spawn_presence_sweeper(presence, lock, config.presence_grace));

    let app = transport::build(router);

    info!(bind_addr = %config.bind_addr, "writer-lock-chat starting");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        return;
    }
    info!("shutdown signal received");
}
