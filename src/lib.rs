//! # writer-lock-chat
//!
//! A small multi-user chat service whose distinguishing feature is a single
//! writer lock: at any instant at most one authenticated principal may
//! mutate the shared message log, while any number of principals may read it
//! concurrently.
//!
//! This crate is split into a transport-agnostic core (identity, sessions,
//! the writer lock, the event bus, messages, the audit log, the command
//! router) and a thin reference transport built on `axum`. Every core module
//! can be exercised in isolation against in-memory fakes — see `tests/`.

pub mod audit;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod identity;
pub mod messages;
pub mod password;
pub mod presence;
pub mod router;
pub mod session;
pub mod store;
pub mod transport;
pub mod writer_lock;

pub use config::Config;
pub use error::{CoreError, CoreResult, ErrorKind};
