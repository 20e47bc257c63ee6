//! Cache Store and Mutation Queue persistence.
//!
//! This module provides namespaced response storage and a durable
//! mutation queue behind two async traits:
//!
//! - SQLite backend via tokio-rusqlite (WAL mode, versioned migrations)
//! - In-memory backend for tests and ephemeral hosts
//! - Request keys hashed with SHA-256
//! - Opportunistic per-namespace expiration (count and age)

pub mod connection;
pub mod entries;
pub mod expiration;
pub mod hash;
pub mod memory;
pub mod migrations;
pub mod queue;
pub mod store;

pub use crate::Error;

pub use connection::CacheDb;
pub use expiration::{ExpirationManager, ExpirationPolicy, select_victims};
pub use hash::{compute_request_key, request_key};
pub use memory::MemoryStore;
pub use store::{CacheStore, QueueStore};
