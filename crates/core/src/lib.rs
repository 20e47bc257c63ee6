//! Core types and storage for the stowaway offline cache engine.
//!
//! This crate provides:
//! - Request/response and stored-entry data model
//! - Cache Store and Mutation Queue persistence (SQLite and in-memory)
//! - Expiration Manager
//! - Unified error types
//! - Layered configuration

pub mod cache;
pub mod config;
pub mod error;
pub mod model;

pub use cache::{CacheDb, CacheStore, ExpirationManager, ExpirationPolicy, MemoryStore, QueueStore};
pub use config::{AppConfig, ConfigError, NamespaceConfig, NotificationConfig};
pub use error::Error;
pub use model::{CacheEntry, Destination, EntryMeta, Method, QueueEntry, Request, RequestMode, Response};
