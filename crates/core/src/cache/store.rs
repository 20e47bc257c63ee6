//! Storage contracts for cached responses and queued mutations.
//!
//! The engine only ever talks to these traits. `CacheDb` backs them with
//! SQLite; `MemoryStore` keeps everything in process for tests and
//! throwaway hosts.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::Error;
use crate::model::{CacheEntry, EntryMeta, QueueEntry};

/// Namespaced key/value persistence of request key → stored response.
///
/// Every method is atomic on its own; `put` replaces any previous entry for
/// the same (namespace, key) so a key maps to at most one live entry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the namespace if it does not exist yet.
    async fn open_namespace(&self, name: &str) -> Result<(), Error>;

    /// All namespace names, sorted.
    async fn namespaces(&self) -> Result<Vec<String>, Error>;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, Error>;

    /// Insert or replace an entry, opening its namespace if needed.
    async fn put(&self, entry: &CacheEntry) -> Result<(), Error>;

    /// Returns whether an entry was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error>;

    /// Entry metadata ordered oldest write first.
    async fn entries(&self, namespace: &str) -> Result<Vec<EntryMeta>, Error>;

    /// Drop a namespace and everything in it. Returns whether it existed.
    async fn delete_namespace(&self, name: &str) -> Result<bool, Error>;
}

/// Durable FIFO of failed mutating requests, partitioned by tag.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append an entry; returns its assigned id. Ids increase with enqueue order.
    async fn push(&self, entry: &QueueEntry) -> Result<i64, Error>;

    /// Entries for `tag` in enqueue order.
    async fn list(&self, tag: &str) -> Result<Vec<QueueEntry>, Error>;

    /// Distinct tags with at least one entry, sorted.
    async fn tags(&self) -> Result<Vec<String>, Error>;

    /// Increment the attempt counter; returns the new count.
    async fn record_attempt(&self, id: i64) -> Result<u32, Error>;

    /// Returns whether an entry was removed.
    async fn remove(&self, id: i64) -> Result<bool, Error>;
}

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CorruptEntry(format!("bad timestamp {raw:?}: {e}")))
}
