//! In-process store implementing both storage contracts.
//!
//! Uses BTreeMaps behind a tokio RwLock; the write lock is held for the
//! whole of each mutation so no caller ever observes a partial update.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::store::{CacheStore, QueueStore};
use crate::Error;
use crate::model::{CacheEntry, EntryMeta, QueueEntry};

#[derive(Default)]
struct Inner {
    namespaces: BTreeMap<String, BTreeMap<String, (CacheEntry, i64)>>,
    seq: i64,
    queue: BTreeMap<i64, QueueEntry>,
    next_id: i64,
}

/// Volatile store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn open_namespace(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        inner.namespaces.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn namespaces(&self) -> Result<Vec<String>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.namespaces.keys().cloned().collect())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .map(|(entry, _)| entry.clone()))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let seq = inner.seq;
        inner
            .namespaces
            .entry(entry.namespace.clone())
            .or_default()
            .insert(entry.key.clone(), (entry.clone(), seq));
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .namespaces
            .get_mut(namespace)
            .is_some_and(|ns| ns.remove(key).is_some()))
    }

    async fn entries(&self, namespace: &str) -> Result<Vec<EntryMeta>, Error> {
        let inner = self.inner.read().await;
        let mut metas: Vec<EntryMeta> = inner
            .namespaces
            .get(namespace)
            .map(|ns| {
                ns.values()
                    .map(|(entry, seq)| EntryMeta {
                        key: entry.key.clone(),
                        url: entry.url.to_string(),
                        stored_at: entry.stored_at,
                        seq: *seq,
                    })
                    .collect()
            })
            .unwrap_or_default();
        metas.sort_by_key(|m| m.seq);
        Ok(metas)
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;
        Ok(inner.namespaces.remove(name).is_some())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push(&self, entry: &QueueEntry) -> Result<i64, Error> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.queue.insert(id, QueueEntry { id, ..entry.clone() });
        Ok(id)
    }

    async fn list(&self, tag: &str) -> Result<Vec<QueueEntry>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.queue.values().filter(|e| e.tag == tag).cloned().collect())
    }

    async fn tags(&self) -> Result<Vec<String>, Error> {
        let inner = self.inner.read().await;
        let mut tags: Vec<String> = inner.queue.values().map(|e| e.tag.clone()).collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn record_attempt(&self, id: i64) -> Result<u32, Error> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .queue
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidInput(format!("no queued mutation with id {id}")))?;
        entry.attempts += 1;
        Ok(entry.attempts)
    }

    async fn remove(&self, id: i64) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;
        Ok(inner.queue.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Method, Request, Response};
    use chrono::Utc;
    use url::Url;

    fn entry(namespace: &str, key: &str) -> CacheEntry {
        let url = Url::parse(&format!("https://app.test/{key}")).unwrap();
        CacheEntry {
            namespace: namespace.into(),
            key: key.into(),
            url: url.clone(),
            response: Response::new(200, url, "body"),
            stored_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_entries_follow_write_order() {
        let store = MemoryStore::new();
        store.put(&entry("ns", "b")).await.unwrap();
        store.put(&entry("ns", "a")).await.unwrap();
        store.put(&entry("ns", "b")).await.unwrap();

        let keys: Vec<String> = store.entries("ns").await.unwrap().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_open_and_delete_namespace() {
        let store = MemoryStore::new();
        store.open_namespace("v1-pages").await.unwrap();
        store.put(&entry("v2-pages", "x")).await.unwrap();

        assert_eq!(store.namespaces().await.unwrap(), vec!["v1-pages", "v2-pages"]);
        assert!(store.delete_namespace("v1-pages").await.unwrap());
        assert_eq!(store.namespaces().await.unwrap(), vec!["v2-pages"]);
    }

    #[tokio::test]
    async fn test_queue_ids_increase() {
        let store = MemoryStore::new();
        let req = Request::get(Url::parse("https://api.test/stories").unwrap()).with_body(Method::Post, "x");
        let a = store.push(&QueueEntry::new("t", req.clone(), Utc::now())).await.unwrap();
        let b = store.push(&QueueEntry::new("t", req, Utc::now())).await.unwrap();
        assert!(b > a);

        let listed = store.list("t").await.unwrap();
        assert_eq!(listed.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(store.record_attempt(a).await.unwrap(), 1);
        assert!(store.remove(a).await.unwrap());
        assert_eq!(store.list("t").await.unwrap().len(), 1);
    }
}
