//! SQLite-backed `CacheStore`.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_rusqlite::{params, rusqlite};
use url::Url;

use super::connection::CacheDb;
use super::store::{CacheStore, format_ts, parse_ts};
use crate::Error;
use crate::model::{CacheEntry, EntryMeta, Response};

/// Raw column values of one `cache_entries` row.
type EntryRow = (String, i64, String, Vec<u8>, String, String);

fn decode_entry(namespace: String, key: String, row: EntryRow) -> Result<CacheEntry, Error> {
    let (url, status, headers_json, body, response_url, stored_at) = row;
    let url = Url::parse(&url).map_err(|e| Error::CorruptEntry(format!("bad url {url:?}: {e}")))?;
    let response_url =
        Url::parse(&response_url).map_err(|e| Error::CorruptEntry(format!("bad url {response_url:?}: {e}")))?;
    let status = u16::try_from(status).map_err(|_| Error::CorruptEntry(format!("bad status {status}")))?;

    Ok(CacheEntry {
        namespace,
        key,
        url,
        response: Response {
            status,
            headers: serde_json::from_str(&headers_json)?,
            body: Bytes::from(body),
            url: response_url,
        },
        stored_at: parse_ts(&stored_at)?,
    })
}

#[async_trait]
impl CacheStore for CacheDb {
    async fn open_namespace(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        let now = format_ts(&chrono::Utc::now());
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO namespaces (name, created_at) VALUES (?1, ?2)",
                    params![name, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn namespaces(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM namespaces ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT url, status, headers_json, body, response_url, stored_at
                     FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![namespace, key], |row| -> rusqlite::Result<EntryRow> {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                });

                match result {
                    Ok(row) => decode_entry(namespace, key, row).map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), Error> {
        let namespace = entry.namespace.clone();
        let key = entry.key.clone();
        let url = entry.url.to_string();
        let status = i64::from(entry.response.status);
        let headers_json = serde_json::to_string(&entry.response.headers)?;
        let body = entry.response.body.to_vec();
        let response_url = entry.response.url.to_string();
        let stored_at = format_ts(&entry.stored_at);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO namespaces (name, created_at) VALUES (?1, ?2)",
                    params![namespace, stored_at],
                )?;
                tx.execute(
                    "INSERT INTO cache_entries (
                        namespace, key, url, status, headers_json, body, response_url, stored_at, seq
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                              (SELECT COALESCE(MAX(seq), 0) + 1 FROM cache_entries))
                    ON CONFLICT(namespace, key) DO UPDATE SET
                        url = excluded.url,
                        status = excluded.status,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        response_url = excluded.response_url,
                        stored_at = excluded.stored_at,
                        seq = excluded.seq",
                    params![namespace, key, url, status, headers_json, body, response_url, stored_at],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn entries(&self, namespace: &str) -> Result<Vec<EntryMeta>, Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<EntryMeta>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key, url, stored_at, seq FROM cache_entries
                     WHERE namespace = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(params![namespace], |row| {
                        Ok((row.get::<_, String>(0)?, row.get(1)?, row.get::<_, String>(2)?, row.get(3)?))
                    })?
                    .collect::<Result<Vec<(String, String, String, i64)>, _>>()?;

                rows.into_iter()
                    .map(|(key, url, stored_at, seq)| {
                        Ok(EntryMeta { key, url, stored_at: parse_ts(&stored_at)?, seq })
                    })
                    .collect()
            })
            .await
            .map_err(Error::from)
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM cache_entries WHERE namespace = ?1", params![name])?;
                let count = tx.execute("DELETE FROM namespaces WHERE name = ?1", params![name])?;
                tx.commit()?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::compute_request_key;
    use chrono::{Duration, Utc};

    fn make_entry(namespace: &str, url: &str) -> CacheEntry {
        let url = Url::parse(url).unwrap();
        CacheEntry {
            namespace: namespace.to_string(),
            key: compute_request_key("GET", url.as_str(), &[]),
            url: url.clone(),
            response: Response::new(200, url, "hello").with_header("content-type", "text/plain"),
            stored_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("v1-pages", "https://app.test/");

        db.put(&entry).await.unwrap();

        let got = db.get("v1-pages", &entry.key).await.unwrap().unwrap();
        assert_eq!(got.response.body, Bytes::from("hello"));
        assert_eq!(got.response.header("Content-Type"), Some("text/plain"));
        assert_eq!(got.stored_at.timestamp_micros(), entry.stored_at.timestamp_micros());
        assert_eq!(db.namespaces().await.unwrap(), vec!["v1-pages".to_string()]);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get("v1-pages", "nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_and_bumps_sequence() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let a = make_entry("v1-images", "https://app.test/a.png");
        let b = make_entry("v1-images", "https://app.test/b.png");
        db.put(&a).await.unwrap();
        db.put(&b).await.unwrap();

        let mut a2 = a.clone();
        a2.response.body = Bytes::from("newer");
        db.put(&a2).await.unwrap();

        let metas = db.entries("v1-images").await.unwrap();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].key, b.key);
        assert_eq!(metas[1].key, a.key);
        assert_eq!(db.get("v1-images", &a.key).await.unwrap().unwrap().response.body, Bytes::from("newer"));
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("v1-images", "https://app.test/a.png");
        db.put(&entry).await.unwrap();

        assert!(db.get("v2-images", &entry.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_namespace() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put(&make_entry("v1-images", "https://app.test/a.png")).await.unwrap();
        db.open_namespace("v2-images").await.unwrap();

        assert!(db.delete_namespace("v1-images").await.unwrap());
        assert!(!db.delete_namespace("v1-images").await.unwrap());
        assert_eq!(db.namespaces().await.unwrap(), vec!["v2-images".to_string()]);
        assert!(db.entries("v1-images").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let mut entry = make_entry("v1-api", "https://api.test/stories");
        entry.stored_at = Utc::now() - Duration::hours(1);
        db.put(&entry).await.unwrap();

        assert!(db.delete("v1-api", &entry.key).await.unwrap());
        assert!(!db.delete("v1-api", &entry.key).await.unwrap());
    }
}
