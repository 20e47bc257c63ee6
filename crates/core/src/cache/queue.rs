//! SQLite-backed `QueueStore`.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_rusqlite::{params, rusqlite};

use super::connection::CacheDb;
use super::store::{QueueStore, format_ts, parse_ts};
use crate::Error;
use crate::model::{QueueEntry, Request};

type QueueRow = (i64, String, String, Option<Vec<u8>>, String, i64);

fn decode_queue_row(row: QueueRow) -> Result<QueueEntry, Error> {
    let (id, tag, request_json, body, enqueued_at, attempts) = row;
    let mut request: Request = serde_json::from_str(&request_json)?;
    request.body = body.map(Bytes::from);
    Ok(QueueEntry {
        id,
        tag,
        request,
        enqueued_at: parse_ts(&enqueued_at)?,
        attempts: u32::try_from(attempts).map_err(|_| Error::CorruptEntry(format!("bad attempts {attempts}")))?,
    })
}

#[async_trait]
impl QueueStore for CacheDb {
    async fn push(&self, entry: &QueueEntry) -> Result<i64, Error> {
        let tag = entry.tag.clone();
        let body = entry.request.body.as_ref().map(|b| b.to_vec());
        let request_json = serde_json::to_string(&Request { body: None, ..entry.request.clone() })?;
        let enqueued_at = format_ts(&entry.enqueued_at);
        let attempts = i64::from(entry.attempts);

        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO mutation_queue (tag, request_json, body, enqueued_at, attempts)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![tag, request_json, body, enqueued_at, attempts],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }

    async fn list(&self, tag: &str) -> Result<Vec<QueueEntry>, Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<QueueEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, tag, request_json, body, enqueued_at, attempts
                     FROM mutation_queue WHERE tag = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(params![tag], |row| -> rusqlite::Result<QueueRow> {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(decode_queue_row).collect()
            })
            .await
            .map_err(Error::from)
    }

    async fn tags(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT DISTINCT tag FROM mutation_queue ORDER BY tag")?;
                let tags = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(tags)
            })
            .await
            .map_err(Error::from)
    }

    async fn record_attempt(&self, id: i64) -> Result<u32, Error> {
        self.conn
            .call(move |conn| -> Result<u32, Error> {
                let updated = conn.execute("UPDATE mutation_queue SET attempts = attempts + 1 WHERE id = ?1", params![id])?;
                if updated == 0 {
                    return Err(Error::InvalidInput(format!("no queued mutation with id {id}")));
                }
                let attempts: i64 =
                    conn.query_row("SELECT attempts FROM mutation_queue WHERE id = ?1", params![id], |row| row.get(0))?;
                u32::try_from(attempts).map_err(|_| Error::CorruptEntry(format!("bad attempts {attempts}")))
            })
            .await
            .map_err(Error::from)
    }

    async fn remove(&self, id: i64) -> Result<bool, Error> {
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM mutation_queue WHERE id = ?1", params![id])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }
}
