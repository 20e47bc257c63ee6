//! Mutation Queue: durable capture of failed mutations and ordered replay.
//!
//! Entry lifecycle: `pending → replaying → {delivered (removed), pending, dropped (removed), expired (removed)}`.
//!
//! A drain sweeps expired entries first, then replays the rest in enqueue
//! order, one at a time, each at most once. A transport failure leaves the
//! entry pending and the drain moves on; any response from the server,
//! error statuses included, counts as delivered. Any other failure means
//! the server may already have applied the mutation, or it can never be
//! sent, so the entry is dropped rather than sent again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stowaway_core::{Error, QueueEntry, QueueStore, Request};
use tokio::sync::Mutex;

use crate::fetch::Network;

/// Outcome of one drain of one tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub tag: String,
    pub replayed: usize,
    pub failed: usize,
    /// Removed after a non-transport failure; never retried.
    pub dropped: usize,
    pub expired: usize,
    pub remaining: usize,
}

pub struct MutationQueue {
    store: Arc<dyn QueueStore>,
    network: Arc<dyn Network>,
    retention: Duration,
    // One drain at a time across all tags.
    drain_lock: Mutex<()>,
}

impl MutationQueue {
    pub fn new(store: Arc<dyn QueueStore>, network: Arc<dyn Network>, retention: Duration) -> Self {
        Self { store, network, retention, drain_lock: Mutex::new(()) }
    }

    /// Persist a mutation whose send failed in transit. Returns its id.
    pub async fn enqueue(&self, tag: &str, request: &Request) -> Result<i64, Error> {
        let entry = QueueEntry::new(tag, request.clone(), Utc::now());
        let id = self.store.push(&entry).await?;
        tracing::info!(id, tag, method = %request.method, url = %request.url, "mutation queued");
        Ok(id)
    }

    /// Entries waiting under `tag`, oldest first.
    pub async fn pending(&self, tag: &str) -> Result<Vec<QueueEntry>, Error> {
        self.store.list(tag).await
    }

    pub async fn drain(&self, tag: &str) -> Result<DrainReport, Error> {
        let _guard = self.drain_lock.lock().await;
        self.drain_locked(tag, Utc::now()).await
    }

    /// Drain every tag that has entries.
    pub async fn drain_all(&self) -> Result<Vec<DrainReport>, Error> {
        let _guard = self.drain_lock.lock().await;
        let now = Utc::now();
        let mut reports = Vec::new();
        for tag in self.store.tags().await? {
            reports.push(self.drain_locked(&tag, now).await?);
        }
        Ok(reports)
    }

    fn is_expired(&self, entry: &QueueEntry, now: DateTime<Utc>) -> bool {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        now - entry.enqueued_at > retention
    }

    async fn drain_locked(&self, tag: &str, now: DateTime<Utc>) -> Result<DrainReport, Error> {
        let mut report = DrainReport { tag: tag.to_string(), ..Default::default() };
        let entries = self.store.list(tag).await?;

        let (expired, live): (Vec<QueueEntry>, Vec<QueueEntry>) =
            entries.into_iter().partition(|e| self.is_expired(e, now));

        for entry in expired {
            if self.store.remove(entry.id).await? {
                report.expired += 1;
                tracing::warn!(
                    id = entry.id,
                    tag,
                    url = %entry.request.url,
                    enqueued_at = %entry.enqueued_at,
                    attempts = entry.attempts,
                    "queued mutation expired; dropped without replay"
                );
            }
        }

        for entry in live {
            let attempts = self.store.record_attempt(entry.id).await?;
            match self.network.fetch(&entry.request).await {
                Ok(response) => {
                    self.store.remove(entry.id).await?;
                    report.replayed += 1;
                    if response.is_error() {
                        tracing::warn!(
                            id = entry.id,
                            tag,
                            status = response.status,
                            url = %entry.request.url,
                            "replayed mutation rejected by server; not retried"
                        );
                    } else {
                        tracing::debug!(id = entry.id, tag, status = response.status, "replayed mutation");
                    }
                }
                Err(e) if e.is_transport() => {
                    report.failed += 1;
                    report.remaining += 1;
                    tracing::debug!(id = entry.id, tag, attempts, error = %e, "replay failed; kept for next drain");
                }
                Err(e) => {
                    self.store.remove(entry.id).await?;
                    report.dropped += 1;
                    tracing::warn!(
                        id = entry.id,
                        tag,
                        url = %entry.request.url,
                        error = %e,
                        "replay failed after the request left; dropped"
                    );
                }
            }
        }

        if report.replayed + report.failed + report.dropped + report.expired > 0 {
            tracing::info!(
                tag,
                replayed = report.replayed,
                failed = report.failed,
                dropped = report.dropped,
                expired = report.expired,
                remaining = report.remaining,
                "queue drained"
            );
        }

        Ok(report)
    }
}
