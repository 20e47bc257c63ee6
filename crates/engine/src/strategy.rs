//! Strategy Executor: the four read/write orders over the Cache Store.
//!
//! | Strategy                 | Reads            | Writes                    |
//! |--------------------------|------------------|---------------------------|
//! | cache-first              | cache, then net  | on network success        |
//! | network-first            | net, then cache  | on network success        |
//! | stale-while-revalidate   | cache (no wait)  | background refresh        |
//! | network-only             | net              | never                     |
//!
//! Only GET requests ever touch the cache. Storage failures are logged,
//! followed by an eviction attempt, and never surface as request failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stowaway_core::{CacheEntry, CacheStore, Error, ExpirationManager, Method, Request, Response};
use tokio::task::JoinHandle;
use url::Url;

use crate::fetch::Network;
use crate::policy::{CacheNamespace, OfflineFallback, PolicyRule, StrategyKind};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    OfflineFallback,
}

/// Result of running a strategy.
#[derive(Debug)]
pub struct StrategyOutcome {
    pub response: Response,
    pub source: ResponseSource,
    /// Background cache refresh still in flight. The binding layer keeps the
    /// event alive until it completes.
    pub revalidation: Option<JoinHandle<()>>,
}

impl StrategyOutcome {
    fn cache(response: Response) -> Self {
        Self { response, source: ResponseSource::Cache, revalidation: None }
    }

    fn network(response: Response) -> Self {
        Self { response, source: ResponseSource::Network, revalidation: None }
    }
}

/// Runs strategies against a shared store and network.
#[derive(Clone)]
pub struct StrategyExecutor {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    expiration: Arc<ExpirationManager>,
}

impl StrategyExecutor {
    pub fn new(store: Arc<dyn CacheStore>, network: Arc<dyn Network>) -> Self {
        let expiration = Arc::new(ExpirationManager::new(store.clone()));
        Self { store, network, expiration }
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    /// Run `rule`'s strategy for `request`, then the rule's offline fallback
    /// if the strategy produced nothing.
    pub async fn execute(&self, rule: &PolicyRule, request: &Request) -> Result<StrategyOutcome, Error> {
        let result = match (&rule.namespace, rule.strategy) {
            (Some(ns), strategy) if request.method == Method::Get => match strategy {
                StrategyKind::CacheFirst => self.cache_first(ns, request).await,
                StrategyKind::NetworkFirst => self.network_first(ns, request).await,
                StrategyKind::StaleWhileRevalidate => self.stale_while_revalidate(ns, request).await,
                StrategyKind::NetworkOnly => self.network_only(request).await,
            },
            _ => self.network_only(request).await,
        };

        match (result, &rule.offline_fallback) {
            (Err(e), Some(fallback)) if e.is_transport() || matches!(e, Error::CacheMiss(_)) => {
                match self.offline_document(fallback).await {
                    Some(response) => {
                        tracing::info!(url = %request.url, fallback = %fallback.url, "serving offline document");
                        Ok(StrategyOutcome { response, source: ResponseSource::OfflineFallback, revalidation: None })
                    }
                    None => Err(e),
                }
            }
            (result, _) => result,
        }
    }

    /// Cached entry if fresh; otherwise the network, stored on success.
    pub async fn cache_first(&self, ns: &CacheNamespace, request: &Request) -> Result<StrategyOutcome, Error> {
        if let Some(entry) = self.lookup(ns, request).await {
            tracing::debug!(namespace = %ns.name, url = %request.url, "cache hit");
            return Ok(StrategyOutcome::cache(entry.response));
        }

        tracing::debug!(namespace = %ns.name, url = %request.url, "cache miss");
        let response = self.network.fetch(request).await?;
        self.store_response(ns, request, &response).await;
        Ok(StrategyOutcome::network(response))
    }

    /// Network, stored on success; the cache only when no response was obtained.
    ///
    /// With a `network_timeout`, a fresh cached entry is served once the
    /// network has been silent that long, and the late response still
    /// refreshes the cache in the background.
    pub async fn network_first(&self, ns: &CacheNamespace, request: &Request) -> Result<StrategyOutcome, Error> {
        let result = match ns.network_timeout {
            Some(timeout) => match self.race_network(ns, request, timeout).await? {
                Raced::Answered(result) => result,
                Raced::Cached(outcome) => return Ok(outcome),
            },
            None => self.network.fetch(request).await,
        };

        match result {
            Ok(response) => {
                self.store_response(ns, request, &response).await;
                Ok(StrategyOutcome::network(response))
            }
            Err(e) if e.is_transport() => match self.lookup(ns, request).await {
                Some(entry) => {
                    tracing::debug!(namespace = %ns.name, url = %request.url, error = %e, "network failed; cache hit");
                    Ok(StrategyOutcome::cache(entry.response))
                }
                None => Err(Error::CacheMiss(request.url.to_string())),
            },
            Err(e) => Err(e),
        }
    }

    async fn race_network(&self, ns: &CacheNamespace, request: &Request, timeout: Duration) -> Result<Raced, Error> {
        let network = self.network.clone();
        let outbound = request.clone();
        let mut inflight = tokio::spawn(async move { network.fetch(&outbound).await });

        match tokio::time::timeout(timeout, &mut inflight).await {
            Ok(joined) => Ok(Raced::Answered(flatten(joined))),
            Err(_) => {
                let Some(entry) = self.lookup(ns, request).await else {
                    tracing::debug!(namespace = %ns.name, url = %request.url, "network slow and no cache; waiting");
                    return Ok(Raced::Answered(flatten(inflight.await)));
                };

                tracing::debug!(namespace = %ns.name, url = %request.url, "network slow; serving cache");
                let executor = self.clone();
                let ns = ns.clone();
                let request = request.clone();
                let refresh = tokio::spawn(async move {
                    if let Ok(response) = flatten(inflight.await) {
                        executor.store_response(&ns, &request, &response).await;
                    }
                });
                Ok(Raced::Cached(StrategyOutcome {
                    response: entry.response,
                    source: ResponseSource::Cache,
                    revalidation: Some(refresh),
                }))
            }
        }
    }

    /// Cached entry immediately with a background refresh; the network when
    /// nothing is cached.
    pub async fn stale_while_revalidate(
        &self, ns: &CacheNamespace, request: &Request,
    ) -> Result<StrategyOutcome, Error> {
        let Some(entry) = self.lookup(ns, request).await else {
            tracing::debug!(namespace = %ns.name, url = %request.url, "cache miss; waiting on network");
            let response = self.network.fetch(request).await?;
            self.store_response(ns, request, &response).await;
            return Ok(StrategyOutcome::network(response));
        };

        let executor = self.clone();
        let ns = ns.clone();
        let outbound = request.clone();
        let refresh = tokio::spawn(async move {
            match executor.network.fetch(&outbound).await {
                Ok(response) => {
                    executor.store_response(&ns, &outbound, &response).await;
                }
                Err(e) => tracing::debug!(url = %outbound.url, error = %e, "revalidation failed"),
            }
        });

        tracing::debug!(url = %request.url, "serving stale; revalidating");
        Ok(StrategyOutcome { response: entry.response, source: ResponseSource::Cache, revalidation: Some(refresh) })
    }

    /// Straight to the network. Errors, including transport failures, are the caller's.
    pub async fn network_only(&self, request: &Request) -> Result<StrategyOutcome, Error> {
        let response = self.network.fetch(request).await?;
        Ok(StrategyOutcome::network(response))
    }

    /// Fetch `url` and store it in `ns`. Returns whether it was stored.
    pub async fn preload(&self, ns: &CacheNamespace, url: &Url) -> Result<bool, Error> {
        let request = Request::get(url.clone());
        let response = self.network.fetch(&request).await?;
        Ok(self.store_response(ns, &request, &response).await)
    }

    async fn offline_document(&self, fallback: &OfflineFallback) -> Option<Response> {
        let ns = CacheNamespace::unbounded(fallback.namespace.clone());
        self.lookup(&ns, &Request::get(fallback.url.clone()))
            .await
            .map(|entry| entry.response)
    }

    /// Fresh entry for `request` in `ns`. Expired entries and storage
    /// failures read as misses.
    async fn lookup(&self, ns: &CacheNamespace, request: &Request) -> Option<CacheEntry> {
        let key = ns.key_for(request);
        let entry = match self.store.get(&ns.name, &key).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(namespace = %ns.name, url = %request.url, error = %e, "cache read failed");
                self.evict(ns).await;
                return None;
            }
        };

        if let Some(policy) = &ns.expiration
            && !policy.is_fresh(entry.stored_at, Utc::now())
        {
            tracing::debug!(namespace = %ns.name, url = %request.url, "cached entry expired");
            return None;
        }

        Some(entry)
    }

    /// Store an eligible response and re-apply the namespace bounds.
    async fn store_response(&self, ns: &CacheNamespace, request: &Request, response: &Response) -> bool {
        if request.method != Method::Get || !ns.is_cacheable(response) {
            return false;
        }

        let mut url = request.url.clone();
        url.set_fragment(None);
        let entry = CacheEntry {
            namespace: ns.name.clone(),
            key: ns.key_for(request),
            url,
            response: response.clone(),
            stored_at: Utc::now(),
        };

        let stored = match self.store.put(&entry).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(namespace = %ns.name, url = %request.url, error = %e, "cache write failed");
                false
            }
        };

        self.evict(ns).await;
        stored
    }

    async fn evict(&self, ns: &CacheNamespace) {
        let Some(policy) = &ns.expiration else {
            return;
        };
        if let Err(e) = self.expiration.enforce(&ns.name, policy, Utc::now()).await {
            tracing::warn!(namespace = %ns.name, error = %e, "eviction failed");
        }
    }
}

enum Raced {
    Answered(Result<Response, Error>),
    Cached(StrategyOutcome),
}

fn flatten(joined: Result<Result<Response, Error>, tokio::task::JoinError>) -> Result<Response, Error> {
    joined.unwrap_or_else(|e| Err(Error::Transport(format!("fetch task failed: {e}"))))
}
