//! Lifecycle Manager: versioned cache generations.
//!
//! `installing → installed → activating → active`
//!
//! Install opens the current generation's namespaces and pre-warms the app
//! shell. Activation purges every namespace of an older generation, claims
//! the open clients, and tells them about the update.

use std::sync::Arc;

use serde::Serialize;
use stowaway_core::{CacheStore, Error};
use tokio::sync::RwLock;
use url::Url;

use crate::message::Broadcast;
use crate::platform::Clients;
use crate::policy::{CacheNamespace, belongs_to_generation};
use crate::strategy::StrategyExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Installed,
    Activating,
    Active,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub cached: usize,
    /// URLs that could not be pre-warmed.
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
    /// Namespaces of older generations that were removed.
    pub deleted: Vec<String>,
    pub claimed: usize,
    pub notified: usize,
}

pub struct LifecycleManager {
    version: String,
    store: Arc<dyn CacheStore>,
    executor: StrategyExecutor,
    clients: Arc<dyn Clients>,
    namespaces: Vec<String>,
    precache: CacheNamespace,
    precache_urls: Vec<Url>,
    state: RwLock<LifecycleState>,
}

impl LifecycleManager {
    pub fn new(
        version: impl Into<String>, store: Arc<dyn CacheStore>, executor: StrategyExecutor, clients: Arc<dyn Clients>,
        namespaces: Vec<String>, precache: CacheNamespace, precache_urls: Vec<Url>,
    ) -> Self {
        Self {
            version: version.into(),
            store,
            executor,
            clients,
            namespaces,
            precache,
            precache_urls,
            state: RwLock::new(LifecycleState::Installing),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Open the current namespaces and pre-warm the critical set.
    ///
    /// Pre-warm failures are logged and reported but never fail the install.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        {
            let state = self.state.read().await;
            if *state != LifecycleState::Installing {
                return Err(Error::InvalidState(format!("install from {:?}", *state)));
            }
        }

        for name in &self.namespaces {
            self.store.open_namespace(name).await?;
        }

        let mut report = InstallReport::default();
        for url in &self.precache_urls {
            match self.executor.preload(&self.precache, url).await {
                Ok(true) => report.cached += 1,
                Ok(false) => {
                    tracing::warn!(%url, "pre-warm response not cacheable");
                    report.failed.push(url.to_string());
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "pre-warm failed");
                    report.failed.push(url.to_string());
                }
            }
        }

        *self.state.write().await = LifecycleState::Installed;
        tracing::info!(version = %self.version, cached = report.cached, failed = report.failed.len(), "installed");
        Ok(report)
    }

    /// Purge older generations, claim clients, and broadcast the update.
    pub async fn activate(&self) -> Result<ActivateReport, Error> {
        {
            let mut state = self.state.write().await;
            if matches!(*state, LifecycleState::Installing | LifecycleState::Activating) {
                return Err(Error::InvalidState(format!("activate from {:?}", *state)));
            }
            *state = LifecycleState::Activating;
        }

        let mut report = ActivateReport::default();

        let existing = match self.store.namespaces().await {
            Ok(names) => names,
            Err(e) => {
                *self.state.write().await = LifecycleState::Installed;
                return Err(e);
            }
        };
        for name in existing.into_iter().filter(|n| !belongs_to_generation(n, &self.version)) {
            match self.store.delete_namespace(&name).await {
                Ok(_) => {
                    tracing::info!(namespace = %name, "deleted stale namespace");
                    report.deleted.push(name);
                }
                Err(e) => tracing::warn!(namespace = %name, error = %e, "failed to delete stale namespace"),
            }
        }

        let claimed = match self.clients.claim().await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::warn!(error = %e, "failed to claim clients");
                Vec::new()
            }
        };
        report.claimed = claimed.len();

        let message = Broadcast::SwUpdated { version: self.version.clone() }.to_value();
        for client in &claimed {
            match self.clients.post_message(&client.id, &message).await {
                Ok(()) => report.notified += 1,
                Err(e) => tracing::warn!(client = %client.id, error = %e, "failed to notify client"),
            }
        }

        *self.state.write().await = LifecycleState::Active;
        tracing::info!(
            version = %self.version,
            deleted = report.deleted.len(),
            claimed = report.claimed,
            "activated"
        );
        Ok(report)
    }

    /// Promote a waiting worker. Only an `installed` worker is waiting;
    /// in any other state this does nothing.
    pub async fn skip_waiting(&self) -> Result<Option<ActivateReport>, Error> {
        let state = self.state().await;
        if state != LifecycleState::Installed {
            tracing::debug!(?state, "skip_waiting ignored");
            return Ok(None);
        }
        self.activate().await.map(Some)
    }

    /// Delete every namespace in the store. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize, Error> {
        let mut deleted = 0;
        for name in self.store.namespaces().await? {
            if self.store.delete_namespace(&name).await? {
                deleted += 1;
            }
        }
        tracing::info!(deleted, "cleared all namespaces");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ClientInfo;
    use crate::testing::{FakeClients, FakeNetwork};
    use serde_json::json;
    use stowaway_core::{CacheDb, MemoryStore};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn manager(store: Arc<dyn CacheStore>, network: Arc<FakeNetwork>, clients: Arc<FakeClients>) -> LifecycleManager {
        let executor = StrategyExecutor::new(store.clone(), network);
        LifecycleManager::new(
            "v2",
            store,
            executor,
            clients,
            vec!["v2-precache".into(), "v2-images".into()],
            CacheNamespace::unbounded("v2-precache"),
            vec![url("https://app.test/"), url("https://app.test/offline.html"), url("https://app.test/app.css")],
        )
    }

    #[tokio::test]
    async fn test_install_prewarms_and_tolerates_failures() {
        let store = Arc::new(MemoryStore::new());
        let network = Arc::new(FakeNetwork::new());
        network.respond("https://app.test/", 200, "<html>");
        network.respond("https://app.test/offline.html", 200, "offline");
        network.fail("https://app.test/app.css");
        let lifecycle = manager(store.clone(), network, Arc::new(FakeClients::default()));

        let report = lifecycle.install().await.unwrap();
        assert_eq!(report.cached, 2);
        assert_eq!(report.failed, vec!["https://app.test/app.css".to_string()]);
        assert_eq!(lifecycle.state().await, LifecycleState::Installed);
        assert_eq!(store.entries("v2-precache").await.unwrap().len(), 2);
        assert!(store.namespaces().await.unwrap().contains(&"v2-images".to_string()));
    }

    #[tokio::test]
    async fn test_activate_purges_old_generation_only() {
        let store = Arc::new(CacheDb::open_in_memory().await.unwrap());
        store.open_namespace("v1-images").await.unwrap();
        store.open_namespace("v2-images").await.unwrap();
        let lifecycle = manager(store.clone(), Arc::new(FakeNetwork::new()), Arc::new(FakeClients::default()));

        lifecycle.install().await.unwrap();
        let report = lifecycle.activate().await.unwrap();
        assert_eq!(report.deleted, vec!["v1-images".to_string()]);

        let remaining = store.namespaces().await.unwrap();
        assert!(remaining.contains(&"v2-images".to_string()));
        assert!(!remaining.contains(&"v1-images".to_string()));
        assert_eq!(lifecycle.state().await, LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_activate_claims_and_broadcasts() {
        let clients = Arc::new(FakeClients::with(vec![
            ClientInfo { id: "a".into(), url: url("https://app.test/#/"), can_navigate: true, focused: true },
            ClientInfo { id: "b".into(), url: url("https://app.test/#/map"), can_navigate: true, focused: false },
        ]));
        let lifecycle = manager(Arc::new(MemoryStore::new()), Arc::new(FakeNetwork::new()), clients.clone());

        lifecycle.install().await.unwrap();
        let report = lifecycle.activate().await.unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(report.notified, 2);

        let messages = clients.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].1, json!({"type": "SW_UPDATED", "version": "v2"}));
    }

    #[tokio::test]
    async fn test_activate_before_install_is_invalid() {
        let lifecycle = manager(Arc::new(MemoryStore::new()), Arc::new(FakeNetwork::new()), Arc::default());
        assert!(matches!(lifecycle.activate().await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_skip_waiting_only_when_installed() {
        let lifecycle = manager(Arc::new(MemoryStore::new()), Arc::new(FakeNetwork::new()), Arc::default());
        assert!(lifecycle.skip_waiting().await.unwrap().is_none());

        lifecycle.install().await.unwrap();
        assert!(lifecycle.skip_waiting().await.unwrap().is_some());
        assert_eq!(lifecycle.state().await, LifecycleState::Active);

        assert!(lifecycle.skip_waiting().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_all_removes_every_namespace() {
        let store = Arc::new(MemoryStore::new());
        store.open_namespace("v1-api").await.unwrap();
        store.open_namespace("v2-api").await.unwrap();
        let lifecycle = manager(store.clone(), Arc::new(FakeNetwork::new()), Arc::default());

        assert_eq!(lifecycle.clear_all().await.unwrap(), 2);
        assert!(store.namespaces().await.unwrap().is_empty());
    }
}
