//! Request Router and event entry points.
//!
//! [`Engine`] owns one of everything and is what a binding layer talks to:
//! every fetch, push, click, message, and sync signal enters here.

use std::sync::Arc;

use serde_json::Value;
use stowaway_core::{AppConfig, CacheStore, Error, QueueStore, Request, RequestMode};
use url::Url;

use crate::fetch::{Network, canonicalize};
use crate::lifecycle::{ActivateReport, InstallReport, LifecycleManager};
use crate::message::{ClientMessage, MessageReply};
use crate::notification::{ClickOutcome, NotificationDescriptor, NotificationDispatcher};
use crate::platform::{Analytics, Clients, Notifier};
use crate::policy::{NAMESPACE_KINDS, PolicyRegistry, StrategyKind, namespace_name};
use crate::queue::{DrainReport, MutationQueue};
use crate::strategy::{StrategyExecutor, StrategyOutcome};

/// Host capabilities handed to the engine.
#[derive(Clone)]
pub struct Platform {
    pub network: Arc<dyn Network>,
    pub clients: Arc<dyn Clients>,
    pub notifier: Arc<dyn Notifier>,
    pub analytics: Option<Arc<dyn Analytics>>,
}

/// What happened to an intercepted request.
#[derive(Debug)]
pub enum RouteOutcome {
    /// A strategy produced a response.
    Served(StrategyOutcome),
    /// No rule matched; the host should send the request itself.
    Passthrough,
    /// The mutation could not be sent and was queued for replay.
    Queued { id: i64, tag: String },
}

pub struct Engine {
    version: String,
    app_origin: Url,
    registry: PolicyRegistry,
    executor: StrategyExecutor,
    queue: MutationQueue,
    lifecycle: LifecycleManager,
    notifications: NotificationDispatcher,
}

impl Engine {
    pub fn new<S>(config: &AppConfig, store: Arc<S>, platform: Platform) -> Result<Self, Error>
    where
        S: CacheStore + QueueStore + 'static,
    {
        let app_origin = Url::parse(&config.app_origin)?;
        let registry = PolicyRegistry::from_config(config)?;

        let cache_store: Arc<dyn CacheStore> = store.clone();
        let queue_store: Arc<dyn QueueStore> = store;

        let executor = StrategyExecutor::new(cache_store.clone(), platform.network.clone());
        let queue = MutationQueue::new(queue_store, platform.network.clone(), config.queue_retention());

        let precache = registry
            .namespaces()
            .into_iter()
            .find(|ns| ns.name == namespace_name(&config.version, "precache"))
            .cloned()
            .ok_or_else(|| Error::Config("no precache namespace".into()))?;
        let precache_urls = config
            .precache_urls
            .iter()
            .map(|u| canonicalize(&app_origin, u).map_err(|e| Error::InvalidUrl(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let namespaces = NAMESPACE_KINDS
            .iter()
            .map(|kind| namespace_name(&config.version, kind))
            .collect();

        let lifecycle = LifecycleManager::new(
            config.version.clone(),
            cache_store,
            executor.clone(),
            platform.clients.clone(),
            namespaces,
            precache,
            precache_urls,
        );

        let defaults = NotificationDescriptor::defaults(&config.notification, &config.dashboard_path);
        let mut notifications =
            NotificationDispatcher::new(platform.notifier, platform.clients, defaults, app_origin.clone());
        if let Some(analytics) = platform.analytics {
            notifications = notifications.with_analytics(analytics);
        }

        Ok(Self {
            version: config.version.clone(),
            app_origin,
            registry,
            executor,
            queue,
            lifecycle,
            notifications,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Route one intercepted request.
    pub async fn handle_fetch(&self, request: &Request) -> Result<RouteOutcome, Error> {
        let Some(rule) = self.registry.resolve(request) else {
            return Ok(RouteOutcome::Passthrough);
        };

        match self.executor.execute(rule, request).await {
            Ok(outcome) => Ok(RouteOutcome::Served(outcome)),
            Err(e) if e.is_transport() && rule.strategy == StrategyKind::NetworkOnly => {
                let Some(tag) = &rule.queue_tag else {
                    return Err(e);
                };
                let id = self.queue.enqueue(tag, request).await?;
                Ok(RouteOutcome::Queued { id, tag: tag.clone() })
            }
            Err(e) => Err(e),
        }
    }

    /// Answer a page message. Unrecognized messages are an error.
    pub async fn handle_message(&self, raw: &Value) -> Result<MessageReply, Error> {
        let message = ClientMessage::parse(raw)?;
        tracing::debug!(?message, "client message");

        match message {
            ClientMessage::SkipWaiting => {
                self.lifecycle.skip_waiting().await?;
                Ok(MessageReply::Ack)
            }
            ClientMessage::GetVersion => Ok(MessageReply::Version { version: self.version.clone() }),
            ClientMessage::ClearCache => match self.lifecycle.clear_all().await {
                Ok(deleted) => Ok(MessageReply::Cleared { success: true, deleted }),
                Err(e) => {
                    tracing::warn!(error = %e, "clear cache failed");
                    Ok(MessageReply::Cleared { success: false, deleted: 0 })
                }
            },
            ClientMessage::PreloadRoute { url } => {
                let cached = self.preload_route(&url).await;
                Ok(MessageReply::Preloaded { url, cached })
            }
        }
    }

    async fn preload_route(&self, route: &str) -> bool {
        let url = match canonicalize(&self.app_origin, route) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(route, error = %e, "preload route rejected");
                return false;
            }
        };

        let probe = Request::get(url.clone()).with_mode(RequestMode::Navigate);
        let Some(ns) = self.registry.resolve(&probe).and_then(|rule| rule.namespace.as_ref()) else {
            tracing::debug!(%url, "preload route has no cache namespace");
            return false;
        };

        match self.executor.preload(ns, &url).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::debug!(%url, error = %e, "preload failed");
                false
            }
        }
    }

    pub async fn handle_push(&self, payload: Option<&[u8]>) -> Result<NotificationDescriptor, Error> {
        self.notifications.on_push(payload).await
    }

    pub async fn handle_notification_click(&self, action: Option<&str>, data: &Value) -> Result<ClickOutcome, Error> {
        self.notifications.on_click(action, data).await
    }

    pub fn handle_notification_close(&self, data: &Value) {
        self.notifications.on_close(data);
    }

    /// Connectivity-restored or explicit sync signal. Without a tag every
    /// tag is drained.
    pub async fn handle_sync(&self, tag: Option<&str>) -> Result<Vec<DrainReport>, Error> {
        match tag {
            Some(tag) => Ok(vec![self.queue.drain(tag).await?]),
            None => self.queue.drain_all().await,
        }
    }

    pub async fn install(&self) -> Result<InstallReport, Error> {
        self.lifecycle.install().await
    }

    pub async fn activate(&self) -> Result<ActivateReport, Error> {
        self.lifecycle.activate().await
    }
}
