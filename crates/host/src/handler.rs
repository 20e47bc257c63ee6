//! Event handler for the stdio host.
//!
//! Routes each decoded [`HostEvent`] to the engine and renders the
//! effect lines and the reply line.

use std::sync::Arc;

use serde_json::{Value, json};
use stowaway_core::{AppConfig, CacheStore, QueueStore, Request, Response};
use stowaway_engine::{ClickOutcome, Engine, Network, Platform, RouteOutcome};

use crate::bindings::{EffectLog, HostClients, HostNotifier, LogAnalytics};
use crate::error::HostError;
use crate::protocol::{FetchResult, HostEvent, PushPayload, Reply, WireResponse, source_name};

pub struct Handler {
    engine: Engine,
    clients: Arc<HostClients>,
    log: Arc<EffectLog>,
}

impl Handler {
    pub fn new<S>(config: &AppConfig, store: Arc<S>, network: Arc<dyn Network>) -> Result<Self, HostError>
    where
        S: CacheStore + QueueStore + 'static,
    {
        let log = Arc::new(EffectLog::default());
        let clients = Arc::new(HostClients::new(log.clone()));
        let platform = Platform {
            network,
            clients: clients.clone(),
            notifier: Arc::new(HostNotifier::new(log.clone())),
            analytics: Some(Arc::new(LogAnalytics)),
        };

        let engine = Engine::new(config, store, platform)?;
        Ok(Self { engine, clients, log })
    }

    /// Replay whatever was queued by a previous run.
    pub async fn replay_on_start(&self) -> Result<(), HostError> {
        let reports = self.engine.handle_sync(None).await?;
        for report in reports {
            tracing::info!(
                tag = %report.tag,
                replayed = report.replayed,
                dropped = report.dropped,
                remaining = report.remaining,
                "startup replay"
            );
        }
        Ok(())
    }

    /// Handle one protocol line. Returns the lines to write, reply last.
    pub async fn handle_line(&self, line: &str) -> Vec<String> {
        let (event, result) = match serde_json::from_str::<HostEvent>(line) {
            Ok(event) => {
                let name = event.name();
                (name, self.dispatch(event).await)
            }
            Err(e) => ("unknown", Err(HostError::from(e))),
        };

        let reply = match result {
            Ok(value) => Reply::success(event, value),
            Err(e) => {
                tracing::warn!(event, error = %e, "event failed");
                Reply::failure(event, e.code(), e.to_string())
            }
        };

        let mut lines: Vec<String> = self
            .log
            .take()
            .iter()
            .filter_map(|effect| serde_json::to_string(effect).ok())
            .collect();
        match serde_json::to_string(&reply) {
            Ok(line) => lines.push(line),
            Err(e) => tracing::error!(error = %e, "failed to encode reply"),
        }
        lines
    }

    async fn dispatch(&self, event: HostEvent) -> Result<Value, HostError> {
        match event {
            HostEvent::Install => Ok(serde_json::to_value(self.engine.install().await?)?),
            HostEvent::Activate => Ok(serde_json::to_value(self.engine.activate().await?)?),
            HostEvent::Fetch { request } => self.fetch(&Request::from(request)).await,
            HostEvent::Push { payload } => {
                let shown = self.engine.handle_push(payload.as_ref().map(PushPayload::as_bytes)).await?;
                Ok(json!({ "shown": shown }))
            }
            HostEvent::NotificationClick { action, data } => {
                let outcome = self
                    .engine
                    .handle_notification_click(action.as_deref(), &data)
                    .await?;
                Ok(click_json(&outcome))
            }
            HostEvent::NotificationClose { data } => {
                self.engine.handle_notification_close(&data);
                Ok(Value::Null)
            }
            HostEvent::Message { data } => Ok(serde_json::to_value(self.engine.handle_message(&data).await?)?),
            HostEvent::Sync { tag } => Ok(serde_json::to_value(self.engine.handle_sync(tag.as_deref()).await?)?),
            HostEvent::Clients { clients } => {
                let count = clients.len();
                self.clients.replace(clients).await;
                Ok(json!({ "clients": count }))
            }
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Value, HostError> {
        let result = match self.engine.handle_fetch(request).await? {
            RouteOutcome::Served(outcome) => {
                if let Some(refresh) = outcome.revalidation
                    && let Err(e) = refresh.await
                {
                    tracing::warn!(error = %e, "background refresh aborted");
                }
                FetchResult::Served {
                    source: source_name(outcome.source),
                    response: WireResponse::from(&outcome.response),
                }
            }
            RouteOutcome::Passthrough => FetchResult::Passthrough,
            RouteOutcome::Queued { id, tag } => {
                let accepted = Response::new(202, request.url.clone(), json!({ "queued": true }).to_string())
                    .with_header("content-type", "application/json");
                FetchResult::Queued { id, tag, response: WireResponse::from(&accepted) }
            }
        };
        Ok(serde_json::to_value(result)?)
    }
}

fn click_json(outcome: &ClickOutcome) -> Value {
    match outcome {
        ClickOutcome::Dismissed => json!({ "outcome": "dismissed" }),
        ClickOutcome::Focused { client_id, target } => {
            json!({ "outcome": "focused", "client": client_id, "target": target })
        }
        ClickOutcome::Navigated { client_id, target } => {
            json!({ "outcome": "navigated", "client": client_id, "target": target })
        }
        ClickOutcome::Opened { client, target } => {
            json!({ "outcome": "opened", "client": client.as_ref().map(|c| c.id.clone()), "target": target })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stowaway_core::{Error, MemoryStore};

    /// Network that is always down.
    struct Offline;

    #[async_trait]
    impl Network for Offline {
        async fn fetch(&self, request: &Request) -> Result<Response, Error> {
            Err(Error::Transport(format!("offline: {}", request.url)))
        }
    }

    /// Network that answers every request with 200 and the URL as body.
    struct Echo;

    #[async_trait]
    impl Network for Echo {
        async fn fetch(&self, request: &Request) -> Result<Response, Error> {
            Ok(Response::new(200, request.url.clone(), request.url.to_string()))
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            version: "v3".into(),
            app_origin: "https://app.test".into(),
            api_origin: "https://api.test".into(),
            db_path: ":memory:".into(),
            precache_urls: vec!["/".into(), "/offline.html".into()],
            ..Default::default()
        }
    }

    fn handler(network: Arc<dyn Network>) -> Handler {
        Handler::new(&config(), Arc::new(MemoryStore::new()), network).unwrap()
    }

    fn parse(lines: &[String]) -> Vec<Value> {
        lines.iter().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_offline_post_replies_202_queued() {
        let handler = handler(Arc::new(Offline));
        let line = r#"{"event":"fetch","request":{"method":"POST","url":"https://api.test/v1/stories","body":"x"}}"#;

        let out = parse(&handler.handle_line(line).await);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["ok"], true);
        assert_eq!(out[0]["result"]["outcome"], "queued");
        assert_eq!(out[0]["result"]["response"]["status"], 202);
        assert_eq!(out[0]["result"]["response"]["body"], r#"{"queued":true}"#);
    }

    #[tokio::test]
    async fn test_push_emits_effect_before_reply() {
        let handler = handler(Arc::new(Echo));
        let out = parse(&handler.handle_line(r#"{"event":"push","payload":"Hello"}"#).await);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["effect"], "show_notification");
        assert_eq!(out[0]["notification"]["body"], "Hello");
        assert_eq!(out[1]["event"], "push");
        assert_eq!(out[1]["ok"], true);
    }

    #[tokio::test]
    async fn test_binary_push_payload_becomes_text_body() {
        let handler = handler(Arc::new(Echo));
        let out = parse(&handler.handle_line(r#"{"event":"push","payload":[255,72,105]}"#).await);

        assert_eq!(out[0]["effect"], "show_notification");
        assert_eq!(out[0]["notification"]["body"], "\u{FFFD}Hi");
        assert_eq!(out[0]["notification"]["title"], "Story App");
        assert_eq!(out[1]["ok"], true);
    }

    #[tokio::test]
    async fn test_install_activate_broadcasts_to_clients() {
        let handler = handler(Arc::new(Echo));
        handler
            .handle_line(r#"{"event":"clients","clients":[{"id":"w1","url":"https://app.test/#/"}]}"#)
            .await;
        let install = parse(&handler.handle_line(r#"{"event":"install"}"#).await);
        assert_eq!(install[0]["result"]["cached"], 2);

        let out = parse(&handler.handle_line(r#"{"event":"activate"}"#).await);
        assert_eq!(out[0]["effect"], "claim");
        assert_eq!(out[1]["effect"], "post_message");
        assert_eq!(out[1]["message"]["type"], "SW_UPDATED");
        assert_eq!(out[1]["message"]["version"], "v3");
        assert_eq!(out[2]["ok"], true);
    }

    #[tokio::test]
    async fn test_click_with_no_clients_opens() {
        let handler = handler(Arc::new(Echo));
        let line = r#"{"event":"notification_click","action":"view","data":{"url":"/#/story/7"}}"#;
        let out = parse(&handler.handle_line(line).await);

        assert_eq!(out[0]["effect"], "open");
        assert_eq!(out[0]["url"], "https://app.test/#/story/7");
        assert_eq!(out[1]["result"]["outcome"], "opened");
    }

    #[tokio::test]
    async fn test_unknown_message_type_fails_explicitly() {
        let handler = handler(Arc::new(Echo));
        let out = parse(&handler.handle_line(r#"{"event":"message","data":{"type":"FLUSH"}}"#).await);
        assert_eq!(out[0]["ok"], false);
        assert_eq!(out[0]["code"], "UNKNOWN_MESSAGE");
    }

    #[tokio::test]
    async fn test_garbage_line() {
        let handler = handler(Arc::new(Echo));
        let out = parse(&handler.handle_line("not json").await);
        assert_eq!(out[0]["event"], "unknown");
        assert_eq!(out[0]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_image_fetch_waits_for_refresh() {
        let handler = handler(Arc::new(Echo));
        let line = r#"{"event":"fetch","request":{"url":"https://photos.test/a.jpg","destination":"image"}}"#;

        let first = parse(&handler.handle_line(line).await);
        assert_eq!(first[0]["result"]["source"], "network");
        let second = parse(&handler.handle_line(line).await);
        assert_eq!(second[0]["result"]["source"], "cache");
        assert_eq!(second[0]["result"]["response"]["body"], "https://photos.test/a.jpg");
    }
}
