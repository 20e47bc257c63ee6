//! Notification Dispatcher: push payload → displayed notification → click routing.
//!
//! ### Push parsing
//! - JSON object, flat (`{title, body, icon, badge, tag, data}`) or nested
//!   (`{title, options: {body, ...}}`); fields merge over the defaults
//! - JSON string → used as the body
//! - Anything else (including invalid JSON) → raw text as the body
//!
//! ### Click routing
//! 1. action `close` / `dismiss` → nothing
//! 2. an open instance already at the target → focus it
//! 3. an instance that can navigate → navigate, then focus
//! 4. otherwise open a new instance at the target

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stowaway_core::{Error, NotificationConfig};
use url::Url;

use crate::fetch::resolve;
use crate::platform::{Analytics, AnalyticsEvent, ClientInfo, Clients, Notifier};

/// A button shown on the notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Normalized notification, built fresh for every push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    /// Routing target; also copied into `data.url` so clicks carry it back.
    pub url: String,
    /// Opaque payload returned to the click handler.
    pub data: Value,
    pub actions: Vec<NotificationAction>,
    pub renotify: bool,
    pub require_interaction: bool,
    pub silent: bool,
}

impl NotificationDescriptor {
    /// The descriptor every push starts from.
    pub fn defaults(config: &NotificationConfig, target: &str) -> Self {
        let mut data = Map::new();
        data.insert("url".into(), Value::String(target.to_string()));

        Self {
            title: config.title.clone(),
            body: config.body.clone(),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            tag: config.tag.clone(),
            url: target.to_string(),
            data: Value::Object(data),
            actions: vec![
                NotificationAction { action: "view".into(), title: "View Story".into(), icon: Some(config.icon.clone()) },
                NotificationAction { action: "close".into(), title: "Close".into(), icon: Some(config.icon.clone()) },
            ],
            renotify: true,
            require_interaction: false,
            silent: false,
        }
    }

    /// Best-effort parse of a push payload over `defaults`. Never fails.
    pub fn from_push(payload: Option<&[u8]>, defaults: &Self) -> Self {
        let mut descriptor = defaults.clone();

        let Some(raw) = payload.filter(|p| !p.is_empty()) else {
            return descriptor;
        };

        match serde_json::from_slice::<Value>(raw) {
            Ok(Value::Object(map)) => descriptor.merge(&map),
            Ok(Value::String(text)) => {
                if !text.trim().is_empty() {
                    descriptor.body = text;
                }
            }
            Ok(_) | Err(_) => {
                let text = String::from_utf8_lossy(raw);
                if !text.trim().is_empty() {
                    tracing::debug!("push payload is not structured; using it as plain text");
                    descriptor.body = text.into_owned();
                }
            }
        }

        descriptor
    }

    fn merge(&mut self, map: &Map<String, Value>) {
        self.merge_fields(map);
        if let Some(Value::Object(options)) = map.get("options") {
            self.merge_fields(options);
        }
    }

    fn merge_fields(&mut self, map: &Map<String, Value>) {
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

        if let Some(title) = text("title") {
            self.title = title;
        }
        if let Some(body) = text("body") {
            self.body = body;
        }
        if let Some(icon) = text("icon") {
            self.icon = icon;
        }
        if let Some(badge) = text("badge") {
            self.badge = badge;
        }
        if let Some(tag) = text("tag") {
            self.tag = tag;
        }

        if let Some(data) = map.get("data") {
            self.data = data.clone();
        }

        let target = text("url").or_else(|| self.data.get("url").and_then(Value::as_str).map(str::to_string));
        if let Some(target) = target {
            self.url = target;
        }
        if let Value::Object(data) = &mut self.data {
            data.insert("url".into(), Value::String(self.url.clone()));
        } else {
            let mut data = Map::new();
            data.insert("url".into(), Value::String(self.url.clone()));
            data.insert("payload".into(), self.data.take());
            self.data = Value::Object(data);
        }

        if let Some(actions) = map.get("actions")
            && let Ok(actions) = serde_json::from_value::<Vec<NotificationAction>>(actions.clone())
        {
            self.actions = actions;
        }

        for (key, slot) in [
            ("renotify", &mut self.renotify),
            ("requireInteraction", &mut self.require_interaction),
            ("silent", &mut self.silent),
        ] {
            if let Some(flag) = map.get(key).and_then(Value::as_bool) {
                *slot = flag;
            }
        }
    }
}

/// What a click did.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    Dismissed,
    Focused { client_id: String, target: Url },
    Navigated { client_id: String, target: Url },
    Opened { client: Option<ClientInfo>, target: Url },
}

fn is_dismiss(action: Option<&str>) -> bool {
    matches!(action, Some("close") | Some("dismiss"))
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn Clients>,
    analytics: Option<Arc<dyn Analytics>>,
    defaults: NotificationDescriptor,
    app_origin: Url,
}

impl NotificationDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>, clients: Arc<dyn Clients>, defaults: NotificationDescriptor, app_origin: Url,
    ) -> Self {
        Self { notifier, clients, analytics: None, defaults, app_origin }
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn Analytics>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Parse and display. Resolves only after the notifier has shown it.
    pub async fn on_push(&self, payload: Option<&[u8]>) -> Result<NotificationDescriptor, Error> {
        let descriptor = NotificationDescriptor::from_push(payload, &self.defaults);

        self.notifier.show(&descriptor).await?;
        tracing::info!(tag = %descriptor.tag, title = %descriptor.title, "notification shown");

        self.signal(AnalyticsEvent::NotificationShown { tag: descriptor.tag.clone() });
        Ok(descriptor)
    }

    /// Route a click on a displayed notification.
    pub async fn on_click(&self, action: Option<&str>, data: &Value) -> Result<ClickOutcome, Error> {
        if is_dismiss(action) {
            tracing::debug!(action, "notification dismissed via action");
            return Ok(ClickOutcome::Dismissed);
        }

        let raw_target = data
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or(self.defaults.url.as_str());
        let target = resolve(&self.app_origin, raw_target)
            .or_else(|_| resolve(&self.app_origin, &self.defaults.url))
            .map_err(|e| Error::InvalidUrl(e.to_string()))?;

        self.signal(AnalyticsEvent::NotificationClicked {
            tag: data.get("tag").and_then(Value::as_str).map(str::to_string),
            action: action.map(str::to_string),
            target: target.to_string(),
        });

        let clients = self.clients.list().await?;

        if let Some(client) = clients.iter().find(|c| c.url == target) {
            self.clients.focus(&client.id).await?;
            tracing::info!(client = %client.id, %target, "focused existing client");
            return Ok(ClickOutcome::Focused { client_id: client.id.clone(), target });
        }

        if let Some(client) = clients.iter().find(|c| c.can_navigate) {
            self.clients.navigate(&client.id, &target).await?;
            self.clients.focus(&client.id).await?;
            tracing::info!(client = %client.id, %target, "navigated client");
            return Ok(ClickOutcome::Navigated { client_id: client.id.clone(), target });
        }

        let client = self.clients.open(&target).await?;
        tracing::info!(%target, "opened new client");
        Ok(ClickOutcome::Opened { client, target })
    }

    /// The user closed the notification without clicking.
    pub fn on_close(&self, data: &Value) {
        let tag = data.get("tag").and_then(Value::as_str).map(str::to_string);
        tracing::debug!(?tag, "notification closed");
        self.signal(AnalyticsEvent::NotificationDismissed { tag });
    }

    fn signal(&self, event: AnalyticsEvent) {
        let Some(analytics) = self.analytics.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = analytics.record(&event).await {
                tracing::debug!(error = %e, "analytics signal dropped");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAnalytics, FakeClients, FakeNotifier};
    use serde_json::json;

    fn defaults() -> NotificationDescriptor {
        NotificationDescriptor::defaults(&NotificationConfig::default(), "/#/dashboard")
    }

    fn origin() -> Url {
        Url::parse("https://app.test/").unwrap()
    }

    fn client(id: &str, url: &str, can_navigate: bool) -> ClientInfo {
        ClientInfo { id: id.into(), url: Url::parse(url).unwrap(), can_navigate, focused: false }
    }

    fn dispatcher(clients: Arc<FakeClients>, notifier: Arc<FakeNotifier>) -> NotificationDispatcher {
        NotificationDispatcher::new(notifier, clients, defaults(), origin())
    }

    #[test]
    fn test_plain_text_payload() {
        let d = NotificationDescriptor::from_push(Some(b"Hello"), &defaults());
        assert_eq!(d.body, "Hello");
        assert_eq!(d.title, "Story App");
        assert_eq!(d.icon, "/icon-192x192.png");
    }

    #[test]
    fn test_json_string_payload_is_body() {
        let d = NotificationDescriptor::from_push(Some(br#""New story nearby""#), &defaults());
        assert_eq!(d.body, "New story nearby");
    }

    #[test]
    fn test_flat_payload_merges() {
        let payload = br#"{"title":"Story berhasil dibuat","body":"Anda telah membuat story baru","data":{"url":"/#/story/42","storyId":42}}"#;
        let d = NotificationDescriptor::from_push(Some(payload), &defaults());
        assert_eq!(d.title, "Story berhasil dibuat");
        assert_eq!(d.body, "Anda telah membuat story baru");
        assert_eq!(d.url, "/#/story/42");
        assert_eq!(d.data["storyId"], 42);
        assert_eq!(d.badge, "/badge-72x72.png");
    }

    #[test]
    fn test_nested_options_payload() {
        let payload = br#"{"title":"Hi","options":{"body":"from options","tag":"t1"}}"#;
        let d = NotificationDescriptor::from_push(Some(payload), &defaults());
        assert_eq!(d.title, "Hi");
        assert_eq!(d.body, "from options");
        assert_eq!(d.tag, "t1");
    }

    #[test]
    fn test_empty_payload_keeps_defaults() {
        assert_eq!(NotificationDescriptor::from_push(None, &defaults()), defaults());
        assert_eq!(NotificationDescriptor::from_push(Some(b""), &defaults()), defaults());
    }

    #[test]
    fn test_default_actions() {
        let d = defaults();
        let names: Vec<&str> = d.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(names, vec!["view", "close"]);
        assert!(d.renotify);
        assert_eq!(d.data["url"], "/#/dashboard");
    }

    #[tokio::test]
    async fn test_push_shows_before_returning() {
        let notifier = Arc::new(FakeNotifier::default());
        let d = dispatcher(Arc::new(FakeClients::default()), notifier.clone());

        let shown = d.on_push(Some(b"Hello")).await.unwrap();
        let seen = notifier.shown().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], shown);
        assert_eq!(seen[0].body, "Hello");
    }

    #[tokio::test]
    async fn test_push_notifier_failure_propagates() {
        let notifier = Arc::new(FakeNotifier::failing());
        let d = dispatcher(Arc::new(FakeClients::default()), notifier);
        assert!(matches!(d.on_push(None).await, Err(Error::Notification(_))));
    }

    #[tokio::test]
    async fn test_click_close_does_nothing() {
        let clients = Arc::new(FakeClients::with(vec![client("a", "https://app.test/#/login", true)]));
        let d = dispatcher(clients.clone(), Arc::new(FakeNotifier::default()));

        let outcome = d.on_click(Some("close"), &json!({"url": "/#/story/1"})).await.unwrap();
        assert_eq!(outcome, ClickOutcome::Dismissed);
        assert!(clients.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_click_focuses_matching_client() {
        let clients = Arc::new(FakeClients::with(vec![
            client("a", "https://app.test/#/login", true),
            client("b", "https://app.test/#/story/1", true),
        ]));
        let d = dispatcher(clients.clone(), Arc::new(FakeNotifier::default()));

        let outcome = d.on_click(Some("view"), &json!({"url": "/#/story/1"})).await.unwrap();
        assert!(matches!(outcome, ClickOutcome::Focused { ref client_id, .. } if client_id == "b"));
        assert_eq!(clients.calls().await, vec!["focus b".to_string()]);
    }

    #[tokio::test]
    async fn test_click_navigates_when_no_match() {
        let clients = Arc::new(FakeClients::with(vec![
            client("a", "https://app.test/#/login", false),
            client("b", "https://app.test/#/about", true),
        ]));
        let d = dispatcher(clients.clone(), Arc::new(FakeNotifier::default()));

        let outcome = d.on_click(None, &json!({})).await.unwrap();
        match outcome {
            ClickOutcome::Navigated { client_id, target } => {
                assert_eq!(client_id, "b");
                assert_eq!(target.as_str(), "https://app.test/#/dashboard");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            clients.calls().await,
            vec!["navigate b https://app.test/#/dashboard".to_string(), "focus b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_click_opens_when_no_clients() {
        let clients = Arc::new(FakeClients::default());
        let d = dispatcher(clients.clone(), Arc::new(FakeNotifier::default()));

        let outcome = d.on_click(Some("view"), &json!({"url": "/#/story/9"})).await.unwrap();
        assert!(matches!(outcome, ClickOutcome::Opened { ref target, .. } if target.as_str() == "https://app.test/#/story/9"));
        assert_eq!(clients.calls().await, vec!["open https://app.test/#/story/9".to_string()]);
    }

    #[tokio::test]
    async fn test_analytics_failure_does_not_block() {
        let analytics = Arc::new(FakeAnalytics::failing());
        let d = dispatcher(Arc::new(FakeClients::default()), Arc::new(FakeNotifier::default()))
            .with_analytics(analytics.clone());

        assert!(d.on_push(Some(b"Hi")).await.is_ok());
        assert!(d.on_click(Some("view"), &json!({})).await.is_ok());
        d.on_close(&json!({"tag": "story-notification"}));
    }

    #[tokio::test]
    async fn test_analytics_records_shown() {
        let analytics = Arc::new(FakeAnalytics::default());
        let d = dispatcher(Arc::new(FakeClients::default()), Arc::new(FakeNotifier::default()))
            .with_analytics(analytics.clone());

        d.on_push(None).await.unwrap();
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if !analytics.events().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            analytics.events().await,
            vec![AnalyticsEvent::NotificationShown { tag: "story-notification".into() }]
        );
    }
}
