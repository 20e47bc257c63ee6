//! Host capabilities the engine drives but does not own.
//!
//! The binding layer implements these against whatever runtime hosts the
//! engine; tests implement them with recording fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stowaway_core::Error;
use url::Url;

use crate::notification::NotificationDescriptor;

fn default_true() -> bool {
    true
}

/// An open application instance (window/tab).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub url: Url,
    /// Whether the instance accepts programmatic navigation.
    #[serde(default = "default_true")]
    pub can_navigate: bool,
    #[serde(default)]
    pub focused: bool,
}

/// Open application instances.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Every window instance, controlled or not.
    async fn list(&self) -> Result<Vec<ClientInfo>, Error>;

    async fn focus(&self, id: &str) -> Result<(), Error>;

    async fn navigate(&self, id: &str, url: &Url) -> Result<(), Error>;

    /// Open a new instance; hosts that cannot report it return `None`.
    async fn open(&self, url: &Url) -> Result<Option<ClientInfo>, Error>;

    async fn post_message(&self, id: &str, message: &serde_json::Value) -> Result<(), Error>;

    /// Take control of every open instance without waiting for a navigation.
    /// Returns the instances now controlled.
    async fn claim(&self) -> Result<Vec<ClientInfo>, Error>;
}

/// System notification display.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, notification: &NotificationDescriptor) -> Result<(), Error>;
}

/// Best-effort usage signals around notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    NotificationShown { tag: String },
    NotificationClicked { tag: Option<String>, action: Option<String>, target: String },
    NotificationDismissed { tag: Option<String> },
}

#[async_trait]
pub trait Analytics: Send + Sync {
    async fn record(&self, event: &AnalyticsEvent) -> Result<(), Error>;
}
