//! Platform seams backed by the stdio protocol.
//!
//! Nothing here performs the side effect itself: every request of the
//! engine is recorded as an [`Effect`] and written out ahead of the reply.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use stowaway_core::Error;
use stowaway_engine::{Analytics, AnalyticsEvent, ClientInfo, Clients, NotificationDescriptor, Notifier};
use tokio::sync::RwLock;
use url::Url;

use crate::protocol::Effect;

/// Effects accumulated while one event is handled.
#[derive(Default)]
pub struct EffectLog {
    effects: Mutex<Vec<Effect>>,
}

impl EffectLog {
    fn push(&self, effect: Effect) -> Result<(), Error> {
        self.effects
            .lock()
            .map_err(|_| Error::Client("effect log poisoned".into()))?
            .push(effect);
        Ok(())
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<Effect> {
        self.effects
            .lock()
            .map(|mut effects| std::mem::take(&mut *effects))
            .unwrap_or_default()
    }
}

/// The host's last reported list of open instances.
pub struct HostClients {
    known: RwLock<Vec<ClientInfo>>,
    log: Arc<EffectLog>,
}

impl HostClients {
    pub fn new(log: Arc<EffectLog>) -> Self {
        Self { known: RwLock::new(Vec::new()), log }
    }

    pub async fn replace(&self, clients: Vec<ClientInfo>) {
        *self.known.write().await = clients;
    }

    async fn require(&self, id: &str) -> Result<(), Error> {
        if self.known.read().await.iter().any(|c| c.id == id) {
            Ok(())
        } else {
            Err(Error::Client(format!("unknown client {id}")))
        }
    }
}

#[async_trait]
impl Clients for HostClients {
    async fn list(&self) -> Result<Vec<ClientInfo>, Error> {
        Ok(self.known.read().await.clone())
    }

    async fn focus(&self, id: &str) -> Result<(), Error> {
        self.require(id).await?;
        for client in self.known.write().await.iter_mut() {
            client.focused = client.id == id;
        }
        self.log.push(Effect::Focus { client: id.to_string() })
    }

    async fn navigate(&self, id: &str, url: &Url) -> Result<(), Error> {
        self.require(id).await?;
        if let Some(client) = self.known.write().await.iter_mut().find(|c| c.id == id) {
            client.url = url.clone();
        }
        self.log.push(Effect::Navigate { client: id.to_string(), url: url.clone() })
    }

    // The id of a new window is only known once the host reports it back.
    async fn open(&self, url: &Url) -> Result<Option<ClientInfo>, Error> {
        self.log.push(Effect::Open { url: url.clone() })?;
        Ok(None)
    }

    async fn post_message(&self, id: &str, message: &Value) -> Result<(), Error> {
        self.require(id).await?;
        self.log.push(Effect::PostMessage { client: id.to_string(), message: message.clone() })
    }

    async fn claim(&self) -> Result<Vec<ClientInfo>, Error> {
        self.log.push(Effect::Claim)?;
        Ok(self.known.read().await.clone())
    }
}

pub struct HostNotifier {
    log: Arc<EffectLog>,
}

impl HostNotifier {
    pub fn new(log: Arc<EffectLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Notifier for HostNotifier {
    async fn show(&self, notification: &NotificationDescriptor) -> Result<(), Error> {
        self.log.push(Effect::ShowNotification { notification: notification.clone() })
    }
}

/// Analytics sink that only logs.
pub struct LogAnalytics;

#[async_trait]
impl Analytics for LogAnalytics {
    async fn record(&self, event: &AnalyticsEvent) -> Result<(), Error> {
        let event = serde_json::to_string(event).map_err(|e| Error::InvalidInput(e.to_string()))?;
        tracing::info!(target: "stowaway::analytics", %event, "analytics");
        Ok(())
    }
}
