//! JSON-lines wire format.
//!
//! One event object per stdin line, tagged by `event`. Each event produces
//! zero or more `{"effect": ...}` lines followed by exactly one reply line.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stowaway_core::{Destination, Method, Request, RequestMode, Response};
use stowaway_engine::{ClientInfo, NotificationDescriptor, ResponseSource};
use url::Url;

fn default_method() -> Method {
    Method::Get
}

/// Request as sent by the page side. Bodies are text.
#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
    #[serde(default = "default_method")]
    pub method: Method,
    pub url: Url,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub destination: Destination,
    #[serde(default)]
    pub mode: RequestMode,
}

impl From<WireRequest> for Request {
    fn from(wire: WireRequest) -> Self {
        Request {
            method: wire.method,
            url: wire.url,
            headers: wire.headers.into_iter().collect(),
            body: wire.body.map(Into::into),
            destination: wire.destination,
            mode: wire.mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub url: Url,
}

impl From<&Response> for WireResponse {
    fn from(response: &Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers.iter().cloned().collect(),
            body: String::from_utf8_lossy(&response.body).into_owned(),
            url: response.url.clone(),
        }
    }
}

/// Push data exactly as delivered: text, or raw bytes as a JSON array
/// when the payload is not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PushPayload {
    Text(String),
    Bytes(Vec<u8>),
}

impl PushPayload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PushPayload::Text(text) => text.as_bytes(),
            PushPayload::Bytes(bytes) => bytes,
        }
    }
}

/// Incoming events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Install,
    Activate,
    Fetch {
        request: WireRequest,
    },
    Push {
        #[serde(default)]
        payload: Option<PushPayload>,
    },
    NotificationClick {
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        data: Value,
    },
    NotificationClose {
        #[serde(default)]
        data: Value,
    },
    Message {
        data: Value,
    },
    Sync {
        #[serde(default)]
        tag: Option<String>,
    },
    /// Replace the host's view of open application instances.
    Clients {
        clients: Vec<ClientInfo>,
    },
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::Install => "install",
            HostEvent::Activate => "activate",
            HostEvent::Fetch { .. } => "fetch",
            HostEvent::Push { .. } => "push",
            HostEvent::NotificationClick { .. } => "notification_click",
            HostEvent::NotificationClose { .. } => "notification_close",
            HostEvent::Message { .. } => "message",
            HostEvent::Sync { .. } => "sync",
            HostEvent::Clients { .. } => "clients",
        }
    }
}

/// Fetch reply payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchResult {
    Served { source: &'static str, response: WireResponse },
    /// Not handled; the host sends the request itself.
    Passthrough,
    Queued { id: i64, tag: String, response: WireResponse },
}

pub fn source_name(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
        ResponseSource::OfflineFallback => "offline-fallback",
    }
}

/// Platform side effect the engine asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    ShowNotification { notification: NotificationDescriptor },
    Focus { client: String },
    Navigate { client: String, url: Url },
    Open { url: Url },
    PostMessage { client: String, message: Value },
    Claim,
}

/// Final line for every event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub event: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn success(event: &str, result: Value) -> Self {
        Self { event: event.to_string(), ok: true, result: Some(result), code: None, error: None }
    }

    pub fn failure(event: &str, code: &str, error: String) -> Self {
        Self { event: event.to_string(), ok: false, result: None, code: Some(code.to_string()), error: Some(error) }
    }
}
