//! Page ⇄ engine message channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stowaway_core::Error;

/// Messages the application page may post to the engine.
///
/// Wire form is `{"type": "...", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Promote a waiting worker immediately.
    SkipWaiting,
    GetVersion,
    /// Delete every managed namespace.
    ClearCache,
    /// Best-effort fetch-and-cache of an application route.
    PreloadRoute { url: String },
}

const KNOWN_TYPES: [&str; 4] = ["SKIP_WAITING", "GET_VERSION", "CLEAR_CACHE", "PRELOAD_ROUTE"];

impl ClientMessage {
    /// Decode a raw message. Unrecognized `type` values are rejected
    /// explicitly rather than ignored.
    pub fn parse(raw: &Value) -> Result<Self, Error> {
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("message has no string `type`".into()))?;

        if !KNOWN_TYPES.contains(&kind) {
            return Err(Error::UnknownMessage(kind.to_string()));
        }

        serde_json::from_value(raw.clone()).map_err(|e| Error::InvalidInput(format!("{kind}: {e}")))
    }
}

/// Reply posted back on the message's port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageReply {
    Ack,
    Version { version: String },
    Cleared { success: bool, deleted: usize },
    Preloaded { url: String, cached: bool },
}

/// Messages the engine pushes to every controlled client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Broadcast {
    SwUpdated { version: String },
}

impl Broadcast {
    pub fn to_value(&self) -> Value {
        match self {
            Broadcast::SwUpdated { version } => serde_json::json!({ "type": "SW_UPDATED", "version": version }),
        }
    }
}
