//! Request, response, and stored-entry types shared by every layer.
//!
//! These are plain owned values: the engine never holds a borrowed request
//! across a suspension point, so everything here is `Clone + Send`.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Methods that change server state and are therefore never cached.
    pub fn is_mutating(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch | Method::Delete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            other => Err(crate::Error::InvalidInput(format!("unsupported method: {other}"))),
        }
    }
}

/// What kind of resource the page asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Image,
    Font,
    Script,
    Style,
    #[default]
    Empty,
    Other,
}

/// Fetch mode of the intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

/// An outbound request as seen by the fetch intercept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<Bytes>,
    #[serde(default)]
    pub destination: Destination,
    #[serde(default)]
    pub mode: RequestMode,
}

impl Request {
    /// A plain GET with no headers, as issued by pre-warming and route preloads.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: None,
            destination: Destination::Empty,
            mode: RequestMode::Cors,
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, method: Method, body: impl Into<Bytes>) -> Self {
        self.method = method;
        self.body = Some(body.into());
        self
    }

    /// HTML document loads: either the browser said "navigate" or the
    /// destination is a document.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == Destination::Document
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `scheme://host[:port]` of the request URL.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }
}

/// A response obtained from the network or served from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Bytes,
    pub url: Url,
}

impl Response {
    pub fn new(status: u16, url: Url, body: impl Into<Bytes>) -> Self {
        Self { status, headers: Vec::new(), body: body.into(), url }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Response obtained, but the server said no.
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A stored response within one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub namespace: String,
    pub key: String,
    pub url: Url,
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Age relative to `now`; never negative.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.stored_at).max(chrono::Duration::zero())
    }
}

/// Lightweight view of a stored entry used for eviction decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub key: String,
    pub url: String,
    pub stored_at: DateTime<Utc>,
    /// Monotonic write sequence within the store; larger is newer.
    pub seq: i64,
}

/// A mutating request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Assigned by the queue store on push; `0` before that.
    pub id: i64,
    pub tag: String,
    pub request: Request,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

impl QueueEntry {
    pub fn new(tag: impl Into<String>, request: Request, enqueued_at: DateTime<Utc>) -> Self {
        Self { id: 0, tag: tag.into(), request, enqueued_at, attempts: 0 }
    }
}
