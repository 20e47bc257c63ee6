//! Network seam for the engine.
//!
//! ### Contract
//! - `Ok(response)` whenever the server answered, whatever the status.
//!   HTTP error statuses are passed through untouched.
//! - `Err(Error::Transport)` only when no response was obtained
//!   (DNS, connect, TLS, timeout before headers).
//! - Once a status line has arrived, failures are `ResponseTooLarge` or
//!   `ResponseFailed`: the server may already have acted on the request.
//! - A request reqwest cannot build is `InvalidInput`.
//!
//! ### reqwest transport
//! - rustls, gzip/brotli/deflate
//! - Max redirects: 5
//! - Max body bytes: 10MB (configurable)

pub mod url;

use async_trait::async_trait;
use reqwest::{Client, header};
use std::time::{Duration, Instant};

pub use self::url::{UrlError, canonicalize, resolve};

use stowaway_core::{AppConfig, Error, Method, Request, Response};

/// Anything able to perform a request on the engine's behalf.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, Error>;
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "stowaway/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 10MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "stowaway/0.1".to_string(),
            max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Default::default()
        }
    }
}

/// Classify a `send()` failure. Only failures before any response count
/// as transport.
fn send_error(e: reqwest::Error) -> Error {
    if e.is_builder() {
        Error::InvalidInput(format!("invalid request: {}", e))
    } else if e.is_redirect() {
        Error::ResponseFailed(format!("redirect failed: {}", e))
    } else {
        Error::Transport(format!("network error: {}", e))
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

/// reqwest-backed [`Network`].
pub struct HttpNetwork {
    http: Client,
    config: FetchConfig,
}

impl HttpNetwork {
    /// Create a new transport with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        let start = Instant::now();

        let mut builder = self
            .http
            .request(to_reqwest_method(request.method), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(send_error)?;

        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::ResponseTooLarge(format!(
                "{}: {} bytes exceeds {}",
                request.url, len, self.config.max_bytes
            )));
        }

        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| {
                Error::ResponseFailed(format!("{}: failed to read body after {}: {}", request.url, status, e))
            })?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::ResponseTooLarge(format!(
                "{}: {} bytes exceeds {}",
                request.url,
                bytes.len(),
                self.config.max_bytes
            )));
        }

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            fetch_ms = start.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            content_type = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()))
                .map(|(_, v)| v.as_str())
                .unwrap_or(""),
            "network fetch"
        );

        Ok(Response { status: status.as_u16(), headers, body: bytes, url: final_url })
    }
}
