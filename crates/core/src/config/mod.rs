//! Engine configuration with layered loading.
//!
//! Configuration is loaded with figment from multiple sources:
//!
//! 1. Environment variables (STOWAWAY_*, `__` separates nested keys)
//! 2. TOML config file (if STOWAWAY_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Eviction and eligibility settings for one cache namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Maximum number of live entries.
    pub max_entries: usize,

    /// Entries older than this are evicted and never served.
    pub max_age_seconds: u64,

    /// Response statuses eligible for storage.
    #[serde(default = "default_statuses")]
    pub cacheable_statuses: Vec<u16>,

    /// Network-first only: serve the cache if the network is slower than this.
    #[serde(default)]
    pub network_timeout_seconds: Option<u64>,

    /// Request headers folded into the cache key, e.g. `Accept-Language`.
    #[serde(default)]
    pub vary_headers: Vec<String>,
}

impl NamespaceConfig {
    pub fn new(max_entries: usize, max_age_seconds: u64) -> Self {
        Self {
            max_entries,
            max_age_seconds,
            cacheable_statuses: default_statuses(),
            network_timeout_seconds: None,
            vary_headers: Vec::new(),
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }
}

/// Defaults merged under every incoming push payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Story App".into(),
            body: "You have a new story notification".into(),
            icon: "/icon-192x192.png".into(),
            badge: "/badge-72x72.png".into(),
            tag: "story-notification".into(),
        }
    }
}

/// Engine configuration.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (STOWAWAY_*)
/// 2. TOML file from STOWAWAY_CONFIG_FILE (if set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment generation; prefixes every namespace name.
    ///
    /// Set via STOWAWAY_VERSION environment variable.
    #[serde(default = "default_version")]
    pub version: String,

    /// Origin the application is served from.
    #[serde(default = "default_app_origin")]
    pub app_origin: String,

    /// Origin of the backend API.
    #[serde(default = "default_api_origin")]
    pub api_origin: String,

    /// Hosts whose assets never change once published (fonts, CDN, map tiles).
    #[serde(default = "default_static_hosts")]
    pub static_hosts: Vec<String>,

    /// Path to SQLite database; `:memory:` keeps everything in process.
    ///
    /// Set via STOWAWAY_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for outbound requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Network request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum response body bytes accepted from the network.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Tag under which failed mutations are queued.
    #[serde(default = "default_queue_tag")]
    pub queue_tag: String,

    /// How long a queued mutation may wait before it is dropped.
    #[serde(default = "default_retention_minutes")]
    pub queue_retention_minutes: u64,

    /// URL regexes the engine never handles (auth, analytics beacons).
    /// Matching requests pass through to the network untouched.
    #[serde(default)]
    pub bypass_patterns: Vec<String>,

    /// App shell resources pre-warmed at install.
    #[serde(default = "default_precache_urls")]
    pub precache_urls: Vec<String>,

    /// Document served to navigations when both network and cache miss.
    #[serde(default = "default_offline_document")]
    pub offline_document: String,

    /// Where notification clicks land when the payload names no target.
    #[serde(default = "default_dashboard_path")]
    pub dashboard_path: String,

    #[serde(default = "default_static_ns")]
    pub static_assets: NamespaceConfig,

    #[serde(default = "default_api_ns")]
    pub api: NamespaceConfig,

    #[serde(default = "default_images_ns")]
    pub images: NamespaceConfig,

    #[serde(default = "default_pages_ns")]
    pub pages: NamespaceConfig,

    #[serde(default)]
    pub notification: NotificationConfig,
}

fn default_version() -> String {
    "v1".into()
}

fn default_app_origin() -> String {
    "http://localhost:8080".into()
}

fn default_api_origin() -> String {
    "https://story-api.dicoding.dev".into()
}

fn default_static_hosts() -> Vec<String> {
    vec![
        "fonts.googleapis.com".into(),
        "fonts.gstatic.com".into(),
        "cdn.jsdelivr.net".into(),
        "unpkg.com".into(),
        "tile.openstreetmap.org".into(),
    ]
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./stowaway.sqlite")
}

fn default_user_agent() -> String {
    "stowaway/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    10_485_760 // 10MB
}

fn default_queue_tag() -> String {
    "story-upload".into()
}

fn default_retention_minutes() -> u64 {
    24 * 60
}

fn default_precache_urls() -> Vec<String> {
    vec![
        "/".into(),
        "/index.html".into(),
        "/offline.html".into(),
        "/app.bundle.js".into(),
        "/app.css".into(),
        "/manifest.json".into(),
        "/icon-192x192.png".into(),
        "/badge-72x72.png".into(),
    ]
}

fn default_offline_document() -> String {
    "/offline.html".into()
}

fn default_dashboard_path() -> String {
    "/#/dashboard".into()
}

fn default_statuses() -> Vec<u16> {
    vec![200]
}

const DAY: u64 = 24 * 60 * 60;

fn default_static_ns() -> NamespaceConfig {
    NamespaceConfig::new(100, 365 * DAY)
}

fn default_api_ns() -> NamespaceConfig {
    NamespaceConfig { network_timeout_seconds: Some(3), ..NamespaceConfig::new(50, DAY) }
}

fn default_images_ns() -> NamespaceConfig {
    NamespaceConfig::new(60, 30 * DAY)
}

fn default_pages_ns() -> NamespaceConfig {
    NamespaceConfig { network_timeout_seconds: Some(3), ..NamespaceConfig::new(30, 7 * DAY) }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app_origin: default_app_origin(),
            api_origin: default_api_origin(),
            static_hosts: default_static_hosts(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            queue_tag: default_queue_tag(),
            queue_retention_minutes: default_retention_minutes(),
            bypass_patterns: Vec::new(),
            precache_urls: default_precache_urls(),
            offline_document: default_offline_document(),
            dashboard_path: default_dashboard_path(),
            static_assets: default_static_ns(),
            api: default_api_ns(),
            images: default_images_ns(),
            pages: default_pages_ns(),
            notification: NotificationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Queue retention window.
    pub fn queue_retention(&self) -> Duration {
        Duration::from_secs(self.queue_retention_minutes * 60)
    }

    /// Whether the database should live in memory only.
    pub fn in_memory(&self) -> bool {
        self.db_path.as_os_str() == ":memory:"
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, an environment
    /// variable cannot be parsed, or validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// The layered provider stack, exposed so callers can merge overrides.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("STOWAWAY_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("STOWAWAY_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Extract and validate from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
