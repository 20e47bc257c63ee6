//! Configuration validation rules.
//!
//! Checks run on `AppConfig` after it has been loaded from environment,
//! files, or defaults.

use crate::config::{AppConfig, NamespaceConfig};
use thiserror::Error;
use url::Url;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

fn validate_origin(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| invalid(field, &e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(invalid(field, "must be an http or https origin")),
    }
}

fn validate_namespace(field: &str, ns: &NamespaceConfig) -> Result<(), ConfigError> {
    if ns.max_entries == 0 {
        return Err(ConfigError::Invalid {
            field: format!("{field}.max_entries"),
            reason: "must be greater than 0".into(),
        });
    }
    if ns.max_age_seconds == 0 {
        return Err(ConfigError::Invalid {
            field: format!("{field}.max_age_seconds"),
            reason: "must be greater than 0".into(),
        });
    }
    if ns.cacheable_statuses.is_empty() {
        return Err(ConfigError::Invalid {
            field: format!("{field}.cacheable_statuses"),
            reason: "must list at least one status".into(),
        });
    }
    Ok(())
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `version` is empty or contains whitespace
    /// - `app_origin` / `api_origin` are not http(s) URLs
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `queue_retention_minutes` is 0
    /// - any namespace has zero `max_entries` / `max_age_seconds`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.is_empty() || self.version.chars().any(char::is_whitespace) {
            return Err(invalid("version", "must be a non-empty token without whitespace"));
        }

        validate_origin("app_origin", &self.app_origin)?;
        validate_origin("api_origin", &self.api_origin)?;

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.queue_tag.is_empty() {
            return Err(invalid("queue_tag", "must not be empty"));
        }

        if self.queue_retention_minutes == 0 {
            return Err(invalid("queue_retention_minutes", "must be greater than 0"));
        }

        if !self.offline_document.starts_with('/') {
            return Err(invalid("offline_document", "must be an absolute path"));
        }

        validate_namespace("static_assets", &self.static_assets)?;
        validate_namespace("api", &self.api)?;
        validate_namespace("images", &self.images)?;
        validate_namespace("pages", &self.pages)?;

        if !self.precache_urls.iter().any(|u| u == &self.offline_document) {
            tracing::warn!(
                offline_document = %self.offline_document,
                "offline_document is not in precache_urls; navigation fallback will only work once it has been \
                 cached some other way"
            );
        }

        Ok(())
    }
}
