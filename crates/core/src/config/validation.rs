//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` or an allowlisted origin is not an absolute http(s) URL
    /// - `app_version` or `cache_prefix` is empty
    /// - a manifest or fallback path is not origin-relative
    /// - `timeout_ms` is outside 100ms..=5min or `navigation_timeout_ms` exceeds it
    /// - `max_bytes` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin = url::Url::parse(&self.origin).map_err(|e| invalid("origin", e.to_string()))?;
        if !matches!(origin.scheme(), "http" | "https") || origin.host_str().is_none() {
            return Err(invalid("origin", "must be an absolute http(s) URL"));
        }

        for allowed in &self.allowlist_origins {
            let parsed = url::Url::parse(allowed).map_err(|e| invalid("allowlist_origins", format!("{allowed}: {e}")))?;
            if parsed.host_str().is_none() {
                return Err(invalid("allowlist_origins", format!("{allowed}: missing host")));
            }
        }

        if self.cache_prefix.is_empty() {
            return Err(invalid("cache_prefix", "must not be empty"));
        }
        if self.app_version.is_empty() {
            return Err(invalid("app_version", "must not be empty"));
        }

        if self.manifest.is_empty() {
            return Err(invalid("manifest", "must list at least one path"));
        }
        for path in self.manifest.iter().chain([&self.offline_document, &self.placeholder_image]) {
            if !path.starts_with('/') {
                return Err(invalid("manifest", format!("{path}: must start with '/'")));
            }
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }
        if self.navigation_timeout_ms == 0 || self.navigation_timeout_ms > self.timeout_ms {
            return Err(invalid("navigation_timeout_ms", "must be between 1 and timeout_ms"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.update_interval_secs > 0 && self.update_interval_secs < 60 {
            tracing::warn!(
                update_interval_secs = self.update_interval_secs,
                "update interval below one minute; every tick re-fetches the whole manifest"
            );
        }

        Ok(())
    }
}
