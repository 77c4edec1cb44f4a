//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (OFFCACHE_*)
//! 2. TOML config file (if OFFCACHE_CONFIG_FILE set)
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

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (OFFCACHE_*)
/// 2. TOML config file (if OFFCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite cache store.
    ///
    /// Set via OFFCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// The application's own origin; relative request URLs resolve against it.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Prefix of every generation id.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Deployed application version (semantic version).
    #[serde(default = "default_app_version")]
    pub app_version: String,

    /// Optional build identifier appended to the generation id.
    #[serde(default)]
    pub build_id: Option<String>,

    /// Paths pre-cached at install time.
    #[serde(default = "default_manifest")]
    pub manifest: Vec<String>,

    /// Pre-cached document served to navigations when offline.
    #[serde(default = "default_offline_document")]
    pub offline_document: String,

    /// Pre-cached image served to image requests when offline.
    #[serde(default = "default_placeholder_image")]
    pub placeholder_image: String,

    /// Foreign origins (fonts, CDNs) that still participate in caching.
    ///
    /// Set via OFFCACHE_ALLOWLIST_ORIGINS as an array,
    /// e.g. `["https://fonts.gstatic.com", "https://cdn.example"]`.
    #[serde(default = "default_allowlist_origins")]
    pub allowlist_origins: Vec<String>,

    /// Path prefixes of dynamic endpoints that are never cached.
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,

    /// Form endpoints whose failed offline submissions are queued for replay.
    #[serde(default = "default_form_endpoints")]
    pub form_endpoints: Vec<String>,

    /// File extensions treated as static assets.
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,

    /// Path prefixes treated as static assets.
    #[serde(default = "default_static_prefixes")]
    pub static_prefixes: Vec<String>,

    /// Query parameters stripped from request keys. A trailing `*` matches a prefix.
    #[serde(default = "default_cache_busting_params")]
    pub cache_busting_params: Vec<String>,

    /// User-Agent string for network requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes accepted per response.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Network request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Budget for network-first navigations before falling back to cache.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// `Retry-After` value on synthetic 503 responses.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,

    /// Interval of the background manifest refresh. 0 disables it.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Activate a freshly installed generation without waiting for a
    /// SKIP_WAITING message.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    /// How long a session's "new version available" prompt stays up before
    /// it is dismissed automatically.
    #[serde(default = "default_update_prompt_timeout_secs")]
    pub update_prompt_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./offcache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_cache_prefix() -> String {
    "epk-shell".into()
}

fn default_app_version() -> String {
    "2.5.0".into()
}

fn default_manifest() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/main.css",
        "/main.js",
        "/profile-main.jpg",
        "/favicon.ico",
        "/site.webmanifest",
        "/offline.html",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_offline_document() -> String {
    "/offline.html".into()
}

fn default_placeholder_image() -> String {
    "/assets/images/placeholder.svg".into()
}

fn default_allowlist_origins() -> Vec<String> {
    vec!["https://fonts.googleapis.com".into(), "https://fonts.gstatic.com".into(), "https://cdn.jsdelivr.net".into()]
}

fn default_excluded_prefixes() -> Vec<String> {
    vec!["/api/".into()]
}

fn default_form_endpoints() -> Vec<String> {
    vec!["/api/contact".into(), "/api/collaborations".into()]
}

fn default_static_extensions() -> Vec<String> {
    [
        "css", "js", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf", "eot", "mp4", "webm",
        "mp3", "wav", "pdf", "webmanifest",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_static_prefixes() -> Vec<String> {
    vec!["/assets/".into(), "/images/".into(), "/media/".into(), "/album/".into(), "/session/".into()]
}

fn default_cache_busting_params() -> Vec<String> {
    vec!["v".into(), "_".into(), "cb".into(), "utm_*".into()]
}

fn default_user_agent() -> String {
    "offcache/0.1".into()
}

fn default_max_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_navigation_timeout_ms() -> u64 {
    3_000
}

fn default_retry_after_secs() -> u64 {
    30
}

fn default_update_interval_secs() -> u64 {
    60 * 60
}

fn default_update_prompt_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            cache_prefix: default_cache_prefix(),
            app_version: default_app_version(),
            build_id: None,
            manifest: default_manifest(),
            offline_document: default_offline_document(),
            placeholder_image: default_placeholder_image(),
            allowlist_origins: default_allowlist_origins(),
            excluded_prefixes: default_excluded_prefixes(),
            form_endpoints: default_form_endpoints(),
            static_extensions: default_static_extensions(),
            static_prefixes: default_static_prefixes(),
            cache_busting_params: default_cache_busting_params(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            retry_after_secs: default_retry_after_secs(),
            update_interval_secs: default_update_interval_secs(),
            skip_waiting: true,
            update_prompt_timeout_secs: default_update_prompt_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    /// Background refresh interval, `None` when disabled.
    pub fn update_interval(&self) -> Option<Duration> {
        (self.update_interval_secs > 0).then(|| Duration::from_secs(self.update_interval_secs))
    }

    pub fn update_prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.update_prompt_timeout_secs)
    }

    /// Generation id for the configured deployment:
    /// `{cache_prefix}-v{app_version}[+{build_id}]`.
    pub fn generation_id(&self) -> String {
        match self.build_id.as_deref().filter(|b| !b.is_empty()) {
            Some(build) => format!("{}-v{}+{}", self.cache_prefix, self.app_version, build),
            None => format!("{}-v{}", self.cache_prefix, self.app_version),
        }
    }

    /// Install manifest including the fallback documents, deduplicated in order.
    pub fn install_manifest(&self) -> Vec<String> {
        let mut manifest: Vec<String> = Vec::with_capacity(self.manifest.len() + 2);
        for path in self.manifest.iter().chain([&self.offline_document, &self.placeholder_image]) {
            if !manifest.contains(path) {
                manifest.push(path.clone());
            }
        }
        manifest
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `OFFCACHE_`
    /// 2. TOML file from `OFFCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("OFFCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("OFFCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
