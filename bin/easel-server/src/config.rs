//! Server configuration, loaded from environment variables at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use easel_core::PollPolicy;
use easel_core::provider::{FallbackConfig, PrimaryConfig};

/// Runtime configuration for easel-server.
///
/// Every field has a default so the server starts without any environment
/// variables set. Without API keys both provider slots run in dry-run mode.
#[derive(Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// Root directory for task, gallery, user and session files and `images/`.
    pub storage_dir: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated CORS allow list; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve the OpenAPI document at `/api-docs/openapi.json`.
    pub enable_docs: bool,

    pub primary_host: String,
    pub primary_api_key: Option<String>,
    pub primary_model: String,

    pub fallback_host: String,
    pub fallback_api_key: Option<String>,
    pub fallback_model: String,

    pub poll_interval: Duration,
    pub poll_attempts: u32,
    pub download_timeout: Duration,

    /// How many tasks survive a retention pass.
    pub task_retention: usize,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env_or("EASEL_BIND", &defaults.bind_address),
            storage_dir: std::env::var_os("EASEL_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            log_level: env_or("EASEL_LOG", &defaults.log_level),
            log_json: std::env::var("EASEL_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cors_allowed_origins: non_empty_env("EASEL_CORS_ORIGINS"),
            enable_docs: std::env::var("EASEL_ENABLE_DOCS")
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or(true),
            primary_host: env_or("PRIMARY_API_HOST", &defaults.primary_host),
            primary_api_key: non_empty_env("PRIMARY_API_KEY"),
            primary_model: env_or("PRIMARY_MODEL", &defaults.primary_model),
            fallback_host: env_or("FALLBACK_API_HOST", &defaults.fallback_host),
            fallback_api_key: non_empty_env("FALLBACK_API_KEY"),
            fallback_model: env_or("FALLBACK_MODEL", &defaults.fallback_model),
            poll_interval: Duration::from_millis(parse_env("EASEL_POLL_INTERVAL_MS", 2000)),
            poll_attempts: parse_env("EASEL_POLL_ATTEMPTS", defaults.poll_attempts),
            download_timeout: Duration::from_secs(parse_env("EASEL_DOWNLOAD_TIMEOUT_SECS", 60)),
            task_retention: parse_env("EASEL_TASK_RETENTION", defaults.task_retention),
        }
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.storage_dir.join("tasks.json")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.storage_dir.join("metadata.json")
    }

    pub fn users_path(&self) -> PathBuf {
        self.storage_dir.join("users.json")
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.storage_dir.join("sessions.json")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.storage_dir.join("images")
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            max_attempts: self.poll_attempts.max(1),
        }
    }

    /// `None` when no primary key is configured.
    pub fn primary(&self) -> Option<PrimaryConfig> {
        self.primary_api_key.as_ref().map(|key| PrimaryConfig {
            host: self.primary_host.clone(),
            api_key: key.clone(),
            model: self.primary_model.clone(),
        })
    }

    /// `None` when no fallback key is configured.
    pub fn fallback(&self) -> Option<FallbackConfig> {
        self.fallback_api_key.as_ref().map(|key| FallbackConfig {
            host: self.fallback_host.clone(),
            api_key: key.clone(),
            model: self.fallback_model.clone(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_owned(),
            storage_dir: PathBuf::from("storage"),
            log_level: "info".to_owned(),
            log_json: false,
            cors_allowed_origins: None,
            enable_docs: true,
            primary_host: "https://grsai.dakka.com.cn".to_owned(),
            primary_api_key: None,
            primary_model: "nano-banana-pro".to_owned(),
            fallback_host: "https://api.apimart.ai".to_owned(),
            fallback_api_key: None,
            fallback_model: "gemini-3-pro-image-preview".to_owned(),
            poll_interval: Duration::from_secs(2),
            poll_attempts: 150,
            download_timeout: Duration::from_secs(60),
            task_retention: easel_core::task::DEFAULT_RETENTION,
        }
    }
}

// Keys stay out of debug output.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("storage_dir", &self.storage_dir)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("enable_docs", &self.enable_docs)
            .field("primary_host", &self.primary_host)
            .field("primary_has_key", &self.primary_api_key.is_some())
            .field("primary_model", &self.primary_model)
            .field("fallback_host", &self.fallback_host)
            .field("fallback_has_key", &self.fallback_api_key.is_some())
            .field("fallback_model", &self.fallback_model)
            .field("poll_interval", &self.poll_interval)
            .field("poll_attempts", &self.poll_attempts)
            .field("download_timeout", &self.download_timeout)
            .field("task_retention", &self.task_retention)
            .finish()
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
