//! Configuration and credential storage

mod credentials;

pub use credentials::FileSecretStore;

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Backend used when nothing is configured (local development server).
pub const DEFAULT_BASE_URL: &str = "http://localhost:18080";

/// Application configuration
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend origin, without the `/api` suffix
    pub base_url: Option<String>,
    /// Per-request deadline
    pub request_timeout_secs: Option<u64>,
    /// How long a successful list stays fresh
    pub coalesce_cooldown_ms: Option<u64>,
    /// Log every request/response at info level
    #[serde(default)]
    pub enable_network_logs: bool,
    /// Company whose data is shown; personal mode when unset
    pub active_company_id: Option<i64>,
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "expense-cli", "expense-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn api_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(crate::api::transport::DEFAULT_TIMEOUT)
    }

    pub fn coalesce_cooldown(&self) -> Duration {
        self.coalesce_cooldown_ms
            .map(Duration::from_millis)
            .unwrap_or(crate::api::coalesce::DEFAULT_COOLDOWN)
    }

    /// Validate and store a new backend origin.
    pub fn set_base_url(&mut self, input: &str) -> Result<String> {
        let url = normalize_base_url(input)?;
        self.base_url = Some(url.clone());
        Ok(url)
    }
}

/// Accept `host:port`, a full origin, or an origin ending in `/api`.
pub fn normalize_base_url(input: &str) -> Result<String> {
    let mut url = input.trim().trim_end_matches('/').to_string();
    if url.is_empty() {
        bail!("Base URL cannot be empty");
    }
    if let Some(stripped) = url.strip_suffix("/api") {
        url = stripped.trim_end_matches('/').to_string();
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("http://{}", url);
    }

    let parsed = url::Url::parse(&url).with_context(|| format!("Invalid base URL: {}", input))?;
    if parsed.host_str().is_none() {
        bail!("Base URL has no host: {}", input);
    }
    Ok(url)
}
