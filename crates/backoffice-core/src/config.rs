//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! back-office API location, auth endpoint paths, request/retry tuning and
//! which credential backend holds the session.
//!
//! Configuration is stored at `~/.config/backoffice/config.json`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::RetryPolicy;
use crate::auth::SessionEndpoints;
use crate::gateway::GatewayConfig;

/// Application name used for config/data directory paths
const APP_NAME: &str = "backoffice";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const ENV_API_URL: &str = "BACKOFFICE_API_URL";

/// Environment variable overriding `credential_backend`
pub const ENV_CREDENTIAL_BACKEND: &str = "BACKOFFICE_CREDENTIAL_BACKEND";

/// Where the session (token pair and user profile) is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for CredentialBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("Unknown credential backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub refresh_path: String,
    pub login_path: String,
    pub logout_path: String,
    /// Client route shown after a forced logout
    pub login_route: String,
    pub request_timeout_secs: u64,
    pub max_rate_limit_retries: u32,
    pub initial_backoff_ms: u64,
    pub credential_backend: CredentialBackend,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/auth/login".to_string(),
            logout_path: "/auth/logout".to_string(),
            login_route: "/auth/login".to_string(),
            request_timeout_secs: 30,
            max_rate_limit_retries: 3,
            initial_backoff_ms: 1000,
            credential_backend: CredentialBackend::File,
            last_username: None,
        }
    }
}

impl Config {
    /// Load from `path` (the default location when `None`), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load_from(&Self::config_path()?)?,
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => self.save_to(path),
            None => self.save_to(&Self::config_path()?),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(backend) = lookup(ENV_CREDENTIAL_BACKEND) {
            match backend.parse() {
                Ok(backend) => self.credential_backend = backend,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_CREDENTIAL_BACKEND),
            }
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the session file.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// The API base URL, always with a trailing slash so relative joins
    /// stay under it.
    pub fn base_url(&self) -> Result<Url> {
        let mut raw = self.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).with_context(|| format!("Invalid API base URL: {}", self.api_base_url))
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url()?
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }

    pub fn session_endpoints(&self) -> Result<SessionEndpoints> {
        Ok(SessionEndpoints {
            login: self.endpoint(&self.login_path)?,
            refresh: self.endpoint(&self.refresh_path)?,
            logout: self.endpoint(&self.logout_path)?,
        })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            refresh_path: self.refresh_path.clone(),
            login_route: self.login_route.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_rate_limit_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
        }
    }
}
