use anyhow::{Context, Result, bail};
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::{env, fs, net::SocketAddr, path::Path, time::Duration};

use crate::rate_limit::{KeyExtractor, RateLimitPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default)]
    pub users: UsersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_bind")]
    pub bind: String,
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where the rate limit key comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    #[default]
    PeerIp,
    PeerAddr,
    Header,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rpm")]
    pub requests_per_minute: f64,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,
    #[serde(default)]
    pub key: KeySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_header: Option<String>,
    /// Opt-in sweep of idle buckets. Unset keeps every bucket for the
    /// lifetime of the process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_eviction_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

// Defaults
fn default_http_bind() -> String { "0.0.0.0:8080".to_string() }
fn default_env() -> String { "development".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }
fn default_rpm() -> f64 { crate::rate_limit::policy::DEFAULT_REQUESTS_PER_MINUTE }
fn default_burst() -> u32 { crate::rate_limit::policy::DEFAULT_BURST_SIZE }
fn default_skip_paths() -> Vec<String> {
    crate::rate_limit::policy::DEFAULT_SKIP_PATHS
        .iter()
        .map(|p| p.to_string())
        .collect()
}
fn default_page_size() -> usize { crate::user::service::DEFAULT_PAGE_SIZE }
fn default_max_page_size() -> usize { crate::user::service::MAX_PAGE_SIZE }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            env: default_env(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_rpm(),
            burst_size: default_burst(),
            skip_paths: default_skip_paths(),
            key: KeySource::default(),
            key_header: None,
            idle_eviction_secs: None,
        }
    }
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl RateLimitingConfig {
    /// Build the limiter policy, rejecting invalid rates and key settings.
    pub fn policy(&self) -> Result<RateLimitPolicy> {
        let key_extractor = match self.key {
            KeySource::PeerIp => KeyExtractor::PeerIp,
            KeySource::PeerAddr => KeyExtractor::PeerAddr,
            KeySource::Header => {
                let name = self
                    .key_header
                    .as_deref()
                    .filter(|name| !name.trim().is_empty())
                    .context("rate_limiting.key = \"header\" requires rate_limiting.key_header")?;
                let name = HeaderName::try_from(name.trim())
                    .with_context(|| format!("Invalid rate_limiting.key_header: {}", name))?;
                KeyExtractor::Header(name)
            }
        };

        let policy = RateLimitPolicy::new(self.requests_per_minute, self.burst_size)
            .context("Invalid rate_limiting settings")?
            .with_key_extractor(key_extractor)
            .with_skip_paths(self.skip_paths.iter().cloned());
        Ok(policy)
    }

    pub fn idle_eviction(&self) -> Option<Duration> {
        self.idle_eviction_secs.map(Duration::from_secs)
    }

    /// Seconds for an empty bucket to refill completely.
    fn full_refill_secs(&self) -> f64 {
        f64::from(self.burst_size) * 60.0 / self.requests_per_minute
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env files if they exist
        dotenvy::from_filename(".env.local").ok();
        dotenvy::dotenv().ok();

        let mut config = match Self::locate() {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides(|name| env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// First existing config file, honouring `TOLLGATE_CONFIG`.
    fn locate() -> Option<String> {
        if let Ok(path) = env::var("TOLLGATE_CONFIG") {
            return Some(path);
        }

        ["./tollgate.toml", "./config.toml", "/etc/tollgate/config.toml"]
            .into_iter()
            .find(|path| Path::new(path).exists())
            .map(str::to_string)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))
    }

    /// Parse TOML after substituting `${VAR}` references from the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content, |name| env::var(name).ok());
        Ok(toml::from_str(&content)?)
    }

    /// `PORT` replaces the bind port, `TOLLGATE_ENV` (or `ENV`) the environment name.
    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").filter(|p| !p.trim().is_empty()) {
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or(self.server.bind.as_str());
            self.server.bind = format!("{}:{}", host, port.trim());
        }

        if let Some(env_name) = lookup("TOLLGATE_ENV").or_else(|| lookup("ENV")) {
            self.server.env = env_name;
        }
    }

    /// Reject settings that would only fail once traffic arrives.
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid server.bind address: {}", self.server.bind))?;

        if self.rate_limiting.enabled {
            self.rate_limiting.policy()?;

            if let Some(secs) = self.rate_limiting.idle_eviction_secs {
                let refill = self.rate_limiting.full_refill_secs();
                if (secs as f64) < refill {
                    bail!(
                        "rate_limiting.idle_eviction_secs ({}) must be at least the full refill time ({:.0}s)",
                        secs,
                        refill.ceil()
                    );
                }
            }
        }

        if self.users.default_page_size == 0 {
            bail!("users.default_page_size must be greater than zero");
        }
        if self.users.default_page_size > self.users.max_page_size {
            bail!(
                "users.default_page_size ({}) exceeds users.max_page_size ({})",
                self.users.default_page_size,
                self.users.max_page_size
            );
        }

        Ok(())
    }
}

/// Substitute `${VAR_NAME}` with values from `lookup`; unknown names become empty.
fn substitute_env_vars<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = content.to_string();
    let mut search_from = 0;

    while let Some(offset) = result[search_from..].find("${") {
        let start = search_from + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = lookup(var_name).unwrap_or_default();
        result.replace_range(start..start + end + 1, &value);
        search_from = start + value.len();
    }

    result
}
