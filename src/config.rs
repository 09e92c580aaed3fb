//! Configuration management
//!
//! Loads a TOML file and overlays `UMNYESETI__SECTION__KEY` environment
//! variables. Each `[[accounts]]` entry becomes one independent monitor.

use crate::cookies::CookieFile;
use crate::mapper::{Locale, Zone};
use crate::models::Credentials;
use crate::poller::MonitorSettings;
use crate::portal::umnyeseti::{PortalConfig, BASE_URL};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Polls more often than this are clamped up to it
pub const MIN_POLL_INTERVAL_MINUTES: u64 = 15;

/// Longer intervals are rejected as misconfiguration (one week)
pub const MAX_POLL_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

const ENV_PREFIX: &str = "UMNYESETI";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Portal accounts (each polled independently)
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    /// Directory for cookie and issue files
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

/// Configuration for a single subscriber account
#[derive(Deserialize, Clone)]
pub struct AccountConfig {
    /// Stable id for file names and logs (defaults to the login)
    #[serde(default)]
    pub name: Option<String>,

    pub login: String,

    pub password: String,

    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u64,

    /// Language tag for derived strings, e.g. "ru" or "en"
    #[serde(default = "default_locale")]
    pub locale: String,

    /// IANA time zone for dates (system zone when unset)
    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("name", &self.name)
            .field("login", &self.login)
            .field("verify_tls", &self.verify_tls)
            .field("poll_interval_minutes", &self.poll_interval_minutes)
            .field("locale", &self.locale)
            .field("timezone", &self.timezone)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("umnyeseti"))
        .unwrap_or_else(|| PathBuf::from(".umnyeseti"))
}

fn default_verify_tls() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    MIN_POLL_INTERVAL_MINUTES
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_base_url() -> String {
    BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the given file, or the first one found in
    /// the standard locations. Environment variables override file values.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::search_paths().into_iter().find(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        match &path {
            Some(path) => {
                tracing::debug!("Loading config from: {}", path.display());
                builder = builder.add_source(config::File::from(path.as_path()));
            }
            None => tracing::debug!("No config file found, using defaults"),
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read config")?
            .try_deserialize()
            .context("Failed to parse config")?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()
            .context("Failed to read config")?
            .try_deserialize()
            .context("Failed to parse config")?;

        config.validate()?;
        Ok(config)
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/umnyeseti/config.toml"),
        ];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/umnyeseti/config.toml"));
        }
        paths
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for account in &self.accounts {
            if account.login.trim().is_empty() {
                bail!("Account login must not be empty");
            }
            if !seen.insert(account.id()) {
                bail!("Duplicate account: {}", account.id());
            }
            if account.poll_interval_minutes > MAX_POLL_INTERVAL_MINUTES {
                bail!(
                    "[{}] Poll interval {} min exceeds the maximum of {} min",
                    account.id(),
                    account.poll_interval_minutes,
                    MAX_POLL_INTERVAL_MINUTES
                );
            }
            account.zone()?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout)
    }
}

impl AccountConfig {
    /// Stable account id, safe to use in file names
    pub fn id(&self) -> String {
        let raw = self.name.as_deref().unwrap_or(&self.login);
        raw.chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    /// Requested poll interval, clamped to the minimum
    pub fn poll_interval(&self) -> Duration {
        let minutes = if self.poll_interval_minutes < MIN_POLL_INTERVAL_MINUTES {
            tracing::warn!(
                "[{}] Poll interval {} min is below the minimum, using {} min",
                self.id(),
                self.poll_interval_minutes,
                MIN_POLL_INTERVAL_MINUTES
            );
            MIN_POLL_INTERVAL_MINUTES
        } else {
            self.poll_interval_minutes
        };
        Duration::from_secs(minutes.saturating_mul(60))
    }

    pub fn locale(&self) -> Locale {
        Locale::from_tag(&self.locale)
    }

    pub fn zone(&self) -> Result<Zone> {
        match self.timezone.as_deref().map(str::trim) {
            None | Some("") => Ok(Zone::System),
            Some(name) => Zone::from_name(name).map_err(anyhow::Error::msg),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            login: self.login.clone(),
            password: self.password.clone(),
        }
    }

    pub fn monitor_settings(&self) -> Result<MonitorSettings> {
        Ok(MonitorSettings {
            id: self.id(),
            credentials: self.credentials(),
            locale: self.locale(),
            zone: self.zone()?,
            interval: self.poll_interval(),
        })
    }

    pub fn portal_config(&self, global: &GlobalConfig, timeout: Duration) -> PortalConfig {
        PortalConfig {
            name: self.id(),
            base_url: self.base_url.clone(),
            verify_tls: self.verify_tls,
            timeout,
            cookie_file: Some(CookieFile::for_account(&global.state_dir, &self.id())),
        }
    }
}
