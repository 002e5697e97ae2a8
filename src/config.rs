use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR: &str = "playlog";

pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 120;

/// Problems that stop the process before it starts.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required settings: {}. Set them in your environment, .env or config file.", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("Poll interval must be at least one second")]
    InvalidInterval,
    #[error("{key} is not a valid number: {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(" "))]
    Several(Vec<ConfigError>),
}

/// Application configuration, built once at startup and passed down by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub spotify: SpotifyConfig,
    pub database: DatabaseConfig,
    pub poll: PollConfig,
    /// Environment values that failed to parse, reported by `validate`
    #[serde(skip)]
    rejected_env: Vec<ConfigError>,
}

/// Spotify Web API credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Refresh token obtained once through the authorization-code flow
    pub refresh_token: String,
    pub api_base: String,
    pub token_url: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            api_base: "https://api.spotify.com/v1".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
        }
    }
}

/// Listening history store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file (empty = default data dir)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds to sleep between sync cycles
    pub interval_seconds: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Config {
    /// Default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR);
        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration: defaults, then the TOML file (if present), then
    /// `.env` and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Config::default()
        };

        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("Failed to read .env file");
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlay values from an environment lookup. Empty values are ignored;
    /// unparseable ones are kept aside for `validate`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SPOTIFY_CLIENT_ID") {
            self.spotify.client_id = v;
        }
        if let Some(v) = get("SPOTIFY_CLIENT_SECRET") {
            self.spotify.client_secret = v;
        }
        if let Some(v) = get("SPOTIFY_REFRESH_TOKEN") {
            self.spotify.refresh_token = v;
        }
        if let Some(v) = get("PLAYLOG_DB_PATH") {
            self.database.path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("POLL_INTERVAL_SECONDS") {
            match v.trim().parse() {
                Ok(secs) => self.poll.interval_seconds = secs,
                Err(_) => self.rejected_env.push(ConfigError::InvalidNumber {
                    key: "POLL_INTERVAL_SECONDS",
                    value: v,
                }),
            }
        }
    }

    /// Check every setting, reporting all problems in one error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = self.rejected_env.clone();

        let mut missing = Vec::new();
        if self.spotify.client_id.trim().is_empty() {
            missing.push("SPOTIFY_CLIENT_ID");
        }
        if self.spotify.client_secret.trim().is_empty() {
            missing.push("SPOTIFY_CLIENT_SECRET");
        }
        if self.spotify.refresh_token.trim().is_empty() {
            missing.push("SPOTIFY_REFRESH_TOKEN");
        }
        if !missing.is_empty() {
            errors.insert(0, ConfigError::Missing(missing));
        }

        // A rejected interval leaves the previous value in place; don't also
        // complain that it is zero.
        if self.poll.interval_seconds == 0 && self.rejected_env.is_empty() {
            errors.push(ConfigError::InvalidInterval);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::Several(errors)),
        }
    }

    /// Store location: configured path or `<data dir>/playlog/history.sqlite3`
    pub fn database_path(&self) -> Result<PathBuf> {
        match self.database.path {
            Some(ref path) => Ok(path.clone()),
            None => Ok(dirs::data_dir()
                .context("Failed to get data directory")?
                .join(APP_DIR)
                .join("history.sqlite3")),
        }
    }
}
