use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::QueryOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub upstream: UpstreamConfig,
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub session: SessionConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
  /// Base URL of the upstream REST API (e.g. "https://api.example.com")
  pub url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  15
}

impl UpstreamConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_listen")]
  pub listen: SocketAddr,
  /// Public URL of this BFF, used by the client commands
  #[serde(default = "default_public_url")]
  pub public_url: String,
}

fn default_listen() -> SocketAddr {
  SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_public_url() -> String {
  "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: default_listen(),
      public_url: default_public_url(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
  #[serde(default = "default_cookie_name")]
  pub cookie_name: String,
  /// Session lifetime in seconds (default: 3 days)
  #[serde(default = "default_max_age")]
  pub max_age_secs: u64,
  /// Re-issue the session token once it is older than this (default: 24h)
  #[serde(default = "default_update_age")]
  pub update_age_secs: u64,
}

fn default_cookie_name() -> String {
  "eventcert.session".to_string()
}

fn default_max_age() -> u64 {
  3 * 24 * 60 * 60
}

fn default_update_age() -> u64 {
  24 * 60 * 60
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      cookie_name: default_cookie_name(),
      max_age_secs: default_max_age(),
      update_age_secs: default_update_age(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Disable to send every server action straight to the upstream
  #[serde(default = "default_true")]
  pub server_enabled: bool,
  #[serde(default)]
  pub events: QueryPolicyConfig,
  #[serde(default)]
  pub participants: QueryPolicyConfig,
}

fn default_true() -> bool {
  true
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      server_enabled: true,
      events: QueryPolicyConfig::default(),
      participants: QueryPolicyConfig::default(),
    }
  }
}

/// Overrides for a client query preset; unset fields keep the preset value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryPolicyConfig {
  pub stale_secs: Option<u64>,
  pub gc_secs: Option<u64>,
  pub retry: Option<u32>,
  pub refetch_on_window_focus: Option<bool>,
}

impl QueryPolicyConfig {
  pub fn apply(&self, mut options: QueryOptions) -> QueryOptions {
    if let Some(secs) = self.stale_secs {
      options.stale_time = Duration::from_secs(secs);
    }
    if let Some(secs) = self.gc_secs {
      options.gc_time = Duration::from_secs(secs);
    }
    if let Some(retry) = self.retry {
      options.retry = retry;
    }
    if let Some(focus) = self.refetch_on_window_focus {
      options.refetch_on_window_focus = focus;
    }
    options
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is unset
  #[serde(default = "default_level")]
  pub level: String,
  /// Also write daily-rolling log files into this directory
  pub directory: Option<PathBuf>,
}

fn default_level() -> String {
  "info".to_string()
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_level(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./eventcert.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/eventcert/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/eventcert/config.yaml\n\
                 See eventcert.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("eventcert.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("eventcert").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Query options for the events resource with configured overrides.
  pub fn events_query(&self) -> QueryOptions {
    self.cache.events.apply(QueryOptions::events())
  }

  /// Query options for the participants resource with configured overrides.
  pub fn participants_query(&self) -> QueryOptions {
    self.cache.participants.apply(QueryOptions::participants())
  }

  /// Secret used to sign session tokens.
  ///
  /// Read from EVENTCERT_AUTH_SECRET, falling back to AUTH_SECRET.
  pub fn get_auth_secret() -> Result<String> {
    std::env::var("EVENTCERT_AUTH_SECRET")
      .or_else(|_| std::env::var("AUTH_SECRET"))
      .map_err(|_| {
        eyre!("Session secret not found. Set EVENTCERT_AUTH_SECRET or AUTH_SECRET environment variable.")
      })
  }

  /// Secret the upstream signs its bearer tokens with.
  ///
  /// Read from EVENTCERT_UPSTREAM_JWT_SECRET, falling back to JWT_SECRET.
  pub fn get_upstream_jwt_secret() -> Result<String> {
    std::env::var("EVENTCERT_UPSTREAM_JWT_SECRET")
      .or_else(|_| std::env::var("JWT_SECRET"))
      .map_err(|_| {
        eyre!(
          "Upstream JWT secret not found. Set EVENTCERT_UPSTREAM_JWT_SECRET or JWT_SECRET environment variable."
        )
      })
  }
}
