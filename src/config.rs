use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub store: StoreConfig,
  pub server: ServerConfig,
  pub cache: CacheConfig,
  pub log: LogConfig,
  pub remote: RemoteConfig,
}

/// How to reach the store.
///
/// The embedded backend reads `database`/`path`, the keep-alive settings and
/// the timeout. The remote backend reads credentials, the transport toggles
/// and the timeout, and finds its server through [`RemoteConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub host: String,
  pub port: u16,
  pub user: String,
  pub password: String,
  /// Resource-set name
  pub database: String,
  /// Explicit database file; `:memory:` for a throwaway store
  pub path: Option<PathBuf>,
  /// Transport encryption (https for the remote backend)
  pub encrypt: bool,
  /// Accept certificates that don't chain to a trusted root
  pub trust_server_certificate: bool,
  pub keep_alive: bool,
  pub keep_alive_secs: u64,
  pub timeout_secs: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      host: "localhost".to_string(),
      port: 1433,
      user: "sa".to_string(),
      password: String::new(),
      database: "Real_Estate_Agency".to_string(),
      path: None,
      encrypt: false,
      trust_server_certificate: true,
      keep_alive: true,
      keep_alive_secs: 60,
      timeout_secs: 30,
    }
  }
}

impl StoreConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn keep_alive_interval(&self) -> Duration {
    Duration::from_secs(self.keep_alive_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub bind: String,
  pub port: u16,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: "0.0.0.0".to_string(),
      port: 3001,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// How long a cached read stays fresh
  pub stale_secs: u64,
  /// How long a cached read may be served (stale) before it is evicted
  pub gc_secs: u64,
  pub health_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: 5 * 60,
      gc_secs: 10 * 60,
      health_interval_secs: 30,
    }
  }
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_secs)
  }

  pub fn gc_time(&self) -> Duration {
    Duration::from_secs(self.gc_secs)
  }

  pub fn health_interval(&self) -> Duration {
    Duration::from_secs(self.health_interval_secs.max(1))
  }
}

/// Where `check` reaches a running server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// Base URL of the API. Unset means this host on `server.port`
  pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Also write logs to this file
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./estate-gate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/estate-gate/config.yaml
  ///
  /// With no file at all every option keeps its local-development default.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    config.with_env_overrides(|key| std::env::var(key).ok())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("estate-gate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("estate-gate").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not to an empty map
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Apply overrides from a variable lookup (the process environment in
  /// production).
  pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(v) = lookup("DB_HOST") {
      self.store.host = v;
    }
    if let Some(v) = lookup("DB_PORT") {
      self.store.port = parse_var("DB_PORT", &v)?;
    }
    if let Some(v) = lookup("DB_USER") {
      self.store.user = v;
    }
    if let Some(v) = lookup("DB_PASSWORD") {
      self.store.password = v;
    }
    if let Some(v) = lookup("DB_NAME") {
      self.store.database = v;
    }
    if let Some(v) = lookup("DB_PATH") {
      self.store.path = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("DB_ENCRYPT") {
      self.store.encrypt = parse_bool("DB_ENCRYPT", &v)?;
    }
    if let Some(v) = lookup("DB_TRUST_SERVER_CERTIFICATE") {
      self.store.trust_server_certificate = parse_bool("DB_TRUST_SERVER_CERTIFICATE", &v)?;
    }
    if let Some(v) = lookup("DB_KEEP_ALIVE") {
      self.store.keep_alive = parse_bool("DB_KEEP_ALIVE", &v)?;
    }
    if let Some(v) = lookup("API_PORT") {
      self.server.port = parse_var("API_PORT", &v)?;
    }
    if let Some(v) = lookup("API_URL") {
      self.remote.url = Some(v);
    }
    Ok(self)
  }

  /// Base URL of the API server for the remote backend.
  pub fn remote_url(&self) -> String {
    match &self.remote.url {
      Some(url) => url.clone(),
      None => {
        let scheme = if self.store.encrypt { "https" } else { "http" };
        format!("{}://localhost:{}/", scheme, self.server.port)
      }
    }
  }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  value
    .trim()
    .parse()
    .map_err(|e| eyre!("Invalid value for {}: '{}' ({})", key, value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(eyre!("Invalid value for {}: '{}' (expected true/false)", key, value)),
  }
}
