use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub offline: OfflineConfig,
  pub retry: RetryConfig,
  pub cache: CacheConfig,
  /// Custom title for the status view header (defaults to "hacienda")
  pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Probed to decide whether we are online
  pub health_path: String,
  pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000/api/".to_string(),
      health_path: "health".to_string(),
      request_timeout_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// Master switch for the worker, the queue and the read cache
  pub enabled: bool,
  /// Where the store and logs live (default: $XDG_DATA_HOME/hacienda)
  pub data_dir: Option<PathBuf>,
  pub script_path: String,
  pub scope: String,
  /// Value of the Service-Worker-Allowed header served with the script
  pub max_scope: String,
  pub update_interval_secs: u64,
  pub sync_interval_secs: u64,
  pub probe_interval_secs: u64,
  pub ack_timeout_secs: u64,
  /// Cached reads refreshed after a successful sync
  pub refresh_limit: usize,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      data_dir: None,
      script_path: "/sw.js".to_string(),
      scope: "/".to_string(),
      max_scope: "/".to_string(),
      update_interval_secs: 30 * 60,
      sync_interval_secs: 5 * 60,
      probe_interval_secs: 15,
      ack_timeout_secs: 120,
      refresh_limit: 20,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub base_delay_secs: u64,
  pub max_delay_secs: u64,
  /// Attempts after which a mutation is flagged as stalled (it is still retried)
  pub max_attempts: u32,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      base_delay_secs: 5,
      max_delay_secs: 30 * 60,
      max_attempts: 8,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub ttl_secs: u64,
  pub max_entries: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: 24 * 60 * 60,
      max_entries: 500,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hacienda.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hacienda/config.yaml
  ///
  /// With no file anywhere the defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("hacienda.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hacienda").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file deserializes to unit, not to an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get the API bearer token from environment variables.
  ///
  /// Checks HACIENDA_API_TOKEN first, then API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("HACIENDA_API_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set HACIENDA_API_TOKEN or API_TOKEN environment variable.")
      })
  }

  /// Directory holding the offline store and the log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.offline.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("hacienda"))
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("offline.db"))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.request_timeout_secs)
  }
}
