use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  pub push: Option<PushConfig>,
  /// Override for the queue/cache data directory
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Origin of the backend, e.g. "http://localhost:4000"
  pub url: String,
  /// Path of the mutation endpoint on that origin
  #[serde(default = "default_mutation_path")]
  pub mutation_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Name of the current cache generation; bump to invalidate old entries
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// Path of the precached offline fallback page
  #[serde(default = "default_offline_path")]
  pub offline_path: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_cache_version(),
      offline_path: default_offline_path(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
  pub project_id: String,
  #[serde(default = "default_push_endpoint")]
  pub endpoint: String,
}

fn default_mutation_path() -> String {
  "/api/solicitudes".to_string()
}

fn default_cache_version() -> String {
  "solrelay-basic-v1".to_string()
}

fn default_offline_path() -> String {
  "/offline.html".to_string()
}

fn default_push_endpoint() -> String {
  "https://fcm.googleapis.com".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./solrelay.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/solrelay/config.yaml
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
        "No configuration file found. Create one at ~/.config/solrelay/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("solrelay.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("solrelay").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Directory holding the queue database, asset cache and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("solrelay"))
  }
}
