use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::worker::{CacheNames, RouterConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub name: String,
  /// Cache generation version. Bump to force regeneration after changing
  /// the shell list.
  pub cache_version: String,
  /// Data directory override (default: platform data dir).
  pub data_dir: Option<PathBuf>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      name: "offtask".to_string(),
      cache_version: "1".to_string(),
      data_dir: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Origin whose traffic the router intercepts.
  pub origin: String,
  /// App-shell manifest pre-cached at install.
  pub shell: Vec<String>,
  /// Path prefixes served network-first.
  pub network_first: Vec<String>,
  /// Path prefixes served cache-first.
  pub cache_first: Vec<String>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      shell: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/styles/main.css".to_string(),
        "/scripts/app.js".to_string(),
        "/icons/icon-192.png".to_string(),
        "/icons/icon-512.png".to_string(),
      ],
      network_first: vec![
        "/api/".to_string(),
        "/sync/".to_string(),
        "/analytics/".to_string(),
      ],
      cache_first: vec![
        "/assets/".to_string(),
        "/icons/".to_string(),
        "/images/".to_string(),
        "/sounds/".to_string(),
      ],
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offtask.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offtask/config.yaml
  ///
  /// Every field has a default, so a missing config file is fine.
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
    // Check current directory
    let local = PathBuf::from("offtask.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offtask").join("config.yaml");
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

  /// Resolve the data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.app.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(&self.app.name))
  }

  /// Build the router configuration, optionally overriding the origin.
  pub fn router_config(&self, origin_override: Option<&str>) -> Result<RouterConfig> {
    let raw = origin_override.unwrap_or(&self.worker.origin);
    let origin = Url::parse(raw).map_err(|e| eyre!("Invalid origin '{}': {}", raw, e))?;

    let names = CacheNames::new(&self.app.name, &self.app.cache_version);
    let mut config = RouterConfig::new(origin, names, self.worker.shell.clone());
    config.network_first = self.worker.network_first.clone();
    config.cache_first = self.worker.cache_first.clone();

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_cover_standard_routes() {
    let config = Config::default();
    assert_eq!(config.app.name, "offtask");
    assert!(config.worker.shell.contains(&"/index.html".to_string()));
    assert!(config.worker.network_first.contains(&"/api/".to_string()));
    assert!(config.worker.cache_first.contains(&"/assets/".to_string()));
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config: Config = serde_yaml::from_str("app:\n  cache_version: \"7\"\n").unwrap();
    assert_eq!(config.app.cache_version, "7");
    assert_eq!(config.app.name, "offtask");
    assert!(!config.worker.shell.is_empty());
  }

  #[test]
  fn test_router_config_origin_override() {
    let config = Config::default();
    let router = config.router_config(Some("https://tasks.example")).unwrap();
    assert_eq!(router.origin.as_str(), "https://tasks.example/");
    assert_eq!(router.names.static_gen(), "offtask-v1-static");
  }
}
