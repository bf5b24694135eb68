use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub app: AppConfig,
  /// Override for the directory holding the durable store and response cache
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the remote feed API (e.g. "http://localhost:3000/api")
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Origin the application shell is served from
  pub origin: String,
  /// Same-origin shell paths pre-cached at install time
  pub shell_assets: Vec<String>,
  /// Cross-origin assets pre-cached at install time
  pub external_assets: Vec<String>,
  /// Shell path of the offline substitute page
  pub offline_path: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      shell_assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/offline.html".to_string(),
        "/src/js/utility.js".to_string(),
        "/src/js/app.js".to_string(),
        "/src/js/feed.js".to_string(),
        "/src/css/app.css".to_string(),
        "/src/css/feed.css".to_string(),
        "/src/images/main-image.jpg".to_string(),
      ],
      external_assets: vec![
        "https://fonts.googleapis.com/css?family=Roboto:400,700".to_string(),
        "https://fonts.googleapis.com/icon?family=Material+Icons".to_string(),
        "https://cdnjs.cloudflare.com/ajax/libs/material-design-lite/1.3.0/material.indigo-pink.min.css"
          .to_string(),
        "https://code.getmdl.io/1.3.0/material.min.js".to_string(),
      ],
      offline_path: "/offline.html".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./feedmirror.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/feedmirror/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!("config file not found: {}", p.display())));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(Error::Config(
        "no configuration file found; create one at ~/.config/feedmirror/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("feedmirror.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("feedmirror").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

    serde_yaml::from_str(&contents)
      .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
  }

  /// Directory holding the durable store and response cache databases.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|p| p.join("feedmirror"))
      .ok_or_else(|| Error::Config("could not determine data directory".to_string()))
  }

  /// URL of the entity-collection endpoint.
  pub fn collection_url(&self) -> String {
    format!("{}/posts", self.api.url.trim_end_matches('/'))
  }

  /// Full pre-cache manifest: shell paths resolved against the app origin,
  /// followed by the cross-origin assets.
  pub fn precache_urls(&self) -> Vec<String> {
    let origin = self.app.origin.trim_end_matches('/');
    self
      .app
      .shell_assets
      .iter()
      .map(|path| format!("{}{}", origin, path))
      .chain(self.app.external_assets.iter().cloned())
      .collect()
  }

  /// Absolute URL of the offline substitute page.
  pub fn offline_url(&self) -> String {
    format!(
      "{}{}",
      self.app.origin.trim_end_matches('/'),
      self.app.offline_path
    )
  }
}
