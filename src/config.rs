use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::types::User;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub tracker: TrackerConfig,
  /// The user mutations are attributed to (creator of optimistic issues).
  pub actor: ActorConfig,
  #[serde(default)]
  pub defaults: ListDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
  /// Base URL of the tracker API, e.g. "https://tracker.example.com/api"
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorConfig {
  pub id: String,
  pub name: String,
  pub email: String,
}

impl ActorConfig {
  pub fn to_user(&self) -> User {
    User {
      id: self.id.clone(),
      name: self.name.clone(),
      email: self.email.clone(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDefaults {
  /// Default page size for issue listings when the filter leaves it unset
  #[serde(default = "default_page_limit")]
  pub page_limit: u32,
}

impl Default for ListDefaults {
  fn default() -> Self {
    Self {
      page_limit: default_page_limit(),
    }
  }
}

fn default_page_limit() -> u32 {
  10
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./trackstore.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/trackstore/config.yaml
  /// 4. ~/.config/trackstore/config.yaml
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
        "No configuration file found. Create one at ~/.config/trackstore/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("trackstore.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("trackstore").join("config.yaml");
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

  /// Get the tracker API token from environment variables.
  ///
  /// Checks TRACKSTORE_TOKEN first, then TRACKER_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("TRACKSTORE_TOKEN")
      .or_else(|_| std::env::var("TRACKER_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Tracker API token not found. Set TRACKSTORE_TOKEN or TRACKER_API_TOKEN environment variable."
        )
      })
  }
}
