use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::{Role, Session};
use crate::support::RetryPolicy;

const CONFIG_ENV: &str = "HELPLINE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  pub session: SessionConfig,
  #[serde(default)]
  pub sync: SyncSettings,
  #[serde(default)]
  pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the support API (e.g., "https://hr.example.com/api/")
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

impl ServerConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
  pub user_id: u64,
  /// Employee record linked to the user; tickets are owned by it
  pub employee_id: Option<u64>,
  #[serde(default)]
  pub role: Role,
}

/// Tuning of automatic retries and outbox sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  /// Attempts per read, including the first
  pub retry_attempts: u32,
  pub retry_backoff_ms: u64,
  /// Failed sends after which an outbox entry waits for a manual retry
  pub attempt_cap: u32,
  /// Sweep period while a ticket is open
  pub sweep_interval_secs: u64,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      retry_attempts: 2,
      retry_backoff_ms: 1000,
      attempt_cap: 5,
      sweep_interval_secs: 30,
    }
  }
}

impl SyncSettings {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.retry_attempts.max(1),
      backoff: Duration::from_millis(self.retry_backoff_ms),
    }
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// Location of the local database (defaults to the data directory)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration.
  ///
  /// An explicit path (argument, then `HELPLINE_CONFIG`) must exist. Without
  /// one the first of `./helpline.yaml` and
  /// `$XDG_CONFIG_HOME/helpline/config.yaml` is used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let explicit = explicit_path
      .map(Path::to_path_buf)
      .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    if let Some(path) = explicit {
      if !path.is_file() {
        return Err(eyre!("Config file not found: {}", path.display()));
      }
      return Self::load_from_path(&path);
    }

    let candidates = Self::search_paths();
    match candidates.iter().find(|p| p.is_file()) {
      Some(path) => Self::load_from_path(path),
      None => {
        let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
        Err(eyre!(
          "No configuration file found (searched {}). See config.example.yaml for the format.",
          searched.join(", ")
        ))
      }
    }
  }

  /// Implicit config locations, in priority order.
  fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("helpline.yaml")];
    paths.extend(dirs::config_dir().map(|dir| dir.join("helpline").join("config.yaml")));
    paths
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.sync.attempt_cap == 0 {
      return Err(eyre!("sync.attempt_cap must be at least 1"));
    }
    Ok(config)
  }

  /// Get the support API token from environment variables.
  ///
  /// Checks HELPLINE_TOKEN first, then SUPPORT_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("HELPLINE_TOKEN")
      .or_else(|_| std::env::var("SUPPORT_API_TOKEN"))
      .map_err(|_| {
        eyre!("Support API token not found. Set HELPLINE_TOKEN or SUPPORT_API_TOKEN environment variable.")
      })
  }

  /// Build the session the service acts as.
  pub fn session(&self, credential: String) -> Session {
    Session::new(
      self.session.user_id,
      self.session.employee_id,
      self.session.role,
      credential,
    )
  }
}
