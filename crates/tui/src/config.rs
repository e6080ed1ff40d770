use appauth_core::store::project_dirs;
use appauth_core::AuthConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CLIENT_ID_ENV: &str = "APPAUTH_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "APPAUTH_CLIENT_SECRET";
pub const REDIRECT_URI_ENV: &str = "APPAUTH_REDIRECT_URI";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub restrictions: RestrictionsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Keep the session in memory only.
    pub ephemeral: bool,
    /// Overrides the platform data directory.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictionsConfig {
    pub path: Option<PathBuf>,
    pub poll_interval_secs: u64,
}

impl Default for RestrictionsConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_secs: 5,
        }
    }
}

impl RestrictionsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                }
                Self::default()
            }
        }
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(client_id) = non_empty(CLIENT_ID_ENV) {
            self.auth.client_id = client_id;
        }
        if let Some(secret) = non_empty(CLIENT_SECRET_ENV) {
            self.auth.client_secret = Some(secret);
        }
        if let Some(redirect_uri) = non_empty(REDIRECT_URI_ENV) {
            self.auth.redirect_uri = redirect_uri;
        }
        self
    }

    pub fn restrictions_path(&self, config_path: &Path) -> PathBuf {
        self.restrictions.path.clone().unwrap_or_else(|| {
            config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("restrictions.toml")
        })
    }
}

pub fn config_path() -> PathBuf {
    match project_dirs() {
        Ok(dirs) => dirs.config_dir().join("config.toml"),
        Err(_) => PathBuf::from("config/default.toml"),
    }
}
