//! Configuration loader and validator for the admin client.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::resource::{ResourceKind, ResourceSpec};

pub const BASE_URL_ENV: &str = "AGRO_ADMIN_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub api: Api,
    /// Optional path overrides keyed by resource name (`agents`, `soil-tests`, ...).
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub token_file: Option<String>,
}

/// Backend API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    pub timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("agro-admin/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Token file path; defaults to `<data_dir>/token`.
    pub fn token_path(&self) -> PathBuf {
        match self.app.token_file.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(p) => PathBuf::from(p),
            None => Path::new(&self.app.data_dir).join("token"),
        }
    }

    /// Base URL with a trailing slash so relative joins keep the API prefix.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.api.base_url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms)
    }

    /// Built-in resource configuration with any path override applied.
    /// Override names are matched as `ResourceKind` parses them.
    pub fn resource(&self, kind: ResourceKind) -> ResourceSpec {
        let spec = kind.spec();
        let path = self
            .resources
            .iter()
            .find(|(name, _)| name.parse::<ResourceKind>().ok() == Some(kind))
            .map(|(_, path)| path);
        match path {
            Some(path) => spec.with_path(path),
            None => spec,
        }
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    let url = Url::parse(&raw).map_err(|_| ConfigError::Invalid("api.base_url must be an absolute URL"))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid("api.base_url must be an absolute URL"));
    }
    Ok(url)
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
/// - `AGRO_ADMIN_BASE_URL` overrides `api.base_url`.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    if let Ok(url) = std::env::var(BASE_URL_ENV) {
        if !url.trim().is_empty() {
            cfg.api.base_url = url;
        }
    }
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.api.timeout_ms == 0 {
        return Err(ConfigError::Invalid("api.timeout_ms must be > 0"));
    }
    if cfg.api.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("api.user_agent must be non-empty"));
    }
    parse_base_url(&cfg.api.base_url)?;
    let mut seen = Vec::new();
    for (name, path) in &cfg.resources {
        let Ok(kind) = name.parse::<ResourceKind>() else {
            return Err(ConfigError::Invalid("resources has an unknown resource name"));
        };
        if seen.contains(&kind) {
            return Err(ConfigError::Invalid("resources names the same resource twice"));
        }
        seen.push(kind);
        if path.trim_matches('/').trim().is_empty() {
            return Err(ConfigError::Invalid("resources paths must be non-empty"));
        }
    }
    Ok(())
}

/// Returns a sample YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  # token_file: "./data/token"

api:
  base_url: "http://localhost:9101/api"
  timeout_ms: 10000
  user_agent: "agro-admin/0.1"

# Override endpoint paths relative to api.base_url.
resources:
  soil-tests: "soil-test/reports"
"#
}
