use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};
use crate::workspace::WorkspaceConfig;

pub const DEFAULT_CONFIG_FILE: &str = "clone-apps.toml";

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    /// An empty document; every table falls back to its defaults.
    pub fn empty() -> Self {
        Self {
            path: PathBuf::from("<defaults>"),
            value: Value::Table(Default::default()),
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            let tbl = cur.as_table()?;
            cur = tbl.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let owned = v.clone();
        let parsed = owned.try_into().map_err(|e| {
            Error::msg(format!(
                "failed to deserialize config at '{}' in {}: {e}",
                path,
                self.path.display()
            ))
        })?;
        Ok(Some(parsed))
    }

    pub fn settings(&self) -> Result<Settings> {
        Ok(Settings {
            platform: self.deserialize_path("platform")?.unwrap_or_default(),
            transfer: self.deserialize_path("transfer")?.unwrap_or_default(),
            export: self.deserialize_path("export")?.unwrap_or_default(),
            workspace: self.deserialize_path("workspace")?.unwrap_or_default(),
        })
    }
}

fn default_api_env() -> Option<String> {
    Some("CF_API".into())
}

fn default_token_env() -> Option<String> {
    Some("CF_ACCESS_TOKEN".into())
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    1800
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub api: Option<String>,
    #[serde(default = "default_api_env")]
    pub api_env: Option<String>,
    pub token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: Option<String>,
    pub skip_ssl_validation: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api: None,
            api_env: default_api_env(),
            token: None,
            token_env: default_token_env(),
            skip_ssl_validation: false,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl PlatformConfig {
    pub fn resolve_api(&self) -> Result<String> {
        resolve_required_string_field("platform.api", self.api.as_deref(), self.api_env.as_deref())
            .map(|api| api.trim_end_matches('/').to_string())
    }

    pub fn resolve_token(&self) -> Result<String> {
        resolve_required_string_field(
            "platform.token",
            self.token.as_deref(),
            self.token_env.as_deref(),
        )
    }
}

fn default_concurrency() -> usize {
    5
}

fn default_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_jitter_percent() -> u32 {
    50
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_jitter_percent")]
    pub max_jitter_percent: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            attempts: default_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_jitter_percent: default_max_jitter_percent(),
        }
    }
}

fn default_excluded_orgs() -> Vec<String> {
    vec!["system".into(), "p-spring-cloud-services".into()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    #[serde(default = "default_excluded_orgs")]
    pub excluded_orgs: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            excluded_orgs: default_excluded_orgs(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub platform: PlatformConfig,
    pub transfer: TransferConfig,
    pub export: ExportConfig,
    pub workspace: WorkspaceConfig,
}

/// Literal value first, then the named environment variable.
fn resolve_string_field(literal: Option<&str>, env_key: Option<&str>) -> Option<String> {
    let non_empty = |v: &str| Some(v.trim().to_string()).filter(|s| !s.is_empty());
    literal.and_then(non_empty).or_else(|| {
        env_key
            .and_then(non_empty)
            .and_then(|k| std::env::var(k).ok())
            .and_then(|v| non_empty(&v))
    })
}

fn resolve_required_string_field(
    cfg_path: &str,
    literal: Option<&str>,
    env_key: Option<&str>,
) -> Result<String> {
    resolve_string_field(literal, env_key).ok_or_else(|| match env_key.map(str::trim) {
        Some(k) if !k.is_empty() => {
            Error::msg(format!("{cfg_path} is empty (also checked env var '{k}')"))
        }
        _ => Error::msg(format!("{cfg_path} is empty")),
    })
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

/// Loads the explicit config file, or the default one when it exists, or nothing.
pub fn load_or_default(explicit: Option<&Path>) -> Result<ConfigDoc> {
    match explicit {
        Some(path) => load(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                load(default)
            } else {
                Ok(ConfigDoc::empty())
            }
        }
    }
}
