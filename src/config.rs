//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/ris.sqlite"
//!
//! [source]
//! github_api_url = "https://api.github.com"
//! exclude_globs = ["**/*.png"]
//!
//! [provider]
//! base_url = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [logging]
//! filter = "info"
//! ```
//!
//! Only `[db]` is required; every other section has defaults.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Parent directory for temporary workspaces; the system temp dir
    /// when unset.
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            github_api_url: default_github_api_url(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            workspace_dir: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Prepended to `vsCode`, `vsMarkup`, ... when creating indexes.
    #[serde(default)]
    pub index_name_prefix: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            index_name_prefix: String::new(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    5
}

/// Credential references resolve to `<env_prefix><REF>_USERNAME` and
/// `<env_prefix><REF>_TOKEN`.
#[derive(Debug, Deserialize, Clone)]
pub struct SecretsConfig {
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            env_prefix: default_env_prefix(),
        }
    }
}

fn default_env_prefix() -> String {
    "RIS_SECRET_".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Config pointing at `db_path` with every other section defaulted.
    pub fn with_db(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            source: SourceConfig::default(),
            provider: ProviderConfig::default(),
            secrets: SecretsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.source.include_globs.is_empty() {
        bail!("source.include_globs must not be empty");
    }
    for pattern in config
        .source
        .include_globs
        .iter()
        .chain(config.source.exclude_globs.iter())
    {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid glob in [source]: '{}'", pattern))?;
    }

    if config.source.timeout_secs == 0 {
        bail!("source.timeout_secs must be > 0");
    }
    if config.provider.timeout_secs == 0 {
        bail!("provider.timeout_secs must be > 0");
    }
    if !config.provider.base_url.starts_with("http://")
        && !config.provider.base_url.starts_with("https://")
    {
        bail!(
            "provider.base_url must be an http(s) URL, got '{}'",
            config.provider.base_url
        );
    }
    if config.provider.api_key_env.trim().is_empty() {
        bail!("provider.api_key_env must not be empty");
    }
    Ok(())
}
