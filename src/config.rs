use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::{DefinitionTable, DuplicatePolicy};

/// Environment variable consulted when `manifest.api_key` is not set.
pub const API_KEY_ENV: &str = "BUNGIE_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManifestConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_pointer_path")]
    pub pointer_path: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_lookup_db")]
    pub lookup_db: PathBuf,
    #[serde(default = "default_tables")]
    pub tables: Vec<String>,
    #[serde(default = "default_duplicate_hash")]
    pub duplicate_hash: String,
    #[serde(default = "default_retain")]
    pub retain_intermediates: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            pointer_path: default_pointer_path(),
            api_key: None,
            locale: default_locale(),
            work_dir: default_work_dir(),
            lookup_db: default_lookup_db(),
            tables: default_tables(),
            duplicate_hash: default_duplicate_hash(),
            retain_intermediates: default_retain(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.bungie.net".to_string()
}
fn default_pointer_path() -> String {
    "/Platform/Destiny2/Manifest/".to_string()
}
fn default_locale() -> String {
    "en".to_string()
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("./data/manifest")
}
fn default_lookup_db() -> PathBuf {
    PathBuf::from("./data/manifest.db")
}
fn default_tables() -> Vec<String> {
    vec![DefinitionTable::InventoryItem.as_str().to_string()]
}
fn default_duplicate_hash() -> String {
    DuplicatePolicy::LastWins.as_str().to_string()
}
fn default_retain() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    120
}

impl ManifestConfig {
    /// Tables to refresh, in configured order.
    ///
    /// Names are checked by [`load_config`], so an unknown entry here means
    /// the struct was built by hand.
    pub fn definition_tables(&self) -> Result<Vec<DefinitionTable>> {
        self.tables
            .iter()
            .map(|name| {
                name.parse::<DefinitionTable>()
                    .map_err(|_| anyhow::anyhow!("Unknown definition table: '{}'", name))
            })
            .collect()
    }

    pub fn duplicate_policy(&self) -> Result<DuplicatePolicy> {
        self.duplicate_hash.parse::<DuplicatePolicy>().map_err(|_| {
            anyhow::anyhow!(
                "Unknown duplicate_hash policy: '{}'. Must be last-wins, first-wins, or reject.",
                self.duplicate_hash
            )
        })
    }

    /// API key from config, falling back to the `BUNGIE_API_KEY` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:9200".to_string()
}

impl ServerConfig {
    /// True when any origin may call the API (no list, or a `*` entry).
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResourcesConfig {
    #[serde(default = "default_resources_dir")]
    pub dir: PathBuf,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            dir: default_resources_dir(),
        }
    }
}

fn default_resources_dir() -> PathBuf {
    PathBuf::from("./resources")
}

impl Config {
    /// All-defaults configuration, used when no config file is present.
    pub fn minimal() -> Self {
        Self {
            manifest: ManifestConfig::default(),
            server: ServerConfig::default(),
            resources: ResourcesConfig::default(),
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

pub fn validate(config: &Config) -> Result<()> {
    let manifest = &config.manifest;

    if manifest.base_url.is_empty() {
        anyhow::bail!("manifest.base_url must not be empty");
    }
    // Content paths from the pointer already start with '/'.
    if manifest.base_url.ends_with('/') {
        anyhow::bail!("manifest.base_url must not end with '/'");
    }
    if !manifest.pointer_path.starts_with('/') {
        anyhow::bail!("manifest.pointer_path must start with '/'");
    }
    if manifest.locale.trim().is_empty() {
        anyhow::bail!("manifest.locale must not be empty");
    }
    if manifest.timeout_secs == 0 {
        anyhow::bail!("manifest.timeout_secs must be > 0");
    }
    if manifest.tables.is_empty() {
        anyhow::bail!("manifest.tables must list at least one definition table");
    }
    manifest.definition_tables()?;
    manifest.duplicate_policy()?;

    if config.server.bind.is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(())
}
