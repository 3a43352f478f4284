use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use crate::policy::plan::RuleStyle;
use crate::reconcile::ApplyMode;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_address")]
    pub address: String,
    #[serde(default = "default_service")]
    pub service: String,
    /// `env` tag values fetched each pass, one catalog query per
    /// (environment, stage) pair
    #[serde(default = "default_environments")]
    pub environments: Vec<String>,
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_mode")]
    pub mode: ApplyMode,
    #[serde(default = "default_style")]
    pub style: RuleStyle,
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,
    #[serde(default = "default_nft_program")]
    pub nft_program: String,
    /// In file mode, also load the written file into the engine
    /// (flush ruleset + read file) instead of leaving that to an
    /// external apply step
    #[serde(default)]
    pub apply_file: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Seconds between reconciliation passes; absent means a single pass
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_registry_address() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_service() -> String {
    "wireguard".to_string()
}

fn default_environments() -> Vec<String> {
    ["metrics", "logs", "backups", "app"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_stages() -> Vec<String> {
    ["prod", "test"].iter().map(|s| s.to_string()).collect()
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    2
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_mode() -> ApplyMode {
    ApplyMode::File
}

fn default_style() -> RuleStyle {
    RuleStyle::Sets
}

fn default_rules_file() -> PathBuf {
    PathBuf::from("nftables.rules")
}

fn default_nft_program() -> String {
    "nft".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: default_registry_address(),
            service: default_service(),
            environments: default_environments(),
            stages: default_stages(),
            attempts: default_attempts(),
            backoff_secs: default_backoff_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            style: default_style(),
            rules_file: default_rules_file(),
            nft_program: default_nft_program(),
            apply_file: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_secs: None }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
