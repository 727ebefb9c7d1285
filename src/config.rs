//! Configuration management for the SuperBridge relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    /// Absent means records are kept in memory only
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    #[serde(default = "default_bump_interval_secs")]
    pub bump_interval_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_relay_gas_limit")]
    pub relay_gas_limit: u64,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    /// SuperBridge contract address
    pub bridge_contract: String,
    #[serde(default)]
    pub deployment_block: u64,
    #[serde(default = "default_log_poll_interval_ms")]
    pub log_poll_interval_ms: u64,
    pub enabled: bool,
}

impl ChainConfig {
    pub fn bridge_address(&self) -> Result<Address> {
        self.bridge_contract
            .parse()
            .with_context(|| format!("Invalid bridge contract address for chain {}", self.name))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the hex private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

fn default_bump_interval_secs() -> u64 {
    36
}

fn default_poll_interval_secs() -> u64 {
    12
}

fn default_relay_gas_limit() -> u64 {
    900_000
}

fn default_log_poll_interval_ms() -> u64 {
    2000
}

fn default_private_key_env() -> String {
    "RELAYER_PRIVATE_KEY".to_string()
}

impl Settings {
    /// Load settings from the file named by `SUPERBRIDGE_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("SUPERBRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        if self.relayer.bump_interval_secs == 0 || self.relayer.poll_interval_secs == 0 {
            anyhow::bail!("Bump and poll intervals must be positive");
        }
        if self.relayer.health_check_interval_secs == 0 {
            anyhow::bail!("Health check interval must be positive");
        }

        for (name, chain) in self.enabled_chains() {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.log_poll_interval_ms == 0 {
                anyhow::bail!("Chain {} has a zero log poll interval", name);
            }
            chain.bridge_address()?;
        }

        let mut seen = HashMap::new();
        for (name, chain) in self.enabled_chains() {
            if let Some(other) = seen.insert(chain.chain_id, name) {
                anyhow::bail!(
                    "Chains {} and {} share chain id {}",
                    other,
                    name,
                    chain.chain_id
                );
            }
        }

        Ok(())
    }

    /// Get list of enabled chains, ordered by chain ID
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        let mut chains: Vec<_> = self.chains.iter().filter(|(_, c)| c.enabled).collect();
        chains.sort_by_key(|(_, c)| c.chain_id);
        chains
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}
