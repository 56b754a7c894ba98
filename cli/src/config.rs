// Configuration management for the veilroute CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/veilroute/config.json
// - Linux: ~/.config/veilroute/config.json
// - Windows: %APPDATA%\veilroute\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use veilroute_core::{Relay, SecurityPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Routing thresholds
    pub policy: SecurityPolicy,

    /// Sled database for routing plans; plans stay in memory when unset
    pub storage_path: Option<String>,

    /// JSON list of relays; a synthetic pool is used when unset
    pub relay_file: Option<String>,

    /// Block height the simulated ledger starts at
    pub start_block_height: u64,

    /// Token type stamped on split fragments
    pub token_type: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: SecurityPolicy::default(),
            storage_path: None,
            relay_file: None,
            start_block_height: 1_000,
            token_type: "ETH".to_string(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("veilroute");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the default config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from `path`, or from the default location
    ///
    /// The default file is created when missing; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let config_file = Self::config_file()?;
                if config_file.exists() {
                    Self::load_from(&config_file)
                } else {
                    let config = Config::default();
                    config.save_to(&config_file)?;
                    debug!("Wrote default config to {}", config_file.display());
                    Ok(config)
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        config
            .policy
            .validate()
            .context("Config contains an invalid policy")?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value
    ///
    /// `policy.<field>` keys take a JSON value and are validated before they
    /// are accepted.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "storage_path" => self.storage_path = non_empty(value),
            "relay_file" => self.relay_file = non_empty(value),
            "start_block_height" => {
                self.start_block_height = value.parse().context("Invalid block height")?;
            }
            "token_type" => self.token_type = value.to_string(),
            _ => match key.strip_prefix("policy.") {
                Some(field) => self.set_policy_field(field, value)?,
                None => anyhow::bail!("Unknown config key: {}", key),
            },
        }
        Ok(())
    }

    fn set_policy_field(&mut self, field: &str, value: &str) -> Result<()> {
        let mut policy = serde_json::to_value(&self.policy).context("Failed to encode policy")?;
        let slot = policy
            .get_mut(field)
            .with_context(|| format!("Unknown policy field: {}", field))?;
        // Amounts are stored as decimal strings.
        *slot = if slot.is_string() {
            serde_json::Value::String(value.to_string())
        } else {
            serde_json::from_str(value).context("Invalid policy value")?
        };

        let updated: SecurityPolicy =
            serde_json::from_value(policy).context("Invalid policy value")?;
        updated.validate().context("Policy rejected")?;
        self.policy = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "storage_path" => self.storage_path.clone(),
            "relay_file" => self.relay_file.clone(),
            "start_block_height" => Some(self.start_block_height.to_string()),
            "token_type" => Some(self.token_type.clone()),
            _ => {
                let field = key.strip_prefix("policy.")?;
                let policy = serde_json::to_value(&self.policy).ok()?;
                policy.get(field).map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            }
        }
    }

    /// List all top-level config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            (
                "storage_path".to_string(),
                self.storage_path
                    .clone()
                    .unwrap_or_else(|| "(memory)".to_string()),
            ),
            (
                "relay_file".to_string(),
                self.relay_file
                    .clone()
                    .unwrap_or_else(|| "(synthetic)".to_string()),
            ),
            (
                "start_block_height".to_string(),
                self.start_block_height.to_string(),
            ),
            ("token_type".to_string(), self.token_type.clone()),
        ]
    }

    /// Relays from `relay_file`, or `None` when no file is configured
    pub fn load_relays(&self) -> Result<Option<Vec<Relay>>> {
        let Some(path) = &self.relay_file else {
            return Ok(None);
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read relay file {}", path))?;
        let relays = serde_json::from_str(&contents).context("Failed to parse relay file")?;
        Ok(Some(relays))
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
