use anyhow::{Context, Result};
use chrono::Duration;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FastspotProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RatesProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Seconds a fetched rate table stays fresh.
    #[serde(default = "default_rates_ttl")]
    pub ttl_secs: u64,
}

fn default_rates_ttl() -> u64 {
    60
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub fastspot: Option<FastspotProviderConfig>,
    pub rates: Option<RatesProviderConfig>,
}

impl Default for FastspotProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.go.fastspot.io/fast/v1".to_string(),
            api_key: None,
        }
    }
}

impl Default for RatesProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            api_key: None,
            ttl_secs: default_rates_ttl(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            fastspot: Some(FastspotProviderConfig::default()),
            rates: Some(RatesProviderConfig::default()),
        }
    }
}

/// Business-policy values used by the limit computation.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LimitsPolicy {
    /// Age of the first EUR swap after which the first-use allowance lapses.
    pub new_user_window_days: i64,
    /// First-use EUR allowance, in whole euros.
    pub new_user_eur_ceiling: f64,
    pub history_window_days: i64,
    pub staleness_buffer_hours: i64,
    /// Address length that identifies an HTLC output on BTC.
    pub htlc_address_length: usize,
    /// Queried when no NIM address is selected.
    pub nim_placeholder_address: String,
    /// Queried when no BTC address is selected.
    pub btc_placeholder_address: String,
}

impl Default for LimitsPolicy {
    fn default() -> Self {
        Self {
            new_user_window_days: 3,
            new_user_eur_ceiling: 100.0,
            history_window_days: 30,
            staleness_buffer_hours: 3,
            htlc_address_length: 62,
            nim_placeholder_address: "NQ07 0000 0000 0000 0000 0000 0000 0000 0000".to_string(),
            btc_placeholder_address: "1111111111111111111114oLvT2".to_string(),
        }
    }
}

impl LimitsPolicy {
    pub fn new_user_window(&self) -> Duration {
        Duration::days(self.new_user_window_days)
    }

    /// How far back swap volume is counted, staleness buffer included.
    pub fn volume_window(&self) -> Duration {
        Duration::days(self.history_window_days) + Duration::hours(self.staleness_buffer_hours)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub policy: LimitsPolicy,
    /// JSON snapshot of local transaction histories and known swaps.
    pub history_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "nimiq", "swap-limits")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
