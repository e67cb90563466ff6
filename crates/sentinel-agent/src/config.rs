//! Application configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use sentinel_engine::{BracketConfig, ValidatorConfig};
use sentinel_trigger::SupervisorConfig;

use crate::error::{AppError, AppResult};

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Observation only: validate and report, place nothing.
    #[default]
    Observation,
    /// Live trading enabled.
    Trading,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Operating mode.
    #[serde(default)]
    pub mode: OperatingMode,
    /// Account/user id the agent trades for.
    #[serde(default = "default_user")]
    pub user: String,
    /// REST info endpoint URL (market data, positions, open orders).
    #[serde(default = "default_info_url")]
    pub info_url: String,
    /// REST exchange endpoint URL (order placement and cancellation).
    #[serde(default = "default_exchange_url")]
    pub exchange_url: String,
    /// Directory holding persisted protective and advanced-order state.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Use cross margin for leverage updates.
    #[serde(default)]
    pub cross_margin: bool,
    /// Intent validation configuration.
    #[serde(default)]
    pub validator: ValidatorConfig,
    /// Protective-bracket reconciliation configuration.
    #[serde(default)]
    pub bracket: BracketConfig,
    /// Trigger supervisor configuration.
    #[serde(default)]
    pub trigger: SupervisorConfig,
}

fn default_user() -> String {
    "default".to_string()
}

fn default_info_url() -> String {
    "https://api.hyperliquid.xyz/info".to_string()
}

fn default_exchange_url() -> String {
    "https://api.hyperliquid.xyz/exchange".to_string()
}

fn default_state_dir() -> String {
    "data/state".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            user: default_user(),
            info_url: default_info_url(),
            exchange_url: default_exchange_url(),
            state_dir: default_state_dir(),
            cross_margin: false,
            validator: ValidatorConfig::default(),
            bracket: BracketConfig::default(),
            trigger: SupervisorConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the `SENTINEL_CONFIG` path, falling
    /// back to defaults when no file exists.
    pub fn load() -> AppResult<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG")
            .unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.mode, OperatingMode::Observation);
        assert_eq!(config.user, "default");
        assert!(!config.cross_margin);
    }

    #[test]
    fn test_empty_toml_uses_field_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.mode, OperatingMode::Observation);
        assert_eq!(config.validator.min_notional, dec!(10));
        assert_eq!(config.trigger.poll_interval_seconds, 10);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: AgentConfig = toml::from_str(
            r#"
            mode = "trading"
            user = "alice"

            [validator]
            min_notional = "25"

            [trigger]
            poll_interval_seconds = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, OperatingMode::Trading);
        assert_eq!(config.user, "alice");
        assert_eq!(config.validator.min_notional, dec!(25));
        assert_eq!(config.trigger.poll_interval_seconds, 5);
        // Untouched sections keep their defaults
        assert_eq!(config.bracket.price_tolerance_ticks, 2);
    }
}
