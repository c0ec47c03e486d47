//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for gateway credentials.

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub trading: TradingConfig,
    pub execution: ExecutionConfig,
    pub settlement: SettlementConfig,
    pub storage: StorageConfig,
    pub strategies: Vec<StrategyFeedConfig>,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        // Load credentials from environment if not set
        if let Ok(account_id) = std::env::var("BROKER_ACCOUNT_ID") {
            config.gateway.account_id = Some(account_id);
        }
        if let Ok(host) = std::env::var("BROKER_HOST") {
            config.gateway.host = host;
        }
        if let Ok(port) = std::env::var("BROKER_PORT") {
            config.gateway.port = port.parse().context("BROKER_PORT must be an integer")?;
        }

        config.validate_capital_allocation()?;
        Ok(config)
    }

    /// Enabled strategy feeds with their absolute capital allocation
    pub fn enabled_strategies(&self) -> Vec<StrategyFeedConfig> {
        self.strategies
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    /// Capital allocated to one strategy feed, in whole currency units
    pub fn capital_allocation(&self, feed: &StrategyFeedConfig) -> i64 {
        (self.trading.total_capital * feed.capital_allocation_pct) as i64
    }

    /// Total enabled allocation must not exceed 100% of capital
    pub fn validate_capital_allocation(&self) -> Result<()> {
        let total: f64 = self
            .strategies
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.capital_allocation_pct)
            .sum();
        if total > 1.0 {
            bail!(
                "Total capital allocation ({:.0}%) exceeds 100% of available capital",
                total * 100.0
            );
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gateway: GatewayConfig::default(),
            trading: TradingConfig::default(),
            execution: ExecutionConfig::default(),
            settlement: SettlementConfig::default(),
            storage: StorageConfig::default(),
            strategies: Vec::new(),
        }
    }
}

/// Broker gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 7496,
            client_id: 1025,
            account_id: None,
        }
    }
}

/// Trading settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub total_capital: f64,
    /// Seconds to wait for first tick after subscribing
    pub market_data_timeout_secs: u64,
    /// Signal dispatch poll interval
    pub dispatch_interval_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            total_capital: 500_000.0,
            market_data_timeout_secs: 5,
            dispatch_interval_secs: 1,
        }
    }
}

/// Execution strategy tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Base timeout before a dynamic limit order converts to IOC market
    pub dynamic_limit_timeout_secs: u64,
    /// Maximum number of limit price adjustments
    pub max_reprice_attempts: u32,
    /// Seconds a converted IOC market order may dangle before cancellation
    pub market_order_timeout_secs: u64,
    /// Monitor poll interval
    pub monitor_interval_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            dynamic_limit_timeout_secs: 60,
            max_reprice_attempts: 3,
            market_order_timeout_secs: 10,
            monitor_interval_secs: 2,
        }
    }
}

/// Exercise/assignment settlement schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Local wall-clock time of the daily settlement pass (HH:MM)
    pub run_at: NaiveTime,
    /// Bounded wait for an official close price before skipping a position
    pub close_price_timeout_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        SettlementConfig {
            run_at: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            close_price_timeout_secs: 30,
        }
    }
}

/// Ledger persistence locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            state_dir: "data".to_string(),
        }
    }
}

/// One signal feed entry: where to fetch instructions for a strategy and
/// when to check for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyFeedConfig {
    pub strategy_id: String,
    pub signal_base_url: String,
    /// Daily check time (HH:MM) in the engine's local timezone
    pub check_at: NaiveTime,
    pub capital_allocation_pct: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(id: &str, pct: f64, enabled: bool) -> StrategyFeedConfig {
        StrategyFeedConfig {
            strategy_id: id.to_string(),
            signal_base_url: "http://localhost/signals".to_string(),
            check_at: NaiveTime::from_hms_opt(15, 55, 0).unwrap(),
            capital_allocation_pct: pct,
            enabled,
        }
    }

    #[test]
    fn test_allocation_within_budget() {
        let config = Config {
            strategies: vec![feed("A", 0.4, true), feed("B", 0.4, true)],
            ..Config::default()
        };
        assert!(config.validate_capital_allocation().is_ok());
        assert_eq!(config.capital_allocation(&config.strategies[0]), 200_000);
    }

    #[test]
    fn test_allocation_over_budget_rejected() {
        let config = Config {
            strategies: vec![feed("A", 0.6, true), feed("B", 0.6, true)],
            ..Config::default()
        };
        assert!(config.validate_capital_allocation().is_err());
    }

    #[test]
    fn test_disabled_feed_does_not_count() {
        let config = Config {
            strategies: vec![feed("A", 0.6, true), feed("B", 0.6, false)],
            ..Config::default()
        };
        assert!(config.validate_capital_allocation().is_ok());
        assert_eq!(config.enabled_strategies().len(), 1);
    }

    #[test]
    fn test_config_parses_from_json() {
        let raw = r#"{
            "gateway": {"host": "127.0.0.1", "port": 7496, "client_id": 1025},
            "trading": {"total_capital": 500000.0, "market_data_timeout_secs": 5, "dispatch_interval_secs": 1},
            "execution": {"dynamic_limit_timeout_secs": 60, "max_reprice_attempts": 3,
                          "market_order_timeout_secs": 10, "monitor_interval_secs": 2},
            "settlement": {"run_at": "09:30:00", "close_price_timeout_secs": 30},
            "storage": {"state_dir": "data"},
            "strategies": [
                {"strategy_id": "PAIRS_TRADING_001",
                 "signal_base_url": "http://example.com/pairs/signals",
                 "check_at": "15:55:00",
                 "capital_allocation_pct": 0.2}
            ]
        }"#;
        let config: Config = serde_json::from_str(raw).expect("parse config");
        assert_eq!(config.strategies.len(), 1);
        assert!(config.strategies[0].enabled);
    }
}
