//! Configuration management for the position sentinel.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange API credentials
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Risk limits enforced by the supervisor
    #[serde(default)]
    pub risk: RiskConfig,
    /// Loop cadence and wait intervals
    #[serde(default)]
    pub timing: TimingConfig,
    /// Symbols to supervise, one control loop per entry
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Take-profit threshold in percent; close when unrealized return exceeds it
    #[serde(default = "default_target_percent")]
    pub target_percent: Decimal,
    /// Stop-loss threshold in percent (negative); close when return falls to it
    #[serde(default = "default_max_loss_percent")]
    pub max_loss_percent: Decimal,
    /// Absolute notional exposure ceiling in quote currency; breach forces a close
    #[serde(default = "default_max_notional")]
    pub max_notional: Decimal,
    /// Account-value floor; while a position is open, falling below it forces a close
    #[serde(default)]
    pub min_account_value: Option<Decimal>,
    /// Maximum unwind iterations per kill-switch run (0 = unbounded)
    #[serde(default)]
    pub max_unwind_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Seconds between supervisor ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Grace period for a resting close order to fill between unwind iterations
    #[serde(default = "default_fill_wait")]
    pub fill_wait_secs: u64,
    /// Pause after an emergency close before polling resumes
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

// Default value functions

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string()]
}

fn default_target_percent() -> Decimal {
    Decimal::new(9, 0) // +9%
}

fn default_max_loss_percent() -> Decimal {
    Decimal::new(-8, 0) // -8%
}

fn default_max_notional() -> Decimal {
    Decimal::new(1000, 0) // $1000 exposure ceiling
}

fn default_poll_interval() -> u64 {
    30
}

fn default_fill_wait() -> u64 {
    30
}

fn default_cooldown() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("SENTINEL"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values. Called once at startup, before the
    /// control loop begins; a bad policy is fatal, not retryable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.symbols.is_empty(), "at least one symbol is required");

        anyhow::ensure!(
            self.symbols.iter().all(|s| !s.trim().is_empty()),
            "symbols must be non-empty identifiers"
        );

        anyhow::ensure!(
            self.risk.target_percent > Decimal::ZERO,
            "target_percent must be positive"
        );

        anyhow::ensure!(
            self.risk.max_loss_percent < Decimal::ZERO,
            "max_loss_percent must be negative"
        );

        anyhow::ensure!(
            self.risk.max_notional > Decimal::ZERO,
            "max_notional must be positive"
        );

        if let Some(floor) = self.risk.min_account_value {
            anyhow::ensure!(
                floor > Decimal::ZERO,
                "min_account_value must be positive when set"
            );
        }

        anyhow::ensure!(
            self.timing.poll_interval_secs > 0,
            "poll_interval_secs must be non-zero"
        );

        anyhow::ensure!(
            self.timing.fill_wait_secs > 0,
            "fill_wait_secs must be non-zero"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            risk: RiskConfig::default(),
            timing: TimingConfig::default(),
            symbols: default_symbols(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            target_percent: default_target_percent(),
            max_loss_percent: default_max_loss_percent(),
            max_notional: default_max_notional(),
            min_account_value: None,
            max_unwind_attempts: 0,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            fill_wait_secs: default_fill_wait(),
            cooldown_secs: default_cooldown(),
        }
    }
}
