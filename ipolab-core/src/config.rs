//! Strategy configuration: every recognized option with its default.
//!
//! All fields are optional in TOML; missing keys take the defaults below.
//! [`StrategyConfig::validate`] is the only fatal check in the core and runs
//! before an engine is built.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// How long to wait after the first observed trade before entering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPeriod {
    /// Wall-clock minutes between the first trade and the current bar.
    Minutes(u32),
    /// Bars observed after the opening bar.
    Bars(u32),
}

/// Time span a single bar of the market feed covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarResolution {
    /// Several bars per session; the wait period is measured bar by bar.
    #[default]
    Intraday,
    /// One bar per session. The bar already spans the wait period, so the
    /// first-trade bar is eligible for entry off its open.
    Session,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} = {value} is out of range (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("portfolio_cap ({portfolio_cap}) is below per_position_cap ({per_position_cap})")]
    PortfolioCapBelowPositionCap {
        portfolio_cap: f64,
        per_position_cap: f64,
    },

    #[error("{0} must be at least 1")]
    Zero(&'static str),

    #[error("read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Decision and risk parameters for a trading session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Scores must be strictly above this to trade.
    pub score_threshold: f64,
    /// Limit price premium over the session open.
    pub entry_premium: f64,
    pub wait_period: WaitPeriod,
    pub bar_resolution: BarResolution,
    pub max_positions: usize,
    pub per_position_cap: f64,
    pub portfolio_cap: f64,
    /// Trading sessions before a forced time exit.
    pub holding_period_days: u32,
    pub profit_target: f64,
    pub profit_take_fraction: f64,
    /// Negative return at or below which the position is closed.
    pub stop_loss: f64,
    /// Calendar days before lock-up expiry that force a close.
    pub lockup_exit_days: u32,
    pub volatility_scale_threshold: f64,
    /// Size multiplier applied above `volatility_scale_threshold`.
    pub volatility_scale_factor: f64,
    /// Gauge reading assumed until the feed supplies one.
    pub default_volatility: f64,
    /// Trading sessions a pending candidate may go without a bar.
    pub listing_monitor_window_days: u32,
    pub price_tick: f64,
    /// Sizes below this are treated as "no budget".
    pub min_position_fraction: f64,
    /// Lock-up length used when the feed record carries none.
    pub default_lockup_days: Option<u32>,
    /// Scale size by how far the score clears the threshold.
    pub confidence_scaling: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.70,
            entry_premium: 0.05,
            wait_period: WaitPeriod::Minutes(60),
            bar_resolution: BarResolution::Intraday,
            max_positions: 5,
            per_position_cap: 0.15,
            portfolio_cap: 0.40,
            holding_period_days: 30,
            profit_target: 0.30,
            profit_take_fraction: 0.50,
            stop_loss: -0.20,
            lockup_exit_days: 5,
            volatility_scale_threshold: 25.0,
            volatility_scale_factor: 0.5,
            default_volatility: 15.0,
            listing_monitor_window_days: 10,
            price_tick: 0.01,
            min_position_fraction: 0.005,
            default_lockup_days: None,
            confidence_scaling: false,
        }
    }
}

impl StrategyConfig {
    /// Parse from a TOML string and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("score_threshold", self.score_threshold, 0.0, 1.0, "0..1")?;
        check_range("entry_premium", self.entry_premium, 0.0, 1.0, "0..1")?;
        check_open_unit("per_position_cap", self.per_position_cap)?;
        check_open_unit("portfolio_cap", self.portfolio_cap)?;
        if self.portfolio_cap < self.per_position_cap {
            return Err(ConfigError::PortfolioCapBelowPositionCap {
                portfolio_cap: self.portfolio_cap,
                per_position_cap: self.per_position_cap,
            });
        }
        if self.max_positions == 0 {
            return Err(ConfigError::Zero("max_positions"));
        }
        if self.holding_period_days == 0 {
            return Err(ConfigError::Zero("holding_period_days"));
        }
        if self.listing_monitor_window_days == 0 {
            return Err(ConfigError::Zero("listing_monitor_window_days"));
        }
        if !(self.profit_target > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "profit_target",
                value: self.profit_target,
                expected: "> 0",
            });
        }
        check_open_unit("profit_take_fraction", self.profit_take_fraction)?;
        if !(self.stop_loss < 0.0 && self.stop_loss > -1.0) {
            return Err(ConfigError::OutOfRange {
                field: "stop_loss",
                value: self.stop_loss,
                expected: "-1 < stop_loss < 0",
            });
        }
        if !(self.volatility_scale_threshold >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "volatility_scale_threshold",
                value: self.volatility_scale_threshold,
                expected: ">= 0",
            });
        }
        check_open_unit("volatility_scale_factor", self.volatility_scale_factor)?;
        if !(self.price_tick > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "price_tick",
                value: self.price_tick,
                expected: "> 0",
            });
        }
        check_range(
            "min_position_fraction",
            self.min_position_fraction,
            0.0,
            self.per_position_cap,
            "0..=per_position_cap",
        )?;
        Ok(())
    }

    /// Deterministic hash of every parameter.
    ///
    /// Snapshots record it so a restart under different risk limits is caught.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}

fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            expected,
        });
    }
    Ok(())
}

/// Value in (0, 1].
fn check_open_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "0 < x <= 1",
        });
    }
    Ok(())
}
