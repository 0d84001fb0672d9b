//! Run configuration: where the data lives and which strategy to run.
//!
//! ```toml
//! scores = "data/calendar.csv"
//! volatility = "data/vix.csv"
//! journal = "out/journal.jsonl"
//! snapshot = "out/engine.json"
//! initial_capital = 1000000.0
//!
//! [bars]
//! source = "synthetic"
//! start = "2024-03-18"
//! end = "2024-05-31"
//!
//! [strategy]
//! score_threshold = 0.75
//! wait_period = { minutes = 30 }
//! ```
//!
//! Relative paths are resolved against the directory of the config file.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use ipolab_core::{BarResolution, ConfigError, StrategyConfig};

/// Unique identifier for a run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum RunConfigError {
    #[error("read run config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse run config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid strategy: {0}")]
    Strategy(#[from] ConfigError),

    #[error("synthetic range is empty: {start} is after {end}")]
    EmptyRange { start: NaiveDate, end: NaiveDate },

    #[error("initial_capital must be positive, got {0}")]
    Capital(f64),

    #[error("bars_per_session must be at least 1")]
    NoBarsPerSession,

    #[error("bar_resolution = \"session\" needs bars_per_session = 1, got {0}")]
    SessionResolution(u32),
}

/// Where market bars come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum BarSource {
    /// `ticker,timestamp,open,high,low,close,volume` CSV.
    Csv { path: PathBuf },
    /// Seeded random walk for every candidate in the score feed.
    Synthetic {
        start: NaiveDate,
        end: NaiveDate,
        #[serde(default = "default_bars_per_session")]
        bars_per_session: u32,
    },
}

fn default_bars_per_session() -> u32 {
    13
}

fn default_initial_capital() -> f64 {
    1_000_000.0
}

/// Everything needed to reproduce a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Score feed CSV.
    pub scores: PathBuf,
    pub bars: BarSource,
    /// Daily `timestamp,value` volatility gauge.
    #[serde(default)]
    pub volatility: Option<PathBuf>,
    /// JSONL file receiving every non-quiet tick report.
    #[serde(default)]
    pub journal: Option<PathBuf>,
    /// Engine snapshot written at the end of the run.
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl RunConfig {
    /// Parse from a TOML string and validate. Paths are kept as written.
    pub fn from_toml(content: &str) -> Result<Self, RunConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, resolving relative paths against its directory.
    pub fn from_file(path: &Path) -> Result<Self, RunConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| RunConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RunConfigError> {
        self.strategy.validate()?;
        if !(self.initial_capital > 0.0) || !self.initial_capital.is_finite() {
            return Err(RunConfigError::Capital(self.initial_capital));
        }
        if let BarSource::Synthetic {
            start,
            end,
            bars_per_session,
        } = &self.bars
        {
            if start > end {
                return Err(RunConfigError::EmptyRange {
                    start: *start,
                    end: *end,
                });
            }
            if *bars_per_session == 0 {
                return Err(RunConfigError::NoBarsPerSession);
            }
            if self.strategy.bar_resolution == BarResolution::Session && *bars_per_session > 1 {
                return Err(RunConfigError::SessionResolution(*bars_per_session));
            }
        }
        Ok(())
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.scores);
        if let BarSource::Csv { path } = &mut self.bars {
            resolve(path);
        }
        for p in [&mut self.volatility, &mut self.journal, &mut self.snapshot]
            .into_iter()
            .flatten()
        {
            resolve(p);
        }
    }

    /// Computes a deterministic hash ID for this configuration.
    ///
    /// Two runs with identical configs share a RunId, which tags every
    /// journal line.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
