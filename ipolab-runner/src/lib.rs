//! IPOLab Runner: drives the decision core over recorded or synthetic data.
//!
//! This crate builds on `ipolab-core` to provide:
//! - Run configuration (TOML) with a content-addressed run id
//! - Score, bar and volatility CSV loading, plus a synthetic intraday generator
//! - A paper execution venue that turns orders into fills and expiries
//! - The session driver with snapshot resume
//! - A JSONL journal of every tick report

pub mod config;
pub mod feed_loader;
pub mod journal;
pub mod session;
pub mod venue;

pub use config::{BarSource, RunConfig, RunConfigError};
pub use feed_loader::{
    group_into_ticks, load_bars, load_scores, load_volatility, synthetic_bars, BarLoad,
    LoadError, Loaded, RejectedRow, ScoreLoad,
};
pub use journal::{EventJournal, JournalEntry, JournalError};
pub use session::{drive, run_session, DriveStats, RunError, SessionOutcome};
pub use venue::{ExecutionVenue, PaperVenue};
