//! IPOLab Core: the Day-1 IPO decision and position lifecycle engine.
//!
//! This crate contains the decision core with no I/O besides snapshot files:
//! - Domain types (candidates, listing states, bars, orders, fills, positions)
//! - Score-feed and bar validation at the ingestion boundary
//! - Candidate registry and listing monitor
//! - Entry decision engine with the risk gate
//! - Position lifecycle manager with ordered exit rules
//! - Tick engine and restartable snapshots

pub mod config;
pub mod domain;
pub mod engine;
pub mod entry;
pub mod feed;
pub mod lifecycle;
pub mod monitor;
pub mod registry;
pub mod snapshot;

pub use config::{BarResolution, ConfigError, StrategyConfig, WaitPeriod};
pub use engine::{Engine, EngineEvent, Tick, TickIssue, TickReport};
pub use snapshot::{EngineSnapshot, SnapshotError};
