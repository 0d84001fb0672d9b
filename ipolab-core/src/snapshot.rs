//! Engine snapshots for surviving restarts.
//!
//! A snapshot carries the registry, listing states, positions, reservations
//! and risk counters, plus a fingerprint of the strategy config it was taken
//! under. Restoring recomputes the risk counters from the positions and
//! refuses the snapshot if they disagree.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::config::ConfigError;
use crate::lifecycle::{LifecycleState, RiskInvariantError};
use crate::monitor::ListingMonitor;
use crate::registry::CandidateRegistry;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SNAPSHOT_SCHEMA_VERSION
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot schema version {found} is not supported (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("snapshot was taken under a different strategy config ({snapshot} != {current})")]
    ConfigMismatch { snapshot: String, current: String },

    #[error("snapshot risk state is inconsistent: {0}")]
    Invariant(#[from] RiskInvariantError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Full persisted engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub config_fingerprint: String,
    pub current_session: Option<NaiveDate>,
    /// Last session whose close has been processed.
    pub closed_through: Option<NaiveDate>,
    pub last_tick: Option<NaiveDateTime>,
    pub volatility: f64,
    pub registry: CandidateRegistry,
    pub monitor: ListingMonitor,
    pub lifecycle: LifecycleState,
    pub last_bar_time: BTreeMap<String, NaiveDateTime>,
}

impl EngineSnapshot {
    /// Write as pretty JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        debug!(
            path = %path.display(),
            positions = self.lifecycle.positions.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Read and check the schema version. Config and risk checks happen on restore.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: Self = serde_json::from_reader(reader)?;
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(SnapshotError::SchemaVersion {
                found: snapshot.schema_version,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        Ok(snapshot)
    }
}
