//! Session driver: wires feeds, engine, venue and journal together.
//!
//! Two entry points:
//! - `run_session()`: loads everything a [`RunConfig`] names, optionally
//!   resumes from its snapshot, and writes the snapshot back. Used by the CLI.
//! - `drive()`: the bare tick loop over pre-built ticks and any venue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use ipolab_core::domain::Bar;
use ipolab_core::{
    BarResolution, ConfigError, Engine, EngineEvent, EngineSnapshot, SnapshotError, Tick, TickReport,
};

use crate::config::{BarSource, RunConfig, RunConfigError};
use crate::feed_loader::{
    group_into_ticks, load_bars, load_scores, load_volatility, synthetic_bars, BarLoad, LoadError,
};
use crate::journal::{EventJournal, JournalError};
use crate::venue::{ExecutionVenue, PaperVenue};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] RunConfigError),
    #[error("strategy error: {0}")]
    Strategy(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("--resume needs a snapshot path in the run config")]
    NoSnapshotPath,
    #[error(
        "{path}: {date_only} of {rows} bars are date-only, which does not match bar_resolution {resolution:?}"
    )]
    BarResolution {
        path: PathBuf,
        resolution: BarResolution,
        date_only: usize,
        rows: usize,
    },
}

/// Counters accumulated over a tick loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveStats {
    pub ticks: usize,
    pub entries_submitted: usize,
    pub positions_opened: usize,
    pub exits: usize,
    pub issues: usize,
    pub journal_lines: usize,
}

impl DriveStats {
    fn record(&mut self, report: &TickReport) {
        for event in &report.events {
            match event {
                EngineEvent::EntrySubmitted { .. } => self.entries_submitted += 1,
                EngineEvent::PositionOpened { .. } => self.positions_opened += 1,
                EngineEvent::PositionExit(_) => self.exits += 1,
                _ => {}
            }
        }
        self.issues += report.issues.len();
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub run_id: String,
    pub resumed: bool,
    pub candidates: usize,
    /// Score rows refused by the loader or by registry validation.
    pub rejected_scores: usize,
    pub stats: DriveStats,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub allocated_fraction: f64,
}

/// Run the tick loop: venue events in, engine orders out.
///
/// Ticks at or before the engine's last accepted tick are skipped, which makes
/// a resumed run pick up exactly where the snapshot stopped. The session of
/// the last tick is closed at the end.
pub fn drive<V: ExecutionVenue>(
    engine: &mut Engine,
    venue: &mut V,
    ticks: Vec<Tick>,
    journal: Option<&EventJournal>,
) -> Result<DriveStats, RunError> {
    let mut stats = DriveStats::default();
    let resume_after = engine.last_tick();

    for mut tick in ticks {
        if resume_after.is_some_and(|last| tick.timestamp <= last) {
            continue;
        }
        let fills = venue.match_tick(tick.timestamp, &tick.bars);
        tick.events.extend(fills);

        let report = engine.on_tick(tick);
        for order in &report.orders {
            venue.submit(order, report.timestamp);
        }
        stats.ticks += 1;
        stats.record(&report);
        if let Some(journal) = journal {
            if journal.append(&report)? {
                stats.journal_lines += 1;
            }
        }
    }

    if let Some(report) = engine.finish_session() {
        stats.record(&report);
        if let Some(journal) = journal {
            if journal.append(&report)? {
                stats.journal_lines += 1;
            }
        }
    }

    debug!(ticks = stats.ticks, issues = stats.issues, "tick loop finished");
    Ok(stats)
}

/// Load, run and persist everything a run config names.
pub fn run_session(config: &RunConfig, resume: bool) -> Result<SessionOutcome, RunError> {
    config.validate()?;
    let run_id = config.run_id();

    let mut engine = if resume {
        let path = config.snapshot.as_ref().ok_or(RunError::NoSnapshotPath)?;
        if path.exists() {
            Engine::restore(config.strategy.clone(), EngineSnapshot::load(path)?)?
        } else {
            warn!(path = %path.display(), "no snapshot to resume from, starting fresh");
            Engine::new(config.strategy.clone())?
        }
    } else {
        Engine::new(config.strategy.clone())?
    };
    let resumed = engine.last_tick().is_some();

    let scores = load_scores(&config.scores)?;
    let fresh: Vec<_> = scores
        .rows
        .iter()
        .filter(|record| {
            record
                .ticker
                .as_deref()
                .map_or(true, |t| engine.registry().get(&t.trim().to_uppercase()).is_none())
        })
        .collect();
    let summary = engine.ingest_all(fresh);
    let rejected_scores = scores.rejected.len() + summary.rejected.len();

    let bars = match &config.bars {
        BarSource::Csv { path } => {
            let load = load_bars(path)?;
            check_resolution(path, config.strategy.bar_resolution, &load)?;
            load.rows
        }
        BarSource::Synthetic {
            start,
            end,
            bars_per_session,
        } => synthetic_universe(&engine, *start, *end, *bars_per_session),
    };
    let volatility = match &config.volatility {
        Some(path) => load_volatility(path)?,
        None => BTreeMap::new(),
    };
    let ticks = group_into_ticks(bars, &volatility);
    info!(
        run_id = %run_id,
        ticks = ticks.len(),
        candidates = engine.registry().len(),
        resumed,
        "session starting"
    );

    let held = engine
        .lifecycle()
        .positions()
        .map(|p| (p.ticker.clone(), p.remaining_quantity()))
        .collect::<Vec<_>>();
    let mut venue = PaperVenue::new(config.initial_capital)
        .with_resolution(config.strategy.bar_resolution)
        .with_holdings(held);
    let journal = config
        .journal
        .as_ref()
        .map(|path| EventJournal::new(path.clone(), run_id.clone()));

    let stats = drive(&mut engine, &mut venue, ticks, journal.as_ref())?;

    if let Some(path) = &config.snapshot {
        engine.snapshot().save(path)?;
    }

    let outcome = SessionOutcome {
        run_id,
        resumed,
        candidates: engine.registry().len(),
        rejected_scores,
        stats,
        open_positions: engine.risk().open_position_count,
        closed_positions: engine.lifecycle().closed_positions().len(),
        allocated_fraction: engine.risk().total_allocated_fraction,
    };
    info!(
        opened = outcome.stats.positions_opened,
        exits = outcome.stats.exits,
        open = outcome.open_positions,
        "session finished"
    );
    Ok(outcome)
}

/// Date-only rows are whole-session bars; they must not be mixed with the
/// other resolution.
fn check_resolution(path: &Path, resolution: BarResolution, load: &BarLoad) -> Result<(), RunError> {
    let consistent = match resolution {
        BarResolution::Intraday => load.date_only == 0,
        BarResolution::Session => load.date_only == load.rows.len(),
    };
    if consistent {
        return Ok(());
    }
    Err(RunError::BarResolution {
        path: path.to_path_buf(),
        resolution,
        date_only: load.date_only,
        rows: load.rows.len(),
    })
}

/// Synthetic bars for every registered candidate, from its listing date on.
fn synthetic_universe(
    engine: &Engine,
    start: chrono::NaiveDate,
    end: chrono::NaiveDate,
    bars_per_session: u32,
) -> Vec<Bar> {
    engine
        .registry()
        .entries()
        .flat_map(|entry| {
            let c = &entry.candidate;
            synthetic_bars(
                &c.ticker,
                c.listing_date.max(start),
                end,
                c.offer_price,
                bars_per_session,
            )
        })
        .collect()
}
