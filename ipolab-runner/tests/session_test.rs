//! End-to-end runs through loader, engine, paper venue, journal and snapshot.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use tempfile::TempDir;

use ipolab_core::{BarResolution, EngineEvent, EngineSnapshot, StrategyConfig};
use ipolab_runner::{run_session, BarSource, EventJournal, RunConfig, RunError};

const SCORES: &str = "\
date,ticker,company_name,score,offer_price,shares_offered,sector
2024-03-21,RDDT,Reddit Inc,0.86,34.0,22000000,Technology
2024-03-21,LOW,Low Conviction Co,0.50,10.0,1000000,Industrials
2024-03-21,BAD,Broken Row,x,10.0,1000000,Industrials
";

const BARS: &str = "\
ticker,timestamp,open,high,low,close,volume
RDDT,2024-03-21 09:30:00,40.0,41.0,39.5,40.5,100000
LOW,2024-03-21 09:30:00,10.0,10.5,9.5,10.2,1000
RDDT,2024-03-21 10:30:00,41.0,42.5,40.8,42.0,80000
RDDT,2024-03-21 11:00:00,41.5,42.0,41.0,41.8,60000
RDDT,2024-03-22 09:30:00,56.0,57.0,55.0,56.5,90000
RDDT,2024-03-22 10:00:00,56.2,56.8,55.5,56.0,50000
";

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn csv_run(dir: &TempDir) -> RunConfig {
    RunConfig {
        scores: write(dir.path(), "calendar.csv", SCORES),
        bars: BarSource::Csv {
            path: write(dir.path(), "bars.csv", BARS),
        },
        volatility: None,
        journal: Some(dir.path().join("out").join("journal.jsonl")),
        snapshot: Some(dir.path().join("out").join("engine.json")),
        initial_capital: 1_000_000.0,
        strategy: StrategyConfig::default(),
    }
}

// ── Recorded data ────────────────────────────────────────────────────

#[test]
fn recorded_day_one_trade_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = csv_run(&dir);
    let outcome = run_session(&config, false).unwrap();

    assert!(!outcome.resumed);
    assert_eq!(outcome.candidates, 2);
    assert_eq!(outcome.rejected_scores, 1);
    assert_eq!(outcome.stats.ticks, 5);
    assert_eq!(outcome.stats.entries_submitted, 1);
    assert_eq!(outcome.stats.positions_opened, 1);
    assert_eq!(outcome.stats.exits, 1, "one partial profit take");
    assert_eq!(outcome.open_positions, 1);
    assert!((outcome.allocated_fraction - 0.075).abs() < 1e-9);

    let journal = EventJournal::new(config.journal.clone().unwrap(), outcome.run_id.clone());
    let entries = journal.read_all().unwrap();
    assert_eq!(entries.len(), outcome.stats.journal_lines);
    let events: Vec<&EngineEvent> = entries.iter().flat_map(|e| &e.report.events).collect();

    assert!(events.contains(&&EngineEvent::EntrySubmitted {
        ticker: "RDDT".into(),
        limit_price: 42.0,
        fraction: 0.15,
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::PositionOpened { ticker, price, quantity, .. }
            if ticker == "RDDT" && *price == 41.5 && *quantity == 3571.0
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::ExitConfirmed { ticker, price } if ticker == "RDDT" && *price == 56.2
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::CandidateConsumed { ticker, .. } if ticker == "LOW"
    )));

    let snapshot = EngineSnapshot::load(config.snapshot.as_deref().unwrap()).unwrap();
    assert_eq!(snapshot.lifecycle.risk.open_position_count, 1);
    assert_eq!(
        snapshot.current_session,
        NaiveDate::from_ymd_opt(2024, 3, 22)
    );
}

#[test]
fn resume_skips_processed_ticks() {
    let dir = TempDir::new().unwrap();
    let config = csv_run(&dir);
    let first = run_session(&config, false).unwrap();
    let lines = first.stats.journal_lines;

    let second = run_session(&config, true).unwrap();
    assert!(second.resumed);
    assert_eq!(second.stats.ticks, 0);
    assert_eq!(second.stats.positions_opened, 0);
    assert_eq!(second.open_positions, first.open_positions);
    assert_eq!(second.allocated_fraction, first.allocated_fraction);
    assert_eq!(second.candidates, first.candidates);

    let journal = EventJournal::new(config.journal.clone().unwrap(), first.run_id);
    assert_eq!(journal.read_all().unwrap().len(), lines);
}

#[test]
fn resume_picks_up_new_sessions() {
    let dir = TempDir::new().unwrap();
    let config = csv_run(&dir);
    run_session(&config, false).unwrap();

    // A later crash below the stop arrives in a fresh data drop.
    let more = format!(
        "{BARS}RDDT,2024-03-25 09:30:00,30.0,31.0,29.0,30.5,90000\n\
         RDDT,2024-03-25 10:00:00,30.2,30.8,29.5,30.0,50000\n"
    );
    write(dir.path(), "bars.csv", &more);

    let resumed = run_session(&config, true).unwrap();
    assert_eq!(resumed.stats.ticks, 2);
    assert_eq!(resumed.stats.exits, 1);
    assert_eq!(resumed.open_positions, 0);
    assert_eq!(resumed.allocated_fraction, 0.0);
}

#[test]
fn resume_without_snapshot_path_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = RunConfig {
        snapshot: None,
        ..csv_run(&dir)
    };
    assert!(matches!(
        run_session(&config, true),
        Err(RunError::NoSnapshotPath)
    ));
}

#[test]
fn snapshot_from_other_strategy_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = csv_run(&dir);
    run_session(&config, false).unwrap();

    let tighter = RunConfig {
        strategy: StrategyConfig {
            max_positions: 2,
            ..StrategyConfig::default()
        },
        ..config
    };
    assert!(matches!(
        run_session(&tighter, true),
        Err(RunError::Snapshot(_))
    ));
}

// ── Daily data ───────────────────────────────────────────────────────

const DAILY_BARS: &str = "\
ticker,timestamp,open,high,low,close,volume
RDDT,2024-03-21,40.0,43.0,39.5,41.5,100000
LOW,2024-03-21,10.0,10.5,9.5,10.2,1000
RDDT,2024-03-22,42.0,44.0,41.0,43.0,90000
";

fn daily_run(dir: &TempDir, resolution: BarResolution) -> RunConfig {
    RunConfig {
        bars: BarSource::Csv {
            path: write(dir.path(), "daily.csv", DAILY_BARS),
        },
        strategy: StrategyConfig {
            bar_resolution: resolution,
            ..StrategyConfig::default()
        },
        ..csv_run(dir)
    }
}

#[test]
fn daily_bars_trade_under_session_resolution() {
    let dir = TempDir::new().unwrap();
    let config = daily_run(&dir, BarResolution::Session);
    let outcome = run_session(&config, false).unwrap();

    assert_eq!(outcome.stats.ticks, 2);
    assert_eq!(outcome.stats.entries_submitted, 1);
    assert_eq!(outcome.stats.positions_opened, 1);
    assert_eq!(outcome.open_positions, 1);
    assert!((outcome.allocated_fraction - 0.15).abs() < 1e-9);

    let journal = EventJournal::new(config.journal.clone().unwrap(), outcome.run_id);
    let entries = journal.read_all().unwrap();
    assert!(entries.iter().flat_map(|e| &e.report.events).any(|e| matches!(
        e,
        EngineEvent::PositionOpened { ticker, price, quantity, .. }
            if ticker == "RDDT" && *price == 41.5 && *quantity == 3571.0
    )));
}

#[test]
fn daily_bars_under_intraday_resolution_are_refused() {
    let dir = TempDir::new().unwrap();
    let config = daily_run(&dir, BarResolution::Intraday);
    assert!(matches!(
        run_session(&config, false),
        Err(RunError::BarResolution {
            date_only: 3,
            rows: 3,
            ..
        })
    ));
}

// ── Synthetic data ───────────────────────────────────────────────────

#[test]
fn synthetic_runs_are_reproducible() {
    let dir = TempDir::new().unwrap();
    let config = RunConfig {
        bars: BarSource::Synthetic {
            start: NaiveDate::from_ymd_opt(2024, 3, 18).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
            bars_per_session: 13,
        },
        journal: None,
        snapshot: None,
        ..csv_run(&dir)
    };

    let a = run_session(&config, false).unwrap();
    let b = run_session(&config, false).unwrap();
    assert_eq!(a, b);
    assert!(a.stats.ticks > 0);
    assert!(a.open_positions <= config.strategy.max_positions);
    assert!(a.allocated_fraction <= config.strategy.portfolio_cap + 1e-9);
}

#[test]
fn missing_score_file_is_a_data_error() {
    let dir = TempDir::new().unwrap();
    let config = RunConfig {
        scores: dir.path().join("absent.csv"),
        ..csv_run(&dir)
    };
    assert!(matches!(run_session(&config, false), Err(RunError::Data(_))));
}

#[test]
fn demo_config_runs() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demo/demo.toml");
    let config = RunConfig {
        journal: None,
        snapshot: None,
        ..RunConfig::from_file(&path).unwrap()
    };
    assert!(config.scores.ends_with("calendar.csv"));
    assert!(config.scores.exists());

    let outcome = run_session(&config, false).unwrap();
    assert_eq!(outcome.candidates, 6);
    assert_eq!(outcome.rejected_scores, 0);
    assert!(outcome.stats.entries_submitted >= 1);
    assert!(outcome.open_positions <= 5);
}
