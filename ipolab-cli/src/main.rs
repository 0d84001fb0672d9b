//! IPOLab CLI: run sessions and inspect what they left behind.
//!
//! Commands:
//! - `run`: drive the engine over the feeds a run config names
//! - `check-config`: parse and validate a run config without running it
//! - `snapshot show`: summarize a saved engine snapshot
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to change the
//! level (default `info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use ipolab_core::domain::Position;
use ipolab_core::EngineSnapshot;
use ipolab_runner::{run_session, BarSource, RunConfig, SessionOutcome};

#[derive(Parser)]
#[command(name = "ipolab", about = "IPOLab: Day-1 IPO decision engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session from a TOML run config.
    Run {
        /// Path to the run config.
        #[arg(long)]
        config: PathBuf,

        /// Continue from the snapshot named in the config.
        #[arg(long, default_value_t = false)]
        resume: bool,

        /// Print the outcome as JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Validate a run config and print the effective strategy.
    CheckConfig {
        /// Path to the run config.
        #[arg(long)]
        config: PathBuf,
    },
    /// Engine snapshot commands.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Summarize risk state, open positions and pending entries.
    Show {
        /// Snapshot JSON file.
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            resume,
            json,
        } => run_cmd(&config, resume, json),
        Commands::CheckConfig { config } => check_config(&config),
        Commands::Snapshot { action } => match action {
            SnapshotAction::Show { path } => show_snapshot(&path),
        },
    }
}

fn run_cmd(path: &Path, resume: bool, json: bool) -> Result<()> {
    let config = RunConfig::from_file(path)
        .with_context(|| format!("loading run config {}", path.display()))?;
    info!(run_id = %config.run_id(), resume, "ipolab v{}", env!("CARGO_PKG_VERSION"));

    let outcome = run_session(&config, resume)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome, &config);
    }
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = RunConfig::from_file(path)
        .with_context(|| format!("loading run config {}", path.display()))?;

    println!("Config OK: {}", path.display());
    println!("Run id:         {}", config.run_id());
    println!("Strategy hash:  {}", config.strategy.fingerprint());
    println!("Scores:         {}", config.scores.display());
    match &config.bars {
        BarSource::Csv { path } => println!("Bars:           {}", path.display()),
        BarSource::Synthetic {
            start,
            end,
            bars_per_session,
        } => println!("Bars:           synthetic {start} to {end}, {bars_per_session} per session"),
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&config.strategy)?);
    Ok(())
}

fn show_snapshot(path: &Path) -> Result<()> {
    let snapshot = EngineSnapshot::load(path)
        .with_context(|| format!("loading snapshot {}", path.display()))?;
    let risk = &snapshot.lifecycle.risk;

    println!();
    println!("=== Engine Snapshot ===");
    println!("Schema:         v{}", snapshot.schema_version);
    println!("Strategy hash:  {}", snapshot.config_fingerprint);
    match snapshot.last_tick {
        Some(at) => println!("Last tick:      {at}"),
        None => println!("Last tick:      (none)"),
    }
    println!("Volatility:     {:.2}", snapshot.volatility);
    println!(
        "Candidates:     {} ({} active)",
        snapshot.registry.len(),
        snapshot.registry.active_count()
    );
    println!();
    println!("--- Risk ---");
    println!(
        "Positions:      {} / {}",
        risk.open_position_count, risk.max_concurrent
    );
    println!(
        "Allocated:      {:.2}% of {:.2}% cap",
        risk.total_allocated_fraction * 100.0,
        risk.portfolio_cap * 100.0
    );
    println!(
        "Reserved:       {:.2}% over {} pending",
        risk.reserved_fraction * 100.0,
        risk.pending_entry_count
    );

    if !snapshot.lifecycle.positions.is_empty() {
        println!();
        println!("--- Open Positions ---");
        for position in snapshot.lifecycle.positions.values() {
            print_position(position);
        }
    }
    if !snapshot.lifecycle.pending.is_empty() {
        println!();
        println!("--- Pending Entries ---");
        for entry in snapshot.lifecycle.pending.values() {
            println!(
                "{:<8} limit {:>10.2}  size {:>6.2}%  session {}",
                entry.ticker,
                entry.limit_price,
                entry.fraction * 100.0,
                entry.session
            );
        }
    }
    if !snapshot.lifecycle.closed.is_empty() {
        println!();
        println!("--- Closed Positions ---");
        for position in &snapshot.lifecycle.closed {
            let realized = position
                .realized_return()
                .map_or_else(|| "n/a".to_string(), |r| format!("{:+.2}%", r * 100.0));
            println!(
                "{:<8} entry {:>10.2}  realized {:>9}  legs {}",
                position.ticker,
                position.entry_price,
                realized,
                position.exit_legs.len()
            );
        }
    }
    Ok(())
}

fn print_position(position: &Position) {
    let lockup = position
        .lockup_expiration
        .map_or_else(|| "-".to_string(), |d| d.to_string());
    println!(
        "{:<8} entry {:>10.2}  mark {:>10.2}  remaining {:>5.1}%  held {:>3}  lockup {}",
        position.ticker,
        position.entry_price,
        position.last_mark,
        position.remaining_fraction * 100.0,
        position.sessions_held,
        lockup
    );
}

fn print_outcome(outcome: &SessionOutcome, config: &RunConfig) {
    println!();
    println!("=== Session Result ===");
    println!("Run id:         {}", outcome.run_id);
    println!("Resumed:        {}", outcome.resumed);
    println!(
        "Candidates:     {} ({} score rows rejected)",
        outcome.candidates, outcome.rejected_scores
    );
    println!("Ticks:          {}", outcome.stats.ticks);
    println!();
    println!("--- Activity ---");
    println!("Entries sent:   {}", outcome.stats.entries_submitted);
    println!("Positions:      {}", outcome.stats.positions_opened);
    println!("Exits:          {}", outcome.stats.exits);
    println!("Issues:         {}", outcome.stats.issues);
    println!();
    println!("--- Portfolio ---");
    println!(
        "Open:           {} / {}",
        outcome.open_positions, config.strategy.max_positions
    );
    println!("Closed:         {}", outcome.closed_positions);
    println!(
        "Allocated:      {:.2}%",
        outcome.allocated_fraction * 100.0
    );
    if let Some(journal) = &config.journal {
        println!(
            "Journal:        {} ({} lines)",
            journal.display(),
            outcome.stats.journal_lines
        );
    }
    if let Some(snapshot) = &config.snapshot {
        println!("Snapshot:       {}", snapshot.display());
    }
}
