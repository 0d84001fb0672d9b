//! The tick loop.
//!
//! Every tick is one pass in a fixed phase order:
//!
//! 1. execution events resolved since the previous tick
//! 2. session roll (expire unfilled entries, advance counters)
//! 3. bar intake and listing detection
//! 4. exit evaluation for every open position
//! 5. entry evaluation for every active candidate, by ticker
//! 6. risk invariant check
//!
//! Exits run before entries so that capital freed by a same-tick close can
//! fund a same-tick entry.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use super::state::{EngineEvent, EntryCancel, Tick, TickIssue, TickReport};
use crate::config::{ConfigError, StrategyConfig};
use crate::domain::{Bar, Candidate, CandidateStatus, ExecutionEvent, Fill, OrderRequest, OrderSide};
use crate::entry::{EntryDecision, EntryDecisionEngine, NoActionReason};
use crate::feed::{validate_bar, RawScoreRecord};
use crate::lifecycle::{LifecycleManager, PendingEntry, PortfolioRiskState};
use crate::monitor::{ListingMonitor, ListingTransition};
use crate::registry::{CandidateRegistry, IngestSummary, RegistryError};
use crate::snapshot::{EngineSnapshot, SnapshotError, SNAPSHOT_SCHEMA_VERSION};

#[derive(Debug)]
pub struct Engine {
    config: StrategyConfig,
    registry: CandidateRegistry,
    monitor: ListingMonitor,
    entry: EntryDecisionEngine,
    lifecycle: LifecycleManager,
    current_session: Option<NaiveDate>,
    closed_through: Option<NaiveDate>,
    last_tick: Option<NaiveDateTime>,
    last_bar_time: BTreeMap<String, NaiveDateTime>,
    volatility: f64,
}

impl Engine {
    pub fn new(config: StrategyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: CandidateRegistry::new(config.listing_monitor_window_days),
            monitor: ListingMonitor::new(config.listing_monitor_window_days),
            entry: EntryDecisionEngine::new(&config),
            lifecycle: LifecycleManager::new(&config),
            current_session: None,
            closed_through: None,
            last_tick: None,
            last_bar_time: BTreeMap::new(),
            volatility: config.default_volatility,
            config,
        })
    }

    // ── Candidate intake ──

    pub fn ingest(&mut self, record: &RawScoreRecord) -> Result<(), RegistryError> {
        self.registry.ingest(record)?;
        self.track_active();
        Ok(())
    }

    pub fn ingest_all<'a, I>(&mut self, records: I) -> IngestSummary
    where
        I: IntoIterator<Item = &'a RawScoreRecord>,
    {
        let summary = self.registry.ingest_all(records);
        self.track_active();
        info!(
            accepted = summary.accepted,
            rejected = summary.rejected.len(),
            "score feed ingested"
        );
        summary
    }

    pub fn add_candidate(&mut self, candidate: Candidate) -> Result<(), RegistryError> {
        self.registry.insert(candidate)?;
        self.track_active();
        Ok(())
    }

    /// Start monitoring any active candidate the monitor does not know yet.
    ///
    /// A relisted ticker whose earlier position or entry is still live keeps
    /// its old listing state until that exposure is gone; its bars belong to
    /// the held listing, not the new one.
    fn track_active(&mut self) {
        for candidate in self.registry.get_active() {
            let known = self
                .monitor
                .state(&candidate.ticker)
                .is_some_and(|s| s.expected_date == candidate.listing_date);
            if known {
                continue;
            }
            if self.lifecycle.has_exposure(&candidate.ticker) {
                debug!(ticker = %candidate.ticker, "relisting deferred while exposure is open");
                continue;
            }
            self.monitor.track(candidate);
        }
    }

    // ── Tick ──

    pub fn on_tick(&mut self, tick: Tick) -> TickReport {
        let mut report = TickReport::new(tick.timestamp);

        if let Some(previous) = self.last_tick {
            if tick.timestamp < previous {
                warn!(timestamp = %tick.timestamp, %previous, "tick out of order, ignored");
                report.issues.push(TickIssue::OutOfOrderTick {
                    timestamp: tick.timestamp,
                    previous,
                });
                return report;
            }
        }
        self.last_tick = Some(tick.timestamp);
        if let Some(v) = tick.volatility.filter(|v| v.is_finite() && *v >= 0.0) {
            self.volatility = v;
        }

        for event in &tick.events {
            self.apply_execution(event, &mut report);
        }

        self.track_active();
        let session = tick.session();
        if let Some(previous) = self.current_session {
            if previous != session {
                self.close_session_into(previous, &mut report);
            }
        }
        self.current_session = Some(session);

        let bars = self.intake_bars(tick.bars, &mut report);

        let sweep = self.lifecycle.evaluate_exits(&bars);
        report.orders.extend(sweep.orders);
        report
            .events
            .extend(sweep.exits.into_iter().map(EngineEvent::PositionExit));

        self.evaluate_entries(&bars, &mut report);

        if let Err(err) = self.lifecycle.reconcile() {
            error!(error = %err, "risk invariant violated");
            report.issues.push(TickIssue::InvariantViolation {
                detail: err.to_string(),
            });
        }
        report
    }

    /// Close the current session at end of data. `None` before the first tick.
    pub fn finish_session(&mut self) -> Option<TickReport> {
        let (Some(session), Some(timestamp)) = (self.current_session, self.last_tick) else {
            return None;
        };
        let mut report = TickReport::new(timestamp);
        self.close_session_into(session, &mut report);
        Some(report)
    }

    fn apply_execution(&mut self, event: &ExecutionEvent, report: &mut TickReport) {
        match event {
            ExecutionEvent::Fill(fill) => match fill.side {
                OrderSide::Buy => self.apply_entry_fill(fill, report),
                OrderSide::Sell => {
                    if self.lifecycle.on_exit_fill(fill) {
                        report.events.push(EngineEvent::ExitConfirmed {
                            ticker: fill.ticker.clone(),
                            price: fill.price,
                        });
                    } else {
                        unmatched(report, &fill.ticker, "sell fill without exit leg");
                    }
                }
            },
            ExecutionEvent::OrderExpired { ticker } => {
                if self.lifecycle.cancel_entry(ticker).is_some() {
                    self.consume_cancelled(ticker, EntryCancel::Expired, report);
                } else if self.registry.status(ticker) == Some(CandidateStatus::Consumed) {
                    debug!(ticker = %ticker, "expiry for an entry already swept");
                } else {
                    unmatched(report, ticker, "expiry without pending entry");
                }
            }
            ExecutionEvent::OrderRejected { ticker, reason } => {
                if self.lifecycle.cancel_entry(ticker).is_some() {
                    let cause = EntryCancel::Rejected {
                        reason: reason.clone(),
                    };
                    self.consume_cancelled(ticker, cause, report);
                } else if self.holds_or_held(ticker) {
                    warn!(ticker = %ticker, reason = %reason, "exit order rejected");
                    report.issues.push(TickIssue::ExitOrderRejected {
                        ticker: ticker.clone(),
                        reason: reason.clone(),
                    });
                } else {
                    unmatched(report, ticker, "rejection without order");
                }
            }
        }
    }

    fn apply_entry_fill(&mut self, fill: &Fill, report: &mut TickReport) {
        let Some(position) = self.lifecycle.on_entry_fill(fill) else {
            unmatched(report, &fill.ticker, "buy fill without pending entry");
            return;
        };
        report.events.push(EngineEvent::PositionOpened {
            ticker: position.ticker.clone(),
            price: position.entry_price,
            quantity: position.quantity,
            fraction: position.allocated_fraction,
        });
        self.registry.mark_entered(&fill.ticker);
    }

    fn consume_cancelled(&mut self, ticker: &str, cause: EntryCancel, report: &mut TickReport) {
        info!(ticker = %ticker, cause = ?cause, "entry order cancelled, candidate consumed");
        self.registry.mark_consumed(ticker);
        report.events.push(EngineEvent::EntryCancelled {
            ticker: ticker.to_string(),
            cause,
        });
    }

    fn holds_or_held(&self, ticker: &str) -> bool {
        self.lifecycle.position(ticker).is_some()
            || self
                .lifecycle
                .closed_positions()
                .iter()
                .any(|p| p.ticker == ticker)
    }

    fn close_session_into(&mut self, session: NaiveDate, report: &mut TickReport) {
        if self.closed_through.is_some_and(|closed| closed >= session) {
            return;
        }
        self.track_active();

        for entry in self.lifecycle.expire_pending(session) {
            self.consume_cancelled(&entry.ticker, EntryCancel::Expired, report);
        }

        // Listed candidates that never got an order are done once their
        // first-trade session is over.
        let passed: Vec<String> = self
            .registry
            .get_active()
            .into_iter()
            .filter(|c| {
                self.monitor
                    .state(&c.ticker)
                    .and_then(|s| s.first_trade_session())
                    .is_some_and(|first| first <= session)
            })
            .filter(|c| !self.lifecycle.has_exposure(&c.ticker))
            .map(|c| c.ticker.clone())
            .collect();
        for ticker in passed {
            self.registry.mark_consumed(&ticker);
            info!(ticker = %ticker, "entry session passed without an order");
            report.events.push(EngineEvent::CandidateConsumed {
                ticker,
                reason: NoActionReason::EntrySessionPassed,
            });
        }

        for ticker in self.lifecycle.close_session(session) {
            report.issues.push(TickIssue::DataGap { ticker, session });
        }

        for ticker in self.monitor.close_session(session) {
            self.registry.mark_expired(&ticker);
            report.events.push(EngineEvent::CandidateExpired { ticker });
        }

        self.closed_through = Some(session);
        report.events.push(EngineEvent::SessionClosed { session });
        debug!(%session, open = self.lifecycle.risk().open_position_count, "session closed");
    }

    fn intake_bars(&mut self, bars: Vec<Bar>, report: &mut TickReport) -> BTreeMap<String, Bar> {
        let mut accepted = BTreeMap::new();
        for bar in bars {
            let previous = self.last_bar_time.get(&bar.ticker).copied();
            if let Err(err) = validate_bar(&bar, previous) {
                warn!(ticker = %bar.ticker, error = %err, "bar rejected");
                report.issues.push(TickIssue::RejectedBar {
                    ticker: bar.ticker.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
            self.last_bar_time.insert(bar.ticker.clone(), bar.timestamp);

            if let ListingTransition::Listed { first_trade_time } = self.monitor.observe(&bar.ticker, &bar) {
                report.events.push(EngineEvent::CandidateListed {
                    ticker: bar.ticker.clone(),
                    first_trade_time,
                });
            }
            accepted.insert(bar.ticker.clone(), bar);
        }
        accepted
    }

    fn evaluate_entries(&mut self, bars: &BTreeMap<String, Bar>, report: &mut TickReport) {
        let candidates: Vec<Candidate> = self
            .registry
            .get_active()
            .into_iter()
            .filter(|c| bars.contains_key(&c.ticker) && !self.lifecycle.has_exposure(&c.ticker))
            .cloned()
            .collect();

        for candidate in candidates {
            let (Some(bar), Some(listing)) = (bars.get(&candidate.ticker), self.monitor.state(&candidate.ticker))
            else {
                continue;
            };
            if listing.expected_date != candidate.listing_date {
                // Still the previous listing's state.
                continue;
            }
            let first_trade_session = listing.first_trade_session().unwrap_or_else(|| bar.session());
            let decision = self
                .entry
                .evaluate(&candidate, listing, bar, &self.lifecycle, self.volatility);

            match decision {
                EntryDecision::NoAction(reason) if reason.is_terminal() => {
                    info!(ticker = %candidate.ticker, score = candidate.score, %reason, "candidate consumed");
                    self.registry.mark_consumed(&candidate.ticker);
                    report.events.push(EngineEvent::CandidateConsumed {
                        ticker: candidate.ticker,
                        reason,
                    });
                }
                EntryDecision::NoAction(reason) => {
                    debug!(ticker = %candidate.ticker, %reason, "no entry this bar");
                }
                EntryDecision::AwaitWindow => {}
                EntryDecision::SubmitLimitOrder { price, size } => {
                    let pending = PendingEntry {
                        ticker: candidate.ticker.clone(),
                        limit_price: price,
                        fraction: size,
                        session: bar.session(),
                        score: candidate.score,
                        lockup_days: candidate.lockup_days.or(self.config.default_lockup_days),
                        first_trade_session,
                    };
                    if let Err(limit) = self.lifecycle.reserve_entry(pending) {
                        debug!(ticker = %candidate.ticker, %limit, "reservation refused");
                        continue;
                    }
                    info!(
                        ticker = %candidate.ticker,
                        score = candidate.score,
                        limit = price,
                        fraction = size,
                        volatility = self.volatility,
                        "entry submitted"
                    );
                    report.orders.push(OrderRequest::SubmitLimitOrder {
                        ticker: candidate.ticker.clone(),
                        limit_price: price,
                        fractional_size: size,
                        session: bar.session(),
                    });
                    report.events.push(EngineEvent::EntrySubmitted {
                        ticker: candidate.ticker,
                        limit_price: price,
                        fraction: size,
                    });
                }
            }
        }
    }

    // ── Snapshots ──

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            config_fingerprint: self.config.fingerprint(),
            current_session: self.current_session,
            closed_through: self.closed_through,
            last_tick: self.last_tick,
            volatility: self.volatility,
            registry: self.registry.clone(),
            monitor: self.monitor.clone(),
            lifecycle: self.lifecycle.export_state(),
            last_bar_time: self.last_bar_time.clone(),
        }
    }

    /// Rebuild an engine from a snapshot taken under the same config.
    pub fn restore(config: StrategyConfig, snapshot: EngineSnapshot) -> Result<Self, SnapshotError> {
        config.validate()?;
        let current = config.fingerprint();
        if snapshot.config_fingerprint != current {
            return Err(SnapshotError::ConfigMismatch {
                snapshot: snapshot.config_fingerprint,
                current,
            });
        }
        let lifecycle = LifecycleManager::from_state(&config, snapshot.lifecycle)?;
        info!(
            open = lifecycle.risk().open_position_count,
            allocated = lifecycle.risk().total_allocated_fraction,
            session = ?snapshot.current_session,
            "engine restored"
        );
        Ok(Self {
            registry: snapshot.registry,
            monitor: snapshot.monitor,
            entry: EntryDecisionEngine::new(&config),
            lifecycle,
            current_session: snapshot.current_session,
            closed_through: snapshot.closed_through,
            last_tick: snapshot.last_tick,
            last_bar_time: snapshot.last_bar_time,
            volatility: snapshot.volatility,
            config,
        })
    }

    // ── Accessors ──

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn registry(&self) -> &CandidateRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &ListingMonitor {
        &self.monitor
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn risk(&self) -> &PortfolioRiskState {
        self.lifecycle.risk()
    }

    pub fn current_session(&self) -> Option<NaiveDate> {
        self.current_session
    }

    /// Timestamp of the last accepted tick.
    pub fn last_tick(&self) -> Option<NaiveDateTime> {
        self.last_tick
    }

    pub fn volatility(&self) -> f64 {
        self.volatility
    }
}

fn unmatched(report: &mut TickReport, ticker: &str, detail: &str) {
    warn!(ticker = %ticker, detail, "unmatched execution event");
    report.issues.push(TickIssue::UnmatchedExecution {
        ticker: ticker.to_string(),
        detail: detail.to_string(),
    });
}
