//! Position lifecycle manager: owns every position and the risk state.
//!
//! Positions come into being only through a confirmed entry fill against a
//! reservation made when the entry order was submitted. Exits are applied to
//! state the moment their market order is emitted; the later sell fill only
//! confirms the execution price of that leg.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::risk::{EntrySizing, PortfolioRiskState, RiskDecision, RiskInvariantError, RiskLimit, RISK_EPS};
use super::rules::{ExitContext, ExitPolicy};
use crate::config::StrategyConfig;
use crate::domain::{Bar, ExitReason, Fill, OrderRequest, Position};
use crate::entry::RiskGate;

/// Entry order submitted to the venue and holding a risk reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub ticker: String,
    pub limit_price: f64,
    pub fraction: f64,
    /// Session in which the order is live.
    pub session: NaiveDate,
    pub score: f64,
    /// Lock-up length in calendar days, counted from the first trade session.
    pub lockup_days: Option<u32>,
    pub first_trade_session: NaiveDate,
}

/// One exit applied during an evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedExit {
    pub ticker: String,
    pub reason: ExitReason,
    /// Fraction of the remaining position closed.
    pub fraction_of_remaining: f64,
    pub mark_price: f64,
    pub closed: bool,
}

/// Result of running the exit rules over every active position.
#[derive(Debug, Default)]
pub struct ExitSweep {
    pub orders: Vec<OrderRequest>,
    pub exits: Vec<AppliedExit>,
}

/// Serializable part of the manager, for snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleState {
    pub risk: PortfolioRiskState,
    pub positions: BTreeMap<String, Position>,
    pub closed: Vec<Position>,
    pub pending: BTreeMap<String, PendingEntry>,
}

#[derive(Debug)]
pub struct LifecycleManager {
    risk: PortfolioRiskState,
    sizing: EntrySizing,
    policy: ExitPolicy,
    positions: BTreeMap<String, Position>,
    closed: Vec<Position>,
    pending: BTreeMap<String, PendingEntry>,
}

impl LifecycleManager {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            risk: PortfolioRiskState::new(config),
            sizing: EntrySizing::new(config),
            policy: ExitPolicy::from_config(config),
            positions: BTreeMap::new(),
            closed: Vec::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Rebuild from a snapshot, recomputing counters from the positions.
    pub fn from_state(config: &StrategyConfig, state: LifecycleState) -> Result<Self, RiskInvariantError> {
        let manager = Self {
            risk: state.risk,
            sizing: EntrySizing::new(config),
            policy: ExitPolicy::from_config(config),
            positions: state.positions,
            closed: state.closed,
            pending: state.pending,
        };
        manager.reconcile()?;
        Ok(manager)
    }

    pub fn export_state(&self) -> LifecycleState {
        LifecycleState {
            risk: self.risk.clone(),
            positions: self.positions.clone(),
            closed: self.closed.clone(),
            pending: self.pending.clone(),
        }
    }

    /// Verify the risk counters against the positions and reservations they summarize.
    pub fn reconcile(&self) -> Result<(), RiskInvariantError> {
        self.risk.check()?;

        let open = self.positions.values().filter(|p| p.is_active()).count();
        if open != self.risk.open_position_count {
            return Err(RiskInvariantError::Mismatch {
                field: "open_position_count",
                recorded: self.risk.open_position_count as f64,
                recomputed: open as f64,
            });
        }
        let allocated: f64 = self.positions.values().map(Position::current_allocation).sum();
        if (allocated - self.risk.total_allocated_fraction).abs() > 1e-6 {
            return Err(RiskInvariantError::Mismatch {
                field: "total_allocated_fraction",
                recorded: self.risk.total_allocated_fraction,
                recomputed: allocated,
            });
        }
        if self.pending.len() != self.risk.pending_entry_count {
            return Err(RiskInvariantError::Mismatch {
                field: "pending_entry_count",
                recorded: self.risk.pending_entry_count as f64,
                recomputed: self.pending.len() as f64,
            });
        }
        let reserved: f64 = self.pending.values().map(|p| p.fraction).sum();
        if (reserved - self.risk.reserved_fraction).abs() > 1e-6 {
            return Err(RiskInvariantError::Mismatch {
                field: "reserved_fraction",
                recorded: self.risk.reserved_fraction,
                recomputed: reserved,
            });
        }
        Ok(())
    }

    // ── Entries ──

    /// Hold a slot and budget for a submitted entry order.
    pub fn reserve_entry(&mut self, entry: PendingEntry) -> Result<(), RiskLimit> {
        if self.has_exposure(&entry.ticker) {
            return Err(RiskLimit::MaxConcurrent);
        }
        self.risk.reserve(entry.fraction)?;
        debug!(ticker = %entry.ticker, fraction = entry.fraction, "entry reserved");
        self.pending.insert(entry.ticker.clone(), entry);
        Ok(())
    }

    /// Open a position from a buy fill. `None` if no entry was pending.
    pub fn on_entry_fill(&mut self, fill: &Fill) -> Option<&Position> {
        let entry = self.pending.remove(&fill.ticker)?;
        self.risk.commit(entry.fraction);

        let lockup_expiration = entry
            .lockup_days
            .map(|days| entry.first_trade_session + Duration::days(i64::from(days)));
        let position = Position::open(
            entry.ticker.clone(),
            entry.score,
            fill.price,
            fill.timestamp,
            fill.quantity,
            entry.fraction,
            lockup_expiration,
        );
        info!(
            ticker = %entry.ticker,
            price = fill.price,
            quantity = fill.quantity,
            fraction = entry.fraction,
            "position opened"
        );
        self.positions.insert(entry.ticker.clone(), position);
        self.positions.get(&entry.ticker)
    }

    /// Drop the reservation of an entry that expired or was rejected.
    pub fn cancel_entry(&mut self, ticker: &str) -> Option<PendingEntry> {
        let entry = self.pending.remove(ticker)?;
        self.risk.release_reservation(entry.fraction);
        Some(entry)
    }

    /// Cancel every entry whose session is at or before `session`.
    pub fn expire_pending(&mut self, session: NaiveDate) -> Vec<PendingEntry> {
        let stale: Vec<String> = self
            .pending
            .values()
            .filter(|p| p.session <= session)
            .map(|p| p.ticker.clone())
            .collect();
        stale
            .iter()
            .filter_map(|ticker| self.cancel_entry(ticker))
            .collect()
    }

    // ── Exits ──

    /// Run the exit rules once over every active position with a bar.
    pub fn evaluate_exits(&mut self, bars: &BTreeMap<String, Bar>) -> ExitSweep {
        let mut sweep = ExitSweep::default();
        let mut fully_closed = Vec::new();

        for (ticker, position) in self.positions.iter_mut() {
            if !position.is_active() {
                continue;
            }
            let Some(bar) = bars.get(ticker) else {
                debug!(ticker = %ticker, "no bar this tick, exit evaluation skipped");
                continue;
            };
            position.last_bar_session = Some(bar.session());

            let ctx = ExitContext::new(position, bar);
            let Some(intent) = self.policy.evaluate(position, &ctx) else {
                position.last_mark = bar.close;
                continue;
            };

            let fraction = intent.action.fraction_of_remaining();
            let released = position.reduce(fraction, bar.timestamp, bar.close, intent.reason);
            if intent.reason == ExitReason::ProfitTarget {
                position.profit_taken = true;
            }
            let closed = !position.is_active();
            self.risk.release_allocation(released, closed);

            info!(
                ticker = %ticker,
                reason = %intent.reason,
                fraction,
                mark = bar.close,
                ret = ctx.unrealized_return,
                remaining = position.remaining_fraction,
                "exit"
            );
            sweep.orders.push(OrderRequest::SubmitMarketOrder {
                ticker: ticker.clone(),
                fraction_to_close: fraction,
                reason: intent.reason,
            });
            sweep.exits.push(AppliedExit {
                ticker: ticker.clone(),
                reason: intent.reason,
                fraction_of_remaining: fraction,
                mark_price: bar.close,
                closed,
            });
            if closed {
                fully_closed.push(ticker.clone());
            }
        }

        for ticker in fully_closed {
            if let Some(position) = self.positions.remove(&ticker) {
                self.closed.push(position);
            }
        }
        sweep
    }

    /// Record the execution price of a sell. `false` if no exit leg awaits one.
    pub fn on_exit_fill(&mut self, fill: &Fill) -> bool {
        if let Some(position) = self.positions.get_mut(&fill.ticker) {
            if position.confirm_exit_fill(fill.price) {
                return true;
            }
        }
        self.closed
            .iter_mut()
            .rev()
            .filter(|p| p.ticker == fill.ticker)
            .any(|p| p.confirm_exit_fill(fill.price))
    }

    /// Count one more held session for every active position.
    ///
    /// Returns the tickers that went the whole session without a bar.
    pub fn close_session(&mut self, session: NaiveDate) -> Vec<String> {
        let mut gaps = Vec::new();
        for position in self.positions.values_mut().filter(|p| p.is_active()) {
            if position.last_bar_session.map_or(true, |seen| seen < session) {
                warn!(ticker = %position.ticker, %session, "no bar for open position this session");
                gaps.push(position.ticker.clone());
            }
            position.sessions_held += 1;
            debug!(
                ticker = %position.ticker,
                %session,
                sessions_held = position.sessions_held,
                remaining = position.remaining_fraction,
                "holding"
            );
        }
        gaps
    }

    // ── Queries ──

    /// Whether the ticker has a pending entry or an active position.
    pub fn has_exposure(&self, ticker: &str) -> bool {
        self.pending.contains_key(ticker)
            || self.positions.get(ticker).is_some_and(Position::is_active)
    }

    pub fn risk(&self) -> &PortfolioRiskState {
        &self.risk
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    /// Active positions, by ticker.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    pub fn pending(&self, ticker: &str) -> Option<&PendingEntry> {
        self.pending.get(ticker)
    }

    pub fn pending_entries(&self) -> impl Iterator<Item = &PendingEntry> {
        self.pending.values()
    }

    /// Last marked value of active positions as a capital fraction.
    pub fn marked_exposure(&self) -> f64 {
        self.positions
            .values()
            .map(|p| p.current_allocation() * p.last_mark / p.entry_price)
            .sum::<f64>()
            .max(0.0)
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty() && self.pending.is_empty() && self.risk.total_allocated_fraction <= RISK_EPS
    }
}

impl RiskGate for LifecycleManager {
    fn size_entry(&self, score: f64, volatility: f64) -> RiskDecision {
        self.sizing.size(&self.risk, score, volatility)
    }
}
