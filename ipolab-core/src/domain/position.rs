//! Position: one open or closed IPO trade.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance for fraction comparisons.
pub const FRACTION_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    PartiallyClosed,
    Closed,
}

/// Why an exit fired. Declared in rule priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    LockupApproach,
    StopLoss,
    ProfitTarget,
    HoldingPeriod,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::LockupApproach => write!(f, "lockup_approach"),
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::ProfitTarget => write!(f, "profit_target"),
            ExitReason::HoldingPeriod => write!(f, "holding_period"),
        }
    }
}

/// One exit step (partial or full) applied to a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitLeg {
    pub timestamp: NaiveDateTime,
    /// Fraction of the original position closed by this leg.
    pub fraction_closed: f64,
    /// Price the exit decision was made at.
    pub mark_price: f64,
    pub reason: ExitReason,
    /// Confirmed execution price, once the venue reports the sell fill.
    pub fill_price: Option<f64>,
}

/// Position tracking
///
/// `remaining_fraction` starts at 1.0, only ever decreases, and is exactly
/// 0.0 once the position is `Closed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub score: f64,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    /// Filled share quantity at entry (long-only, so positive).
    pub quantity: f64,
    /// Portfolio capital fraction committed at entry.
    pub allocated_fraction: f64,
    pub remaining_fraction: f64,
    pub lockup_expiration: Option<NaiveDate>,
    pub status: PositionStatus,
    /// Sessions closed while the position was open.
    pub sessions_held: u32,
    pub profit_taken: bool,
    pub last_mark: f64,
    /// Most recent session with a bar (or the entry fill) for this ticker.
    #[serde(default)]
    pub last_bar_session: Option<NaiveDate>,
    pub exit_legs: Vec<ExitLeg>,
}

impl Position {
    pub fn open(
        ticker: impl Into<String>,
        score: f64,
        entry_price: f64,
        entry_time: NaiveDateTime,
        quantity: f64,
        allocated_fraction: f64,
        lockup_expiration: Option<NaiveDate>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            score,
            entry_price,
            entry_time,
            quantity,
            allocated_fraction,
            remaining_fraction: 1.0,
            lockup_expiration,
            status: PositionStatus::Open,
            sessions_held: 0,
            profit_taken: false,
            last_mark: entry_price,
            last_bar_session: Some(entry_time.date()),
            exit_legs: Vec::new(),
        }
    }

    /// Open or partially closed.
    pub fn is_active(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    /// Whether nothing has been taken off yet.
    pub fn is_whole(&self) -> bool {
        (self.remaining_fraction - 1.0).abs() < FRACTION_EPS
    }

    pub fn unrealized_return(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price
    }

    /// Capital fraction still committed.
    pub fn current_allocation(&self) -> f64 {
        self.allocated_fraction * self.remaining_fraction
    }

    pub fn remaining_quantity(&self) -> f64 {
        self.quantity * self.remaining_fraction
    }

    /// Calendar days from `today` until the lock-up expires (negative once past).
    pub fn days_to_lockup(&self, today: NaiveDate) -> Option<i64> {
        self.lockup_expiration
            .map(|expiry| expiry.signed_duration_since(today).num_days())
    }

    /// Close `fraction_of_remaining` of what is left.
    ///
    /// Returns the capital fraction released. A fraction of 1.0 or more
    /// closes the position and pins `remaining_fraction` to exactly zero.
    pub(crate) fn reduce(
        &mut self,
        fraction_of_remaining: f64,
        timestamp: NaiveDateTime,
        mark_price: f64,
        reason: ExitReason,
    ) -> f64 {
        if !self.is_active() {
            return 0.0;
        }
        let before = self.remaining_fraction;
        let after = if fraction_of_remaining >= 1.0 - FRACTION_EPS {
            0.0
        } else {
            (before * (1.0 - fraction_of_remaining.max(0.0))).max(0.0)
        };

        self.remaining_fraction = after;
        self.status = if after == 0.0 {
            PositionStatus::Closed
        } else {
            PositionStatus::PartiallyClosed
        };
        self.last_mark = mark_price;
        self.exit_legs.push(ExitLeg {
            timestamp,
            fraction_closed: before - after,
            mark_price,
            reason,
            fill_price: None,
        });

        self.allocated_fraction * (before - after)
    }

    /// Attach a confirmed sell price to the oldest unconfirmed exit leg.
    pub(crate) fn confirm_exit_fill(&mut self, price: f64) -> bool {
        match self.exit_legs.iter_mut().find(|leg| leg.fill_price.is_none()) {
            Some(leg) => {
                leg.fill_price = Some(price);
                true
            }
            None => false,
        }
    }

    /// Fraction-weighted return realized over all exit legs.
    pub fn realized_return(&self) -> Option<f64> {
        let closed: f64 = self.exit_legs.iter().map(|leg| leg.fraction_closed).sum();
        if closed <= 0.0 {
            return None;
        }
        let weighted: f64 = self
            .exit_legs
            .iter()
            .map(|leg| {
                let price = leg.fill_price.unwrap_or(leg.mark_price);
                leg.fraction_closed * self.unrealized_return(price)
            })
            .sum();
        Some(weighted / closed)
    }
}
