//! Entry decision engine: whether and at what price to enter a fresh listing.
//!
//! Rules are applied in a fixed order:
//!
//! 1. the candidate must be listed
//! 2. only the first-trade session qualifies (terminal otherwise)
//! 3. the score must clear the threshold strictly (terminal otherwise)
//! 4. the wait period after the first trade must have elapsed (a
//!    session-resolution bar covers it)
//! 5. the limit price is the session open plus the premium, floored to the tick
//! 6. the risk gate sizes the order, or the decision degrades to no action
//!
//! The engine is stateless. Whether a `NoAction` consumes the candidate is
//! answered by [`NoActionReason::is_terminal`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{BarResolution, StrategyConfig, WaitPeriod};
use crate::domain::{Bar, Candidate, ListingState};
use crate::lifecycle::{RiskDecision, RiskLimit};

/// Why an evaluation produced no order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoActionReason {
    NotListed,
    /// The bar is past the first-trade session.
    EntrySessionPassed,
    BelowThreshold,
    RiskLimit(RiskLimit),
    /// Listed, but no session open has been recorded for this session.
    MissingSessionOpen,
}

impl NoActionReason {
    /// Terminal reasons consume the candidate for good.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NoActionReason::EntrySessionPassed | NoActionReason::BelowThreshold
        )
    }
}

impl fmt::Display for NoActionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoActionReason::NotListed => write!(f, "not_listed"),
            NoActionReason::EntrySessionPassed => write!(f, "entry_session_passed"),
            NoActionReason::BelowThreshold => write!(f, "below_threshold"),
            NoActionReason::RiskLimit(limit) => write!(f, "risk_limit:{limit}"),
            NoActionReason::MissingSessionOpen => write!(f, "missing_session_open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryDecision {
    NoAction(NoActionReason),
    /// Listed and qualified, but the wait period has not elapsed yet.
    AwaitWindow,
    SubmitLimitOrder { price: f64, size: f64 },
}

/// Sizing authority consulted before any entry order is finalized.
pub trait RiskGate {
    fn size_entry(&self, score: f64, volatility: f64) -> RiskDecision;
}

#[derive(Debug, Clone)]
pub struct EntryDecisionEngine {
    score_threshold: f64,
    entry_premium: f64,
    wait_period: WaitPeriod,
    bar_resolution: BarResolution,
    price_tick: f64,
}

impl EntryDecisionEngine {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            score_threshold: config.score_threshold,
            entry_premium: config.entry_premium,
            wait_period: config.wait_period,
            bar_resolution: config.bar_resolution,
            price_tick: config.price_tick,
        }
    }

    pub fn evaluate(
        &self,
        candidate: &Candidate,
        listing: &ListingState,
        bar: &Bar,
        gate: &dyn RiskGate,
        volatility: f64,
    ) -> EntryDecision {
        let Some(first_trade) = listing.first_trade_time.filter(|_| listing.is_listed()) else {
            return EntryDecision::NoAction(NoActionReason::NotListed);
        };
        if bar.session() != first_trade.date() {
            return EntryDecision::NoAction(NoActionReason::EntrySessionPassed);
        }
        if !(candidate.score > self.score_threshold) {
            return EntryDecision::NoAction(NoActionReason::BelowThreshold);
        }
        if !self.wait_elapsed(listing, bar) {
            return EntryDecision::AwaitWindow;
        }

        let open = match listing.session_open {
            Some(open) if listing.current_session == Some(bar.session()) && open > 0.0 => open,
            _ => return EntryDecision::NoAction(NoActionReason::MissingSessionOpen),
        };
        let price = self.limit_price(open);

        match gate.size_entry(candidate.score, volatility) {
            RiskDecision::Approved { size } => EntryDecision::SubmitLimitOrder { price, size },
            RiskDecision::Rejected(limit) => EntryDecision::NoAction(NoActionReason::RiskLimit(limit)),
        }
    }

    fn wait_elapsed(&self, listing: &ListingState, bar: &Bar) -> bool {
        if self.bar_resolution == BarResolution::Session {
            return true;
        }
        match self.wait_period {
            WaitPeriod::Minutes(minutes) => listing
                .first_trade_time
                .map(|first| (bar.timestamp - first).num_minutes() >= i64::from(minutes))
                .unwrap_or(false),
            WaitPeriod::Bars(bars) => listing.bars_since_first_trade >= bars,
        }
    }

    /// Session open plus premium, floored to the price tick.
    pub fn limit_price(&self, session_open: f64) -> f64 {
        let raw = session_open * (1.0 + self.entry_premium);
        let ticks = (raw / self.price_tick + 1e-9).floor();
        // Round off the representation error of ticks * tick.
        let decimals = (-self.price_tick.log10()).ceil().max(0.0) as i32;
        let scale = 10f64.powi(decimals);
        (ticks * self.price_tick * scale).round() / scale
    }
}
