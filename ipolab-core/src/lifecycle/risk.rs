//! Portfolio risk state and the entry sizing gate.
//!
//! [`PortfolioRiskState`] is the single source of truth for slot and capital
//! usage. Reservations for submitted-but-unfilled entries count against both
//! limits, so the invariants hold across the whole order round trip:
//!
//! - `open_position_count + pending_entry_count <= max_concurrent`
//! - `total_allocated_fraction + reserved_fraction <= portfolio_cap`
//!
//! New entries are held strictly below the cap: a request that would bring
//! the committed total to `portfolio_cap` is refused.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::StrategyConfig;

/// Slack allowed on fraction sums before an invariant counts as broken.
pub const RISK_EPS: f64 = 1e-9;

/// Why the risk gate refused to size an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLimit {
    /// Every concurrent slot is taken by an open position or pending entry.
    MaxConcurrent,
    /// No portfolio budget left for a position of meaningful size.
    PortfolioCap,
    /// Budget exists but scaling pushed the size under the minimum.
    BelowMinimumSize,
}

impl fmt::Display for RiskLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLimit::MaxConcurrent => write!(f, "max_concurrent"),
            RiskLimit::PortfolioCap => write!(f, "portfolio_cap"),
            RiskLimit::BelowMinimumSize => write!(f, "below_minimum_size"),
        }
    }
}

/// Answer of the risk gate for one prospective entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskDecision {
    Approved { size: f64 },
    Rejected(RiskLimit),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskInvariantError {
    #[error("{open} open + {pending} pending exceeds max_concurrent {max}")]
    TooManySlots {
        open: usize,
        pending: usize,
        max: usize,
    },

    #[error("allocated {allocated:.6} + reserved {reserved:.6} exceeds portfolio_cap {cap}")]
    OverAllocated {
        allocated: f64,
        reserved: f64,
        cap: f64,
    },

    #[error("{field} is negative ({value})")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} disagrees with positions: recorded {recorded}, recomputed {recomputed}")]
    Mismatch {
        field: &'static str,
        recorded: f64,
        recomputed: f64,
    },
}

/// Portfolio-wide slot and capital accounting for a trading session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRiskState {
    pub open_position_count: usize,
    pub total_allocated_fraction: f64,
    pub per_position_cap: f64,
    pub portfolio_cap: f64,
    pub max_concurrent: usize,
    pub pending_entry_count: usize,
    pub reserved_fraction: f64,
}

impl PortfolioRiskState {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            open_position_count: 0,
            total_allocated_fraction: 0.0,
            per_position_cap: config.per_position_cap,
            portfolio_cap: config.portfolio_cap,
            max_concurrent: config.max_positions,
            pending_entry_count: 0,
            reserved_fraction: 0.0,
        }
    }

    /// Slots not taken by open positions or pending entries.
    pub fn free_slots(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.open_position_count + self.pending_entry_count)
    }

    /// Capital fraction not allocated or reserved.
    pub fn available_budget(&self) -> f64 {
        (self.portfolio_cap - self.total_allocated_fraction - self.reserved_fraction).max(0.0)
    }

    pub fn check(&self) -> Result<(), RiskInvariantError> {
        if self.open_position_count + self.pending_entry_count > self.max_concurrent {
            return Err(RiskInvariantError::TooManySlots {
                open: self.open_position_count,
                pending: self.pending_entry_count,
                max: self.max_concurrent,
            });
        }
        if self.total_allocated_fraction < -RISK_EPS {
            return Err(RiskInvariantError::Negative {
                field: "total_allocated_fraction",
                value: self.total_allocated_fraction,
            });
        }
        if self.reserved_fraction < -RISK_EPS {
            return Err(RiskInvariantError::Negative {
                field: "reserved_fraction",
                value: self.reserved_fraction,
            });
        }
        if self.total_allocated_fraction + self.reserved_fraction > self.portfolio_cap + RISK_EPS {
            return Err(RiskInvariantError::OverAllocated {
                allocated: self.total_allocated_fraction,
                reserved: self.reserved_fraction,
                cap: self.portfolio_cap,
            });
        }
        Ok(())
    }

    pub fn holds(&self) -> bool {
        self.check().is_ok()
    }

    /// Take a slot and budget for a submitted entry order.
    pub(crate) fn reserve(&mut self, size: f64) -> Result<(), RiskLimit> {
        if self.free_slots() == 0 {
            return Err(RiskLimit::MaxConcurrent);
        }
        if reaches_cap(self.total_allocated_fraction + self.reserved_fraction + size, self.portfolio_cap) {
            return Err(RiskLimit::PortfolioCap);
        }
        self.pending_entry_count += 1;
        self.reserved_fraction += size;
        Ok(())
    }

    /// Give back a reservation whose order expired or was rejected.
    pub(crate) fn release_reservation(&mut self, size: f64) {
        self.pending_entry_count = self.pending_entry_count.saturating_sub(1);
        self.reserved_fraction = snap(self.reserved_fraction - size);
        if self.pending_entry_count == 0 {
            self.reserved_fraction = 0.0;
        }
    }

    /// Convert a reservation into an open position.
    pub(crate) fn commit(&mut self, size: f64) {
        self.release_reservation(size);
        self.open_position_count += 1;
        self.total_allocated_fraction += size;
    }

    /// Return capital from a partial or full exit. A full close frees the slot.
    pub(crate) fn release_allocation(&mut self, fraction: f64, closes_position: bool) {
        self.total_allocated_fraction = snap(self.total_allocated_fraction - fraction);
        if closes_position {
            self.open_position_count = self.open_position_count.saturating_sub(1);
        }
        if self.open_position_count == 0 {
            self.total_allocated_fraction = 0.0;
        }
    }
}

/// An entry may not bring the committed total up to the cap itself.
fn reaches_cap(total: f64, cap: f64) -> bool {
    total >= cap - RISK_EPS
}

/// Clamp float drift around zero.
fn snap(value: f64) -> f64 {
    if value.abs() < RISK_EPS {
        0.0
    } else {
        value.max(0.0)
    }
}

/// Sizing parameters applied on top of the portfolio budget.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySizing {
    pub score_threshold: f64,
    pub volatility_scale_threshold: f64,
    pub volatility_scale_factor: f64,
    pub min_position_fraction: f64,
    pub confidence_scaling: bool,
}

impl EntrySizing {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            score_threshold: config.score_threshold,
            volatility_scale_threshold: config.volatility_scale_threshold,
            volatility_scale_factor: config.volatility_scale_factor,
            min_position_fraction: config.min_position_fraction,
            confidence_scaling: config.confidence_scaling,
        }
    }

    /// Size a prospective entry against the current risk state.
    pub fn size(&self, risk: &PortfolioRiskState, score: f64, volatility: f64) -> RiskDecision {
        if risk.free_slots() == 0 {
            return RiskDecision::Rejected(RiskLimit::MaxConcurrent);
        }

        let available = risk.available_budget();
        if available < self.min_position_fraction || available <= RISK_EPS {
            return RiskDecision::Rejected(RiskLimit::PortfolioCap);
        }

        let mut size = risk.per_position_cap.min(available);
        if volatility > self.volatility_scale_threshold {
            size *= self.volatility_scale_factor;
        }
        if self.confidence_scaling {
            size *= self.confidence_multiplier(score);
        }

        if size < self.min_position_fraction || size <= RISK_EPS {
            return RiskDecision::Rejected(RiskLimit::BelowMinimumSize);
        }
        if reaches_cap(risk.total_allocated_fraction + risk.reserved_fraction + size, risk.portfolio_cap) {
            return RiskDecision::Rejected(RiskLimit::PortfolioCap);
        }
        RiskDecision::Approved { size }
    }

    /// Linear ramp from 0.5 at the threshold to 1.0 at a perfect score.
    pub fn confidence_multiplier(&self, score: f64) -> f64 {
        let headroom = 1.0 - self.score_threshold;
        if headroom <= RISK_EPS {
            return 1.0;
        }
        let excess = ((score - self.score_threshold) / headroom).clamp(0.0, 1.0);
        (0.5 + 0.5 * excess).min(1.0)
    }
}
