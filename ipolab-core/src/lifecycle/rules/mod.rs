//! Exit rules: one struct per trigger, evaluated as an ordered list.
//!
//! Rules are checked in [`ExitPolicy`] order and the first rule that fires
//! wins the evaluation cycle. Different rules may still fire in later cycles,
//! which is how a partial profit-take is followed by a time or lock-up exit.
//!
//! ## Priority
//!
//! 1. [`LockupApproach`] closes everything ahead of the lock-up expiry
//! 2. [`StopLoss`] closes everything at the loss threshold
//! 3. [`ProfitTarget`] takes a partial profit, once per position
//! 4. [`HoldingPeriod`] closes what is left after the holding window

pub mod holding_period;
pub mod lockup;
pub mod profit_target;
pub mod stop_loss;

pub use holding_period::HoldingPeriod;
pub use lockup::LockupApproach;
pub use profit_target::ProfitTarget;
pub use stop_loss::StopLoss;

use chrono::NaiveDate;

use crate::config::StrategyConfig;
use crate::domain::{Bar, ExitReason, Position};

/// Market context for one position in one evaluation cycle.
#[derive(Debug, Clone, Copy)]
pub struct ExitContext<'a> {
    pub bar: &'a Bar,
    pub session: NaiveDate,
    /// Return of the bar close against the entry price.
    pub unrealized_return: f64,
}

impl<'a> ExitContext<'a> {
    pub fn new(position: &Position, bar: &'a Bar) -> Self {
        Self {
            bar,
            session: bar.session(),
            unrealized_return: position.unrealized_return(bar.close),
        }
    }
}

/// How much of the position an exit takes off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitAction {
    Full,
    /// Fraction of the remaining position.
    Partial(f64),
}

impl ExitAction {
    pub fn fraction_of_remaining(self) -> f64 {
        match self {
            ExitAction::Full => 1.0,
            ExitAction::Partial(f) => f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitIntent {
    pub reason: ExitReason,
    pub action: ExitAction,
}

impl ExitIntent {
    pub fn full(reason: ExitReason) -> Self {
        Self {
            reason,
            action: ExitAction::Full,
        }
    }
}

/// One exit trigger.
pub trait ExitRule: Send + Sync {
    fn reason(&self) -> ExitReason;

    /// `Some` when the rule fires for this position on this bar.
    fn evaluate(&self, position: &Position, ctx: &ExitContext<'_>) -> Option<ExitIntent>;
}

/// Ordered exit rule list. First match wins.
pub struct ExitPolicy {
    rules: Vec<Box<dyn ExitRule>>,
}

impl ExitPolicy {
    pub fn new(rules: Vec<Box<dyn ExitRule>>) -> Self {
        Self { rules }
    }

    /// The standard four-rule policy.
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(vec![
            Box::new(LockupApproach::new(config.lockup_exit_days)),
            Box::new(StopLoss::new(config.stop_loss)),
            Box::new(ProfitTarget::new(
                config.profit_target,
                config.profit_take_fraction,
            )),
            Box::new(HoldingPeriod::new(config.holding_period_days)),
        ])
    }

    pub fn evaluate(&self, position: &Position, ctx: &ExitContext<'_>) -> Option<ExitIntent> {
        if !position.is_active() {
            return None;
        }
        self.rules.iter().find_map(|rule| rule.evaluate(position, ctx))
    }

    /// Rule reasons in evaluation order.
    pub fn priority(&self) -> Vec<ExitReason> {
        self.rules.iter().map(|r| r.reason()).collect()
    }
}

impl std::fmt::Debug for ExitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitPolicy")
            .field("priority", &self.priority())
            .finish()
    }
}
