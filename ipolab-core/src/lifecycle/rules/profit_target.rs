//! Profit target: take a partial profit once per position.

use crate::domain::{ExitReason, Position};

use super::{ExitAction, ExitContext, ExitIntent, ExitRule};

/// Closes `take_fraction` of the position the first time the return reaches
/// `target`. Only fires while the position is whole and no profit has been
/// taken, so a round trip back to the target does not fire again.
#[derive(Debug, Clone)]
pub struct ProfitTarget {
    pub target: f64,
    pub take_fraction: f64,
}

impl ProfitTarget {
    pub fn new(target: f64, take_fraction: f64) -> Self {
        Self {
            target,
            take_fraction,
        }
    }
}

impl ExitRule for ProfitTarget {
    fn reason(&self) -> ExitReason {
        ExitReason::ProfitTarget
    }

    fn evaluate(&self, position: &Position, ctx: &ExitContext<'_>) -> Option<ExitIntent> {
        if position.profit_taken || !position.is_whole() {
            return None;
        }
        (ctx.unrealized_return >= self.target).then_some(ExitIntent {
            reason: self.reason(),
            action: ExitAction::Partial(self.take_fraction),
        })
    }
}
