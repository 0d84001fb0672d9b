//! Stop loss: full close at or below a fixed return from entry.

use crate::domain::{ExitReason, Position};

use super::{ExitContext, ExitIntent, ExitRule};

#[derive(Debug, Clone)]
pub struct StopLoss {
    /// Negative return, e.g. -0.20.
    pub threshold: f64,
}

impl StopLoss {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl ExitRule for StopLoss {
    fn reason(&self) -> ExitReason {
        ExitReason::StopLoss
    }

    fn evaluate(&self, _position: &Position, ctx: &ExitContext<'_>) -> Option<ExitIntent> {
        (ctx.unrealized_return <= self.threshold).then(|| ExitIntent::full(self.reason()))
    }
}
