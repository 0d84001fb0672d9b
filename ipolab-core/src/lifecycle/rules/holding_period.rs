//! Holding period: force exit after N trading sessions.

use crate::domain::{ExitReason, Position};

use super::{ExitContext, ExitIntent, ExitRule};

#[derive(Debug, Clone)]
pub struct HoldingPeriod {
    /// Sessions held before the remaining position is closed.
    pub sessions: u32,
}

impl HoldingPeriod {
    pub fn new(sessions: u32) -> Self {
        Self { sessions }
    }
}

impl ExitRule for HoldingPeriod {
    fn reason(&self) -> ExitReason {
        ExitReason::HoldingPeriod
    }

    fn evaluate(&self, position: &Position, _ctx: &ExitContext<'_>) -> Option<ExitIntent> {
        (position.sessions_held >= self.sessions).then(|| ExitIntent::full(self.reason()))
    }
}
