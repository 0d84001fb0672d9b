//! Lock-up approach: exit ahead of the insider selling wave.

use crate::domain::{ExitReason, Position};

use super::{ExitContext, ExitIntent, ExitRule};

/// Full close once the lock-up expiry is `exit_days` calendar days away or
/// closer, regardless of P&L. Positions without a known lock-up never fire.
#[derive(Debug, Clone)]
pub struct LockupApproach {
    pub exit_days: u32,
}

impl LockupApproach {
    pub fn new(exit_days: u32) -> Self {
        Self { exit_days }
    }
}

impl ExitRule for LockupApproach {
    fn reason(&self) -> ExitReason {
        ExitReason::LockupApproach
    }

    fn evaluate(&self, position: &Position, ctx: &ExitContext<'_>) -> Option<ExitIntent> {
        let days = position.days_to_lockup(ctx.session)?;
        (days <= i64::from(self.exit_days)).then(|| ExitIntent::full(self.reason()))
    }
}
