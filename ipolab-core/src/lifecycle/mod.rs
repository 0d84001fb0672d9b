//! Position lifecycle: risk accounting, exit rules and the manager that owns
//! every position.

pub mod manager;
pub mod risk;
pub mod rules;

pub use manager::{AppliedExit, ExitSweep, LifecycleManager, LifecycleState, PendingEntry};
pub use risk::{EntrySizing, PortfolioRiskState, RiskDecision, RiskInvariantError, RiskLimit};
pub use rules::{ExitAction, ExitContext, ExitIntent, ExitPolicy, ExitRule};
