//! Domain types for the IPO decision core.

pub mod bar;
pub mod candidate;
pub mod listing;
pub mod order;
pub mod position;

pub use bar::Bar;
pub use candidate::{Candidate, CandidateStatus};
pub use listing::{ListingState, ListingStatus};
pub use order::{ExecutionEvent, Fill, OrderRequest, OrderSide};
pub use position::{ExitLeg, ExitReason, Position, PositionStatus};

