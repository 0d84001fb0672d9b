//! Session engine: one atomic pass per tick over registry, monitor, entry
//! engine and lifecycle manager.

pub mod session;
pub mod state;

pub use session::Engine;
pub use state::{EngineEvent, EntryCancel, Tick, TickIssue, TickReport};
