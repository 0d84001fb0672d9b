//! Tick input and report types.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, ExecutionEvent, OrderRequest};
use crate::entry::NoActionReason;
use crate::lifecycle::AppliedExit;

/// Everything the engine learns at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub timestamp: NaiveDateTime,
    pub bars: Vec<Bar>,
    /// Volatility gauge reading, if the feed has a new one.
    pub volatility: Option<f64>,
    /// Execution outcomes resolved since the previous tick.
    pub events: Vec<ExecutionEvent>,
}

impl Tick {
    pub fn new(timestamp: NaiveDateTime, bars: Vec<Bar>) -> Self {
        Self {
            timestamp,
            bars,
            volatility: None,
            events: Vec::new(),
        }
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = Some(volatility);
        self
    }

    pub fn with_events(mut self, events: Vec<ExecutionEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn session(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Why a pending entry order went away without a fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum EntryCancel {
    Expired,
    Rejected { reason: String },
}

/// State transition worth recording in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    CandidateListed {
        ticker: String,
        first_trade_time: NaiveDateTime,
    },
    CandidateExpired {
        ticker: String,
    },
    CandidateConsumed {
        ticker: String,
        reason: NoActionReason,
    },
    EntrySubmitted {
        ticker: String,
        limit_price: f64,
        fraction: f64,
    },
    EntryCancelled {
        ticker: String,
        cause: EntryCancel,
    },
    PositionOpened {
        ticker: String,
        price: f64,
        quantity: f64,
        fraction: f64,
    },
    PositionExit(AppliedExit),
    ExitConfirmed {
        ticker: String,
        price: f64,
    },
    SessionClosed {
        session: NaiveDate,
    },
}

/// Non-fatal problem met during a tick. Never stops processing of other
/// tickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum TickIssue {
    /// Open position that went a whole session without a bar; exits were
    /// not evaluated for it in that session.
    DataGap { ticker: String, session: NaiveDate },
    RejectedBar { ticker: String, reason: String },
    /// Execution event with no matching order.
    UnmatchedExecution { ticker: String, detail: String },
    ExitOrderRejected { ticker: String, reason: String },
    OutOfOrderTick {
        timestamp: NaiveDateTime,
        previous: NaiveDateTime,
    },
    InvariantViolation { detail: String },
}

/// Output of one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub timestamp: NaiveDateTime,
    pub orders: Vec<OrderRequest>,
    pub events: Vec<EngineEvent>,
    pub issues: Vec<TickIssue>,
}

impl TickReport {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            orders: Vec::new(),
            events: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.orders.is_empty() && self.events.is_empty() && self.issues.is_empty()
    }

    /// Entry orders emitted this tick.
    pub fn entry_orders(&self) -> impl Iterator<Item = &OrderRequest> {
        self.orders
            .iter()
            .filter(|o| matches!(o, OrderRequest::SubmitLimitOrder { .. }))
    }

    /// Exit orders emitted this tick.
    pub fn exit_orders(&self) -> impl Iterator<Item = &OrderRequest> {
        self.orders
            .iter()
            .filter(|o| matches!(o, OrderRequest::SubmitMarketOrder { .. }))
    }
}
