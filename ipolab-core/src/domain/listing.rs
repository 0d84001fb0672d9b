//! Listing state: first-trade detection per candidate.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Whether a candidate has been observed trading.
///
/// `Listed` and `Expired` are terminal; there are no backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    Pending,
    Listed,
    Expired,
}

/// Per-candidate listing tracker, mutated only by the listing monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingState {
    pub ticker: String,
    /// Calendar listing date the monitoring window counts from.
    pub expected_date: NaiveDate,
    pub status: ListingStatus,
    pub first_trade_time: Option<NaiveDateTime>,
    /// Sessions closed since `expected_date` without a bar (Pending only).
    pub sessions_waited: u32,
    /// Bars observed after the first one.
    pub bars_since_first_trade: u32,
    /// Session of the most recent bar.
    pub current_session: Option<NaiveDate>,
    /// Open of the first bar in `current_session`.
    pub session_open: Option<f64>,
    pub last_bar_time: Option<NaiveDateTime>,
}

impl ListingState {
    pub fn new(ticker: impl Into<String>, expected_date: NaiveDate) -> Self {
        Self {
            ticker: ticker.into(),
            expected_date,
            status: ListingStatus::Pending,
            first_trade_time: None,
            sessions_waited: 0,
            bars_since_first_trade: 0,
            current_session: None,
            session_open: None,
            last_bar_time: None,
        }
    }

    pub fn is_listed(&self) -> bool {
        self.status == ListingStatus::Listed
    }

    /// Session in which the candidate first traded.
    pub fn first_trade_session(&self) -> Option<NaiveDate> {
        self.first_trade_time.map(|t| t.date())
    }
}
