//! Candidate: one IPO under consideration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// An IPO tracked for potential entry, carrying a pre-computed score.
///
/// Candidates are built from validated score-feed records and never change
/// afterwards. Lifecycle progress lives in [`CandidateStatus`] inside the
/// registry, not on the record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub ticker: String,
    /// Expected listing date from the calendar (may slip).
    pub listing_date: NaiveDate,
    /// Attractiveness probability in [0, 1].
    pub score: f64,
    pub offer_price: f64,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub shares_offered: Option<u64>,
    /// Contractual lock-up length in calendar days, when known.
    pub lockup_days: Option<u32>,
}

impl Candidate {
    pub fn new(ticker: impl Into<String>, listing_date: NaiveDate, score: f64, offer_price: f64) -> Self {
        Self {
            ticker: ticker.into(),
            listing_date,
            score,
            offer_price,
            company_name: None,
            sector: None,
            shares_offered: None,
            lockup_days: None,
        }
    }

    pub fn with_lockup_days(mut self, days: u32) -> Self {
        self.lockup_days = Some(days);
        self
    }
}

/// Where a candidate stands in the registry.
///
/// `Entered`, `Consumed` and `Expired` are terminal: a candidate in any of
/// them is never evaluated for entry again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    Active,
    /// Entry order filled; the position now belongs to the lifecycle manager.
    Entered,
    /// Entry opportunity used up without a position.
    Consumed,
    /// Never observed trading within the monitoring window.
    Expired,
}

impl CandidateStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CandidateStatus::Active)
    }
}
