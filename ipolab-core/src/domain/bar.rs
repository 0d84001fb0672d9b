//! Bar: the fundamental market data unit.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single ticker at a single tick.
///
/// Timestamps are exchange-local. The session a bar belongs to is its
/// calendar date, so daily and intraday feeds share the same type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Trading session (calendar date) of this bar.
    pub fn session(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }
}
