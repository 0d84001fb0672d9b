//! Feed validation: the typed boundary for score records and bars.
//!
//! Upstream records arrive with every field optional. Validation either
//! produces a [`Candidate`] or a [`FeedError`] naming what was wrong, so bad
//! input is rejected here instead of surfacing deep in decision logic.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Bar, Candidate};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Structured error types for feed records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    #[error("missing field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid date '{value}' (expected YYYY-MM-DD)")]
    InvalidDate { value: String },

    #[error("{ticker}: score {score} outside [0, 1]")]
    ScoreOutOfRange { ticker: String, score: f64 },

    #[error("{ticker}: offer price {price} must be positive")]
    InvalidOfferPrice { ticker: String, price: f64 },

    #[error("{ticker}: bar at {timestamp} fails OHLC sanity checks")]
    InsaneBar {
        ticker: String,
        timestamp: NaiveDateTime,
    },

    #[error("{ticker}: bar at {timestamp} is not after previous bar at {previous}")]
    NonMonotonic {
        ticker: String,
        timestamp: NaiveDateTime,
        previous: NaiveDateTime,
    },

    #[error("malformed record at line {line}: {reason}")]
    Malformed { line: u64, reason: String },
}

/// Score-feed record as delivered, before validation.
///
/// Column names follow the calendar CSV:
/// `date,ticker,company_name,score,offer_price,shares_offered,sector[,lockup_days]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawScoreRecord {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub offer_price: Option<f64>,
    #[serde(default)]
    pub shares_offered: Option<u64>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub lockup_days: Option<u32>,
}

impl RawScoreRecord {
    /// Minimal well-formed record, mostly for tests and demos.
    pub fn new(ticker: &str, date: &str, score: f64, offer_price: f64) -> Self {
        Self {
            date: Some(date.to_string()),
            ticker: Some(ticker.to_string()),
            score: Some(score),
            offer_price: Some(offer_price),
            ..Self::default()
        }
    }

    /// Validate into a typed candidate.
    pub fn validate(&self) -> Result<Candidate, FeedError> {
        let ticker = non_empty(&self.ticker).ok_or(FeedError::MissingField { field: "ticker" })?;
        let date = non_empty(&self.date).ok_or(FeedError::MissingField { field: "date" })?;
        let listing_date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).map_err(|_| {
            FeedError::InvalidDate {
                value: date.to_string(),
            }
        })?;

        let score = self.score.ok_or(FeedError::MissingField { field: "score" })?;
        if !(0.0..=1.0).contains(&score) {
            return Err(FeedError::ScoreOutOfRange {
                ticker: ticker.to_string(),
                score,
            });
        }

        let offer_price = self
            .offer_price
            .ok_or(FeedError::MissingField { field: "offer_price" })?;
        if !(offer_price > 0.0) || !offer_price.is_finite() {
            return Err(FeedError::InvalidOfferPrice {
                ticker: ticker.to_string(),
                price: offer_price,
            });
        }

        Ok(Candidate {
            ticker: ticker.trim().to_uppercase(),
            listing_date,
            score,
            offer_price,
            company_name: non_empty(&self.company_name).map(str::to_string),
            sector: non_empty(&self.sector).map(str::to_string),
            shares_offered: self.shares_offered,
            lockup_days: self.lockup_days,
        })
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Check a market bar against OHLC sanity and per-ticker monotonicity.
pub fn validate_bar(bar: &Bar, previous: Option<NaiveDateTime>) -> Result<(), FeedError> {
    if !bar.is_sane() {
        return Err(FeedError::InsaneBar {
            ticker: bar.ticker.clone(),
            timestamp: bar.timestamp,
        });
    }
    if let Some(prev) = previous {
        if bar.timestamp <= prev {
            return Err(FeedError::NonMonotonic {
                ticker: bar.ticker.clone(),
                timestamp: bar.timestamp,
                previous: prev,
            });
        }
    }
    Ok(())
}
