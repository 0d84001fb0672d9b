//! Orders emitted by the core and execution events it consumes.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::position::ExitReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order emitted by the decision core for the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderRequest {
    /// Day-1 entry. Expires unfilled at the close of `session`.
    SubmitLimitOrder {
        ticker: String,
        limit_price: f64,
        /// Fraction of portfolio capital to commit.
        fractional_size: f64,
        session: NaiveDate,
    },
    /// Exit of `fraction_to_close` of the currently held quantity.
    SubmitMarketOrder {
        ticker: String,
        fraction_to_close: f64,
        reason: ExitReason,
    },
}

impl OrderRequest {
    pub fn ticker(&self) -> &str {
        match self {
            OrderRequest::SubmitLimitOrder { ticker, .. } => ticker,
            OrderRequest::SubmitMarketOrder { ticker, .. } => ticker,
        }
    }

    pub fn side(&self) -> OrderSide {
        match self {
            OrderRequest::SubmitLimitOrder { .. } => OrderSide::Buy,
            OrderRequest::SubmitMarketOrder { .. } => OrderSide::Sell,
        }
    }
}

/// Fill record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub ticker: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: NaiveDateTime,
}

/// Already-resolved outcome reported by the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Fill(Fill),
    OrderExpired { ticker: String },
    OrderRejected { ticker: String, reason: String },
}

impl ExecutionEvent {
    pub fn ticker(&self) -> &str {
        match self {
            ExecutionEvent::Fill(fill) => &fill.ticker,
            ExecutionEvent::OrderExpired { ticker } => ticker,
            ExecutionEvent::OrderRejected { ticker, .. } => ticker,
        }
    }
}
