//! Execution venues: where orders become fills.
//!
//! The engine never talks to a venue directly. The session driver hands the
//! venue each tick's bars first, feeds the resulting events into the engine
//! and then submits the engine's orders. Outcomes are therefore always
//! reported one tick after the order was placed.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use tracing::{debug, info};

use ipolab_core::domain::{Bar, ExecutionEvent, Fill, OrderRequest, OrderSide};
use ipolab_core::BarResolution;

/// Order sink and event source for the session driver.
pub trait ExecutionVenue {
    /// Accept an order placed at `at`.
    fn submit(&mut self, order: &OrderRequest, at: NaiveDateTime);

    /// Resolve working orders against the bars of the next tick.
    fn match_tick(&mut self, at: NaiveDateTime, bars: &[Bar]) -> Vec<ExecutionEvent>;
}

#[derive(Debug, Clone, PartialEq)]
struct WorkingLimit {
    limit_price: f64,
    quantity: f64,
    session: NaiveDate,
}

/// Fills against the bar stream with no slippage or partial fills.
///
/// - Limit buys fill on a later bar of their own session once
///   `low <= limit`, at `min(open, limit)`. Quantity is
///   `floor(capital * fraction / limit)`; zero shares is a rejection.
/// - Market sells fill at the open of the ticker's next bar for the given
///   fraction of the quantity then held.
/// - Limits still working when a new session starts expire.
///
/// With session-resolution bars there is no later bar in the session, so a
/// limit buy is matched against the bar it was placed on: it fills at
/// `min(close, limit)` when `low <= limit` and expires otherwise.
#[derive(Debug, Clone)]
pub struct PaperVenue {
    capital: f64,
    resolution: BarResolution,
    /// Bars of the most recent tick, by ticker.
    last_bars: BTreeMap<String, Bar>,
    limits: BTreeMap<String, WorkingLimit>,
    /// Fractions of the held quantity to sell, in submission order.
    exits: BTreeMap<String, Vec<f64>>,
    holdings: BTreeMap<String, f64>,
    /// Outcomes decided at submission, reported with the next tick.
    queued: Vec<ExecutionEvent>,
    session: Option<NaiveDate>,
}

impl PaperVenue {
    pub fn new(capital: f64) -> Self {
        Self {
            capital,
            resolution: BarResolution::Intraday,
            last_bars: BTreeMap::new(),
            limits: BTreeMap::new(),
            exits: BTreeMap::new(),
            holdings: BTreeMap::new(),
            queued: Vec::new(),
            session: None,
        }
    }

    pub fn with_resolution(mut self, resolution: BarResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Seed holdings, e.g. when resuming from a snapshot.
    pub fn with_holdings<I>(mut self, holdings: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        self.holdings.extend(holdings);
        self
    }

    pub fn holding(&self, ticker: &str) -> f64 {
        self.holdings.get(ticker).copied().unwrap_or(0.0)
    }

    pub fn holdings(&self) -> &BTreeMap<String, f64> {
        &self.holdings
    }

    pub fn working_orders(&self) -> usize {
        self.limits.len() + self.exits.values().map(Vec::len).sum::<usize>()
    }

    fn expire_stale(&mut self, session: NaiveDate, events: &mut Vec<ExecutionEvent>) {
        let stale: Vec<String> = self
            .limits
            .iter()
            .filter(|(_, order)| order.session < session)
            .map(|(ticker, _)| ticker.clone())
            .collect();
        for ticker in stale {
            self.limits.remove(&ticker);
            debug!(ticker = %ticker, "limit order expired unfilled");
            events.push(ExecutionEvent::OrderExpired { ticker });
        }
    }

    fn fill_limit(&mut self, bar: &Bar, events: &mut Vec<ExecutionEvent>) {
        let Some(order) = self.limits.get(&bar.ticker) else {
            return;
        };
        if order.session != bar.session() || bar.low > order.limit_price {
            return;
        }
        let price = bar.open.min(order.limit_price);
        let quantity = order.quantity;
        self.limits.remove(&bar.ticker);
        *self.holdings.entry(bar.ticker.clone()).or_insert(0.0) += quantity;
        info!(ticker = %bar.ticker, price, quantity, "paper buy filled");
        events.push(ExecutionEvent::Fill(Fill {
            ticker: bar.ticker.clone(),
            side: OrderSide::Buy,
            price,
            quantity,
            timestamp: bar.timestamp,
        }));
    }

    /// Match a limit buy against the session bar it was placed on.
    fn fill_on_session_bar(&mut self, ticker: &str, limit_price: f64, quantity: f64, at: NaiveDateTime) {
        let bar = self
            .last_bars
            .get(ticker)
            .filter(|bar| bar.timestamp == at && bar.low <= limit_price);
        let Some(bar) = bar else {
            debug!(ticker = %ticker, limit_price, "session bar never reached the limit");
            self.queued.push(ExecutionEvent::OrderExpired {
                ticker: ticker.to_string(),
            });
            return;
        };
        let price = bar.close.min(limit_price);
        let timestamp = bar.timestamp;
        *self.holdings.entry(ticker.to_string()).or_insert(0.0) += quantity;
        info!(ticker = %ticker, price, quantity, "paper buy filled on session bar");
        self.queued.push(ExecutionEvent::Fill(Fill {
            ticker: ticker.to_string(),
            side: OrderSide::Buy,
            price,
            quantity,
            timestamp,
        }));
    }

    fn fill_exits(&mut self, bar: &Bar, events: &mut Vec<ExecutionEvent>) {
        let Some(fractions) = self.exits.remove(&bar.ticker) else {
            return;
        };
        for fraction in fractions {
            let held = self.holding(&bar.ticker);
            if held <= 0.0 {
                events.push(ExecutionEvent::OrderRejected {
                    ticker: bar.ticker.clone(),
                    reason: "nothing held".into(),
                });
                continue;
            }
            let quantity = if fraction >= 1.0 - 1e-9 {
                held
            } else {
                held * fraction
            };
            let left = held - quantity;
            if left <= 1e-9 {
                self.holdings.remove(&bar.ticker);
            } else {
                self.holdings.insert(bar.ticker.clone(), left);
            }
            info!(ticker = %bar.ticker, price = bar.open, quantity, "paper sell filled");
            events.push(ExecutionEvent::Fill(Fill {
                ticker: bar.ticker.clone(),
                side: OrderSide::Sell,
                price: bar.open,
                quantity,
                timestamp: bar.timestamp,
            }));
        }
    }
}

impl ExecutionVenue for PaperVenue {
    fn submit(&mut self, order: &OrderRequest, at: NaiveDateTime) {
        match order {
            OrderRequest::SubmitLimitOrder {
                ticker,
                limit_price,
                fractional_size,
                session,
            } => {
                let quantity = (self.capital * fractional_size / limit_price).floor();
                if !(quantity >= 1.0) {
                    debug!(ticker = %ticker, limit_price, "limit order too small for one share");
                    self.queued.push(ExecutionEvent::OrderRejected {
                        ticker: ticker.clone(),
                        reason: format!("size rounds to zero shares at {limit_price}"),
                    });
                    return;
                }
                if self.resolution == BarResolution::Session {
                    self.fill_on_session_bar(ticker, *limit_price, quantity, at);
                    return;
                }
                debug!(ticker = %ticker, limit_price, quantity, %at, "limit order working");
                self.limits.insert(
                    ticker.clone(),
                    WorkingLimit {
                        limit_price: *limit_price,
                        quantity,
                        session: *session,
                    },
                );
            }
            OrderRequest::SubmitMarketOrder {
                ticker,
                fraction_to_close,
                reason,
            } => {
                debug!(ticker = %ticker, fraction = fraction_to_close, %reason, %at, "market exit working");
                self.exits
                    .entry(ticker.clone())
                    .or_default()
                    .push(*fraction_to_close);
            }
        }
    }

    fn match_tick(&mut self, at: NaiveDateTime, bars: &[Bar]) -> Vec<ExecutionEvent> {
        let mut events = std::mem::take(&mut self.queued);

        let session = at.date();
        if self.session != Some(session) {
            self.expire_stale(session, &mut events);
            self.session = Some(session);
        }

        for bar in bars {
            self.fill_limit(bar, &mut events);
            self.fill_exits(bar, &mut events);
        }
        self.last_bars = bars
            .iter()
            .map(|bar| (bar.ticker.clone(), bar.clone()))
            .collect();
        events
    }
}
