//! Listing monitor: converts calendar expectations into observed market fact.
//!
//! Calendar listing dates slip by hours or days, so the first observed bar is
//! treated as ground truth for "this ticker now trades". Pending candidates
//! that never produce a bar within the monitoring window expire.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::domain::{Bar, Candidate, ListingState, ListingStatus};

/// What a single observation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingTransition {
    None,
    Listed { first_trade_time: NaiveDateTime },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingMonitor {
    /// Trading sessions a pending candidate may go without a bar.
    window_sessions: u32,
    states: BTreeMap<String, ListingState>,
}

impl ListingMonitor {
    pub fn new(window_sessions: u32) -> Self {
        Self {
            window_sessions,
            states: BTreeMap::new(),
        }
    }

    /// Start tracking a candidate. Returns false if the ticker is already
    /// tracked and not terminal; a relisted ticker replaces its old state.
    pub fn track(&mut self, candidate: &Candidate) -> bool {
        if let Some(existing) = self.states.get(&candidate.ticker) {
            if existing.status == ListingStatus::Pending {
                return false;
            }
        }
        self.states.insert(
            candidate.ticker.clone(),
            ListingState::new(candidate.ticker.clone(), candidate.listing_date),
        );
        true
    }

    /// Feed one bar for a tracked ticker.
    pub fn observe(&mut self, ticker: &str, bar: &Bar) -> ListingTransition {
        let Some(state) = self.states.get_mut(ticker) else {
            return ListingTransition::None;
        };

        match state.status {
            ListingStatus::Expired => ListingTransition::None,
            ListingStatus::Pending => {
                state.status = ListingStatus::Listed;
                state.first_trade_time = Some(bar.timestamp);
                state.current_session = Some(bar.session());
                state.session_open = Some(bar.open);
                state.last_bar_time = Some(bar.timestamp);
                info!(
                    ticker = %ticker,
                    first_trade = %bar.timestamp,
                    expected = %state.expected_date,
                    "first trade observed"
                );
                ListingTransition::Listed {
                    first_trade_time: bar.timestamp,
                }
            }
            ListingStatus::Listed => {
                if state.current_session != Some(bar.session()) {
                    state.current_session = Some(bar.session());
                    state.session_open = Some(bar.open);
                }
                state.bars_since_first_trade += 1;
                state.last_bar_time = Some(bar.timestamp);
                ListingTransition::None
            }
        }
    }

    /// Advance the monitoring window at the close of `session`.
    ///
    /// Every pending candidate whose expected date has arrived gets one more
    /// session counted against it. Returns the tickers that expired.
    pub fn close_session(&mut self, session: NaiveDate) -> Vec<String> {
        let mut expired = Vec::new();
        for state in self.states.values_mut() {
            if state.status != ListingStatus::Pending || state.expected_date > session {
                continue;
            }
            state.sessions_waited += 1;
            if state.sessions_waited >= self.window_sessions {
                state.status = ListingStatus::Expired;
                info!(
                    ticker = %state.ticker,
                    sessions = state.sessions_waited,
                    "no trade observed within monitoring window"
                );
                expired.push(state.ticker.clone());
            } else {
                debug!(ticker = %state.ticker, sessions = state.sessions_waited, "still pending");
            }
        }
        expired
    }

    pub fn state(&self, ticker: &str) -> Option<&ListingState> {
        self.states.get(ticker)
    }

    pub fn states(&self) -> impl Iterator<Item = &ListingState> {
        self.states.values()
    }

    /// Time since first trade, if listed.
    pub fn elapsed_since_first_trade(&self, ticker: &str, at: NaiveDateTime) -> Option<Duration> {
        self.states
            .get(ticker)
            .and_then(|s| s.first_trade_time)
            .map(|first| at - first)
    }

    pub fn window_sessions(&self) -> u32 {
        self.window_sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn bar(ticker: &str, d: u32, h: u32, open: f64) -> Bar {
        Bar {
            ticker: ticker.into(),
            timestamp: day(d).and_hms_opt(h, 30, 0).unwrap(),
            open,
            high: open + 1.0,
            low: open - 1.0,
            close: open,
            volume: 10_000,
        }
    }

    fn monitor_with(ticker: &str, expected: u32) -> ListingMonitor {
        let mut m = ListingMonitor::new(10);
        m.track(&Candidate::new(ticker, day(expected), 0.8, 20.0));
        m
    }

    #[test]
    fn first_bar_lists() {
        let mut m = monitor_with("IBTA", 18);
        let t = m.observe("IBTA", &bar("IBTA", 18, 9, 26.0));
        assert!(matches!(t, ListingTransition::Listed { .. }));
        let s = m.state("IBTA").unwrap();
        assert_eq!(s.status, ListingStatus::Listed);
        assert_eq!(s.session_open, Some(26.0));
        assert_eq!(s.first_trade_session(), Some(day(18)));
    }

    #[test]
    fn later_bars_do_not_relist() {
        let mut m = monitor_with("IBTA", 18);
        m.observe("IBTA", &bar("IBTA", 18, 9, 26.0));
        let t = m.observe("IBTA", &bar("IBTA", 18, 10, 29.0));
        assert_eq!(t, ListingTransition::None);
        let s = m.state("IBTA").unwrap();
        assert_eq!(s.bars_since_first_trade, 1);
        assert_eq!(s.session_open, Some(26.0));
    }

    #[test]
    fn session_open_resets_on_new_session() {
        let mut m = monitor_with("IBTA", 18);
        m.observe("IBTA", &bar("IBTA", 18, 9, 26.0));
        m.observe("IBTA", &bar("IBTA", 19, 9, 31.0));
        assert_eq!(m.state("IBTA").unwrap().session_open, Some(31.0));
    }

    #[test]
    fn expires_after_window_sessions() {
        let mut m = monitor_with("ZZZ", 1);
        for d in 1..10 {
            assert!(m.close_session(day(d)).is_empty());
        }
        assert_eq!(m.close_session(day(10)), vec!["ZZZ".to_string()]);
        assert_eq!(m.state("ZZZ").unwrap().status, ListingStatus::Expired);
    }

    #[test]
    fn future_listing_does_not_count_sessions() {
        let mut m = monitor_with("ZZZ", 20);
        for d in 1..20 {
            m.close_session(day(d));
        }
        assert_eq!(m.state("ZZZ").unwrap().sessions_waited, 0);
    }

    #[test]
    fn expired_is_terminal() {
        let mut m = ListingMonitor::new(1);
        m.track(&Candidate::new("ZZZ", day(1), 0.8, 20.0));
        m.close_session(day(1));
        let t = m.observe("ZZZ", &bar("ZZZ", 2, 9, 20.0));
        assert_eq!(t, ListingTransition::None);
        assert_eq!(m.state("ZZZ").unwrap().status, ListingStatus::Expired);
    }

    #[test]
    fn early_listing_is_accepted() {
        let mut m = monitor_with("ALAB", 20);
        let t = m.observe("ALAB", &bar("ALAB", 19, 11, 36.0));
        assert!(matches!(t, ListingTransition::Listed { .. }));
    }

    #[test]
    fn elapsed_since_first_trade() {
        let mut m = monitor_with("IBTA", 18);
        m.observe("IBTA", &bar("IBTA", 18, 9, 26.0));
        let at = day(18).and_hms_opt(10, 30, 0).unwrap();
        assert_eq!(m.elapsed_since_first_trade("IBTA", at), Some(Duration::minutes(60)));
    }
}
