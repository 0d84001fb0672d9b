//! Property tests for tick grouping and paper venue accounting.
//!
//! Uses proptest to verify:
//! 1. Grouping: every bar lands in exactly one tick, ticks are in time order,
//!    and each session's gauge reading rides on its first tick only
//! 2. Limit buys: whole-share quantity from capital and size, never above the limit
//! 3. Market sells: sold plus still-held quantity always equals what was bought

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use ipolab_core::domain::{Bar, ExecutionEvent, ExitReason, OrderRequest, OrderSide};
use ipolab_runner::{group_into_ticks, ExecutionVenue, PaperVenue};

const TICKERS: [&str; 4] = ["ALAB", "IBTA", "RDDT", "VIK"];

fn day0() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 18).unwrap()
}

fn ts(session: u32, slot: u32) -> NaiveDateTime {
    (day0() + Duration::days(i64::from(session)))
        .and_hms_opt(9, 30, 0)
        .unwrap()
        + Duration::minutes(30 * i64::from(slot))
}

fn bar(ticker: &str, at: NaiveDateTime, open: f64, low: f64) -> Bar {
    Bar {
        ticker: ticker.into(),
        timestamp: at,
        open,
        high: open.max(low),
        low,
        close: open,
        volume: 1_000,
    }
}

// ── 1. Grouping ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn grouping_keeps_every_bar_in_time_order(
        keys in prop::collection::vec((0..TICKERS.len(), 0u32..6, 0u32..8), 0..80),
        gauge in prop::collection::btree_map(0u32..6, 5.0..60.0_f64, 0..6),
    ) {
        let bars: Vec<Bar> = keys
            .iter()
            .map(|&(t, session, slot)| bar(TICKERS[t], ts(session, slot), 20.0, 19.5))
            .collect();
        let volatility: BTreeMap<NaiveDate, f64> = gauge
            .iter()
            .map(|(session, value)| (day0() + Duration::days(i64::from(*session)), *value))
            .collect();

        let ticks = group_into_ticks(bars.clone(), &volatility);

        prop_assert_eq!(ticks.iter().map(|t| t.bars.len()).sum::<usize>(), bars.len());
        prop_assert!(ticks.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        for tick in &ticks {
            prop_assert!(!tick.bars.is_empty());
            prop_assert!(tick.bars.iter().all(|b| b.timestamp == tick.timestamp));
            prop_assert!(tick.bars.windows(2).all(|w| w[0].ticker <= w[1].ticker));
        }

        let mut seen_sessions = BTreeSet::new();
        for tick in &ticks {
            let first_of_session = seen_sessions.insert(tick.session());
            match tick.volatility {
                Some(value) => {
                    prop_assert!(first_of_session);
                    prop_assert_eq!(Some(&value), volatility.get(&tick.session()));
                }
                None => prop_assert!(!(first_of_session && volatility.contains_key(&tick.session()))),
            }
        }
    }
}

// ── 2. Limit buys ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn limit_buys_size_whole_shares_within_the_limit(
        capital in 1_000.0..10_000_000.0_f64,
        fraction in 0.005..0.15_f64,
        limit in 1.0..500.0_f64,
        open_ratio in 0.8..1.2_f64,
    ) {
        let mut venue = PaperVenue::new(capital);
        venue.submit(
            &OrderRequest::SubmitLimitOrder {
                ticker: "RDDT".into(),
                limit_price: limit,
                fractional_size: fraction,
                session: day0(),
            },
            ts(0, 0),
        );
        let open = limit * open_ratio;
        let events = venue.match_tick(ts(0, 1), &[bar("RDDT", ts(0, 1), open, limit.min(open) * 0.99)]);

        let expected = (capital * fraction / limit).floor();
        if expected < 1.0 {
            prop_assert!(
                matches!(events.as_slice(), [ExecutionEvent::OrderRejected { .. }]),
                "unexpected events {:?}", events
            );
            prop_assert_eq!(venue.holding("RDDT"), 0.0);
        } else {
            match events.as_slice() {
                [ExecutionEvent::Fill(fill)] => {
                    prop_assert_eq!(fill.side, OrderSide::Buy);
                    prop_assert_eq!(fill.quantity, expected);
                    prop_assert!(fill.price <= limit);
                    prop_assert!(fill.quantity * fill.price <= capital * fraction * (1.0 + 1e-9) + limit);
                }
                other => prop_assert!(false, "expected one fill, got {:?}", other),
            }
            prop_assert_eq!(venue.holding("RDDT"), expected);
        }
    }
}

// ── 3. Market sells ──────────────────────────────────────────────────

fn arb_fraction() -> impl Strategy<Value = f64> {
    prop_oneof![0.05..0.95_f64, Just(0.5), Just(1.0)]
}

proptest! {
    #[test]
    fn sells_never_exceed_what_is_held(
        initial in 1.0..100_000.0_f64,
        fractions in prop::collection::vec(arb_fraction(), 1..12),
    ) {
        let mut venue = PaperVenue::new(1_000_000.0).with_holdings([("RDDT".to_string(), initial)]);
        let mut sold = 0.0;
        let mut flat = false;

        for (i, fraction) in fractions.iter().enumerate() {
            let slot = i as u32;
            venue.submit(
                &OrderRequest::SubmitMarketOrder {
                    ticker: "RDDT".into(),
                    fraction_to_close: *fraction,
                    reason: ExitReason::ProfitTarget,
                },
                ts(0, slot),
            );
            let before = venue.holding("RDDT");
            let events = venue.match_tick(ts(0, slot + 1), &[bar("RDDT", ts(0, slot + 1), 30.0, 29.0)]);

            match events.as_slice() {
                [ExecutionEvent::Fill(fill)] => {
                    prop_assert!(!flat);
                    prop_assert_eq!(fill.side, OrderSide::Sell);
                    prop_assert!(fill.quantity > 0.0);
                    prop_assert!(fill.quantity <= before + 1e-9);
                    sold += fill.quantity;
                }
                [ExecutionEvent::OrderRejected { .. }] => prop_assert!(flat),
                other => prop_assert!(false, "unexpected events {:?}", other),
            }

            let held = venue.holding("RDDT");
            prop_assert!(held >= 0.0);
            prop_assert!((sold + held - initial).abs() <= 1e-6);
            if *fraction >= 1.0 {
                prop_assert_eq!(held, 0.0);
            }
            flat = held == 0.0;
        }
    }
}
