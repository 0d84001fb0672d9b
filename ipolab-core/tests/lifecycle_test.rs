//! Position lifecycle scenarios driven through the engine tick loop.
//!
//! Each test lists a candidate, enters it, and then walks prices through the
//! exit rules one session at a time.

use chrono::{NaiveDate, NaiveDateTime};
use ipolab_core::domain::{
    Bar, CandidateStatus, ExecutionEvent, ExitReason, Fill, OrderRequest, OrderSide, PositionStatus,
};
use ipolab_core::entry::NoActionReason;
use ipolab_core::feed::RawScoreRecord;
use ipolab_core::{Engine, EngineEvent, StrategyConfig, Tick, TickReport, WaitPeriod};

// ── Helpers ──────────────────────────────────────────────────────────

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn bar(ticker: &str, ts: NaiveDateTime, open: f64, close: f64) -> Bar {
    Bar {
        ticker: ticker.into(),
        timestamp: ts,
        open,
        high: open.max(close) + 0.10,
        low: open.min(close) - 0.10,
        close,
        volume: 25_000,
    }
}

fn buy(ticker: &str, price: f64, ts: NaiveDateTime) -> ExecutionEvent {
    ExecutionEvent::Fill(Fill {
        ticker: ticker.into(),
        side: OrderSide::Buy,
        price,
        quantity: 100.0,
        timestamp: ts,
    })
}

fn immediate() -> StrategyConfig {
    StrategyConfig {
        wait_period: WaitPeriod::Minutes(0),
        ..StrategyConfig::default()
    }
}

fn engine_with(config: StrategyConfig, ticker: &str, score: f64) -> Engine {
    let mut engine = Engine::new(config).unwrap();
    engine
        .ingest(&RawScoreRecord::new(ticker, "2024-03-21", score, 17.0))
        .unwrap();
    engine
}

/// Mark `ticker` at `close` on `day` (10:00).
fn mark(engine: &mut Engine, ticker: &str, day: u32, close: f64) -> TickReport {
    let ts = at(day, 10, 0);
    engine.on_tick(Tick::new(ts, vec![bar(ticker, ts, close, close)]))
}

/// List on 2024-03-21 at `open`, submit the entry and fill it at `fill_price`.
fn open_position(engine: &mut Engine, ticker: &str, open: f64, fill_price: f64) {
    let first = at(21, 9, 30);
    let report = engine.on_tick(Tick::new(first, vec![bar(ticker, first, open, open)]));
    assert_eq!(report.entry_orders().count(), 1, "expected an entry order");

    let next = at(21, 10, 30);
    let report = engine.on_tick(
        Tick::new(next, vec![bar(ticker, next, fill_price, fill_price)])
            .with_events(vec![buy(ticker, fill_price, at(21, 9, 31))]),
    );
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, EngineEvent::PositionOpened { .. })));
    assert_eq!(engine.registry().status(ticker), Some(CandidateStatus::Entered));
}

fn exit_orders(report: &TickReport) -> Vec<(f64, ExitReason)> {
    report
        .exit_orders()
        .map(|o| match o {
            OrderRequest::SubmitMarketOrder {
                fraction_to_close,
                reason,
                ..
            } => (*fraction_to_close, *reason),
            _ => unreachable!(),
        })
        .collect()
}

// ── Entry ────────────────────────────────────────────────────────────

#[test]
fn score_below_threshold_never_orders() {
    let mut engine = engine_with(StrategyConfig::default(), "LOWS", 0.69);
    let mut orders = 0;
    for (d, h) in [(21, 9), (21, 10), (21, 11), (21, 15), (22, 10), (25, 10)] {
        let ts = at(d, h, 30);
        let report = engine.on_tick(Tick::new(ts, vec![bar("LOWS", ts, 20.0, 30.0)]));
        orders += report.entry_orders().count();
    }
    assert_eq!(orders, 0);
    assert_eq!(engine.registry().status("LOWS"), Some(CandidateStatus::Consumed));
}

#[test]
fn limit_price_is_open_plus_premium() {
    let mut engine = engine_with(StrategyConfig::default(), "ARM", 0.85);
    let first = at(21, 9, 30);
    let report = engine.on_tick(Tick::new(first, vec![bar("ARM", first, 20.0, 20.5)]));
    assert_eq!(report.entry_orders().count(), 0, "inside the wait window");

    let later = at(21, 10, 30);
    let report = engine.on_tick(Tick::new(later, vec![bar("ARM", later, 24.0, 24.0)]));
    let orders: Vec<_> = report.entry_orders().collect();
    assert_eq!(orders.len(), 1);
    match orders[0] {
        OrderRequest::SubmitLimitOrder {
            limit_price,
            fractional_size,
            ..
        } => {
            assert_eq!(*limit_price, 21.00);
            assert!((fractional_size - 0.15).abs() < 1e-12);
        }
        other => panic!("unexpected order {other:?}"),
    }
}

#[test]
fn unfilled_entry_expires_and_is_not_retried() {
    let mut engine = engine_with(immediate(), "CART", 0.9);
    let first = at(21, 9, 30);
    let report = engine.on_tick(Tick::new(first, vec![bar("CART", first, 30.0, 40.0)]));
    assert_eq!(report.entry_orders().count(), 1);
    assert_eq!(engine.risk().pending_entry_count, 1);

    let report = mark(&mut engine, "CART", 22, 41.0);
    assert!(report.events.iter().any(|e| matches!(
        e,
        EngineEvent::EntryCancelled { ticker, .. } if ticker == "CART"
    )));
    assert_eq!(report.entry_orders().count(), 0);
    assert_eq!(engine.registry().status("CART"), Some(CandidateStatus::Consumed));
    assert_eq!(engine.risk().pending_entry_count, 0);
    assert_eq!(engine.risk().reserved_fraction, 0.0);
}

#[test]
fn venue_expiry_consumes_candidate() {
    let mut engine = engine_with(immediate(), "CART", 0.9);
    let first = at(21, 9, 30);
    engine.on_tick(Tick::new(first, vec![bar("CART", first, 30.0, 31.0)]));

    let ts = at(21, 15, 0);
    let report = engine.on_tick(
        Tick::new(ts, vec![bar("CART", ts, 31.0, 32.0)]).with_events(vec![ExecutionEvent::OrderExpired {
            ticker: "CART".into(),
        }]),
    );
    assert!(report.issues.is_empty());
    assert_eq!(report.entry_orders().count(), 0);
    assert_eq!(engine.registry().status("CART"), Some(CandidateStatus::Consumed));
}

#[test]
fn rejected_entry_is_not_retried() {
    let mut engine = engine_with(immediate(), "BIRK", 0.8);
    let first = at(21, 9, 30);
    engine.on_tick(Tick::new(first, vec![bar("BIRK", first, 46.0, 44.0)]));

    let ts = at(21, 9, 45);
    let report = engine.on_tick(
        Tick::new(ts, vec![bar("BIRK", ts, 44.0, 43.0)]).with_events(vec![ExecutionEvent::OrderRejected {
            ticker: "BIRK".into(),
            reason: "zero quantity".into(),
        }]),
    );
    assert_eq!(report.entry_orders().count(), 0);
    assert_eq!(engine.registry().status("BIRK"), Some(CandidateStatus::Consumed));
    assert!(engine.lifecycle().is_flat());
}

// ── Exits ────────────────────────────────────────────────────────────

#[test]
fn profit_target_fires_once() {
    let mut engine = engine_with(immediate(), "ARM", 0.85);
    open_position(&mut engine, "ARM", 100.0, 100.0);

    let report = mark(&mut engine, "ARM", 22, 130.0);
    assert_eq!(exit_orders(&report), vec![(0.5, ExitReason::ProfitTarget)]);
    let pos = engine.lifecycle().position("ARM").unwrap();
    assert_eq!(pos.remaining_fraction, 0.5);
    assert_eq!(pos.status, PositionStatus::PartiallyClosed);
    assert!((engine.risk().total_allocated_fraction - 0.075).abs() < 1e-12);
    assert_eq!(engine.risk().open_position_count, 1);

    let report = mark(&mut engine, "ARM", 25, 120.0);
    assert!(exit_orders(&report).is_empty());
    let report = mark(&mut engine, "ARM", 26, 130.0);
    assert!(exit_orders(&report).is_empty(), "profit-take is single-fire");
    assert_eq!(engine.lifecycle().position("ARM").unwrap().remaining_fraction, 0.5);
}

#[test]
fn stop_loss_fires_on_crossing_tick_only() {
    let mut engine = engine_with(immediate(), "KVYO", 0.8);
    open_position(&mut engine, "KVYO", 100.0, 100.0);

    for (day, close) in [(22, 90.0), (25, 85.0), (26, 81.0), (27, 80.5)] {
        let report = mark(&mut engine, "KVYO", day, close);
        assert!(exit_orders(&report).is_empty(), "no exit at {close}");
        assert_eq!(engine.lifecycle().position("KVYO").unwrap().remaining_fraction, 1.0);
    }

    let report = mark(&mut engine, "KVYO", 28, 79.0);
    assert_eq!(exit_orders(&report), vec![(1.0, ExitReason::StopLoss)]);
    assert!(engine.lifecycle().position("KVYO").is_none());
    let closed = &engine.lifecycle().closed_positions()[0];
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.remaining_fraction, 0.0);
    assert_eq!(engine.risk().open_position_count, 0);
    assert_eq!(engine.risk().total_allocated_fraction, 0.0);
}

#[test]
fn lockup_approach_closes_in_profit() {
    let mut engine = Engine::new(immediate()).unwrap();
    let mut record = RawScoreRecord::new("TEM", "2024-03-21", 0.8, 37.0);
    record.lockup_days = Some(10);
    engine.ingest(&record).unwrap();
    open_position(&mut engine, "TEM", 100.0, 100.0);
    assert_eq!(
        engine.lifecycle().position("TEM").unwrap().lockup_expiration,
        NaiveDate::from_ymd_opt(2024, 3, 31)
    );

    let report = mark(&mut engine, "TEM", 22, 115.0);
    assert!(exit_orders(&report).is_empty());

    // 2024-03-27 is four days before expiry.
    let report = mark(&mut engine, "TEM", 27, 115.0);
    assert_eq!(exit_orders(&report), vec![(1.0, ExitReason::LockupApproach)]);
    assert_eq!(engine.risk().open_position_count, 0);
}

#[test]
fn default_lockup_applies_without_feed_value() {
    let config = StrategyConfig {
        default_lockup_days: Some(180),
        ..immediate()
    };
    let mut engine = engine_with(config, "ARM", 0.85);
    open_position(&mut engine, "ARM", 100.0, 100.0);
    assert_eq!(
        engine.lifecycle().position("ARM").unwrap().lockup_expiration,
        NaiveDate::from_ymd_opt(2024, 9, 17)
    );
}

#[test]
fn holding_period_closes_remainder() {
    let config = StrategyConfig {
        holding_period_days: 3,
        ..immediate()
    };
    let mut engine = engine_with(config, "RDDT", 0.9);
    open_position(&mut engine, "RDDT", 100.0, 100.0);

    // Sessions 21, 22 and 25 close before the 26th is evaluated.
    assert!(exit_orders(&mark(&mut engine, "RDDT", 22, 105.0)).is_empty());
    assert!(exit_orders(&mark(&mut engine, "RDDT", 25, 105.0)).is_empty());
    let report = mark(&mut engine, "RDDT", 26, 105.0);
    assert_eq!(exit_orders(&report), vec![(1.0, ExitReason::HoldingPeriod)]);
    assert_eq!(engine.lifecycle().closed_positions()[0].sessions_held, 3);
}

#[test]
fn sell_fill_confirms_exit_price() {
    let mut engine = engine_with(immediate(), "KVYO", 0.8);
    open_position(&mut engine, "KVYO", 100.0, 100.0);
    mark(&mut engine, "KVYO", 22, 75.0);

    let ts = at(25, 9, 30);
    let report = engine.on_tick(Tick::new(ts, vec![]).with_events(vec![ExecutionEvent::Fill(Fill {
        ticker: "KVYO".into(),
        side: OrderSide::Sell,
        price: 74.0,
        quantity: 100.0,
        timestamp: ts,
    })]));
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, EngineEvent::ExitConfirmed { price, .. } if *price == 74.0)));
    let closed = &engine.lifecycle().closed_positions()[0];
    assert!((closed.realized_return().unwrap() + 0.26).abs() < 1e-12);
}

#[test]
fn data_gap_leaves_position_untouched() {
    let mut engine = engine_with(immediate(), "ARM", 0.85);
    open_position(&mut engine, "ARM", 100.0, 100.0);

    // A tick without ARM inside a session it traded in is not a gap.
    let ts = at(21, 11, 0);
    let report = engine.on_tick(Tick::new(ts, vec![bar("SPY", ts, 510.0, 512.0)]));
    assert!(report.issues.is_empty());

    let ts = at(22, 10, 0);
    let report = engine.on_tick(Tick::new(ts, vec![bar("SPY", ts, 510.0, 512.0)]));
    assert!(report.issues.is_empty(), "{:?}", report.issues);
    assert!(report.orders.is_empty());
    assert_eq!(engine.lifecycle().position("ARM").unwrap().remaining_fraction, 1.0);

    // Session 22 closes with no ARM bar at all.
    let ts = at(25, 10, 0);
    let report = engine.on_tick(Tick::new(ts, vec![bar("SPY", ts, 511.0, 512.0)]));
    let gaps: Vec<_> = report
        .issues
        .iter()
        .filter(|i| matches!(i, ipolab_core::TickIssue::DataGap { .. }))
        .collect();
    assert_eq!(
        gaps,
        vec![&ipolab_core::TickIssue::DataGap {
            ticker: "ARM".into(),
            session: NaiveDate::from_ymd_opt(2024, 3, 22).unwrap(),
        }]
    );
    assert_eq!(engine.lifecycle().position("ARM").unwrap().remaining_fraction, 1.0);
}

#[test]
fn consumed_reason_is_reported() {
    let mut engine = engine_with(StrategyConfig::default(), "LOWS", 0.5);
    let ts = at(21, 9, 30);
    let report = engine.on_tick(Tick::new(ts, vec![bar("LOWS", ts, 10.0, 10.0)]));
    assert!(report.events.contains(&EngineEvent::CandidateConsumed {
        ticker: "LOWS".into(),
        reason: NoActionReason::BelowThreshold,
    }));
}
