//! Feed loading: score calendar, market bars and the volatility gauge.
//!
//! Every loader is row-tolerant. A row that does not parse is logged with
//! its line number and skipped; only an unreadable file is an error.
//!
//! The synthetic generator produces deterministic intraday bars per ticker
//! (seeded from the ticker's blake3 hash) starting on the listing date, so
//! demos and tests run without any market data on disk.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use ipolab_core::domain::Bar;
use ipolab_core::feed::{RawScoreRecord, DATE_FORMAT};
use ipolab_core::Tick;

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

/// A CSV row that was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    /// One-based line number in the file (the header is line 1).
    pub line: u64,
    pub reason: String,
}

/// Parsed rows plus the ones that did not parse.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub rows: Vec<T>,
    pub rejected: Vec<RejectedRow>,
}

pub type ScoreLoad = Loaded<RawScoreRecord>;

/// Read the score calendar into raw records.
///
/// Only shape errors (a non-numeric score, say) are caught here; field
/// validation happens when the engine ingests the records.
pub fn load_scores(path: &Path) -> Result<ScoreLoad, LoadError> {
    read_rows(path, |record: RawScoreRecord| Ok(record))
}

#[derive(Debug, Deserialize)]
struct BarRow {
    ticker: String,
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Parsed bar rows, with a count of the ones that had no time of day.
#[derive(Debug, Clone)]
pub struct BarLoad {
    pub rows: Vec<Bar>,
    pub rejected: Vec<RejectedRow>,
    /// Rows given as a bare date, i.e. one bar for the whole session.
    pub date_only: usize,
}

/// Read `ticker,timestamp,open,high,low,close,volume` bars.
///
/// Date-only timestamps are taken as the 16:00 close of that session.
pub fn load_bars(path: &Path) -> Result<BarLoad, LoadError> {
    let mut date_only = 0;
    let loaded = read_rows(path, |row: BarRow| {
        let (timestamp, whole_session) = parse_timestamp_parts(&row.timestamp)?;
        if !(row.volume >= 0.0) {
            return Err(format!("negative volume {}", row.volume));
        }
        if whole_session {
            date_only += 1;
        }
        Ok(Bar {
            ticker: row.ticker.trim().to_uppercase(),
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume as u64,
        })
    })?;
    Ok(BarLoad {
        rows: loaded.rows,
        rejected: loaded.rejected,
        date_only,
    })
}

#[derive(Debug, Deserialize)]
struct VolatilityRow {
    timestamp: String,
    value: f64,
}

/// Read the daily volatility gauge, keyed by session.
pub fn load_volatility(path: &Path) -> Result<BTreeMap<NaiveDate, f64>, LoadError> {
    let loaded = read_rows(path, |row: VolatilityRow| {
        let at = parse_timestamp(&row.timestamp)?;
        if !row.value.is_finite() || row.value < 0.0 {
            return Err(format!("invalid gauge value {}", row.value));
        }
        Ok((at.date(), row.value))
    })?;
    Ok(loaded.rows.into_iter().collect())
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp_parts(value).map(|(at, _)| at)
}

/// Timestamp plus whether it was a bare date.
fn parse_timestamp_parts(value: &str) -> Result<(NaiveDateTime, bool), String> {
    let value = value.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(at) = NaiveDateTime::parse_from_str(value, format) {
            return Ok((at, false));
        }
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map(|d| (d.and_time(session_close()), true))
        .map_err(|_| format!("unparsable timestamp '{value}'"))
}

fn session_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn read_rows<R, T, F>(path: &Path, mut convert: F) -> Result<Loaded<T>, LoadError>
where
    R: for<'de> Deserialize<'de>,
    F: FnMut(R) -> Result<T, String>,
{
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();

    let mut loaded = Loaded {
        rows: Vec::new(),
        rejected: Vec::new(),
    };
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                let line = err.position().map_or(0, |p| p.line());
                warn!(path = %path.display(), line, error = %err, "unreadable row skipped");
                loaded.rejected.push(RejectedRow {
                    line,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map_or(0, |p| p.line());
        let parsed = record
            .deserialize::<R>(Some(&headers))
            .map_err(|e| e.to_string())
            .and_then(&mut convert);
        match parsed {
            Ok(row) => loaded.rows.push(row),
            Err(reason) => {
                warn!(path = %path.display(), line, %reason, "malformed row skipped");
                loaded.rejected.push(RejectedRow { line, reason });
            }
        }
    }
    debug!(
        path = %path.display(),
        rows = loaded.rows.len(),
        rejected = loaded.rejected.len(),
        "csv loaded"
    );
    Ok(loaded)
}

/// Generate deterministic intraday bars for one ticker.
///
/// Trading starts on `listing_date` (weekends skipped) and runs through
/// `end`, `bars_per_session` half-hour bars from 09:30. The opening print
/// lands within -10%..+60% of the offer price, a rough Day-1 pop
/// distribution; after that prices follow a seeded random walk.
pub fn synthetic_bars(
    ticker: &str,
    listing_date: NaiveDate,
    end: NaiveDate,
    offer_price: f64,
    bars_per_session: u32,
) -> Vec<Bar> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    // Deterministic seed from ticker name
    let seed_bytes = blake3::hash(ticker.as_bytes());
    let seed: [u8; 32] = *seed_bytes.as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let open_time = NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN);
    let mut bars = Vec::new();
    let mut price = offer_price * (1.0 + rng.gen_range(-0.10..0.60));
    let mut current = listing_date;

    while current <= end {
        let weekday = current.weekday();
        if weekday == Weekday::Sat || weekday == Weekday::Sun {
            current += Duration::days(1);
            continue;
        }

        for slot in 0..bars_per_session {
            let step: f64 = rng.gen_range(-0.015..0.015);
            let open = price;
            let close = (price * (1.0 + step)).max(0.01);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.005));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.005));
            let volume = rng.gen_range(5_000..250_000u64);

            bars.push(Bar {
                ticker: ticker.to_string(),
                timestamp: current.and_time(open_time) + Duration::minutes(30 * i64::from(slot)),
                open,
                high,
                low,
                close,
                volume,
            });
            price = close;
        }
        current += Duration::days(1);
    }

    bars
}

/// Merge bars into ticks, one per distinct timestamp, in time order.
///
/// Bars inside a tick are sorted by ticker. The first tick of each session
/// with a gauge reading carries it.
pub fn group_into_ticks(bars: Vec<Bar>, volatility: &BTreeMap<NaiveDate, f64>) -> Vec<Tick> {
    let mut by_time: BTreeMap<NaiveDateTime, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        by_time.entry(bar.timestamp).or_default().push(bar);
    }

    let mut ticks = Vec::with_capacity(by_time.len());
    let mut gauge_session: Option<NaiveDate> = None;
    for (timestamp, mut bars) in by_time {
        bars.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        let mut tick = Tick::new(timestamp, bars);
        let session = timestamp.date();
        if gauge_session != Some(session) {
            if let Some(value) = volatility.get(&session) {
                tick = tick.with_volatility(*value);
            }
            gauge_session = Some(session);
        }
        ticks.push(tick);
    }
    ticks
}
