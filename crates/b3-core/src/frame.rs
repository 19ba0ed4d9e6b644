//! Conversion between the canonical OHLCV [`DataFrame`] and [`OhlcvBar`] rows.
//!
//! The canonical table has exactly these columns, in this order:
//!
//! | column   | type                       |
//! |----------|----------------------------|
//! | `date`   | `Datetime(ms, "UTC")`      |
//! | `symbol` | `String`                   |
//! | `open`   | `Float64`                  |
//! | `high`   | `Float64`                  |
//! | `low`    | `Float64`                  |
//! | `close`  | `Float64`                  |
//! | `volume` | `Int64`                    |
//!
//! Row-level algorithms (dedupe, sort, window filters) run on `Vec<OhlcvBar>`;
//! frames are the exchange format between crates and the on-disk layer.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;

use crate::error::{DataError, Result};
use crate::types::{OhlcvBar, Symbol};

/// Canonical column names, in on-disk order.
pub const OHLCV_COLUMNS: [&str; 7] = ["date", "symbol", "open", "high", "low", "close", "volume"];

const MILLIS_PER_DAY: i64 = 86_400_000;

fn schema_err(e: PolarsError) -> DataError {
    DataError::Schema(e.to_string())
}

/// The canonical `date` column type.
#[must_use]
pub fn date_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into()))
}

/// The canonical table schema.
#[must_use]
pub fn ohlcv_schema() -> Schema {
    Schema::from_iter([
        (PlSmallStr::from("date"), date_dtype()),
        (PlSmallStr::from("symbol"), DataType::String),
        (PlSmallStr::from("open"), DataType::Float64),
        (PlSmallStr::from("high"), DataType::Float64),
        (PlSmallStr::from("low"), DataType::Float64),
        (PlSmallStr::from("close"), DataType::Float64),
        (PlSmallStr::from("volume"), DataType::Int64),
    ])
}

/// An empty table with the canonical schema.
#[must_use]
pub fn empty_frame() -> DataFrame {
    DataFrame::empty_with_schema(&ohlcv_schema())
}

/// Builds a canonical table from bars, preserving their order.
///
/// # Errors
/// Returns [`DataError::Schema`] if polars rejects the columns.
pub fn bars_to_frame(bars: &[OhlcvBar]) -> Result<DataFrame> {
    let dates: Vec<i64> = bars.iter().map(|b| b.date.timestamp_millis()).collect();
    let date = Column::new("date".into(), dates)
        .cast(&date_dtype())
        .map_err(schema_err)?;

    let symbols: Vec<&str> = bars.iter().map(|b| b.symbol.as_str()).collect();
    let open: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let low: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volume: Vec<i64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        date,
        Column::new("symbol".into(), symbols),
        Column::new("open".into(), open),
        Column::new("high".into(), high),
        Column::new("low".into(), low),
        Column::new("close".into(), close),
        Column::new("volume".into(), volume),
    ])
    .map_err(schema_err)
}

/// Fails with [`DataError::Schema`] naming every canonical column that is absent.
///
/// # Errors
/// Returns [`DataError::Schema`] when at least one column is missing.
pub fn require_columns(frame: &DataFrame) -> Result<()> {
    let present = frame.get_column_names_str();
    let missing: Vec<&str> = OHLCV_COLUMNS
        .iter()
        .copied()
        .filter(|name| !present.contains(name))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DataError::Schema(format!(
            "missing required columns: {}",
            missing.join(", ")
        )))
    }
}

/// Reads a table into bars, coercing column types.
///
/// Dates may be stored as `Datetime` (any unit), `Date`, ISO-8601 strings or
/// epoch-millisecond integers. Prices and volume are cast non-strictly, so
/// uncoercible values become null. Rows with any null field are dropped and
/// counted in the second element of the result. Range checks (negative or
/// non-finite values) are left to the caller.
///
/// # Errors
/// Returns [`DataError::Schema`] if a canonical column is missing or has a
/// type that cannot be coerced at all.
pub fn bars_from_frame(frame: &DataFrame) -> Result<(Vec<OhlcvBar>, usize)> {
    require_columns(frame)?;

    let dates = date_millis(frame.column("date").map_err(schema_err)?)?;
    let symbols = frame
        .column("symbol")
        .and_then(|c| c.cast(&DataType::String))
        .map_err(schema_err)?;
    let float = |name: &str| -> Result<Column> {
        frame
            .column(name)
            .and_then(|c| c.cast(&DataType::Float64))
            .map_err(schema_err)
    };
    let open = float("open")?;
    let high = float("high")?;
    let low = float("low")?;
    let close = float("close")?;
    let volume = frame
        .column("volume")
        .and_then(|c| c.cast(&DataType::Int64))
        .map_err(schema_err)?;

    let symbols = symbols.str().map_err(schema_err)?;
    let open = open.f64().map_err(schema_err)?;
    let high = high.f64().map_err(schema_err)?;
    let low = low.f64().map_err(schema_err)?;
    let close = close.f64().map_err(schema_err)?;
    let volume = volume.i64().map_err(schema_err)?;

    let mut bars = Vec::with_capacity(frame.height());
    let mut dropped = 0usize;

    let rows = dates
        .into_iter()
        .zip(symbols)
        .zip(open.into_iter().zip(high))
        .zip(low.into_iter().zip(close))
        .zip(volume);

    for ((((date, symbol), (o, h)), (l, c)), v) in rows {
        let date = date.and_then(DateTime::from_timestamp_millis);
        match (date, symbol, o, h, l, c, v) {
            (Some(date), Some(symbol), Some(o), Some(h), Some(l), Some(c), Some(v)) => {
                bars.push(OhlcvBar::new(date, Symbol::new(symbol), o, h, l, c, v));
            }
            _ => dropped += 1,
        }
    }

    Ok((bars, dropped))
}

fn date_millis(column: &Column) -> Result<Vec<Option<i64>>> {
    match column.dtype() {
        DataType::Datetime(unit, _) => {
            let divisor = match unit {
                TimeUnit::Nanoseconds => 1_000_000,
                TimeUnit::Microseconds => 1_000,
                TimeUnit::Milliseconds => 1,
            };
            let raw = column.cast(&DataType::Int64).map_err(schema_err)?;
            Ok(raw
                .i64()
                .map_err(schema_err)?
                .into_iter()
                .map(|v| v.map(|v| v.div_euclid(divisor)))
                .collect())
        }
        DataType::Date => {
            let raw = column.cast(&DataType::Int32).map_err(schema_err)?;
            Ok(raw
                .i32()
                .map_err(schema_err)?
                .into_iter()
                .map(|v| v.map(|days| i64::from(days) * MILLIS_PER_DAY))
                .collect())
        }
        DataType::String => Ok(column
            .str()
            .map_err(schema_err)?
            .into_iter()
            .map(|v| v.and_then(parse_timestamp).map(|d| d.timestamp_millis()))
            .collect()),
        dtype if dtype.is_integer() => {
            let raw = column.cast(&DataType::Int64).map_err(schema_err)?;
            Ok(raw.i64().map_err(schema_err)?.into_iter().collect())
        }
        other => Err(DataError::Schema(format!(
            "unsupported type for date column: {other}"
        ))),
    }
}

/// Parses an ISO-8601 timestamp or date into UTC.
///
/// Strings without an offset are taken as UTC; a bare date is midnight UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// Midnight UTC at the start of `date`.
#[must_use]
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Keeps bars whose timestamp falls on a day in `[start, end]`.
///
/// Either bound may be open. The end bound is end-of-day inclusive: the
/// cutoff is midnight of the day after `end`.
pub fn retain_days(bars: &mut Vec<OhlcvBar>, start: Option<NaiveDate>, end: Option<NaiveDate>) {
    let lower = start.map(day_start);
    let upper = end.map(|e| day_start(e) + Duration::days(1));
    bars.retain(|bar| {
        lower.is_none_or(|lo| bar.date >= lo) && upper.is_none_or(|hi| bar.date < hi)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(day: u32, close: f64) -> OhlcvBar {
        let date = Utc.with_ymd_and_hms(2024, 1, day, 13, 0, 0).unwrap();
        OhlcvBar::new(date, Symbol::new("PETR4"), close, close, close, close, 1_000)
    }

    #[test]
    fn test_empty_frame_has_canonical_schema() {
        let df = empty_frame();
        assert_eq!(df.height(), 0);
        assert_eq!(df.get_column_names_str(), OHLCV_COLUMNS.to_vec());
        assert_eq!(df.column("date").unwrap().dtype(), &date_dtype());
        assert_eq!(df.column("volume").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn test_bars_frame_conversion_preserves_rows() {
        let bars = vec![bar(2, 10.0), bar(3, 11.0)];
        let df = bars_to_frame(&bars).unwrap();
        assert_eq!(df.height(), 2);
        let expected: Vec<DataType> = ohlcv_schema().iter_values().cloned().collect();
        assert_eq!(df.dtypes(), expected);

        let (back, dropped) = bars_from_frame(&df).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(back, bars);
    }

    #[test]
    fn test_require_columns_lists_missing() {
        let df = DataFrame::new(vec![Column::new("date".into(), vec![0i64])]).unwrap();
        let err = require_columns(&df).unwrap_err();
        match err {
            DataError::Schema(msg) => {
                assert!(msg.contains("symbol"));
                assert!(msg.contains("volume"));
                assert!(!msg.contains("date,"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_string_columns_are_coerced() {
        let df = DataFrame::new(vec![
            Column::new(
                "date".into(),
                vec!["2024-01-02T13:00:00Z", "2024-01-03", "not a date"],
            ),
            Column::new("symbol".into(), vec!["petr4", "PETR4", "PETR4"]),
            Column::new("open".into(), vec!["10.5", "abc", "1"]),
            Column::new("high".into(), vec![11.0, 11.0, 1.0]),
            Column::new("low".into(), vec![9.0, 9.0, 1.0]),
            Column::new("close".into(), vec![10.0, 10.0, 1.0]),
            Column::new("volume".into(), vec![100i64, 200, 300]),
        ])
        .unwrap();

        let (bars, dropped) = bars_from_frame(&df).unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].symbol.as_str(), "PETR4");
        assert_eq!(bars[0].open, 10.5);
        assert_eq!(
            bars[0].date,
            Utc.with_ymd_and_hms(2024, 1, 2, 13, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 13, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T13:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T10:00:00-03:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 13:00:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 13:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T13:00:00.000"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-02"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_retain_days_is_end_of_day_inclusive() {
        let mut bars = vec![bar(1, 1.0), bar(2, 2.0), bar(3, 3.0), bar(4, 4.0)];
        retain_days(
            &mut bars,
            NaiveDate::from_ymd_opt(2024, 1, 2),
            NaiveDate::from_ymd_opt(2024, 1, 3),
        );
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![2.0, 3.0]);

        let mut open_ended = vec![bar(1, 1.0), bar(2, 2.0)];
        retain_days(&mut open_ended, None, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(open_ended.len(), 1);
    }
}
