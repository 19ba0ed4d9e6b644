//! brapi quote payload normalization.

use b3_core::{
    DataError, OhlcvBar, Result, Symbol, bars_to_frame, dedupe_keep_last, sort_by_date,
};
use chrono::DateTime;
use polars::prelude::DataFrame;
use serde_json::Value;
use tracing::{info, warn};

/// Converts a brapi quote payload into the canonical OHLCV table.
///
/// # Errors
/// Returns [`DataError::Parse`] when the payload has no `results` list, the
/// list is empty, or the first result has no `historicalDataPrice` list.
/// Malformed individual records are skipped, not reported.
pub fn normalize(symbol: &Symbol, payload: &Value) -> Result<DataFrame> {
    let bars = normalize_bars(symbol, payload)?;
    bars_to_frame(&bars)
}

/// Like [`normalize`], but returns the rows instead of a table.
///
/// # Errors
/// Same as [`normalize`].
pub fn normalize_bars(symbol: &Symbol, payload: &Value) -> Result<Vec<OhlcvBar>> {
    let series = historical_series(payload)?;

    let mut bars = Vec::with_capacity(series.len());
    for record in series {
        match coerce_record(symbol, record) {
            Ok(bar) => bars.push(bar),
            Err(reason) => warn!(%symbol, %reason, "Skipping malformed record"),
        }
    }

    let parsed = bars.len();
    bars.retain(OhlcvBar::is_valid);
    let removed = parsed - bars.len();
    if removed > 0 {
        info!(%symbol, removed, "Removed invalid rows");
    }

    sort_by_date(&mut bars);
    Ok(dedupe_keep_last(bars))
}

fn historical_series(payload: &Value) -> Result<&[Value]> {
    let results = payload
        .as_object()
        .and_then(|obj| obj.get("results"))
        .ok_or_else(|| {
            DataError::Parse("unexpected payload structure: missing 'results'".to_string())
        })?;

    let first = results
        .as_array()
        .and_then(|items| items.first())
        .ok_or_else(|| DataError::Parse("unexpected payload: empty 'results'".to_string()))?;

    match first.get("historicalDataPrice") {
        None | Some(Value::Null) => Err(DataError::Parse(
            "missing 'historicalDataPrice'".to_string(),
        )),
        Some(Value::Array(series)) => Ok(series),
        Some(_) => Err(DataError::Parse(
            "'historicalDataPrice' is not a list".to_string(),
        )),
    }
}

fn coerce_record(symbol: &Symbol, record: &Value) -> std::result::Result<OhlcvBar, String> {
    let raw_date = record.get("date").ok_or("missing 'date'")?;
    let seconds = coerce_int(raw_date).ok_or_else(|| format!("invalid date {raw_date}"))?;
    let date = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| format!("date out of range: {seconds}"))?;

    let volume = match record.get("volume") {
        None | Some(Value::Null) => -1,
        Some(raw) => coerce_int(raw).ok_or_else(|| format!("invalid volume {raw}"))?,
    };

    Ok(OhlcvBar::new(
        date,
        symbol.clone(),
        price(record, "open")?,
        price(record, "high")?,
        price(record, "low")?,
        price(record, "close")?,
        volume,
    ))
}

fn price(record: &Value, field: &str) -> std::result::Result<f64, String> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(f64::NAN),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| format!("invalid {field} {n}")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid {field} {s:?}")),
        Some(other) => Err(format!("invalid {field} {other}")),
    }
}

/// Integers, floats (truncated) and integer strings.
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use b3_core::bars_from_frame;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const JAN_1: i64 = 1_704_067_200;
    const JAN_2: i64 = 1_704_153_600;

    fn symbol() -> Symbol {
        Symbol::new("TEST3")
    }

    fn record(date: i64, close: f64, volume: i64) -> Value {
        json!({
            "date": date,
            "open": close,
            "high": close + 1.0,
            "low": close - 0.5,
            "close": close,
            "volume": volume,
            "adjustedClose": close,
        })
    }

    #[test]
    fn test_duplicate_removed_and_sorted() {
        let payload = json!({
            "results": [{
                "symbol": "TEST3",
                "historicalDataPrice": [
                    record(JAN_2, 11.0, 2000),
                    record(JAN_1, 10.5, 1000),
                    record(JAN_1, 10.5, 1000),
                ]
            }]
        });

        let df = normalize(&symbol(), &payload).unwrap();
        assert_eq!(df.get_column_names_str(), b3_core::OHLCV_COLUMNS.to_vec());

        let (bars, _) = bars_from_frame(&df).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(bars[1].date, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert!(bars.iter().all(|b| b.symbol.as_str() == "TEST3"));
    }

    #[test]
    fn test_malformed_record_skipped_and_last_duplicate_wins() {
        let payload = json!({
            "results": [{
                "historicalDataPrice": [
                    record(JAN_1, 10.0, 1000),
                    {"open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0, "volume": 1},
                    record(JAN_2, 11.0, 2000),
                    record(JAN_1, 12.0, 3000),
                ]
            }]
        });

        let bars = normalize_bars(&symbol(), &payload).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 12.0);
        assert_eq!(bars[0].volume, 3000);
        assert_eq!(bars[1].close, 11.0);
    }

    #[test]
    fn test_missing_values_drop_row() {
        let payload = json!({
            "results": [{
                "historicalDataPrice": [
                    {"date": JAN_1, "open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0},
                    {"date": JAN_2, "open": null, "high": 1.0, "low": 1.0, "close": 1.0, "volume": 5},
                    {"date": JAN_2 + 86_400, "open": -1.0, "high": 1.0, "low": 1.0, "close": 1.0, "volume": 5},
                ]
            }]
        });

        let df = normalize(&symbol(), &payload).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 7);
    }

    #[test]
    fn test_string_values_coerced() {
        let payload = json!({
            "results": [{
                "historicalDataPrice": [
                    {"date": "1704067200", "open": "10.5", "high": "11", "low": "10", "close": "10.75", "volume": "1500"},
                    {"date": 1_704_153_600.0, "open": 1, "high": 1, "low": 1, "close": 1, "volume": 12.9},
                    {"date": JAN_2 + 86_400, "open": "abc", "high": 1, "low": 1, "close": 1, "volume": 1},
                ]
            }]
        });

        let bars = normalize_bars(&symbol(), &payload).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 10.5);
        assert_eq!(bars[0].volume, 1500);
        assert_eq!(bars[1].volume, 12);
    }

    #[test]
    fn test_structural_errors() {
        let cases = [
            json!([]),
            json!({"data": []}),
            json!({"results": []}),
            json!({"results": "nope"}),
            json!({"results": [{"symbol": "TEST3"}]}),
            json!({"results": [{"historicalDataPrice": null}]}),
            json!({"results": [{"historicalDataPrice": {"date": 1}}]}),
        ];
        for payload in cases {
            let err = normalize(&symbol(), &payload).unwrap_err();
            assert!(matches!(err, DataError::Parse(_)), "payload {payload} gave {err:?}");
        }
    }

    #[test]
    fn test_empty_series_is_empty_table() {
        let payload = json!({"results": [{"historicalDataPrice": []}]});
        let df = normalize(&symbol(), &payload).unwrap();
        assert_eq!(df.height(), 0);
    }
}
