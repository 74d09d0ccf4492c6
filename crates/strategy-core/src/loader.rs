//! CSV loader adapter.
//!
//! The engine is agnostic to upstream storage; this adapter delivers the
//! `date, open, high, low, close, volume[, prev_close]` columns the data
//! model requires. Missing OHLCV columns are a fatal input error.

use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::EngineError;
use crate::types::Bar;

#[derive(Debug, Deserialize)]
struct BarRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
    #[serde(default)]
    prev_close: Option<f64>,
}

/// Load bars from a CSV file with a header row.
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>, EngineError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| EngineError::invalid_input(format!("cannot open {}: {e}", path.display())))?;

    let mut bars = Vec::new();
    for row in reader.deserialize::<BarRow>() {
        let row = row?;
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .map_err(|e| EngineError::invalid_input(format!("bad date {:?}: {e}", row.date)))?;
        bars.push(Bar {
            date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            prev_close: row.prev_close,
        });
    }

    validate_bars(&bars)?;
    Ok(bars)
}

/// Check the structural invariants of an in-memory bar series: non-empty,
/// strictly ascending unique dates, positive prices.
pub fn validate_bars(bars: &[Bar]) -> Result<(), EngineError> {
    if bars.is_empty() {
        return Err(EngineError::invalid_input("bar series is empty"));
    }
    for window in bars.windows(2) {
        if window[1].date <= window[0].date {
            return Err(EngineError::invalid_input(format!(
                "bars out of order or duplicated at {}",
                window[1].date
            )));
        }
    }
    for bar in bars {
        if bar.open <= 0.0 || bar.high <= 0.0 || bar.low <= 0.0 || bar.close <= 0.0 {
            return Err(EngineError::invalid_input(format!(
                "non-positive price on {}",
                bar.date
            )));
        }
        if bar.high < bar.low {
            return Err(EngineError::invalid_input(format!(
                "high < low on {}",
                bar.date
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_bars_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "date,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-01-02,100.0,101.0,99.0,100.5,1000000").unwrap();
        writeln!(file, "2024-01-03,100.5,102.0,100.0,101.5,1200000").unwrap();

        let bars = load_bars_csv(file.path()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 101.5);
        assert_eq!(bars[0].prev_close, None);
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "date,open,high,low,close").unwrap();
        writeln!(file, "2024-01-02,100.0,101.0,99.0,100.5").unwrap();

        assert!(load_bars_csv(file.path()).is_err());
    }

    #[test]
    fn test_out_of_order_bars_rejected() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let bars = vec![
            Bar::new(d("2024-01-03"), 100.0, 101.0, 99.0, 100.0, 1000),
            Bar::new(d("2024-01-02"), 100.0, 101.0, 99.0, 100.0, 1000),
        ];
        assert!(validate_bars(&bars).is_err());
    }

    #[test]
    fn test_empty_series_rejected() {
        assert!(validate_bars(&[]).is_err());
    }
}
