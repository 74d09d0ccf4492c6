use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily OHLCV bar. Bars are chronologically ordered and unique by date;
/// non-trading days are simply absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// Previous session's close, when the upstream feed carries it. Used for
    /// limit-up/down bands; falls back to the prior bar's close otherwise.
    #[serde(default)]
    pub prev_close: Option<f64>,
}

impl Bar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            prev_close: None,
        }
    }
}

/// Trinary per-bar decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Buy,
    Hold,
    Sell,
}

impl Signal {
    /// Numeric form: +1 buy, 0 hold, -1 sell.
    pub fn value(self) -> i8 {
        match self {
            Signal::Buy => 1,
            Signal::Hold => 0,
            Signal::Sell => -1,
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Signal::Hold
    }
}

/// Named market condition tag. Closed set; unknown labels fail at
/// deserialization rather than being silently skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Trend,
    Reversion,
    Breakout,
}

/// One row of the daily signal frame, aligned 1:1 with the input bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySignal {
    pub date: NaiveDate,
    pub signal: Signal,
    /// Composite score in [0, 100], regime-boosted when applicable.
    pub total_score: f64,
    pub indicator_score: f64,
    pub pattern_score: f64,
    pub volume_score: f64,
    /// Fired predicates, ordered for deterministic serialization.
    pub reason_tags: BTreeSet<String>,
    pub regime_match: bool,
}

impl DailySignal {
    pub fn hold(date: NaiveDate) -> Self {
        Self {
            date,
            signal: Signal::Hold,
            total_score: 0.0,
            indicator_score: 0.0,
            pattern_score: 0.0,
            volume_score: 0.0,
            reason_tags: BTreeSet::new(),
            regime_match: false,
        }
    }
}
