//! The augmented frame: bars plus derived columns.
//!
//! Frames are append-only — each stage produces new columns, nothing mutates
//! bars in place — so sharing a frame read-only across parallel optimizer
//! workers is safe.

use std::collections::BTreeMap;

use strategy_core::{Bar, ChartPattern, EngineError, PatternConfig, TechnicalConfig};

use crate::indicators::{self, Column};
use crate::patterns;

/// OHLCV bars extended with the configured indicator and pattern columns.
/// Every column is aligned 1:1 with `bars`; warmup cells are `None`.
pub struct IndicatorFrame {
    pub bars: Vec<Bar>,
    /// Close SMAs, one per configured period.
    pub ma: BTreeMap<usize, Column>,
    pub rsi: Option<Column>,
    pub macd_line: Option<Column>,
    pub macd_signal: Option<Column>,
    pub macd_histogram: Option<Column>,
    pub atr: Option<Column>,
    pub adx: Option<Column>,
    pub plus_di: Option<Column>,
    pub minus_di: Option<Column>,
    pub bb_upper: Option<Column>,
    pub bb_middle: Option<Column>,
    pub bb_lower: Option<Column>,
    pub stoch_k: Option<Column>,
    pub stoch_d: Option<Column>,
    pub volume_ma: Option<Column>,
    /// One boolean flag column per enabled pattern.
    pub patterns: BTreeMap<ChartPattern, Vec<bool>>,
}

impl IndicatorFrame {
    /// Compute the configured catalog over the input bars. Bars too few for
    /// an indicator's window leave that column all-`None`; that is the
    /// recoverable data-insufficiency path, not an error.
    pub fn compute(
        bars: Vec<Bar>,
        technical: &TechnicalConfig,
        pattern_config: &PatternConfig,
    ) -> Result<Self, EngineError> {
        if bars.is_empty() {
            return Err(EngineError::invalid_input("no bars to compute indicators on"));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();

        let mut ma = BTreeMap::new();
        for &period in &technical.ma_periods {
            if period == 0 {
                return Err(EngineError::invalid_input("ma period must be positive"));
            }
            ma.insert(period, indicators::sma(&closes, period));
        }

        let rsi = technical
            .rsi
            .map(|p| indicators::rsi(&closes, p.period));

        let (macd_line, macd_signal, macd_histogram) = match technical.macd {
            Some(p) => {
                let out = indicators::macd(&closes, p.fast, p.slow, p.signal);
                (Some(out.line), Some(out.signal), Some(out.histogram))
            }
            None => (None, None, None),
        };

        let atr = technical.atr.map(|p| indicators::atr(&bars, p.period));

        let (adx, plus_di, minus_di) = match technical.adx {
            Some(p) => {
                let out = indicators::adx(&bars, p.period);
                (Some(out.adx), Some(out.plus_di), Some(out.minus_di))
            }
            None => (None, None, None),
        };

        let (bb_upper, bb_middle, bb_lower) = match technical.bollinger {
            Some(p) => {
                let out = indicators::bollinger_bands(&closes, p.period, p.width);
                (Some(out.upper), Some(out.middle), Some(out.lower))
            }
            None => (None, None, None),
        };

        let (stoch_k, stoch_d) = match technical.stochastic {
            Some(p) => {
                let out = indicators::stochastic(&bars, p.k, p.d);
                (Some(out.k), Some(out.d))
            }
            None => (None, None),
        };

        let volume_ma = technical
            .volume_ma
            .map(|p| indicators::sma(&volumes, p.period));

        let mut pattern_columns = BTreeMap::new();
        for &pattern in &pattern_config.selected {
            pattern_columns.insert(pattern, patterns::detect(pattern, &bars));
        }

        Ok(Self {
            bars,
            ma,
            rsi,
            macd_line,
            macd_signal,
            macd_histogram,
            atr,
            adx,
            plus_di,
            minus_di,
            bb_upper,
            bb_middle,
            bb_lower,
            stoch_k,
            stoch_d,
            volume_ma,
            patterns: pattern_columns,
        })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// ATR value at a bar index, if defined yet.
    pub fn atr_at(&self, index: usize) -> Option<f64> {
        self.atr.as_ref().and_then(|col| col.get(index).copied().flatten())
    }
}
