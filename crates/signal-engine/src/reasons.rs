//! Reason-tag predicates.
//!
//! Tags name the condition that fired, in snake_case, and ride the daily
//! signal frame down to the broker so every trade records why it happened.
//! Predicates only fire on valid (non-warmup) indicator cells.

use std::collections::BTreeSet;

use technical_analysis::IndicatorFrame;

fn cell(column: &Option<Vec<Option<f64>>>, index: usize) -> Option<f64> {
    column.as_ref().and_then(|c| c.get(index).copied().flatten())
}

/// Collect the indicator, pattern, and volume tags for one bar.
pub fn tags_for_bar(frame: &IndicatorFrame, index: usize) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let close = frame.bars[index].close;

    if let Some(rsi) = cell(&frame.rsi, index) {
        if rsi < 30.0 {
            tags.insert("rsi_oversold".to_string());
        } else if rsi > 70.0 {
            tags.insert("rsi_overbought".to_string());
        }
    }

    if index > 0 {
        let hist = cell(&frame.macd_histogram, index);
        let prev_hist = cell(&frame.macd_histogram, index - 1);
        if let (Some(h), Some(p)) = (hist, prev_hist) {
            if h > 0.0 && p <= 0.0 {
                tags.insert("macd_bullish_cross".to_string());
            } else if h < 0.0 && p >= 0.0 {
                tags.insert("macd_bearish_cross".to_string());
            }
        }
    }

    if let Some((_, column)) = frame.ma.iter().next() {
        if let Some(ma) = column.get(index).copied().flatten() {
            if close > ma {
                tags.insert("price_above_ma".to_string());
            } else if close < ma {
                tags.insert("price_below_ma".to_string());
            }
        }
    }

    if let (Some(upper), Some(lower)) =
        (cell(&frame.bb_upper, index), cell(&frame.bb_lower, index))
    {
        if close <= lower {
            tags.insert("bb_lower_touch".to_string());
        } else if close >= upper {
            tags.insert("bb_upper_touch".to_string());
        }
    }

    if let Some(adx) = cell(&frame.adx, index) {
        if adx > 25.0 {
            tags.insert("adx_strong_trend".to_string());
        }
    }

    if let Some(k) = cell(&frame.stoch_k, index) {
        if k < 20.0 {
            tags.insert("kd_oversold".to_string());
        } else if k > 80.0 {
            tags.insert("kd_overbought".to_string());
        }
    }

    if let Some(vol_ma) = cell(&frame.volume_ma, index) {
        if vol_ma > 0.0 && frame.bars[index].volume as f64 > 2.0 * vol_ma {
            tags.insert("volume_surge".to_string());
        }
    }

    for (pattern, column) in &frame.patterns {
        if column[index] {
            tags.insert(pattern.tag().to_string());
        }
    }

    tags
}
