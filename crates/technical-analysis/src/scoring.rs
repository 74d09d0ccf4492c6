//! Scoring engine.
//!
//! Combines indicator, pattern, and volume sub-scores into a per-bar
//! `TotalScore` in [0, 100]. Warmup gaps are forward- then backward-filled
//! here and only here; upstream columns keep their explicit `None` markers.

use strategy_core::{EngineError, Regime, StrategyConfig};

use crate::frame::IndicatorFrame;
use crate::indicators::Column;

/// Sub-scores and composites for one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarScores {
    pub indicator_score: f64,
    pub pattern_score: f64,
    pub volume_score: f64,
    /// Weighted composite before any regime adjustment.
    pub total_score: f64,
    /// Regime-boosted composite, clamped to 100.
    pub final_score: f64,
    pub regime_match: bool,
}

/// Relative weights of the indicator partial scores.
const W_RSI: f64 = 0.25;
const W_MACD: f64 = 0.20;
const W_MA: f64 = 0.20;
const W_ADX: f64 = 0.15;
const W_BB: f64 = 0.10;
const W_STOCH: f64 = 0.10;

const NEUTRAL: f64 = 50.0;

pub struct ScoringEngine;

impl ScoringEngine {
    /// Score every bar of the frame. `regime` is the evaluation-time market
    /// condition; a match against the strategy's declared regimes scales the
    /// total by `signals.regime_boost`.
    pub fn score(
        frame: &IndicatorFrame,
        config: &StrategyConfig,
        spec_regimes: &[Regime],
        regime: Option<Regime>,
    ) -> Result<Vec<BarScores>, EngineError> {
        config.signals.validate()?;
        let n = frame.len();
        let weights = &config.signals;

        let regime_match = match regime {
            Some(r) => spec_regimes.contains(&r),
            None => false,
        };

        let rsi = frame.rsi.as_ref().map(|c| fill(c, NEUTRAL));
        let macd_hist = frame.macd_histogram.as_ref().map(|c| fill(c, 0.0));
        let shortest_ma = frame.ma.values().next().map(|c| fill(c, f64::NAN));
        let adx = frame.adx.as_ref().map(|c| fill(c, 0.0));
        let plus_di = frame.plus_di.as_ref().map(|c| fill(c, 0.0));
        let minus_di = frame.minus_di.as_ref().map(|c| fill(c, 0.0));
        let bb_upper = frame.bb_upper.as_ref().map(|c| fill(c, f64::NAN));
        let bb_lower = frame.bb_lower.as_ref().map(|c| fill(c, f64::NAN));
        let stoch_k = frame.stoch_k.as_ref().map(|c| fill(c, NEUTRAL));
        let volume_ma = frame.volume_ma.as_ref().map(|c| fill(c, f64::NAN));

        let decay = decay_factor(config.patterns.window);
        let any_pattern: Vec<bool> = (0..n)
            .map(|i| frame.patterns.values().any(|col| col[i]))
            .collect();

        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let close = frame.bars[i].close;

            let mut parts: Vec<(f64, f64)> = Vec::with_capacity(6);
            if let Some(col) = &rsi {
                parts.push((W_RSI, clamp_score(100.0 - col[i])));
            }
            if let Some(col) = &macd_hist {
                let hist_pct = if close > 0.0 { col[i] / close } else { 0.0 };
                parts.push((W_MACD, bounded(hist_pct * 100.0)));
            }
            if let Some(col) = &shortest_ma {
                if col[i].is_finite() && col[i] > 0.0 {
                    let deviation = (close - col[i]) / col[i];
                    parts.push((W_MA, bounded(deviation * 10.0)));
                }
            }
            if let (Some(a), Some(p), Some(m)) = (&adx, &plus_di, &minus_di) {
                let strength = a[i].min(50.0);
                let score = if p[i] >= m[i] {
                    NEUTRAL + strength
                } else {
                    NEUTRAL - strength
                };
                parts.push((W_ADX, clamp_score(score)));
            }
            if let (Some(upper), Some(lower)) = (&bb_upper, &bb_lower) {
                if upper[i].is_finite() && lower[i].is_finite() && upper[i] > lower[i] {
                    let pos = ((close - lower[i]) / (upper[i] - lower[i])).clamp(0.0, 1.0);
                    parts.push((W_BB, 100.0 * (1.0 - pos)));
                }
            }
            if let Some(col) = &stoch_k {
                parts.push((W_STOCH, clamp_score(100.0 - col[i])));
            }

            let weight_sum: f64 = parts.iter().map(|(w, _)| w).sum();
            let indicator_score = if weight_sum > 0.0 {
                parts.iter().map(|(w, s)| w * s).sum::<f64>() / weight_sum
            } else {
                NEUTRAL
            };

            let pattern_score =
                decayed_pattern_score(&any_pattern, i, config.patterns.window, decay);

            let volume_score = match &volume_ma {
                Some(col) if col[i].is_finite() && col[i] > 0.0 => {
                    clamp_score(NEUTRAL * frame.bars[i].volume as f64 / col[i])
                }
                _ => NEUTRAL,
            };

            let total_score = weights.pattern * pattern_score
                + weights.technical * indicator_score
                + weights.volume * volume_score;
            let final_score = if regime_match {
                (total_score * weights.regime_boost).min(100.0)
            } else {
                total_score
            };

            out.push(BarScores {
                indicator_score,
                pattern_score,
                volume_score,
                total_score,
                final_score,
                regime_match,
            });
        }

        Ok(out)
    }
}

/// Forward-fill then backward-fill; `fallback` when the column never becomes
/// valid.
fn fill(column: &Column, fallback: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(column.len());
    let mut last: Option<f64> = None;
    for cell in column {
        if cell.is_some() {
            last = *cell;
        }
        out.push(last.unwrap_or(f64::NAN));
    }
    // Backward pass for the leading gap.
    let first_valid = column.iter().flatten().next().copied();
    let head = first_valid.unwrap_or(fallback);
    for value in &mut out {
        if value.is_nan() {
            *value = head;
        }
    }
    out
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Monotone bounded map from an unbounded signal onto [0, 100], centered at
/// the neutral 50.
fn bounded(signal: f64) -> f64 {
    NEUTRAL + NEUTRAL * signal.tanh()
}

/// Per-bar decay so a fire half a window back carries half the weight.
fn decay_factor(window: usize) -> f64 {
    if window <= 1 {
        return 1.0;
    }
    2f64.powf(-2.0 / window as f64)
}

fn decayed_pattern_score(fired: &[bool], index: usize, window: usize, decay: f64) -> f64 {
    if window == 0 {
        return 0.0;
    }
    let start = index.saturating_sub(window - 1);
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for j in start..=index {
        let w = decay.powi((index - j) as i32);
        weight_sum += w;
        if fired[j] {
            weighted += w;
        }
    }
    if weight_sum > 0.0 {
        100.0 * weighted / weight_sum
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use strategy_core::{Bar, PatternConfig, TechnicalConfig};

    fn frame_from_closes(closes: &[f64]) -> IndicatorFrame {
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(
                    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64),
                    c,
                    c + 0.5,
                    c - 0.5,
                    c,
                    1_000_000,
                )
            })
            .collect();
        IndicatorFrame::compute(bars, &TechnicalConfig::default(), &PatternConfig::default())
            .unwrap()
    }

    #[test]
    fn test_scores_bounded() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let frame = frame_from_closes(&closes);
        let scores =
            ScoringEngine::score(&frame, &StrategyConfig::default(), &[], None).unwrap();

        assert_eq!(scores.len(), 120);
        for s in &scores {
            assert!((0.0..=100.0).contains(&s.indicator_score));
            assert!((0.0..=100.0).contains(&s.pattern_score));
            assert!((0.0..=100.0).contains(&s.volume_score));
            assert!((0.0..=100.0).contains(&s.total_score));
            assert!(!s.regime_match);
        }
    }

    #[test]
    fn test_regime_boost_scales_final_score() {
        let closes = vec![100.0; 60];
        let frame = frame_from_closes(&closes);
        let config = StrategyConfig::default();

        let plain =
            ScoringEngine::score(&frame, &config, &[Regime::Reversion], None).unwrap();
        let boosted = ScoringEngine::score(
            &frame,
            &config,
            &[Regime::Reversion],
            Some(Regime::Reversion),
        )
        .unwrap();
        let mismatched = ScoringEngine::score(
            &frame,
            &config,
            &[Regime::Reversion],
            Some(Regime::Trend),
        )
        .unwrap();

        let i = 40;
        assert!(boosted[i].regime_match);
        assert!(!plain[i].regime_match);
        assert!(!mismatched[i].regime_match);
        assert_eq!(plain[i].final_score, plain[i].total_score);
        assert_eq!(mismatched[i].final_score, mismatched[i].total_score);
        assert!(boosted[i].final_score > boosted[i].total_score);
        assert!(boosted[i].final_score <= 100.0);
        assert_eq!(boosted[i].total_score, plain[i].total_score);
    }

    #[test]
    fn test_fill_leading_gap_uses_first_valid() {
        let column = vec![None, None, Some(3.0), Some(4.0), None];
        assert_eq!(fill(&column, 50.0), vec![3.0, 3.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_fill_all_invalid_uses_fallback() {
        let column = vec![None, None];
        assert_eq!(fill(&column, 50.0), vec![50.0, 50.0]);
    }

    #[test]
    fn test_pattern_score_decays() {
        // A single fire at index 0 fades as the window slides past it.
        let mut fired = vec![false; 10];
        fired[0] = true;
        let decay = decay_factor(10);
        let s0 = decayed_pattern_score(&fired, 0, 10, decay);
        let s3 = decayed_pattern_score(&fired, 3, 10, decay);
        let s9 = decayed_pattern_score(&fired, 9, 10, decay);
        assert!(s0 > s3 && s3 > s9);
        assert!(s9 > 0.0);
    }
}
