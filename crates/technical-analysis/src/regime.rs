//! Rule-based market regime detection.
//!
//! Classifies a bar window into one of the strategy regimes with a
//! confidence estimate. Purely deterministic; callers feed the result into
//! the scoring engine's regime-match boost.

use strategy_core::{Bar, Regime};

const MIN_BARS: usize = 50;

/// Detection output. `regime` is `None` when the window is too short to
/// classify.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeDetection {
    pub regime: Option<Regime>,
    /// Classification confidence in [0, 1].
    pub confidence: f64,
    pub metrics: RegimeIndicators,
    pub reasoning: String,
}

/// Inputs behind a classification.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegimeIndicators {
    /// Net fractional move over the window, clamped to [-1, 1].
    pub trend_strength: f64,
    /// Average true range as a fraction of the last close.
    pub atr_percent: f64,
    /// Directional movement divided by total movement, in [0, 1].
    pub range_efficiency: f64,
    pub sample_size: usize,
}

pub struct RegimeDetector {
    min_bars: usize,
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self { min_bars: MIN_BARS }
    }
}

impl RegimeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detect(&self, bars: &[Bar]) -> RegimeDetection {
        if bars.len() < self.min_bars {
            return RegimeDetection {
                regime: None,
                confidence: 0.0,
                metrics: RegimeIndicators {
                    sample_size: bars.len(),
                    ..RegimeIndicators::default()
                },
                reasoning: format!(
                    "insufficient data: {} bars (need {})",
                    bars.len(),
                    self.min_bars
                ),
            };
        }

        let metrics = RegimeIndicators {
            trend_strength: trend_strength(bars),
            atr_percent: atr_percent(bars),
            range_efficiency: range_efficiency(bars),
            sample_size: bars.len(),
        };

        let (regime, confidence, reasoning) = classify(&metrics);
        RegimeDetection {
            regime: Some(regime),
            confidence,
            metrics,
            reasoning,
        }
    }
}

fn classify(metrics: &RegimeIndicators) -> (Regime, f64, String) {
    // Efficient directional movement reads as a trend.
    if metrics.trend_strength.abs() > 0.3 && metrics.range_efficiency > 0.4 {
        let confidence =
            (metrics.trend_strength.abs() * metrics.range_efficiency * 2.0).min(1.0);
        return (
            Regime::Trend,
            confidence,
            format!(
                "directional move (strength {:.2}, efficiency {:.2})",
                metrics.trend_strength, metrics.range_efficiency
            ),
        );
    }

    // A compressed range with little net movement precedes a breakout.
    if metrics.atr_percent < 0.01 && metrics.trend_strength.abs() < 0.1 {
        let confidence = (1.0 - metrics.atr_percent * 50.0).clamp(0.0, 1.0);
        return (
            Regime::Breakout,
            confidence,
            format!("compressed range (ATR {:.2}%)", metrics.atr_percent * 100.0),
        );
    }

    // Choppy, inefficient movement mean-reverts.
    let confidence = (1.0 - metrics.range_efficiency).clamp(0.0, 1.0);
    (
        Regime::Reversion,
        confidence,
        format!(
            "inefficient movement (efficiency {:.2})",
            metrics.range_efficiency
        ),
    )
}

/// Net fractional move over the window, clamped to [-1, 1].
fn trend_strength(bars: &[Bar]) -> f64 {
    let first = bars[0].close;
    let last = bars[bars.len() - 1].close;
    if first <= 0.0 {
        return 0.0;
    }
    ((last - first) / first).clamp(-1.0, 1.0)
}

fn atr_percent(bars: &[Bar]) -> f64 {
    let mut total = 0.0;
    let mut count = 0;
    for i in 1..bars.len() {
        let prev_close = bars[i - 1].close;
        let tr = (bars[i].high - bars[i].low)
            .max((bars[i].high - prev_close).abs())
            .max((bars[i].low - prev_close).abs());
        total += tr;
        count += 1;
    }
    let last_close = bars[bars.len() - 1].close;
    if count == 0 || last_close <= 0.0 {
        return 0.0;
    }
    (total / count as f64) / last_close
}

/// Kaufman-style efficiency: net close-to-close movement over the sum of
/// absolute daily moves.
fn range_efficiency(bars: &[Bar]) -> f64 {
    let net = (bars[bars.len() - 1].close - bars[0].close).abs();
    let total: f64 = bars
        .windows(2)
        .map(|w| (w[1].close - w[0].close).abs())
        .sum();
    if total <= 0.0 {
        return 0.0;
    }
    (net / total).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(
                    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64),
                    c,
                    c + 0.2,
                    c - 0.2,
                    c,
                    1_000_000,
                )
            })
            .collect()
    }

    #[test]
    fn test_short_window_unclassified() {
        let bars = bars_from_closes(&vec![100.0; 10]);
        let detection = RegimeDetector::new().detect(&bars);
        assert_eq!(detection.regime, None);
        assert_eq!(detection.confidence, 0.0);
    }

    #[test]
    fn test_steady_ramp_is_trend() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let detection = RegimeDetector::new().detect(&bars_from_closes(&closes));
        assert_eq!(detection.regime, Some(Regime::Trend));
        assert!(detection.confidence > 0.5);
        assert!(detection.metrics.range_efficiency > 0.9);
    }

    #[test]
    fn test_tight_flat_range_is_breakout_setup() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + 0.05 * ((i % 2) as f64))
            .collect();
        let detection = RegimeDetector::new().detect(&bars_from_closes(&closes));
        assert_eq!(detection.regime, Some(Regime::Breakout));
    }

    #[test]
    fn test_choppy_oscillation_is_reversion() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + 5.0 * ((i as f64) * 1.3).sin())
            .collect();
        let detection = RegimeDetector::new().detect(&bars_from_closes(&closes));
        assert_eq!(detection.regime, Some(Regime::Reversion));
        assert!(detection.metrics.range_efficiency < 0.4);
    }
}
