//! Built-in strategy executors.
//!
//! Both executors share the same machinery: compute the indicator frame,
//! score every bar, then run a Flat/Long state machine gated by score
//! thresholds, consecutive-bar confirmation, and a calendar-day cooldown.
//! They differ only in their default thresholds and target regimes.

use chrono::NaiveDate;

use strategy_core::{Bar, DailySignal, EngineError, Regime, Signal, SignalGenerator, StrategySpec};
use technical_analysis::{IndicatorFrame, ScoringEngine};

use crate::reasons;

/// Threshold-machine parameters, resolved from `spec.params` with
/// per-strategy defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdParams {
    pub buy_score: f64,
    pub sell_score: f64,
    pub buy_confirm_days: usize,
    pub sell_confirm_days: usize,
    pub cooldown_days: i64,
}

impl ThresholdParams {
    fn resolve(spec: &StrategySpec, defaults: ThresholdParams) -> Self {
        Self {
            buy_score: spec.param("buy_score", defaults.buy_score),
            sell_score: spec.param("sell_score", defaults.sell_score),
            buy_confirm_days: spec
                .param_days("buy_confirm_days", defaults.buy_confirm_days as i64)
                .max(1) as usize,
            sell_confirm_days: spec
                .param_days("sell_confirm_days", defaults.sell_confirm_days as i64)
                .max(1) as usize,
            cooldown_days: spec
                .param_days("cooldown_days", defaults.cooldown_days)
                .max(0),
        }
    }
}

/// Mean-reversion oriented executor: low thresholds, long confirmation,
/// long cooldown.
pub struct StableConservative;

impl StableConservative {
    pub const ID: &'static str = "stable_conservative_v1";

    fn defaults() -> ThresholdParams {
        ThresholdParams {
            buy_score: 55.0,
            sell_score: 45.0,
            buy_confirm_days: 3,
            sell_confirm_days: 3,
            cooldown_days: 5,
        }
    }
}

impl SignalGenerator for StableConservative {
    fn generate_signals(
        &self,
        bars: &[Bar],
        spec: &StrategySpec,
        regime: Option<Regime>,
    ) -> Result<Vec<DailySignal>, EngineError> {
        run_threshold_machine(bars, spec, regime, ThresholdParams::resolve(spec, Self::defaults()))
    }
}

/// Trend-following executor: higher entry bar, quicker confirmation.
pub struct TrendMomentum;

impl TrendMomentum {
    pub const ID: &'static str = "trend_momentum_v1";

    fn defaults() -> ThresholdParams {
        ThresholdParams {
            buy_score: 65.0,
            sell_score: 40.0,
            buy_confirm_days: 2,
            sell_confirm_days: 2,
            cooldown_days: 3,
        }
    }
}

impl SignalGenerator for TrendMomentum {
    fn generate_signals(
        &self,
        bars: &[Bar],
        spec: &StrategySpec,
        regime: Option<Regime>,
    ) -> Result<Vec<DailySignal>, EngineError> {
        run_threshold_machine(bars, spec, regime, ThresholdParams::resolve(spec, Self::defaults()))
    }
}

fn run_threshold_machine(
    bars: &[Bar],
    spec: &StrategySpec,
    regime: Option<Regime>,
    params: ThresholdParams,
) -> Result<Vec<DailySignal>, EngineError> {
    spec.validate()?;
    if bars.is_empty() {
        return Err(EngineError::invalid_input("no bars to generate signals on"));
    }

    let frame = IndicatorFrame::compute(
        bars.to_vec(),
        &spec.config.technical,
        &spec.config.patterns,
    )?;
    let scores = ScoringEngine::score(&frame, &spec.config, &spec.regime, regime)?;

    let buy_condition: Vec<bool> = scores.iter().map(|s| s.total_score >= params.buy_score).collect();
    let sell_condition: Vec<bool> = scores.iter().map(|s| s.total_score <= params.sell_score).collect();
    let buy_confirmed = confirmed(&buy_condition, params.buy_confirm_days);
    let sell_confirmed = confirmed(&sell_condition, params.sell_confirm_days);

    let mut out = Vec::with_capacity(bars.len());
    let mut in_position = false;
    let mut last_trade_date: Option<NaiveDate> = None;

    for (i, bar) in frame.bars.iter().enumerate() {
        let mut tags = reasons::tags_for_bar(&frame, i);

        // Cooldown suppresses both entries and exits for `cooldown_days`
        // calendar days after the last signal-driven trade.
        let in_cooldown = match last_trade_date {
            Some(last) => (bar.date - last).num_days() < params.cooldown_days,
            None => false,
        };

        let mut signal = Signal::Hold;
        if !in_position && buy_confirmed[i] {
            if in_cooldown {
                tags.insert("cooldown".to_string());
            } else {
                signal = Signal::Buy;
                tags.insert("score_buy_confirmed".to_string());
                in_position = true;
                last_trade_date = Some(bar.date);
            }
        } else if in_position && sell_confirmed[i] {
            if in_cooldown {
                tags.insert("cooldown".to_string());
            } else {
                signal = Signal::Sell;
                tags.insert("score_sell_confirmed".to_string());
                in_position = false;
                last_trade_date = Some(bar.date);
            }
        }

        // The frame carries the same score the thresholds fired on; the
        // regime-boosted FinalScore stays internal to the scoring engine,
        // with regime_match flagging that the boost applied.
        let s = scores[i];
        out.push(DailySignal {
            date: bar.date,
            signal,
            total_score: s.total_score,
            indicator_score: s.indicator_score,
            pattern_score: s.pattern_score,
            volume_score: s.volume_score,
            reason_tags: tags,
            regime_match: s.regime_match,
        });
    }

    Ok(out)
}

/// A condition is confirmed at bar `i` when it held on the last
/// `confirm_days` consecutive bars ending at `i`.
fn confirmed(condition: &[bool], confirm_days: usize) -> Vec<bool> {
    if confirm_days <= 1 {
        return condition.to_vec();
    }
    let mut streak = 0usize;
    condition
        .iter()
        .map(|&c| {
            streak = if c { streak + 1 } else { 0 };
            streak >= confirm_days
        })
        .collect()
}
