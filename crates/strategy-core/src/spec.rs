use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::Regime;

/// Declarative strategy specification. Pure data, losslessly serializable;
/// the executor resolved from the registry interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub strategy_id: String,
    pub strategy_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Regimes this strategy is built for; a matching evaluation regime
    /// boosts the total score.
    #[serde(default)]
    pub regime: Vec<Regime>,
    /// Tunable numeric parameters (thresholds, confirmation windows, ...).
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
    #[serde(default)]
    pub config: StrategyConfig,
}

impl StrategySpec {
    pub fn new(strategy_id: impl Into<String>, strategy_version: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            strategy_version: strategy_version.into(),
            name: String::new(),
            description: String::new(),
            regime: Vec::new(),
            params: BTreeMap::new(),
            config: StrategyConfig::default(),
        }
    }

    /// Numeric parameter with a fallback default.
    pub fn param(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }

    /// Parameter interpreted as a day count.
    pub fn param_days(&self, key: &str, default: i64) -> i64 {
        self.params
            .get(key)
            .map(|v| v.round() as i64)
            .unwrap_or(default)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.strategy_id.is_empty() {
            return Err(EngineError::invalid_input("strategy_id must not be empty"));
        }
        self.config.signals.validate()
    }
}

/// Full strategy configuration: indicator toggles, pattern selection,
/// score weights, and screening filters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub technical: TechnicalConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
    #[serde(default)]
    pub signals: SignalWeights,
    #[serde(default)]
    pub filters: FilterConfig,
}

/// Per-indicator toggles and parameters. The catalog is closed: unknown
/// indicator keys are a deserialization error, not a silent skip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TechnicalConfig {
    /// Simple moving averages of the close, one column per period.
    #[serde(default = "default_ma_periods")]
    pub ma_periods: Vec<usize>,
    #[serde(default = "default_rsi")]
    pub rsi: Option<PeriodParams>,
    #[serde(default = "default_macd")]
    pub macd: Option<MacdParams>,
    #[serde(default = "default_atr")]
    pub atr: Option<PeriodParams>,
    #[serde(default = "default_adx")]
    pub adx: Option<PeriodParams>,
    #[serde(default = "default_bollinger")]
    pub bollinger: Option<BollingerParams>,
    /// KD oscillator.
    #[serde(default = "default_stochastic")]
    pub stochastic: Option<StochasticParams>,
    /// Trailing volume average used by the volume sub-score.
    #[serde(default = "default_volume_ma")]
    pub volume_ma: Option<PeriodParams>,
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            ma_periods: default_ma_periods(),
            rsi: default_rsi(),
            macd: default_macd(),
            atr: default_atr(),
            adx: default_adx(),
            bollinger: default_bollinger(),
            stochastic: default_stochastic(),
            volume_ma: default_volume_ma(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodParams {
    pub period: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerParams {
    pub period: usize,
    /// Band width in standard deviations.
    pub width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StochasticParams {
    pub k: usize,
    pub d: usize,
}

fn default_ma_periods() -> Vec<usize> {
    vec![20, 60]
}
fn default_rsi() -> Option<PeriodParams> {
    Some(PeriodParams { period: 14 })
}
fn default_macd() -> Option<MacdParams> {
    Some(MacdParams {
        fast: 12,
        slow: 26,
        signal: 9,
    })
}
fn default_atr() -> Option<PeriodParams> {
    Some(PeriodParams { period: 14 })
}
fn default_adx() -> Option<PeriodParams> {
    Some(PeriodParams { period: 14 })
}
fn default_bollinger() -> Option<BollingerParams> {
    Some(BollingerParams {
        period: 20,
        width: 2.0,
    })
}
fn default_stochastic() -> Option<StochasticParams> {
    Some(StochasticParams { k: 9, d: 3 })
}
fn default_volume_ma() -> Option<PeriodParams> {
    Some(PeriodParams { period: 20 })
}

/// Closed set of chart patterns the detector layer understands. Unknown
/// names fail at deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartPattern {
    Doji,
    Hammer,
    InvertedHammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
    MorningStar,
    EveningStar,
    DoubleBottom,
    DoubleTop,
    HeadAndShoulders,
    FallingWedge,
}

impl ChartPattern {
    /// Tag used in reason strings and frame columns.
    pub fn tag(self) -> &'static str {
        match self {
            ChartPattern::Doji => "doji",
            ChartPattern::Hammer => "hammer",
            ChartPattern::InvertedHammer => "inverted_hammer",
            ChartPattern::ShootingStar => "shooting_star",
            ChartPattern::BullishEngulfing => "bullish_engulfing",
            ChartPattern::BearishEngulfing => "bearish_engulfing",
            ChartPattern::MorningStar => "morning_star",
            ChartPattern::EveningStar => "evening_star",
            ChartPattern::DoubleBottom => "double_bottom",
            ChartPattern::DoubleTop => "double_top",
            ChartPattern::HeadAndShoulders => "head_and_shoulders",
            ChartPattern::FallingWedge => "falling_wedge",
        }
    }

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "default_selected_patterns")]
    pub selected: Vec<ChartPattern>,
    /// Trailing window over which pattern fires decay into the score.
    #[serde(default = "default_pattern_window")]
    pub window: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            selected: default_selected_patterns(),
            window: default_pattern_window(),
        }
    }
}

fn default_selected_patterns() -> Vec<ChartPattern> {
    vec![
        ChartPattern::Hammer,
        ChartPattern::BullishEngulfing,
        ChartPattern::MorningStar,
    ]
}
fn default_pattern_window() -> usize {
    10
}

/// Sub-score weights. Must sum to 1 within 1e-6.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    pub pattern: f64,
    pub technical: f64,
    pub volume: f64,
    /// Multiplier applied to the total score on a regime match (> 1).
    #[serde(default = "default_regime_boost")]
    pub regime_boost: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            pattern: 0.3,
            technical: 0.5,
            volume: 0.2,
            regime_boost: default_regime_boost(),
        }
    }
}

fn default_regime_boost() -> f64 {
    1.2
}

impl SignalWeights {
    pub fn validate(&self) -> Result<(), EngineError> {
        let sum = self.pattern + self.technical + self.volume;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::invalid_input(format!(
                "signal weights must sum to 1.0, got {sum}"
            )));
        }
        if self.regime_boost <= 1.0 {
            return Err(EngineError::invalid_input(format!(
                "regime_boost must be > 1.0, got {}",
                self.regime_boost
            )));
        }
        Ok(())
    }
}

/// Screening predicates applied by upstream recommendation services. Carried
/// on the spec for round-trip fidelity; the core evaluation loop ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub min_volume: Option<i64>,
}
