use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use strategy_core::{EngineError, Regime};

/// Execution price policy for signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPrice {
    /// A signal on bar `t` executes at the open of bar `t+1`; the final
    /// bar's signal falls back to that bar's close. Prevents look-ahead.
    #[default]
    NextOpen,
    /// A signal on bar `t` executes at the close of bar `t`.
    Close,
}

/// Position sizing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    #[default]
    AllIn,
    FixedAmount,
    RiskBased,
}

/// Execution-side configuration. Defaults reflect the source market:
/// 14.25 bps fee with a 20-unit floor, 0.3% sell tax, 10% price bands,
/// 1000-share lots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Per-trade fee rate in basis points of gross value.
    #[serde(default = "default_fee_bps")]
    pub fee_bps: f64,
    /// Minimum fee per trade in currency units.
    #[serde(default = "default_fee_floor")]
    pub fee_floor: f64,
    /// Sell-side transaction tax as a fraction of gross value.
    #[serde(default = "default_tax_rate")]
    pub tax_rate: f64,
    /// One-sided price slippage in basis points.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
    /// ATR-multiple stop; overrides the percent stop when set.
    #[serde(default)]
    pub stop_loss_atr_mult: Option<f64>,
    #[serde(default)]
    pub take_profit_atr_mult: Option<f64>,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default)]
    pub execution_price: ExecutionPrice,
    #[serde(default = "default_true")]
    pub enable_limit_up_down: bool,
    #[serde(default = "default_limit_pct")]
    pub limit_up_down_pct: f64,
    #[serde(default = "default_true")]
    pub enable_volume_constraint: bool,
    #[serde(default = "default_participation")]
    pub max_participation_rate: f64,
    #[serde(default)]
    pub sizing_mode: SizingMode,
    #[serde(default)]
    pub fixed_amount: Option<f64>,
    #[serde(default)]
    pub risk_pct: Option<f64>,
    #[serde(default)]
    pub allow_pyramid: bool,
    #[serde(default = "default_true")]
    pub allow_reentry: bool,
    #[serde(default)]
    pub reentry_cooldown_days: i64,
    /// Share rounding unit.
    #[serde(default = "default_lot_size")]
    pub lot_size: i64,
    /// Only meaningful for a multi-instrument extension; the
    /// single-instrument core treats any value as a hard cap of 1.
    #[serde(default)]
    pub max_positions: Option<i32>,
}

fn default_fee_bps() -> f64 {
    14.25
}
fn default_fee_floor() -> f64 {
    20.0
}
fn default_tax_rate() -> f64 {
    0.003
}
fn default_slippage_bps() -> f64 {
    5.0
}
fn default_atr_period() -> usize {
    14
}
fn default_true() -> bool {
    true
}
fn default_limit_pct() -> f64 {
    0.10
}
fn default_participation() -> f64 {
    0.05
}
fn default_lot_size() -> i64 {
    1000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            fee_bps: default_fee_bps(),
            fee_floor: default_fee_floor(),
            tax_rate: default_tax_rate(),
            slippage_bps: default_slippage_bps(),
            stop_loss_pct: None,
            take_profit_pct: None,
            stop_loss_atr_mult: None,
            take_profit_atr_mult: None,
            atr_period: default_atr_period(),
            execution_price: ExecutionPrice::default(),
            enable_limit_up_down: true,
            limit_up_down_pct: default_limit_pct(),
            enable_volume_constraint: true,
            max_participation_rate: default_participation(),
            sizing_mode: SizingMode::default(),
            fixed_amount: None,
            risk_pct: None,
            allow_pyramid: false,
            allow_reentry: true,
            reentry_cooldown_days: 0,
            lot_size: default_lot_size(),
            max_positions: None,
        }
    }
}

impl BrokerConfig {
    /// A configuration with no frictions, handy for analytical scenarios.
    pub fn frictionless() -> Self {
        Self {
            fee_bps: 0.0,
            fee_floor: 0.0,
            tax_rate: 0.0,
            slippage_bps: 0.0,
            enable_limit_up_down: false,
            enable_volume_constraint: false,
            lot_size: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.lot_size <= 0 {
            return Err(EngineError::invalid_input("lot_size must be positive"));
        }
        if self.sizing_mode == SizingMode::FixedAmount && self.fixed_amount.is_none() {
            return Err(EngineError::invalid_input(
                "sizing_mode fixed_amount requires fixed_amount",
            ));
        }
        if self.sizing_mode == SizingMode::RiskBased && self.risk_pct.is_none() {
            return Err(EngineError::invalid_input(
                "sizing_mode risk_based requires risk_pct",
            ));
        }
        if !(0.0..1.0).contains(&self.limit_up_down_pct) {
            return Err(EngineError::invalid_input(
                "limit_up_down_pct must be in [0, 1)",
            ));
        }
        Ok(())
    }
}

/// Ledger entry direction. `shares` on a trade is always positive; the kind
/// carries direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    Buy,
    Sell,
}

/// One executed ledger entry. Fees and taxes are carried beside the price,
/// never folded into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub date: NaiveDate,
    pub kind: TradeKind,
    /// Fill price including slippage adjustment.
    pub price: f64,
    pub shares: i64,
    pub gross_value: f64,
    pub fee: f64,
    pub tax: f64,
    pub slippage_cost: f64,
    pub reason_tags: BTreeSet<String>,
    /// The driving signal: +1 buy, -1 sell.
    pub signal: i8,
}

/// One point of the equity curve. Invariant:
/// `equity == cash + position_shares * price` on every bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
    pub cash: f64,
    pub position_shares: i64,
    pub position_value: f64,
    pub price: f64,
}

/// One FIFO round trip (entry lot paired with its exit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReport {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: i64,
    pub gross_profit: f64,
    /// Profit net of both legs' fees, taxes, and slippage.
    pub net_profit: f64,
    /// Net profit against the entry's gross value.
    pub return_pct: f64,
    pub holding_days: i64,
    pub reason_tags_entry: BTreeSet<String>,
    pub reason_tags_exit: BTreeSet<String>,
}

/// Aggregate performance of one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    /// CAGR over 365.25-day years; zero when the window has no span.
    pub annual_return: f64,
    pub sharpe_ratio: f64,
    /// Always <= 0.
    pub max_drawdown: f64,
    /// In [0, 1].
    pub win_rate: f64,
    /// Number of round trips.
    pub total_trades: usize,
    /// Mean per-trade return.
    pub expectancy: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

impl PerformanceMetrics {
    /// All-zero metrics for empty or failed evaluations.
    pub fn zeroed() -> Self {
        Self {
            total_return: 0.0,
            annual_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            win_rate: 0.0,
            total_trades: 0,
            expectancy: 0.0,
            profit_factor: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
        }
    }
}

/// Buy-and-hold metrics on the raw price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
}

/// Strategy vs. buy-and-hold deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub baseline: BaselineMetrics,
    pub excess_return: f64,
    pub relative_sharpe: f64,
    /// Strategy drawdown minus baseline drawdown; negative means the
    /// strategy drew down less.
    pub relative_drawdown: f64,
    pub outperforms: bool,
}

/// One walk-forward (train, test) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardFold {
    pub fold_number: usize,
    pub train_period: (NaiveDate, NaiveDate),
    pub test_period: (NaiveDate, NaiveDate),
    pub train_metrics: PerformanceMetrics,
    pub test_metrics: PerformanceMetrics,
    /// Normalized train→test decay in [0, 1].
    pub degradation: f64,
    pub params: BTreeMap<String, f64>,
    pub warmup_days: i64,
}

/// Aggregates across all folds of a walk-forward run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardSummary {
    pub total_folds: usize,
    pub avg_train_sharpe: f64,
    pub avg_test_sharpe: f64,
    pub avg_degradation: f64,
    /// Share of folds whose test Sharpe is positive.
    pub positive_test_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Inputs that fed the overfitting composite; `None` means unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OverfittingMetrics {
    pub degradation: Option<f64>,
    pub consistency_std: Option<f64>,
    pub parameter_sensitivity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverfittingRiskReport {
    pub risk_level: RiskLevel,
    /// 0–10, integer-additive contributions.
    pub risk_score: f64,
    pub metrics: OverfittingMetrics,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    /// Absent inputs; each contributes 0 to the score.
    pub missing_data: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    Warning,
    Fail,
}

/// Which sample-size gates tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleInsufficientFlags {
    pub trade_count: bool,
    pub period_too_short: bool,
    pub wf_fold_insufficient: bool,
}

impl SampleInsufficientFlags {
    pub fn any(&self) -> bool {
        self.trade_count || self.period_too_short || self.wf_fold_insufficient
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub validation_status: ValidationStatus,
    pub sample_insufficient_flags: SampleInsufficientFlags,
    pub messages: Vec<String>,
    pub can_promote: bool,
}

/// The full result of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub strategy_id: String,
    pub strategy_version: String,
    pub requested_start: NaiveDate,
    pub requested_end: NaiveDate,
    /// Actual simulated window after narrowing to the available bars.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Present when the requested range was narrowed. A warning, not an
    /// error.
    pub date_adjusted: Option<String>,
    /// The evaluation regime: caller-supplied, or detected from the bar
    /// window when the request carried none.
    pub regime: Option<Regime>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub metrics: PerformanceMetrics,
    pub trade_reports: Vec<TradeReport>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub baseline: Option<BaselineComparison>,
    pub overfitting_risk: Option<OverfittingRiskReport>,
    pub validation: ValidationReport,
}

/// Progress hook invoked synchronously from the completing worker as
/// `(completed, total, message)`. Implementations must be thread-safe and
/// must not block on I/O on critical paths.
pub type ProgressFn = dyn Fn(usize, usize, &str) + Send + Sync;

// --- Optimizer DTOs ---

/// A sweep dimension: explicit values or a numeric range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamRange {
    Int { min: i64, max: i64, step: i64 },
    Float { min: f64, max: f64, step: f64 },
    List { values: Vec<f64> },
}

impl ParamRange {
    /// Expand into concrete values. Invalid ranges produce an input error.
    pub fn expand(&self) -> Result<Vec<f64>, EngineError> {
        match self {
            ParamRange::Int { min, max, step } => {
                if *step <= 0 {
                    return Err(EngineError::invalid_input("int range step must be positive"));
                }
                Ok((*min..=*max).step_by(*step as usize).map(|v| v as f64).collect())
            }
            ParamRange::Float { min, max, step } => {
                if *step <= 0.0 {
                    return Err(EngineError::invalid_input(
                        "float range step must be positive",
                    ));
                }
                let mut values = Vec::new();
                let mut current = *min;
                while current <= *max + 1e-9 {
                    values.push((current * 100.0).round() / 100.0);
                    current += step;
                }
                Ok(values)
            }
            ParamRange::List { values } => {
                if values.is_empty() {
                    return Err(EngineError::invalid_input("list range must not be empty"));
                }
                Ok(values.clone())
            }
        }
    }
}

/// Optimization objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    Sharpe,
    AnnualReturn,
    /// CAGR + max drawdown (drawdown is negative, so a subtraction).
    CagrMinusMdd,
}

impl Objective {
    pub fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            Objective::Sharpe => metrics.sharpe_ratio,
            Objective::AnnualReturn => metrics.annual_return,
            Objective::CagrMinusMdd => metrics.annual_return + metrics.max_drawdown,
        }
    }
}

/// One evaluated parameter combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub params: BTreeMap<String, f64>,
    /// `None` when the evaluation failed or timed out.
    pub metrics: Option<PerformanceMetrics>,
    pub score: f64,
    /// 1-based rank after the final sort.
    pub rank: usize,
    pub error: Option<String>,
}

/// The full optimizer outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    /// Top-N results sorted descending by score, ranks 1..N.
    pub results: Vec<OptimizationResult>,
    pub total_candidates: usize,
    pub evaluated: usize,
    /// False when cancellation cut the sweep short.
    pub complete: bool,
    /// Coefficient of variation of scores across the grid, in [0, 1].
    pub parameter_sensitivity: Option<f64>,
}

impl OptimizationOutcome {
    /// Flatten the ranked results into presentation rows, percentages where
    /// the metric is a ratio. Failed candidates carry zeroed metrics.
    pub fn summary(&self) -> Vec<OptimizationSummaryRow> {
        self.results
            .iter()
            .map(|result| {
                let metrics = result.metrics.clone().unwrap_or_else(PerformanceMetrics::zeroed);
                OptimizationSummaryRow {
                    rank: result.rank,
                    params: result.params.clone(),
                    total_return_pct: metrics.total_return * 100.0,
                    annual_return_pct: metrics.annual_return * 100.0,
                    sharpe_ratio: metrics.sharpe_ratio,
                    max_drawdown_pct: metrics.max_drawdown * 100.0,
                    win_rate_pct: metrics.win_rate * 100.0,
                    total_trades: metrics.total_trades,
                    expectancy_pct: metrics.expectancy * 100.0,
                    profit_factor: metrics.profit_factor,
                    score: result.score,
                }
            })
            .collect()
    }
}

/// One row of the optimization summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSummaryRow {
    pub rank: usize,
    pub params: BTreeMap<String, f64>,
    pub total_return_pct: f64,
    pub annual_return_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub win_rate_pct: f64,
    pub total_trades: usize,
    pub expectancy_pct: f64,
    pub profit_factor: f64,
    pub score: f64,
}
