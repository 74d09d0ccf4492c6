//! End-to-end evaluation: bars + spec → signals → simulation → metrics →
//! baseline → robustness → SOP gate.
//!
//! The engine owns no mutable state and no globals; collaborators (registry,
//! analyzer) are passed in explicitly, so multiple instances can run in the
//! same process and share read-only data across optimizer workers.

use chrono::NaiveDate;
use tracing::{info, warn};

use signal_engine::StrategyRegistry;
use strategy_core::{Bar, EngineError, Regime, StrategySpec};
use technical_analysis::RegimeDetector;

use crate::broker::BrokerSimulator;
use crate::metrics::PerformanceAnalyzer;
use crate::models::{BacktestReport, BrokerConfig, WalkForwardFold};
use crate::robustness;
use crate::sop::SopValidator;

/// Everything one evaluation needs besides the bars.
#[derive(Clone)]
pub struct BacktestRequest {
    pub spec: StrategySpec,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub capital: f64,
    /// Evaluation-time market condition. When `None`, the engine derives
    /// one from the simulated bar window.
    pub regime: Option<Regime>,
    pub broker: BrokerConfig,
    /// Walk-forward folds from a prior driver run; enables the
    /// overfitting-risk composite.
    pub walkforward: Option<Vec<WalkForwardFold>>,
    /// Cross-parameter score variance from a prior optimizer pass.
    pub parameter_sensitivity: Option<f64>,
    /// Strategy layers modified in this research session (SOP guardrail).
    pub changed_layers: Vec<String>,
    pub walkforward_executed: bool,
}

impl BacktestRequest {
    pub fn new(spec: StrategySpec, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            spec,
            start,
            end,
            capital: 1_000_000.0,
            regime: None,
            broker: BrokerConfig::default(),
            walkforward: None,
            parameter_sensitivity: None,
            changed_layers: Vec::new(),
            walkforward_executed: false,
        }
    }
}

pub struct BacktestEngine<'a> {
    registry: &'a StrategyRegistry,
    analyzer: PerformanceAnalyzer,
}

impl<'a> BacktestEngine<'a> {
    pub fn new(registry: &'a StrategyRegistry) -> Self {
        Self {
            registry,
            analyzer: PerformanceAnalyzer::default(),
        }
    }

    pub fn with_risk_free_rate(registry: &'a StrategyRegistry, risk_free_rate: f64) -> Self {
        Self {
            registry,
            analyzer: PerformanceAnalyzer::new(risk_free_rate),
        }
    }

    /// Run one full evaluation over the requested window.
    pub fn run(&self, bars: &[Bar], request: &BacktestRequest) -> Result<BacktestReport, EngineError> {
        request.spec.validate()?;
        request.broker.validate()?;
        if bars.is_empty() {
            return Err(EngineError::invalid_input("no bars supplied"));
        }
        if request.start > request.end {
            return Err(EngineError::invalid_input(format!(
                "start {} is after end {}",
                request.start, request.end
            )));
        }

        // 1. Narrow the requested window to the available bars. Narrowing is
        //    a warning; an empty intersection is not recoverable.
        let window: Vec<Bar> = bars
            .iter()
            .filter(|b| b.date >= request.start && b.date <= request.end)
            .copied()
            .collect();
        if window.is_empty() {
            return Err(EngineError::insufficient_data(1, 0));
        }
        let actual_start = window[0].date;
        let actual_end = window[window.len() - 1].date;
        let date_adjusted = if actual_start != request.start || actual_end != request.end {
            let message = format!(
                "date range adjusted: requested {}~{} -> actual {}~{}",
                request.start, request.end, actual_start, actual_end
            );
            warn!("{message}");
            Some(message)
        } else {
            None
        };

        // 2. Resolve the evaluation regime: the caller's when supplied,
        //    else detected from the window (None when the window is too
        //    short to classify).
        let regime = request
            .regime
            .or_else(|| RegimeDetector::new().detect(&window).regime);

        // 3. Resolve the executor and build the signal frame.
        let executor = self.registry.resolve(&request.spec)?;
        let signals = executor.generate_signals(&window, &request.spec, regime)?;

        // 4. Simulate.
        let simulator = BrokerSimulator::new(request.broker.clone());
        let (trades, equity_curve) = simulator.run(&window, &signals, request.capital)?;

        // 5. Metrics and the round-trip ledger.
        let metrics = self
            .analyzer
            .summarize(&trades, &equity_curve, request.capital)?;
        let trade_reports = self.analyzer.round_trips(&trades);

        // 6. Buy-and-hold baseline on the same window.
        let baseline_metrics = self
            .analyzer
            .buy_hold_baseline(&window, actual_start, actual_end);
        let baseline = Some(self.analyzer.compare_to_baseline(&metrics, baseline_metrics));

        // 7. Overfitting risk, when walk-forward folds are available.
        let overfitting_risk = request.walkforward.as_deref().and_then(|folds| {
            if folds.is_empty() {
                return None;
            }
            let avg_degradation = folds
                .iter()
                .map(|f| robustness::walkforward_degradation(&f.train_metrics, &f.test_metrics))
                .sum::<f64>()
                / folds.len() as f64;
            let consistency = robustness::fold_consistency(folds);
            Some(robustness::overfitting_risk(
                Some(avg_degradation),
                consistency,
                request.parameter_sensitivity,
            ))
        });

        // 8. SOP gates.
        let mut validation = SopValidator::validate_backtest_result(
            metrics.total_trades,
            actual_start,
            actual_end,
            request.walkforward.as_deref(),
            &request.changed_layers,
            request.walkforward_executed,
        );
        let (risk_ok, risk_messages) =
            SopValidator::check_overfitting_risk(overfitting_risk.as_ref());
        if !risk_ok {
            validation.can_promote = false;
        }
        validation.messages.extend(risk_messages);
        validation
            .messages
            .extend(SopValidator::check_baseline_comparison(baseline.as_ref()));

        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(request.capital);

        info!(
            strategy = %request.spec.strategy_id,
            trades = metrics.total_trades,
            total_return = metrics.total_return,
            status = ?validation.validation_status,
            "backtest complete"
        );

        Ok(BacktestReport {
            strategy_id: request.spec.strategy_id.clone(),
            strategy_version: request.spec.strategy_version.clone(),
            requested_start: request.start,
            requested_end: request.end,
            start_date: actual_start,
            end_date: actual_end,
            date_adjusted,
            regime,
            initial_capital: request.capital,
            final_equity,
            metrics,
            trade_reports,
            trades,
            equity_curve,
            baseline,
            overfitting_risk,
            validation,
        })
    }
}
