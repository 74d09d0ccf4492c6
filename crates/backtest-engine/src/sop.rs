//! Promotion gate.
//!
//! Applies the research SOP to a backtest result: hard sample-size gates
//! fail the run, process shortcuts warn, and a high overfitting risk blocks
//! promotion outright. This module never errors; it only reports.

use chrono::NaiveDate;

use crate::models::{
    BaselineComparison, OverfittingRiskReport, RiskLevel, SampleInsufficientFlags,
    ValidationReport, ValidationStatus, WalkForwardFold,
};

const MIN_TRADES: usize = 10;
const MIN_PERIOD_DAYS: i64 = 90;
const MIN_WF_FOLDS: usize = 3;

/// Healthy trade-count band for the behavior check.
const TRADE_BAND: (usize, usize) = (10, 100);

/// Strategy horizon, used only by the behavior health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyHorizon {
    ShortTerm,
    MediumTerm,
    LongTerm,
}

impl StrategyHorizon {
    fn holding_band(self) -> (f64, f64) {
        match self {
            StrategyHorizon::ShortTerm => (3.0, 10.0),
            StrategyHorizon::MediumTerm => (10.0, 30.0),
            StrategyHorizon::LongTerm => (30.0, 1000.0),
        }
    }
}

pub struct SopValidator;

impl SopValidator {
    /// Gate a backtest result.
    ///
    /// Hard fails: trade count below 10, period shorter than 90 days, or
    /// walk-forward present with fewer than 3 folds. Warnings: more than one
    /// layer changed this session, or walk-forward never executed.
    pub fn validate_backtest_result(
        total_trades: usize,
        start_date: NaiveDate,
        end_date: NaiveDate,
        walkforward_results: Option<&[WalkForwardFold]>,
        changed_layers: &[String],
        walkforward_executed: bool,
    ) -> ValidationReport {
        let mut messages = Vec::new();
        let mut flags = SampleInsufficientFlags::default();

        // Sample-size gates.
        if total_trades < MIN_TRADES {
            flags.trade_count = true;
            messages.push(format!(
                "insufficient sample: only {total_trades} trades; strategy effectiveness cannot be judged reliably"
            ));
            messages.push(
                "suggestion: widen the backtest window or relax the buy/sell score thresholds"
                    .to_string(),
            );
        }

        let days = (end_date - start_date).num_days();
        if days < MIN_PERIOD_DAYS {
            flags.period_too_short = true;
            messages.push(format!(
                "insufficient sample: backtest period is only {days} days"
            ));
            messages.push("suggestion: backtest at least six months of data".to_string());
        }

        if let Some(folds) = walkforward_results {
            if folds.len() < MIN_WF_FOLDS {
                flags.wf_fold_insufficient = true;
                messages.push(format!(
                    "insufficient sample: walk-forward produced only {} folds",
                    folds.len()
                ));
                messages.push(
                    "suggestion: widen the date range or shorten train/test windows for at least 3 folds"
                        .to_string(),
                );
            }
        }

        // Process warnings.
        if changed_layers.len() > 1 {
            messages.push(format!(
                "warning: multiple layers changed in this session ({})",
                changed_layers.join(", ")
            ));
            messages.push(
                "suggestion: change one layer at a time so results stay attributable".to_string(),
            );
        }
        if !walkforward_executed {
            messages
                .push("warning: walk-forward validation has not been executed".to_string());
            messages.push(
                "suggestion: run walk-forward validation to assess robustness".to_string(),
            );
        }

        let validation_status = if flags.any() {
            ValidationStatus::Fail
        } else if changed_layers.len() > 1 || !walkforward_executed {
            ValidationStatus::Warning
        } else {
            ValidationStatus::Pass
        };

        ValidationReport {
            can_promote: validation_status != ValidationStatus::Fail,
            validation_status,
            sample_insufficient_flags: flags,
            messages,
        }
    }

    /// Separate promotion gate on the overfitting risk: `high` blocks
    /// promotion regardless of the sample gates.
    pub fn check_overfitting_risk(
        report: Option<&OverfittingRiskReport>,
    ) -> (bool, Vec<String>) {
        let Some(report) = report else {
            return (true, vec!["no overfitting risk assessment available".to_string()]);
        };

        match report.risk_level {
            RiskLevel::High => (
                false,
                vec![
                    "overfitting risk: high — promotion blocked".to_string(),
                    "suggestion: re-optimize only together with walk-forward validation"
                        .to_string(),
                ],
            ),
            RiskLevel::Medium => (
                true,
                vec!["overfitting risk: medium — proceed with further validation".to_string()],
            ),
            RiskLevel::Low => (true, vec!["overfitting risk: low".to_string()]),
        }
    }

    /// Informational check whether the strategy beat buy-and-hold.
    pub fn check_baseline_comparison(comparison: Option<&BaselineComparison>) -> Vec<String> {
        match comparison {
            None => vec!["no baseline comparison available".to_string()],
            Some(cmp) if cmp.outperforms => {
                vec!["strategy outperforms buy-and-hold".to_string()]
            }
            Some(_) => vec![
                "strategy underperforms buy-and-hold".to_string(),
                "suggestion: revisit the scoring or execution layer, or switch strategies"
                    .to_string(),
            ],
        }
    }

    /// Behavior health check: message-only sanity bands on trade count and
    /// holding period. Never fails a run.
    pub fn behavior_health(
        total_trades: usize,
        avg_holding_days: f64,
        horizon: StrategyHorizon,
    ) -> Vec<String> {
        let mut messages = Vec::new();

        if total_trades < TRADE_BAND.0 {
            messages.push(format!(
                "trade count low ({total_trades}); the signal layer may be too strict"
            ));
        } else if total_trades > TRADE_BAND.1 {
            messages.push(format!(
                "trade count high ({total_trades}); possible overtrading"
            ));
        } else {
            messages.push(format!("trade count healthy ({total_trades})"));
        }

        let (min_days, max_days) = horizon.holding_band();
        if avg_holding_days < min_days || avg_holding_days > max_days {
            messages.push(format!(
                "average holding period ({avg_holding_days:.1} days) is outside the expected band for this horizon"
            ));
        } else {
            messages.push(format!(
                "average holding period healthy ({avg_holding_days:.1} days)"
            ));
        }

        messages
    }
}
