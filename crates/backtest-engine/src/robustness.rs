//! Robustness analysis: walk-forward degradation, fold consistency, and the
//! aggregated overfitting-risk composite.

use statrs::statistics::Statistics;

use crate::models::{
    OverfittingMetrics, OverfittingRiskReport, PerformanceMetrics, RiskLevel, WalkForwardFold,
};

/// Train metrics below this magnitude are unmeasurable; treated as no
/// degradation.
const DEGRADATION_FLOOR: f64 = 1e-10;

/// Normalized drop from train to test for one fold, clamped to [0, 1].
/// Prefers Sharpe; falls back to total return when train Sharpe is zero.
pub fn walkforward_degradation(
    train: &PerformanceMetrics,
    test: &PerformanceMetrics,
) -> f64 {
    let (train_metric, test_metric) = if train.sharpe_ratio == 0.0 {
        (train.total_return, test.total_return)
    } else {
        (train.sharpe_ratio, test.sharpe_ratio)
    };

    if train_metric.abs() < DEGRADATION_FLOOR {
        return 0.0;
    }

    let degradation = (train_metric - test_metric) / train_metric.abs();
    degradation.clamp(0.0, 1.0)
}

/// Standard deviation of the folds' test Sharpe (test total return when all
/// Sharpes are zero), clamped to [0, 1]. Undefined below two folds.
pub fn fold_consistency(folds: &[WalkForwardFold]) -> Option<f64> {
    if folds.len() < 2 {
        return None;
    }

    let mut values: Vec<f64> = folds.iter().map(|f| f.test_metrics.sharpe_ratio).collect();
    if values.iter().all(|s| *s == 0.0) {
        values = folds.iter().map(|f| f.test_metrics.total_return).collect();
    }

    let std = values.population_std_dev();
    Some(std.abs().min(1.0))
}

/// Coefficient of variation of the optimizer's objective scores, clamped to
/// [0, 1]. `None` when the grid is too small or centered on zero.
pub fn parameter_sensitivity(scores: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    if finite.len() < 2 {
        return None;
    }
    let mean = (&finite).mean();
    if mean.abs() < DEGRADATION_FLOOR {
        return None;
    }
    let std = finite.population_std_dev();
    Some((std / mean.abs()).min(1.0))
}

/// Aggregate the available signals into a 0–10 risk score and level.
/// Missing inputs contribute zero and are listed in `missing_data`.
pub fn overfitting_risk(
    degradation: Option<f64>,
    consistency_std: Option<f64>,
    parameter_sensitivity: Option<f64>,
) -> OverfittingRiskReport {
    let mut missing_data = Vec::new();
    if parameter_sensitivity.is_none() {
        missing_data.push("parameter optimization results".to_string());
    }
    if degradation.is_none() {
        missing_data.push("walk-forward results".to_string());
    }
    if consistency_std.is_none() {
        missing_data.push("walk-forward fold results".to_string());
    }

    let mut risk_score: f64 = 0.0;
    if let Some(sensitivity) = parameter_sensitivity {
        if sensitivity >= 0.30 {
            risk_score += 2.0;
        } else if sensitivity >= 0.15 {
            risk_score += 1.0;
        }
    }
    if let Some(degradation) = degradation {
        if degradation >= 0.40 {
            risk_score += 2.0;
        } else if degradation >= 0.20 {
            risk_score += 1.0;
        }
    }
    if let Some(std) = consistency_std {
        if std >= 0.50 {
            risk_score += 2.0;
        } else if std >= 0.30 {
            risk_score += 1.0;
        }
    }
    let risk_score = risk_score.min(10.0);

    let risk_level = if risk_score >= 4.0 {
        RiskLevel::High
    } else if risk_score >= 2.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    let mut warnings = Vec::new();
    if let Some(d) = degradation {
        if d >= 0.40 {
            warnings.push(format!(
                "walk-forward degradation is severe ({:.1}%); out-of-sample performance drops sharply",
                d * 100.0
            ));
        } else if d >= 0.20 {
            warnings.push(format!(
                "walk-forward degradation is moderate ({:.1}%); verify robustness before relying on this strategy",
                d * 100.0
            ));
        }
    }
    if let Some(std) = consistency_std {
        if std >= 0.50 {
            warnings.push(format!(
                "fold consistency is poor (std {std:.2}); performance is unstable across market windows"
            ));
        } else if std >= 0.30 {
            warnings.push(format!(
                "fold consistency is middling (std {std:.2}); consider more walk-forward folds"
            ));
        }
    }
    if let Some(s) = parameter_sensitivity {
        if s >= 0.30 {
            warnings.push(format!(
                "parameter sensitivity is high ({:.1}%); results may hinge on one parameter combination",
                s * 100.0
            ));
        } else if s >= 0.15 {
            warnings.push(format!(
                "parameter sensitivity is moderate ({:.1}%); run a parameter robustness sweep",
                s * 100.0
            ));
        }
    }

    let mut recommendations = Vec::new();
    match risk_level {
        RiskLevel::High => {
            recommendations.push("overfitting risk is high:".to_string());
            recommendations.push("extend the training history or sample size".to_string());
            recommendations
                .push("simplify the strategy and reduce its parameter count".to_string());
            recommendations.push("run additional out-of-sample walk-forward tests".to_string());
        }
        RiskLevel::Medium => {
            recommendations.push("overfitting risk is moderate:".to_string());
            recommendations
                .push("run more walk-forward folds to confirm robustness".to_string());
            recommendations.push("trial the strategy at reduced size first".to_string());
        }
        RiskLevel::Low => {
            recommendations.push("overfitting risk is low:".to_string());
            recommendations
                .push("keep monitoring live performance against the backtest".to_string());
        }
    }
    if !missing_data.is_empty() {
        recommendations.push(format!(
            "missing inputs reduce coverage: {}",
            missing_data.join(", ")
        ));
    }

    OverfittingRiskReport {
        risk_level,
        risk_score,
        metrics: OverfittingMetrics {
            degradation,
            consistency_std,
            parameter_sensitivity,
        },
        warnings,
        recommendations,
        missing_data,
    }
}
