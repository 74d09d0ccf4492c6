//! Walk-forward driver.
//!
//! Partitions the date axis into rolling train/test windows and runs the
//! full core on each with the same strategy spec — pure out-of-sample
//! evaluation, no re-optimization between windows. The train/test split is
//! the degenerate single-fold case.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Days, Months, NaiveDate};
use rayon::prelude::*;
use tracing::{debug, warn};

use strategy_core::{Bar, EngineError};

use crate::engine::{BacktestEngine, BacktestRequest};
use crate::models::{ProgressFn, WalkForwardFold, WalkForwardSummary};
use crate::robustness;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkForwardConfig {
    pub train_months: u32,
    pub test_months: u32,
    pub step_months: u32,
    /// Initial slice carved off each window; belongs to neither train nor
    /// test.
    pub warmup_days: i64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_months: 6,
            test_months: 3,
            step_months: 3,
            warmup_days: 0,
        }
    }
}

struct FoldWindow {
    train: (NaiveDate, NaiveDate),
    test: (NaiveDate, NaiveDate),
}

/// Enumerate the fold windows for a date range. Pure function of the
/// inputs, so the driver can report a total before running anything.
fn plan_folds(start: NaiveDate, end: NaiveDate, config: &WalkForwardConfig) -> Vec<FoldWindow> {
    let mut folds = Vec::new();
    if config.train_months == 0 || config.test_months == 0 || config.step_months == 0 {
        return folds;
    }
    let warmup = Days::new(config.warmup_days.max(0) as u64);

    let mut cursor = start;
    while cursor < end {
        let actual_train_start = cursor + warmup;
        if actual_train_start >= end {
            break;
        }
        let train_end = actual_train_start + Months::new(config.train_months);
        if train_end > end {
            break;
        }
        let test_start = train_end + Days::new(1);
        let test_end = (train_end + Months::new(config.test_months)).min(end);
        if test_start >= test_end {
            break;
        }
        folds.push(FoldWindow {
            train: (actual_train_start, train_end),
            test: (test_start, test_end),
        });
        cursor = cursor + Months::new(config.step_months);
    }
    folds
}

/// Run rolling walk-forward validation. Folds that fail to evaluate are
/// skipped, not fatal.
pub fn walk_forward(
    engine: &BacktestEngine,
    bars: &[Bar],
    base: &BacktestRequest,
    config: &WalkForwardConfig,
    progress: Option<&ProgressFn>,
) -> Result<Vec<WalkForwardFold>, EngineError> {
    let windows = plan_folds(base.start, base.end, config);
    let total = windows.len();
    let mut folds = Vec::with_capacity(total);

    for (i, window) in windows.into_iter().enumerate() {
        let fold_number = i + 1;
        if let Some(callback) = progress {
            callback(
                i,
                total,
                &format!(
                    "fold {fold_number}: train {}~{}, test {}~{}",
                    window.train.0, window.train.1, window.test.0, window.test.1
                ),
            );
        }

        let mut train_request = base.clone();
        train_request.start = window.train.0;
        train_request.end = window.train.1;
        train_request.walkforward = None;

        let mut test_request = base.clone();
        test_request.start = window.test.0;
        test_request.end = window.test.1;
        test_request.walkforward = None;

        let outcome = engine
            .run(bars, &train_request)
            .and_then(|train| engine.run(bars, &test_request).map(|test| (train, test)));

        match outcome {
            Ok((train, test)) => {
                let degradation =
                    robustness::walkforward_degradation(&train.metrics, &test.metrics);
                debug!(fold = fold_number, degradation, "fold complete");
                folds.push(WalkForwardFold {
                    fold_number,
                    train_period: window.train,
                    test_period: window.test,
                    train_metrics: train.metrics,
                    test_metrics: test.metrics,
                    degradation,
                    params: base.spec.params.clone(),
                    warmup_days: config.warmup_days,
                });
            }
            Err(e) => {
                warn!(fold = fold_number, error = %e, "fold skipped");
            }
        }

        if let Some(callback) = progress {
            callback(fold_number, total, &format!("fold {fold_number} done"));
        }
    }

    Ok(folds)
}

/// Parallel variant of [`walk_forward`]: folds are independent, so they can
/// be dispatched over a bounded pool exactly like optimizer candidates.
/// Results come back in fold order regardless of completion order.
pub fn walk_forward_parallel(
    engine: &BacktestEngine,
    bars: &[Bar],
    base: &BacktestRequest,
    config: &WalkForwardConfig,
    progress: Option<&ProgressFn>,
) -> Result<Vec<WalkForwardFold>, EngineError> {
    let windows = plan_folds(base.start, base.end, config);
    let total = windows.len();
    let workers = num_cpus::get().min(8).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| EngineError::Evaluation(format!("worker pool: {e}")))?;

    let completed = AtomicUsize::new(0);
    let folds: Vec<Option<WalkForwardFold>> = pool.install(|| {
        windows
            .par_iter()
            .enumerate()
            .map(|(i, window)| {
                let fold_number = i + 1;

                let mut train_request = base.clone();
                train_request.start = window.train.0;
                train_request.end = window.train.1;
                train_request.walkforward = None;

                let mut test_request = base.clone();
                test_request.start = window.test.0;
                test_request.end = window.test.1;
                test_request.walkforward = None;

                let outcome = engine.run(bars, &train_request).and_then(|train| {
                    engine.run(bars, &test_request).map(|test| (train, test))
                });

                let fold = match outcome {
                    Ok((train, test)) => {
                        let degradation =
                            robustness::walkforward_degradation(&train.metrics, &test.metrics);
                        Some(WalkForwardFold {
                            fold_number,
                            train_period: window.train,
                            test_period: window.test,
                            train_metrics: train.metrics,
                            test_metrics: test.metrics,
                            degradation,
                            params: base.spec.params.clone(),
                            warmup_days: config.warmup_days,
                        })
                    }
                    Err(e) => {
                        warn!(fold = fold_number, error = %e, "fold skipped");
                        None
                    }
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = progress {
                    callback(done, total, &format!("fold {fold_number} done"));
                }
                fold
            })
            .collect()
    });

    Ok(folds.into_iter().flatten().collect())
}

/// Degenerate walk-forward: one train/test cut at `train_ratio`, after the
/// warmup slice.
pub fn train_test_split(
    engine: &BacktestEngine,
    bars: &[Bar],
    base: &BacktestRequest,
    train_ratio: f64,
    warmup_days: i64,
) -> Result<(crate::models::BacktestReport, crate::models::BacktestReport), EngineError> {
    if !(0.0..1.0).contains(&train_ratio) || train_ratio == 0.0 {
        return Err(EngineError::invalid_input(
            "train_ratio must be in (0, 1)",
        ));
    }
    let actual_train_start = base.start + Days::new(warmup_days.max(0) as u64);
    if actual_train_start >= base.end {
        return Err(EngineError::invalid_input(format!(
            "warmup_days ({warmup_days}) leaves no data in {}~{}",
            base.start, base.end
        )));
    }

    let total_days = (base.end - actual_train_start).num_days();
    let train_days = (total_days as f64 * train_ratio) as i64;
    let train_end = actual_train_start + Days::new(train_days.max(1) as u64);
    let test_start = train_end + Days::new(1);
    if test_start >= base.end {
        return Err(EngineError::invalid_input(
            "train_ratio leaves no test window",
        ));
    }

    let mut train_request = base.clone();
    train_request.start = actual_train_start;
    train_request.end = train_end;
    let mut test_request = base.clone();
    test_request.start = test_start;
    test_request.end = base.end;

    let train = engine.run(bars, &train_request)?;
    let test = engine.run(bars, &test_request)?;
    Ok((train, test))
}

/// Aggregate fold metrics; `None` when there are no folds.
pub fn summarize(folds: &[WalkForwardFold]) -> Option<WalkForwardSummary> {
    if folds.is_empty() {
        return None;
    }
    let n = folds.len() as f64;
    let avg_train_sharpe = folds
        .iter()
        .map(|f| f.train_metrics.sharpe_ratio)
        .sum::<f64>()
        / n;
    let avg_test_sharpe = folds
        .iter()
        .map(|f| f.test_metrics.sharpe_ratio)
        .sum::<f64>()
        / n;
    let avg_degradation = folds.iter().map(|f| f.degradation).sum::<f64>() / n;
    let positive = folds
        .iter()
        .filter(|f| f.test_metrics.sharpe_ratio > 0.0)
        .count();

    Some(WalkForwardSummary {
        total_folds: folds.len(),
        avg_train_sharpe,
        avg_test_sharpe,
        avg_degradation,
        positive_test_ratio: positive as f64 / n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_plan_folds_24_months() {
        let config = WalkForwardConfig::default();
        let folds = plan_folds(day("2022-01-01"), day("2024-01-01"), &config);
        assert_eq!(folds.len(), 6);
        assert_eq!(folds[0].train, (day("2022-01-01"), day("2022-07-01")));
        assert_eq!(folds[0].test, (day("2022-07-02"), day("2022-10-01")));
        // Last fold's test window is clipped to the range end.
        assert_eq!(folds[5].test.1, day("2024-01-01"));
    }

    #[test]
    fn test_plan_folds_warmup_shifts_train() {
        let config = WalkForwardConfig {
            warmup_days: 30,
            ..WalkForwardConfig::default()
        };
        let folds = plan_folds(day("2022-01-01"), day("2023-01-01"), &config);
        assert!(!folds.is_empty());
        assert_eq!(folds[0].train.0, day("2022-01-31"));
    }

    #[test]
    fn test_plan_folds_short_range_empty() {
        let config = WalkForwardConfig::default();
        let folds = plan_folds(day("2022-01-01"), day("2022-04-01"), &config);
        assert!(folds.is_empty());
    }
}
