//! Grid-search optimizer.
//!
//! Enumerates the Cartesian product of the parameter ranges and dispatches
//! evaluations over a bounded rayon pool. The preloaded bar series is shared
//! read-only across workers; each worker owns its intermediate frames.
//! Failures score zero and never abort the sweep.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{info, warn};

use strategy_core::{Bar, EngineError};

use crate::engine::{BacktestEngine, BacktestRequest};
use crate::models::{
    Objective, OptimizationOutcome, OptimizationResult, ParamRange, ProgressFn,
};
use crate::robustness;

/// Worker-pool hard cap; beyond this the sweep is I/O-free CPU churn with
/// diminishing returns.
const MAX_WORKERS: usize = 8;

/// Cooperative cancellation token. Outstanding workers finish their current
/// evaluation; the rest are skipped.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridSearchConfig {
    pub ranges: BTreeMap<String, ParamRange>,
    pub objective: Objective,
    pub top_n: usize,
    /// Override the default `min(cpu_count, 8)` pool size.
    pub max_workers: Option<usize>,
    /// Optional wall-clock limit per evaluation. There is no mid-evaluation
    /// abort; an overrun is marked failed after the fact.
    pub eval_timeout: Option<Duration>,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        Self {
            ranges: BTreeMap::new(),
            objective: Objective::default(),
            top_n: 20,
            max_workers: None,
            eval_timeout: None,
        }
    }
}

/// Expand ranges into the full list of candidate parameter maps, in a
/// deterministic key/value order.
pub fn generate_param_grid(
    ranges: &BTreeMap<String, ParamRange>,
) -> Result<Vec<BTreeMap<String, f64>>, EngineError> {
    let mut grid: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new()];
    for (name, range) in ranges {
        let values = range.expand()?;
        let mut next = Vec::with_capacity(grid.len() * values.len());
        for combo in &grid {
            for value in &values {
                let mut extended = combo.clone();
                extended.insert(name.clone(), *value);
                next.push(extended);
            }
        }
        grid = next;
    }
    Ok(grid)
}

/// Run the sweep. `base` supplies the fixed parameters and window; each
/// candidate overlays its values on the spec's params.
pub fn grid_search(
    engine: &BacktestEngine,
    bars: &[Bar],
    base: &BacktestRequest,
    config: &GridSearchConfig,
    progress: Option<&ProgressFn>,
    cancel: Option<&CancelToken>,
) -> Result<OptimizationOutcome, EngineError> {
    let grid = generate_param_grid(&config.ranges)?;
    let total = grid.len();
    let workers = config
        .max_workers
        .unwrap_or_else(|| num_cpus::get().min(MAX_WORKERS))
        .max(1);

    info!(candidates = total, workers, "grid search starting");
    if let Some(callback) = progress {
        callback(0, total, &format!("scanning {total} parameter sets"));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| EngineError::Evaluation(format!("worker pool: {e}")))?;

    let completed = AtomicUsize::new(0);

    let evaluations: Vec<Option<OptimizationResult>> = pool.install(|| {
        grid.par_iter()
            .map(|combo| {
                if cancel.map(CancelToken::is_cancelled).unwrap_or(false) {
                    return None;
                }

                let mut request = base.clone();
                request.walkforward = None;
                for (key, value) in combo {
                    request.spec.params.insert(key.clone(), *value);
                }
                let full_params = request.spec.params.clone();

                let started = Instant::now();
                let outcome = engine.run(bars, &request);
                let elapsed = started.elapsed();

                let result = match outcome {
                    Ok(report) => {
                        let timed_out = config
                            .eval_timeout
                            .map(|limit| elapsed > limit)
                            .unwrap_or(false);
                        if timed_out {
                            warn!(params = ?combo, ?elapsed, "evaluation exceeded time limit");
                            OptimizationResult {
                                params: full_params,
                                metrics: None,
                                score: 0.0,
                                rank: 0,
                                error: Some(format!(
                                    "evaluation exceeded time limit ({elapsed:?})"
                                )),
                            }
                        } else {
                            let raw = config.objective.score(&report.metrics);
                            let score = if raw.is_finite() { raw } else { 0.0 };
                            OptimizationResult {
                                params: full_params,
                                metrics: Some(report.metrics),
                                score,
                                rank: 0,
                                error: None,
                            }
                        }
                    }
                    Err(e) => {
                        warn!(params = ?combo, error = %e, "evaluation failed");
                        OptimizationResult {
                            params: full_params,
                            metrics: None,
                            score: 0.0,
                            rank: 0,
                            error: Some(e.to_string()),
                        }
                    }
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = progress {
                    callback(done, total, &format!("completed {done}/{total}"));
                }
                Some(result)
            })
            .collect()
    });

    let evaluated = evaluations.iter().flatten().count();
    let complete = evaluated == total;

    let successful_scores: Vec<f64> = evaluations
        .iter()
        .flatten()
        .filter(|r| r.error.is_none())
        .map(|r| r.score)
        .collect();
    let parameter_sensitivity = robustness::parameter_sensitivity(&successful_scores);

    // Stable sort keeps grid order for ties, so results are identical
    // regardless of worker count.
    let mut results: Vec<OptimizationResult> = evaluations.into_iter().flatten().collect();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
    results.truncate(config.top_n);

    info!(evaluated, complete, "grid search finished");

    Ok(OptimizationOutcome {
        results,
        total_candidates: total,
        evaluated,
        complete,
        parameter_sensitivity,
    })
}
