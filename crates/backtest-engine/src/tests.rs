use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Weekday};

use signal_engine::{StableConservative, StrategyRegistry};
use strategy_core::{Bar, DailySignal, Regime, Signal, StrategySpec};

use crate::broker::BrokerSimulator;
use crate::engine::{BacktestEngine, BacktestRequest};
use crate::metrics::PerformanceAnalyzer;
use crate::models::*;
use crate::optimizer::{grid_search, CancelToken, GridSearchConfig};
use crate::repository::{FsRunRepository, RunFilter, RunRecord, RunRepository};
use crate::walk_forward::{self, WalkForwardConfig};

// --- Helpers ---

/// Opt into log output for test debugging; safe to call repeatedly.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Trading dates: weekdays only, starting at `start`.
fn sessions(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut current = start;
    while dates.len() < count {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(current);
        }
        current = current + Days::new(1);
    }
    dates
}

fn bar_at(date: NaiveDate, close: f64, volume: i64) -> Bar {
    Bar::new(date, close, close, close, close, volume)
}

/// Constant-price series.
fn flat_bars(count: usize, price: f64) -> Vec<Bar> {
    sessions(day("2023-01-02"), count)
        .into_iter()
        .map(|d| bar_at(d, price, 1_000_000))
        .collect()
}

/// Bars whose closes follow the given values.
fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    sessions(day("2023-01-02"), closes.len())
        .iter()
        .zip(closes)
        .map(|(&d, &c)| bar_at(d, c, 1_000_000))
        .collect()
}

/// Hand-scripted signal frame: hold everywhere except the given indexes.
fn scripted_signals(bars: &[Bar], buys: &[usize], sells: &[usize]) -> Vec<DailySignal> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let mut signal = DailySignal::hold(bar.date);
            signal.total_score = 50.0;
            if buys.contains(&i) {
                signal.signal = Signal::Buy;
                signal.reason_tags = BTreeSet::from(["scripted_buy".to_string()]);
            } else if sells.contains(&i) {
                signal.signal = Signal::Sell;
                signal.reason_tags = BTreeSet::from(["scripted_sell".to_string()]);
            }
            signal
        })
        .collect()
}

fn default_spec() -> StrategySpec {
    StrategySpec::new(StableConservative::ID, "1.0.0")
}

fn request_for(bars: &[Bar], spec: StrategySpec) -> BacktestRequest {
    BacktestRequest::new(spec, bars[0].date, bars[bars.len() - 1].date)
}

/// Check the per-bar accounting identity on every equity point.
fn assert_equity_identity(curve: &[EquityPoint]) {
    for point in curve {
        let expected = point.cash + point.position_shares as f64 * point.price;
        assert!(
            (point.equity - expected).abs() < 0.01,
            "equity identity broken on {}: {} vs {}",
            point.date,
            point.equity,
            expected
        );
        assert!((point.position_value - point.position_shares as f64 * point.price).abs() < 0.01);
    }
}

// =============================================================================
// Scenario A — no-trade baseline: impossible threshold, flat price
// =============================================================================

#[test]
fn test_scenario_a_no_trade_baseline() {
    init_tracing();
    let bars = flat_bars(250, 100.0);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);

    let mut spec = default_spec();
    spec.params.insert("buy_score".to_string(), 101.0);
    let request = request_for(&bars, spec);

    let report = engine.run(&bars, &request).unwrap();

    assert_eq!(report.metrics.total_trades, 0);
    assert!(report.trades.is_empty());
    assert_eq!(report.equity_curve.len(), 250);
    assert!((report.final_equity - 1_000_000.0).abs() < 1.0);
    assert_eq!(report.metrics.total_return, 0.0);
    assert_eq!(report.metrics.sharpe_ratio, 0.0);
    assert_eq!(report.metrics.max_drawdown, 0.0);
    assert_eq!(report.validation.validation_status, ValidationStatus::Fail);
    assert!(report.validation.sample_insufficient_flags.trade_count);
    assert!(report.equity_curve.iter().all(|p| p.equity == 1_000_000.0));
}

// =============================================================================
// Scenario B — single round trip without costs: linear 100→199 ramp
// =============================================================================

#[test]
fn test_scenario_b_single_round_trip_frictionless() {
    let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
    let bars = bars_from_closes(&closes);
    let signals = scripted_signals(&bars, &[10], &[90]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        ..BrokerConfig::frictionless()
    };
    let simulator = BrokerSimulator::new(config);
    let (trades, curve) = simulator.run(&bars, &signals, 1_000_000.0).unwrap();

    assert_eq!(trades.len(), 2);
    let buy = &trades[0];
    assert_eq!(buy.kind, TradeKind::Buy);
    assert_eq!(buy.price, 110.0);
    assert_eq!(buy.shares, 9090); // floor(1_000_000 / 110)
    let sell = &trades[1];
    assert_eq!(sell.kind, TradeKind::Sell);
    assert_eq!(sell.price, 190.0);
    assert_eq!(sell.shares, 9090);

    let final_equity = curve.last().unwrap().equity;
    assert!((final_equity - 1_727_200.0).abs() < 0.01);

    let analyzer = PerformanceAnalyzer::default();
    let metrics = analyzer.summarize(&trades, &curve, 1_000_000.0).unwrap();
    assert!((metrics.total_return - 0.7272).abs() < 0.001);
    assert_eq!(metrics.max_drawdown, 0.0);
    assert_eq!(metrics.win_rate, 1.0);
    assert_eq!(metrics.total_trades, 1);

    assert_equity_identity(&curve);
}

// =============================================================================
// Scenario C — limit-up seals the execution bar and blocks the buy
// =============================================================================

#[test]
fn test_scenario_c_limit_up_blocks_buy() {
    let dates = sessions(day("2023-01-02"), 20);
    let bars: Vec<Bar> = dates
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            if i == 6 {
                // Execution bar opens sealed at the 10% band over prev close.
                let mut bar = Bar::new(d, 110.0, 110.0, 109.0, 110.0, 1_000_000);
                bar.prev_close = Some(100.0);
                bar
            } else {
                let mut bar = bar_at(d, 100.0, 1_000_000);
                bar.prev_close = Some(100.0);
                bar
            }
        })
        .collect();

    let signals = scripted_signals(&bars, &[5], &[]);
    let simulator = BrokerSimulator::new(BrokerConfig::default());
    let (trades, curve) = simulator.run(&bars, &signals, 1_000_000.0).unwrap();

    assert!(trades.is_empty());
    assert!((curve.last().unwrap().equity - 1_000_000.0).abs() < 0.01);
}

// =============================================================================
// Scenario D — walk-forward over 24 months: 6 folds, bounded degradation
// =============================================================================

#[test]
fn test_scenario_d_walk_forward_folds() {
    init_tracing();
    // Two years of weekday bars with a gentle cycle so scores move.
    let start = day("2022-01-03");
    let dates = sessions(start, 505);
    let bars: Vec<Bar> = dates
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            let c = 100.0 + 10.0 * ((i as f64) * 0.05).sin() + i as f64 * 0.01;
            bar_at(d, c, 1_000_000)
        })
        .collect();

    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let mut request = request_for(&bars, default_spec());
    request.start = day("2022-01-01");
    request.end = day("2024-01-01");

    let config = WalkForwardConfig::default();
    let folds = walk_forward::walk_forward(&engine, &bars, &request, &config, None).unwrap();

    assert_eq!(folds.len(), 6);
    for fold in &folds {
        assert!((0.0..=1.0).contains(&fold.degradation));
        assert!(fold.train_period.1 <= fold.test_period.0);
    }

    let summary = walk_forward::summarize(&folds).unwrap();
    assert_eq!(summary.total_folds, 6);
    assert!((0.0..=1.0).contains(&summary.avg_degradation));
    assert!((0.0..=1.0).contains(&summary.positive_test_ratio));

    let consistency = crate::robustness::fold_consistency(&folds);
    assert!(consistency.is_some());
    let std = consistency.unwrap();
    assert!((0.0..=1.0).contains(&std));
}

#[test]
fn test_parallel_walk_forward_matches_sequential() {
    let start = day("2022-01-03");
    let dates = sessions(start, 505);
    let bars: Vec<Bar> = dates
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            let c = 100.0 + 10.0 * ((i as f64) * 0.05).sin() + i as f64 * 0.01;
            bar_at(d, c, 1_000_000)
        })
        .collect();

    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let mut request = request_for(&bars, default_spec());
    request.start = day("2022-01-01");
    request.end = day("2024-01-01");

    let config = WalkForwardConfig::default();
    let sequential =
        walk_forward::walk_forward(&engine, &bars, &request, &config, None).unwrap();
    let parallel =
        walk_forward::walk_forward_parallel(&engine, &bars, &request, &config, None).unwrap();

    assert_eq!(sequential.len(), parallel.len());
    for (a, b) in sequential.iter().zip(&parallel) {
        assert_eq!(a.fold_number, b.fold_number);
        assert_eq!(a.train_period, b.train_period);
        assert_eq!(a.test_period, b.test_period);
        assert_eq!(a.degradation, b.degradation);
        assert_eq!(a.test_metrics, b.test_metrics);
    }
}

// =============================================================================
// Scenario E — grid search: 6 candidates, descending scores, ranks 1..K
// =============================================================================

#[test]
fn test_scenario_e_grid_search_ordering() {
    let closes: Vec<f64> = (0..300)
        .map(|i| 100.0 + 8.0 * ((i as f64) * 0.08).sin() + i as f64 * 0.05)
        .collect();
    let bars = bars_from_closes(&closes);

    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let request = request_for(&bars, default_spec());

    let mut config = GridSearchConfig::default();
    config.ranges.insert(
        "buy_score".to_string(),
        ParamRange::List {
            values: vec![50.0, 60.0, 70.0],
        },
    );
    config.ranges.insert(
        "sell_score".to_string(),
        ParamRange::List {
            values: vec![30.0, 40.0],
        },
    );

    let outcome = grid_search(&engine, &bars, &request, &config, None, None).unwrap();

    assert_eq!(outcome.total_candidates, 6);
    assert_eq!(outcome.evaluated, 6);
    assert!(outcome.complete);
    assert!(outcome.results.len() <= config.top_n);
    assert_eq!(outcome.results.len(), 6);

    for (i, result) in outcome.results.iter().enumerate() {
        assert_eq!(result.rank, i + 1);
        if i > 0 {
            assert!(outcome.results[i - 1].score >= result.score);
        }
    }

    let summary = outcome.summary();
    assert_eq!(summary.len(), outcome.results.len());
    assert_eq!(summary[0].rank, 1);
    assert_eq!(summary[0].score, outcome.results[0].score);
}

// =============================================================================
// Optimizer determinism — identical scores regardless of worker count
// =============================================================================

#[test]
fn test_optimizer_results_independent_of_worker_count() {
    let closes: Vec<f64> = (0..200)
        .map(|i| 100.0 + 5.0 * ((i as f64) * 0.1).sin())
        .collect();
    let bars = bars_from_closes(&closes);

    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let request = request_for(&bars, default_spec());

    let mut config = GridSearchConfig::default();
    config.ranges.insert(
        "buy_score".to_string(),
        ParamRange::Int {
            min: 50,
            max: 70,
            step: 5,
        },
    );

    config.max_workers = Some(1);
    let serial = grid_search(&engine, &bars, &request, &config, None, None).unwrap();
    config.max_workers = Some(4);
    let parallel = grid_search(&engine, &bars, &request, &config, None, None).unwrap();

    assert_eq!(serial.results.len(), parallel.results.len());
    for (a, b) in serial.results.iter().zip(&parallel.results) {
        assert_eq!(a.params, b.params);
        assert_eq!(a.score, b.score);
        assert_eq!(a.rank, b.rank);
    }
    assert_eq!(serial.parameter_sensitivity, parallel.parameter_sensitivity);
}

#[test]
fn test_optimizer_progress_and_cancellation() {
    let bars = flat_bars(120, 100.0);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let request = request_for(&bars, default_spec());

    let mut config = GridSearchConfig::default();
    config.ranges.insert(
        "buy_score".to_string(),
        ParamRange::List {
            values: vec![50.0, 60.0],
        },
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_for_progress = calls.clone();
    let progress = move |_done: usize, total: usize, _msg: &str| {
        assert_eq!(total, 2);
        calls_for_progress.fetch_add(1, Ordering::SeqCst);
    };
    let progress_hook: &ProgressFn = &progress;
    let outcome = grid_search(&engine, &bars, &request, &config, Some(progress_hook), None).unwrap();
    assert!(outcome.complete);
    // One initial call plus one per evaluation.
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // A pre-cancelled token skips every evaluation.
    let token = CancelToken::new();
    token.cancel();
    let outcome = grid_search(&engine, &bars, &request, &config, None, Some(&token)).unwrap();
    assert!(!outcome.complete);
    assert_eq!(outcome.evaluated, 0);
    assert!(outcome.results.is_empty());
}

#[test]
fn test_optimizer_records_failures_with_zero_score() {
    let bars = flat_bars(120, 100.0);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let request = request_for(&bars, default_spec());

    let mut config = GridSearchConfig::default();
    // cooldown_days is harmless; the invalid capital comes from the request.
    config.ranges.insert(
        "cooldown_days".to_string(),
        ParamRange::List { values: vec![0.0] },
    );
    let mut failing = request.clone();
    failing.capital = -1.0;

    let outcome = grid_search(&engine, &bars, &failing, &config, None, None).unwrap();
    assert_eq!(outcome.evaluated, 1);
    assert!(outcome.complete);
    assert_eq!(outcome.results[0].score, 0.0);
    assert!(outcome.results[0].error.is_some());
    assert!(outcome.results[0].metrics.is_none());
}

// =============================================================================
// Broker constraints
// =============================================================================

#[test]
fn test_volume_participation_caps_fill() {
    let mut bars = flat_bars(10, 100.0);
    for bar in &mut bars {
        bar.volume = 10_000;
    }
    let signals = scripted_signals(&bars, &[2], &[]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        enable_volume_constraint: true,
        max_participation_rate: 0.05,
        lot_size: 100,
        ..BrokerConfig::frictionless()
    };
    let (trades, _) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    // 10_000 * 5% = 500 shares, already lot-aligned. Force-closed at end.
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].shares, 500);
    assert!(trades[1].reason_tags.contains("force_close"));
}

#[test]
fn test_fixed_amount_sizing_and_fee_floor() {
    let bars = flat_bars(10, 100.0);
    let signals = scripted_signals(&bars, &[2], &[6]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        sizing_mode: SizingMode::FixedAmount,
        fixed_amount: Some(10_000.0),
        slippage_bps: 0.0,
        lot_size: 100,
        enable_volume_constraint: false,
        enable_limit_up_down: false,
        ..BrokerConfig::default()
    };
    let (trades, curve) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    assert_eq!(trades[0].shares, 100);
    // 10_000 * 14.25bps = 14.25, below the 20-unit floor.
    assert_eq!(trades[0].fee, 20.0);
    assert_eq!(trades[1].tax, trades[1].gross_value * 0.003);
    assert_equity_identity(&curve);
}

#[test]
fn test_risk_based_sizing() {
    let bars = flat_bars(10, 100.0);
    let signals = scripted_signals(&bars, &[2], &[]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        sizing_mode: SizingMode::RiskBased,
        risk_pct: Some(0.02),
        stop_loss_pct: Some(0.05),
        lot_size: 1,
        ..BrokerConfig::frictionless()
    };
    let (trades, _) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    // Stop distance 100 * 5% = 5; risk budget 20_000 → 4000 shares.
    assert_eq!(trades[0].shares, 4000);
}

#[test]
fn test_stop_loss_percent_forces_exit() {
    let mut closes = vec![100.0; 30];
    for (i, close) in closes.iter_mut().enumerate().skip(10) {
        *close = 100.0 - (i as f64 - 9.0) * 2.0; // fast slide after entry
    }
    let bars = bars_from_closes(&closes);
    let signals = scripted_signals(&bars, &[5], &[]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        stop_loss_pct: Some(0.05),
        ..BrokerConfig::frictionless()
    };
    let (trades, _) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    assert_eq!(trades.len(), 2);
    assert_eq!(trades[1].kind, TradeKind::Sell);
    assert!(trades[1].reason_tags.contains("stop_loss"));
    // The stop fired well before the end of the series.
    assert!(trades[1].date < bars[20].date);
}

#[test]
fn test_atr_stop_takes_priority_over_percent() {
    let mut closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 3) as f64).collect();
    for (i, close) in closes.iter_mut().enumerate().skip(25) {
        *close = 95.0 - (i as f64 - 25.0) * 3.0;
    }
    let bars = bars_from_closes(&closes);
    let signals = scripted_signals(&bars, &[20], &[]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        stop_loss_pct: Some(0.5), // percent stop far away; ATR fires first
        stop_loss_atr_mult: Some(1.0),
        atr_period: 14,
        ..BrokerConfig::frictionless()
    };
    let (trades, _) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    assert_eq!(trades.len(), 2);
    assert!(trades[1].reason_tags.contains("stop_loss_atr"));
}

#[test]
fn test_reentry_disabled_ignores_later_buys() {
    let bars = flat_bars(30, 100.0);
    let signals = scripted_signals(&bars, &[2, 10, 20], &[5]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        allow_reentry: false,
        ..BrokerConfig::frictionless()
    };
    let (trades, _) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    // One round trip only; signals at 10 and 20 are ignored.
    assert_eq!(trades.len(), 2);
}

#[test]
fn test_reentry_cooldown_blocks_then_allows() {
    let bars = flat_bars(40, 100.0);
    // Exit at 5; re-buy attempts at 8 (inside cooldown) and 30 (outside).
    let signals = scripted_signals(&bars, &[2, 8, 30], &[5, 35]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        allow_reentry: true,
        reentry_cooldown_days: 10,
        ..BrokerConfig::frictionless()
    };
    let (trades, _) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    assert_eq!(trades.len(), 4);
    assert_eq!(trades[2].kind, TradeKind::Buy);
    assert_eq!(trades[2].date, bars[30].date);
}

#[test]
fn test_pyramiding_accumulates_and_exits_aggregate() {
    let bars = flat_bars(30, 100.0);
    let signals = scripted_signals(&bars, &[2, 6], &[15]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        allow_pyramid: true,
        sizing_mode: SizingMode::FixedAmount,
        fixed_amount: Some(100_000.0),
        lot_size: 100,
        ..BrokerConfig::frictionless()
    };
    let (trades, curve) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    assert_eq!(trades.len(), 3);
    assert_eq!(trades[0].shares, 1000);
    assert_eq!(trades[1].shares, 1000);
    assert_eq!(trades[2].shares, 2000); // aggregate exit

    let analyzer = PerformanceAnalyzer::default();
    let reports = analyzer.round_trips(&trades);
    assert_eq!(reports.len(), 2);
    assert_equity_identity(&curve);
}

#[test]
fn test_force_close_pairs_ledger() {
    let bars = flat_bars(15, 100.0);
    let signals = scripted_signals(&bars, &[3], &[]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::Close,
        ..BrokerConfig::frictionless()
    };
    let (trades, curve) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    assert_eq!(trades.len() % 2, 0);
    assert!(trades.last().unwrap().reason_tags.contains("force_close"));
    let last = curve.last().unwrap();
    assert_eq!(last.position_shares, 0);
    assert_eq!(last.equity, last.cash);
}

#[test]
fn test_every_bar_limit_up_no_buys() {
    let dates = sessions(day("2023-01-02"), 15);
    let mut price = 100.0;
    let bars: Vec<Bar> = dates
        .iter()
        .map(|&d| {
            let prev = price;
            price *= 1.10;
            let mut bar = Bar::new(d, price, price, price, price, 1_000_000);
            bar.prev_close = Some(prev);
            bar
        })
        .collect();
    let buys: Vec<usize> = (0..15).collect();
    let signals = scripted_signals(&bars, &buys, &[]);

    let (trades, curve) = BrokerSimulator::new(BrokerConfig::default())
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    assert!(trades.is_empty());
    assert!((curve.last().unwrap().equity - 1_000_000.0).abs() < 0.01);
}

#[test]
fn test_next_open_executes_at_next_bar() {
    let dates = sessions(day("2023-01-02"), 10);
    let bars: Vec<Bar> = dates
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            let close = 100.0 + i as f64;
            Bar::new(d, close - 0.5, close + 1.0, close - 1.0, close, 1_000_000)
        })
        .collect();
    let signals = scripted_signals(&bars, &[3], &[]);

    let config = BrokerConfig {
        execution_price: ExecutionPrice::NextOpen,
        ..BrokerConfig::frictionless()
    };
    let (trades, _) = BrokerSimulator::new(config)
        .run(&bars, &signals, 1_000_000.0)
        .unwrap();

    // Signal on bar 3 fills at bar 4's open.
    assert_eq!(trades[0].date, bars[4].date);
    assert_eq!(trades[0].price, bars[4].open);
}

// =============================================================================
// Engine-level behaviors
// =============================================================================

#[test]
fn test_zero_bar_input_is_invalid() {
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let request = BacktestRequest::new(default_spec(), day("2023-01-01"), day("2023-12-31"));
    let err = engine.run(&[], &request).unwrap_err();
    assert!(matches!(err, strategy_core::EngineError::InvalidInput(_)));
}

#[test]
fn test_single_bar_input_zero_metrics_fail_status() {
    let bars = flat_bars(1, 100.0);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let request = request_for(&bars, default_spec());

    let report = engine.run(&bars, &request).unwrap();
    assert_eq!(report.metrics.total_trades, 0);
    assert_eq!(report.metrics.total_return, 0.0);
    assert_eq!(report.metrics.annual_return, 0.0);
    assert_eq!(report.equity_curve.len(), 1);
    assert_eq!(report.validation.validation_status, ValidationStatus::Fail);
}

#[test]
fn test_date_adjustment_is_reported_not_fatal() {
    let bars = flat_bars(120, 100.0);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);

    let mut request = request_for(&bars, default_spec());
    request.start = day("2020-01-01");
    request.end = day("2030-01-01");

    let report = engine.run(&bars, &request).unwrap();
    assert!(report.date_adjusted.is_some());
    assert_eq!(report.start_date, bars[0].date);
    assert_eq!(report.end_date, bars[bars.len() - 1].date);
    assert_eq!(report.requested_start, day("2020-01-01"));
}

#[test]
fn test_disjoint_range_is_insufficient_data() {
    let bars = flat_bars(120, 100.0);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);

    let mut request = request_for(&bars, default_spec());
    request.start = day("2010-01-01");
    request.end = day("2010-12-31");

    let err = engine.run(&bars, &request).unwrap_err();
    assert!(matches!(
        err,
        strategy_core::EngineError::InsufficientData { .. }
    ));
}

#[test]
fn test_engine_derives_regime_when_request_omits_it() {
    let closes: Vec<f64> = (0..200).map(|i| 100.0 + i as f64 * 0.5).collect();
    let bars = bars_from_closes(&closes);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);

    // A steady ramp classifies as a trend.
    let report = engine.run(&bars, &request_for(&bars, default_spec())).unwrap();
    assert_eq!(report.regime, Some(Regime::Trend));

    // An explicit regime wins over detection.
    let mut request = request_for(&bars, default_spec());
    request.regime = Some(Regime::Reversion);
    let report = engine.run(&bars, &request).unwrap();
    assert_eq!(report.regime, Some(Regime::Reversion));

    // A window too short to classify stays unresolved.
    let short = flat_bars(10, 100.0);
    let report = engine
        .run(&short, &request_for(&short, default_spec()))
        .unwrap();
    assert_eq!(report.regime, None);
}

#[test]
fn test_walkforward_folds_enable_overfitting_risk() {
    let bars = flat_bars(250, 100.0);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);

    let mut request = request_for(&bars, default_spec());
    let fold = |n: usize, train_sharpe: f64, test_sharpe: f64| WalkForwardFold {
        fold_number: n,
        train_period: (day("2023-01-02"), day("2023-07-01")),
        test_period: (day("2023-07-02"), day("2023-10-01")),
        train_metrics: PerformanceMetrics {
            sharpe_ratio: train_sharpe,
            ..PerformanceMetrics::zeroed()
        },
        test_metrics: PerformanceMetrics {
            sharpe_ratio: test_sharpe,
            ..PerformanceMetrics::zeroed()
        },
        degradation: 0.0,
        params: Default::default(),
        warmup_days: 0,
    };
    request.walkforward = Some(vec![
        fold(1, 2.0, 0.5),
        fold(2, 2.0, 0.4),
        fold(3, 2.0, 0.6),
    ]);
    request.walkforward_executed = true;

    let report = engine.run(&bars, &request).unwrap();
    let risk = report.overfitting_risk.expect("risk report expected");
    assert!(risk.metrics.degradation.is_some());
    assert!(risk.metrics.consistency_std.is_some());
    assert!((0.0..=10.0).contains(&risk.risk_score));
    // Severe degradation (75%) scores at least the +2 band.
    assert!(risk.risk_score >= 2.0);
}

#[test]
fn test_high_overfitting_risk_blocks_promotion_in_report() {
    let bars = flat_bars(250, 100.0);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);

    let mut request = request_for(&bars, default_spec());
    let fold = |n: usize, test: f64| WalkForwardFold {
        fold_number: n,
        train_period: (day("2023-01-02"), day("2023-07-01")),
        test_period: (day("2023-07-02"), day("2023-10-01")),
        train_metrics: PerformanceMetrics {
            sharpe_ratio: 2.0,
            ..PerformanceMetrics::zeroed()
        },
        test_metrics: PerformanceMetrics {
            sharpe_ratio: test,
            ..PerformanceMetrics::zeroed()
        },
        degradation: 0.0,
        params: Default::default(),
        warmup_days: 0,
    };
    // Collapsing and wildly inconsistent test folds → high risk.
    request.walkforward = Some(vec![fold(1, -1.5), fold(2, 1.2), fold(3, -0.8)]);
    request.walkforward_executed = true;
    request.parameter_sensitivity = Some(0.5);

    let report = engine.run(&bars, &request).unwrap();
    let risk = report.overfitting_risk.as_ref().unwrap();
    assert_eq!(risk.risk_level, RiskLevel::High);
    assert!(!report.validation.can_promote);
}

// =============================================================================
// Determinism and round trips
// =============================================================================

#[test]
fn test_identical_runs_are_byte_identical() {
    let closes: Vec<f64> = (0..200)
        .map(|i| 100.0 + 6.0 * ((i as f64) * 0.07).sin())
        .collect();
    let bars = bars_from_closes(&closes);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let request = request_for(&bars, default_spec());

    let a = engine.run(&bars, &request).unwrap();
    let b = engine.run(&bars, &request).unwrap();

    let json_a = serde_json::to_string(&a).unwrap();
    let json_b = serde_json::to_string(&b).unwrap();
    assert_eq!(json_a, json_b);
}

#[test]
fn test_spec_round_trip_reproduces_report() {
    let closes: Vec<f64> = (0..150)
        .map(|i| 100.0 + 4.0 * ((i as f64) * 0.11).sin())
        .collect();
    let bars = bars_from_closes(&closes);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);

    let mut spec = default_spec();
    spec.params.insert("buy_score".to_string(), 52.0);
    spec.params.insert("sell_score".to_string(), 48.0);

    let round_tripped: StrategySpec =
        serde_json::from_str(&serde_json::to_string(&spec).unwrap()).unwrap();
    assert_eq!(spec, round_tripped);

    let a = engine.run(&bars, &request_for(&bars, spec)).unwrap();
    let b = engine.run(&bars, &request_for(&bars, round_tripped)).unwrap();
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn test_report_serde_round_trip() {
    let closes: Vec<f64> = (0..150)
        .map(|i| 100.0 + 4.0 * ((i as f64) * 0.11).sin())
        .collect();
    let bars = bars_from_closes(&closes);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let report = engine.run(&bars, &request_for(&bars, default_spec())).unwrap();

    let json = serde_json::to_string(&report).unwrap();
    let back: BacktestReport = serde_json::from_str(&json).unwrap();
    assert_eq!(report, back);
}

#[test]
fn test_repository_round_trip() {
    let closes: Vec<f64> = (0..150)
        .map(|i| 100.0 + 9.0 * ((i as f64) * 0.06).sin() + i as f64 * 0.02)
        .collect();
    let bars = bars_from_closes(&closes);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let mut spec = default_spec();
    spec.params.insert("buy_score".to_string(), 51.0);
    let report = engine.run(&bars, &request_for(&bars, spec.clone())).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let repository = FsRunRepository::new(dir.path()).unwrap();
    let record = RunRecord {
        run_id: "run-001".to_string(),
        run_name: "baseline sweep".to_string(),
        instrument: "2330".to_string(),
        start_date: report.start_date,
        end_date: report.end_date,
        strategy_id: spec.strategy_id.clone(),
        strategy_version: spec.strategy_version.clone(),
        strategy_params: spec.params.clone(),
        capital: 1_000_000.0,
        notes: String::new(),
        tags: vec!["test".to_string()],
        created_at: Some("2024-06-01T00:00:00".to_string()),
    };

    let run_id = repository.save_run(&record, &report).unwrap();
    assert_eq!(run_id, "run-001");

    let stored = repository.load_run("run-001").unwrap();
    assert_eq!(stored.record, record);
    assert_eq!(stored.report, report);

    // Idempotent overwrite under the same id.
    repository.save_run(&record, &report).unwrap();
    let listed = repository.list_runs(&RunFilter::default()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].run_id, "run-001");

    let filtered = repository
        .list_runs(&RunFilter {
            strategy_id: Some("other".to_string()),
            instrument: None,
        })
        .unwrap();
    assert!(filtered.is_empty());

    repository.delete_run("run-001").unwrap();
    assert!(repository.load_run("run-001").is_err());
}

// =============================================================================
// Train/test split
// =============================================================================

#[test]
fn test_train_test_split_windows() {
    let closes: Vec<f64> = (0..300)
        .map(|i| 100.0 + 5.0 * ((i as f64) * 0.09).sin())
        .collect();
    let bars = bars_from_closes(&closes);
    let registry = StrategyRegistry::with_builtins();
    let engine = BacktestEngine::new(&registry);
    let request = request_for(&bars, default_spec());

    let (train, test) =
        walk_forward::train_test_split(&engine, &bars, &request, 0.7, 10).unwrap();

    assert!(train.start_date >= request.start + Days::new(10));
    assert!(train.end_date < test.start_date);
    assert_eq!(test.end_date, bars[bars.len() - 1].date);

    let err = walk_forward::train_test_split(&engine, &bars, &request, 1.5, 0);
    assert!(err.is_err());
}
