//! Performance analysis: return/risk metrics, the round-trip ledger, and
//! the buy-and-hold baseline.

use chrono::NaiveDate;

use strategy_core::{Bar, EngineError};

use crate::models::{
    BaselineComparison, BaselineMetrics, EquityPoint, PerformanceMetrics, Trade, TradeKind,
    TradeReport,
};

const TRADING_DAYS: f64 = 252.0;
const YEAR_DAYS: f64 = 365.25;

pub struct PerformanceAnalyzer {
    risk_free_rate: f64,
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
        }
    }
}

impl PerformanceAnalyzer {
    pub fn new(risk_free_rate: f64) -> Self {
        Self { risk_free_rate }
    }

    /// Aggregate trades and the equity curve into metrics.
    pub fn summarize(
        &self,
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
    ) -> Result<PerformanceMetrics, EngineError> {
        if equity_curve.is_empty() {
            return Err(EngineError::insufficient_data(1, 0));
        }
        if initial_capital <= 0.0 {
            return Err(EngineError::invalid_input("initial capital must be positive"));
        }

        let final_equity = equity_curve[equity_curve.len() - 1].equity;
        let total_return = final_equity / initial_capital - 1.0;

        let days = (equity_curve[equity_curve.len() - 1].date - equity_curve[0].date).num_days();
        let years = days as f64 / YEAR_DAYS;
        let annual_return = if years > 0.0 && final_equity > 0.0 {
            (final_equity / initial_capital).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let returns = pct_changes(equity_curve.iter().map(|p| p.equity));
        let sharpe_ratio = self.sharpe(&returns);
        let max_drawdown = max_drawdown(equity_curve.iter().map(|p| p.equity));

        let reports = self.round_trips(trades);
        let stats = trade_stats(&reports);

        Ok(PerformanceMetrics {
            total_return,
            annual_return,
            sharpe_ratio,
            max_drawdown,
            win_rate: stats.win_rate,
            total_trades: reports.len(),
            expectancy: stats.expectancy,
            profit_factor: stats.profit_factor,
            avg_win: stats.avg_win,
            avg_loss: stats.avg_loss,
            largest_win: stats.largest_win,
            largest_loss: stats.largest_loss,
        })
    }

    /// Pair ledger entries into FIFO round trips, one report row per entry
    /// lot. An aggregate exit (pyramided position) allocates its costs
    /// pro-rata by shares across the lots it closes.
    pub fn round_trips(&self, trades: &[Trade]) -> Vec<TradeReport> {
        let mut reports = Vec::new();
        let mut open_lots: Vec<&Trade> = Vec::new();

        for trade in trades {
            match trade.kind {
                TradeKind::Buy => open_lots.push(trade),
                TradeKind::Sell => {
                    if open_lots.is_empty() {
                        continue;
                    }
                    let total_shares: i64 = open_lots.iter().map(|t| t.shares).sum();
                    if total_shares <= 0 {
                        open_lots.clear();
                        continue;
                    }
                    for lot in open_lots.drain(..) {
                        let fraction = lot.shares as f64 / total_shares as f64;
                        let exit_gross = trade.gross_value * fraction;
                        let exit_costs =
                            (trade.fee + trade.tax + trade.slippage_cost) * fraction;
                        let entry_costs = lot.fee + lot.slippage_cost;
                        let gross_profit = exit_gross - lot.gross_value;
                        let net_profit = gross_profit - entry_costs - exit_costs;
                        let return_pct = if lot.gross_value > 0.0 {
                            net_profit / lot.gross_value
                        } else {
                            0.0
                        };
                        reports.push(TradeReport {
                            entry_date: lot.date,
                            exit_date: trade.date,
                            entry_price: lot.price,
                            exit_price: trade.price,
                            shares: lot.shares,
                            gross_profit,
                            net_profit,
                            return_pct,
                            holding_days: (trade.date - lot.date).num_days(),
                            reason_tags_entry: lot.reason_tags.clone(),
                            reason_tags_exit: trade.reason_tags.clone(),
                        });
                    }
                }
            }
        }

        reports
    }

    /// Buy-and-hold metrics over the same price window.
    pub fn buy_hold_baseline(
        &self,
        bars: &[Bar],
        start: NaiveDate,
        end: NaiveDate,
    ) -> BaselineMetrics {
        let window: Vec<&Bar> = bars
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .collect();

        let (Some(first), Some(last)) = (window.first(), window.last()) else {
            return BaselineMetrics {
                total_return: 0.0,
                annualized_return: 0.0,
                max_drawdown: 0.0,
                sharpe_ratio: 0.0,
            };
        };

        let total_return = if first.close > 0.0 {
            last.close / first.close - 1.0
        } else {
            0.0
        };

        let years = (last.date - first.date).num_days() as f64 / YEAR_DAYS;
        let annualized_return = if years > 0.0 && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let closes = window.iter().map(|b| b.close);
        let max_drawdown = max_drawdown(closes.clone());
        let returns = pct_changes(closes);
        let sharpe_ratio = self.sharpe(&returns);

        BaselineMetrics {
            total_return,
            annualized_return,
            max_drawdown,
            sharpe_ratio,
        }
    }

    /// Element-wise deltas against the baseline.
    pub fn compare_to_baseline(
        &self,
        strategy: &PerformanceMetrics,
        baseline: BaselineMetrics,
    ) -> BaselineComparison {
        BaselineComparison {
            excess_return: strategy.total_return - baseline.total_return,
            relative_sharpe: strategy.sharpe_ratio - baseline.sharpe_ratio,
            relative_drawdown: strategy.max_drawdown - baseline.max_drawdown,
            outperforms: strategy.total_return > baseline.total_return,
            baseline,
        }
    }

    /// Annualized Sharpe over daily returns; zero on zero variance.
    fn sharpe(&self, returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        // Sample standard deviation, matching daily-return conventions.
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = variance.sqrt();
        if std <= 0.0 {
            return 0.0;
        }
        let excess = mean - self.risk_free_rate / TRADING_DAYS;
        TRADING_DAYS.sqrt() * excess / std
    }
}

/// Largest peak-to-trough fractional decline; always <= 0.
fn max_drawdown(values: impl Iterator<Item = f64>) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for value in values {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (value - peak) / peak;
            if drawdown < worst {
                worst = drawdown;
            }
        }
    }
    worst
}

fn pct_changes(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let values: Vec<f64> = values.collect();
    values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

struct TradeStats {
    win_rate: f64,
    expectancy: f64,
    profit_factor: f64,
    avg_win: f64,
    avg_loss: f64,
    largest_win: f64,
    largest_loss: f64,
}

fn trade_stats(reports: &[TradeReport]) -> TradeStats {
    if reports.is_empty() {
        return TradeStats {
            win_rate: 0.0,
            expectancy: 0.0,
            profit_factor: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
        };
    }

    let profits: Vec<f64> = reports.iter().map(|r| r.net_profit).collect();
    let wins: Vec<f64> = profits.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = profits.iter().copied().filter(|p| *p < 0.0).collect();

    let win_rate = wins.len() as f64 / reports.len() as f64;
    let expectancy = reports.iter().map(|r| r.return_pct).sum::<f64>() / reports.len() as f64;

    let total_profit: f64 = wins.iter().sum();
    let total_loss: f64 = losses.iter().sum::<f64>().abs();
    let profit_factor = if total_loss > 0.0 {
        total_profit / total_loss
    } else if total_profit > 0.0 {
        total_profit
    } else {
        0.0
    };

    let avg_win = if wins.is_empty() {
        0.0
    } else {
        total_profit / wins.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        losses.iter().sum::<f64>() / losses.len() as f64
    };
    let largest_win = wins.iter().copied().fold(0.0, f64::max);
    let largest_loss = losses.iter().copied().fold(0.0, f64::min);

    TradeStats {
        win_rate,
        expectancy,
        profit_factor,
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
    }
}
