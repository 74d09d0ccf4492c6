//! Deterministic trade matcher.
//!
//! Consumes the daily signal frame and drives a trade/equity event sequence
//! under cost, slippage, limit-band, volume-participation, sizing, stop, and
//! re-entry constraints. One equity point per bar, strict chronological
//! order, no randomness.

use chrono::NaiveDate;
use tracing::debug;

use strategy_core::{Bar, DailySignal, EngineError};
use technical_analysis::indicators;

use crate::models::{
    BrokerConfig, EquityPoint, ExecutionPrice, SizingMode, Trade, TradeKind,
};

/// A limit band counts as sealed when the bar extreme is within 0.1% of it.
const LIMIT_EPSILON: f64 = 0.001;

/// Tolerance for the zero-trade capital-conservation check.
const EQUITY_TOLERANCE: f64 = 0.01;

pub struct BrokerSimulator {
    config: BrokerConfig,
}

struct PositionState {
    shares: i64,
    /// Raw (unslipped) price of the latest entry; basis for stop checks.
    entry_price: f64,
    round_trips: usize,
    last_exit_date: Option<NaiveDate>,
}

impl BrokerSimulator {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    /// Run the event loop. `signals` must be aligned 1:1 with `bars`.
    pub fn run(
        &self,
        bars: &[Bar],
        signals: &[DailySignal],
        initial_capital: f64,
    ) -> Result<(Vec<Trade>, Vec<EquityPoint>), EngineError> {
        self.config.validate()?;
        if bars.is_empty() {
            return Err(EngineError::invalid_input("no bars to simulate"));
        }
        if bars.len() != signals.len() {
            return Err(EngineError::invalid_input(format!(
                "signal frame length {} does not match bar count {}",
                signals.len(),
                bars.len()
            )));
        }
        if initial_capital <= 0.0 {
            return Err(EngineError::invalid_input("initial capital must be positive"));
        }

        let atr = indicators::atr(bars, self.config.atr_period);
        let n = bars.len();

        let mut cash = initial_capital;
        let mut position = PositionState {
            shares: 0,
            entry_price: 0.0,
            round_trips: 0,
            last_exit_date: None,
        };
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(n);

        for i in 0..n {
            let bar = &bars[i];
            let price = bar.close;
            let mut signal = signals[i].signal.value();
            let mut tags = signals[i].reason_tags.clone();

            // 1. Stop policy on the held position, before signal processing.
            //    ATR mode takes priority when configured and defined.
            if position.shares > 0 {
                let mut forced = false;
                if self.config.stop_loss_atr_mult.is_some()
                    || self.config.take_profit_atr_mult.is_some()
                {
                    if let Some(atr_value) = atr.get(i).copied().flatten() {
                        if atr_value > 0.0 {
                            let diff = price - position.entry_price;
                            if let Some(mult) = self.config.stop_loss_atr_mult {
                                if diff <= -mult * atr_value {
                                    signal = -1;
                                    tags.insert("stop_loss_atr".to_string());
                                    forced = true;
                                }
                            }
                            if let Some(mult) = self.config.take_profit_atr_mult {
                                if !forced && diff >= mult * atr_value {
                                    signal = -1;
                                    tags.insert("take_profit_atr".to_string());
                                    forced = true;
                                }
                            }
                        }
                    }
                }
                if !forced && signal != -1 && position.entry_price > 0.0 {
                    let current_return = (price - position.entry_price) / position.entry_price;
                    if let Some(pct) = self.config.stop_loss_pct {
                        if current_return <= -pct {
                            signal = -1;
                            tags.insert("stop_loss".to_string());
                        }
                    }
                    if let Some(pct) = self.config.take_profit_pct {
                        if signal != -1 && current_return >= pct {
                            signal = -1;
                            tags.insert("take_profit".to_string());
                        }
                    }
                }
            }

            // 2. Resolve the execution bar per policy. The final bar's
            //    signal falls back to its own close.
            let (exec_index, exec_price) = match self.config.execution_price {
                ExecutionPrice::Close => (i, price),
                ExecutionPrice::NextOpen => {
                    if i + 1 < n {
                        (i + 1, bars[i + 1].open)
                    } else {
                        (i, price)
                    }
                }
            };
            let exec_bar = &bars[exec_index];
            let exec_date = exec_bar.date;

            // 3. Feasibility: a sealed limit band against the trade
            //    direction skips the trade and keeps the position unchanged.
            let sealed = if signal != 0 && self.config.enable_limit_up_down {
                let prev_close = exec_bar.prev_close.or_else(|| {
                    if exec_index > 0 {
                        Some(bars[exec_index - 1].close)
                    } else {
                        None
                    }
                });
                match prev_close {
                    Some(prev) if prev > 0.0 => {
                        let limit_up = prev * (1.0 + self.config.limit_up_down_pct);
                        let limit_down = prev * (1.0 - self.config.limit_up_down_pct);
                        let sealed_up = exec_price >= limit_up * (1.0 - LIMIT_EPSILON)
                            && (exec_bar.high - limit_up).abs() / limit_up < LIMIT_EPSILON;
                        let sealed_down = exec_price <= limit_down * (1.0 + LIMIT_EPSILON)
                            && (exec_bar.low - limit_down).abs() / limit_down < LIMIT_EPSILON;
                        (signal == 1 && sealed_up) || (signal == -1 && sealed_down)
                    }
                    _ => false,
                }
            } else {
                false
            };

            if !sealed {
                if signal == 1 {
                    let entering = position.shares == 0;
                    let pyramiding = position.shares > 0 && self.config.allow_pyramid;
                    let blocked = entering && !self.reentry_allowed(&position, bar.date);
                    if (entering && !blocked) || pyramiding {
                        let atr_here = atr
                            .get(exec_index)
                            .copied()
                            .flatten()
                            .or_else(|| atr.get(i).copied().flatten());
                        if let Some(trade) = self.execute_buy(
                            exec_date,
                            exec_price,
                            cash,
                            exec_bar.volume,
                            atr_here,
                            tags.clone(),
                        ) {
                            cash -= trade.gross_value + trade.fee + trade.slippage_cost;
                            position.shares += trade.shares;
                            position.entry_price = exec_price;
                            trades.push(trade);
                        }
                    } else if blocked {
                        debug!(date = %bar.date, "buy suppressed by re-entry policy");
                    }
                } else if signal == -1 && position.shares > 0 {
                    let trade =
                        self.execute_sell(exec_date, exec_price, position.shares, tags.clone());
                    cash += trade.gross_value - trade.fee - trade.tax - trade.slippage_cost;
                    position.shares = 0;
                    position.entry_price = 0.0;
                    position.round_trips += 1;
                    position.last_exit_date = Some(exec_date);
                    trades.push(trade);
                }
            }

            if cash < -EQUITY_TOLERANCE {
                return Err(EngineError::invariant(format!(
                    "negative cash {cash:.2} on {}",
                    bar.date
                )));
            }

            // 4. Mark to market at the bar close.
            let position_value = position.shares as f64 * price;
            let equity = cash + position_value;
            equity_curve.push(EquityPoint {
                date: bar.date,
                equity,
                cash,
                position_shares: position.shares,
                position_value,
                price,
            });
        }

        // 5. Final-bar settlement: force-close any open position at the
        //    last close so the ledger pairs up.
        if position.shares > 0 {
            let last = &bars[n - 1];
            let mut tags = std::collections::BTreeSet::new();
            tags.insert("force_close".to_string());
            let trade = self.execute_sell(last.date, last.close, position.shares, tags);
            cash += trade.gross_value - trade.fee - trade.tax - trade.slippage_cost;
            trades.push(trade);
            position.shares = 0;

            let point = equity_curve
                .last_mut()
                .ok_or_else(|| EngineError::invariant("equity curve empty at settlement"))?;
            point.equity = cash;
            point.cash = cash;
            point.position_shares = 0;
            point.position_value = 0.0;
        }

        // 6. Conservation check: no trades means no equity movement.
        if trades.is_empty() {
            let final_equity = equity_curve
                .last()
                .map(|p| p.equity)
                .unwrap_or(initial_capital);
            if (final_equity - initial_capital).abs() > EQUITY_TOLERANCE {
                return Err(EngineError::invariant(format!(
                    "no trades but equity moved from {initial_capital} to {final_equity}"
                )));
            }
        }

        Ok((trades, equity_curve))
    }

    fn reentry_allowed(&self, position: &PositionState, date: NaiveDate) -> bool {
        if !self.config.allow_reentry && position.round_trips > 0 {
            return false;
        }
        if self.config.reentry_cooldown_days > 0 {
            if let Some(last_exit) = position.last_exit_date {
                if (date - last_exit).num_days() < self.config.reentry_cooldown_days {
                    return false;
                }
            }
        }
        true
    }

    /// Size and execute a buy. Returns `None` when constraints leave no
    /// executable quantity.
    fn execute_buy(
        &self,
        date: NaiveDate,
        price: f64,
        cash: f64,
        bar_volume: i64,
        atr_value: Option<f64>,
        reason_tags: std::collections::BTreeSet<String>,
    ) -> Option<Trade> {
        if cash <= 0.0 || price <= 0.0 {
            return None;
        }

        let slippage_pct = self.config.slippage_bps / 10_000.0;
        let fill_price = price * (1.0 + slippage_pct);
        let lot = self.config.lot_size;

        let mut shares = match self.config.sizing_mode {
            SizingMode::AllIn => floor_to_lot(cash / fill_price, lot),
            SizingMode::FixedAmount => {
                let amount = self.config.fixed_amount.unwrap_or(0.0);
                floor_to_lot(amount / fill_price, lot)
            }
            SizingMode::RiskBased => {
                let risk_pct = self.config.risk_pct.unwrap_or(0.0);
                let stop_distance = self
                    .config
                    .stop_loss_atr_mult
                    .zip(atr_value)
                    .map(|(mult, atr)| mult * atr)
                    .or_else(|| self.config.stop_loss_pct.map(|pct| fill_price * pct))
                    .unwrap_or(fill_price * risk_pct);
                if stop_distance <= 0.0 {
                    return None;
                }
                floor_to_lot(cash * risk_pct / stop_distance, lot)
            }
        };

        if self.config.enable_volume_constraint && bar_volume > 0 {
            let max_shares = floor_to_lot(
                bar_volume as f64 * self.config.max_participation_rate,
                lot,
            );
            shares = shares.min(max_shares);
        }

        // Step down a lot at a time until fees and slippage fit in cash.
        let cost_of = |shares: i64| {
            let gross_value = shares as f64 * fill_price;
            let fee = (gross_value * self.config.fee_bps / 10_000.0).max(self.config.fee_floor);
            let slippage_cost = shares as f64 * price * slippage_pct;
            (gross_value, fee, slippage_cost)
        };
        while shares > 0 {
            let (gross_value, fee, slippage_cost) = cost_of(shares);
            if gross_value + fee + slippage_cost <= cash {
                break;
            }
            shares -= lot;
        }
        if shares <= 0 {
            return None;
        }

        let (gross_value, fee, slippage_cost) = cost_of(shares);
        Some(Trade {
            date,
            kind: TradeKind::Buy,
            price: fill_price,
            shares,
            gross_value,
            fee,
            tax: 0.0,
            slippage_cost,
            reason_tags,
            signal: 1,
        })
    }

    fn execute_sell(
        &self,
        date: NaiveDate,
        price: f64,
        shares: i64,
        reason_tags: std::collections::BTreeSet<String>,
    ) -> Trade {
        let slippage_pct = self.config.slippage_bps / 10_000.0;
        let fill_price = price * (1.0 - slippage_pct);
        let gross_value = shares as f64 * fill_price;
        let fee = (gross_value * self.config.fee_bps / 10_000.0).max(self.config.fee_floor);
        let tax = gross_value * self.config.tax_rate;
        let slippage_cost = shares as f64 * price * slippage_pct;

        Trade {
            date,
            kind: TradeKind::Sell,
            price: fill_price,
            shares,
            gross_value,
            fee,
            tax,
            slippage_cost,
            reason_tags,
            signal: -1,
        }
    }
}

fn floor_to_lot(quantity: f64, lot: i64) -> i64 {
    if quantity <= 0.0 || lot <= 0 {
        return 0;
    }
    (quantity as i64 / lot) * lot
}
