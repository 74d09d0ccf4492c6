//! Indicator kernels.
//!
//! Every function returns a column aligned 1:1 with its input; cells without
//! enough history are `None`, never zero. Computation is left-to-right in
//! double precision.

use strategy_core::Bar;

/// A column aligned with the bar axis.
pub type Column = Vec<Option<f64>>;

/// Simple Moving Average.
pub fn sma(data: &[f64], period: usize) -> Column {
    let mut out = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }
    let mut sum: f64 = data[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential Moving Average, seeded with the SMA over the first `period`
/// elements.
pub fn ema(data: &[f64], period: usize) -> Column {
    let mut out = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut prev = seed;
    for i in period..data.len() {
        prev = (data[i] - prev) * multiplier + prev;
        out[i] = Some(prev);
    }
    out
}

/// Relative Strength Index with Wilder smoothing.
pub fn rsi(data: &[f64], period: usize) -> Column {
    let mut out = vec![None; data.len()];
    if period == 0 || data.len() < period + 1 {
        return out;
    }

    let mut gains = vec![0.0; data.len()];
    let mut losses = vec![0.0; data.len()];
    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains[i] = change;
        } else {
            losses[i] = -change;
        }
    }

    let mut avg_gain: f64 = gains[1..=period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[1..=period].iter().sum::<f64>() / period as f64;
    out[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    for i in period + 1..data.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        out[i] = Some(rsi_from_averages(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// MACD line, signal line, and histogram.
pub struct MacdOutput {
    pub line: Column,
    pub signal: Column,
    pub histogram: Column,
}

pub fn macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    let n = data.len();
    let empty = || vec![None; n];
    if fast == 0 || slow == 0 || signal == 0 || slow <= fast || n < slow {
        return MacdOutput {
            line: empty(),
            signal: empty(),
            histogram: empty(),
        };
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);

    let mut line: Column = vec![None; n];
    for i in 0..n {
        if let (Some(f), Some(s)) = (ema_fast[i], ema_slow[i]) {
            line[i] = Some(f - s);
        }
    }

    // Signal line: EMA of the valid MACD values, re-aligned to the bar axis.
    let first_valid = slow - 1;
    let line_values: Vec<f64> = line[first_valid..].iter().map(|v| v.unwrap_or(0.0)).collect();
    let signal_compact = ema(&line_values, signal);

    let mut signal_col: Column = vec![None; n];
    let mut histogram: Column = vec![None; n];
    for (j, value) in signal_compact.iter().enumerate() {
        if let Some(s) = value {
            let i = first_valid + j;
            signal_col[i] = Some(*s);
            if let Some(l) = line[i] {
                histogram[i] = Some(l - s);
            }
        }
    }

    MacdOutput {
        line,
        signal: signal_col,
        histogram,
    }
}

/// Average True Range, SMA-seeded then Wilder-smoothed.
pub fn atr(bars: &[Bar], period: usize) -> Column {
    let n = bars.len();
    let mut out = vec![None; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let mut tr = vec![0.0; n];
    tr[0] = bars[0].high - bars[0].low;
    for i in 1..n {
        let prev_close = bars[i - 1].close;
        tr[i] = (bars[i].high - bars[i].low)
            .max((bars[i].high - prev_close).abs())
            .max((bars[i].low - prev_close).abs());
    }

    let mut value: f64 = tr[1..=period].iter().sum::<f64>() / period as f64;
    out[period] = Some(value);
    for i in period + 1..n {
        value = (value * (period - 1) as f64 + tr[i]) / period as f64;
        out[i] = Some(value);
    }
    out
}

/// ADX with directional indexes.
pub struct AdxOutput {
    pub adx: Column,
    pub plus_di: Column,
    pub minus_di: Column,
}

pub fn adx(bars: &[Bar], period: usize) -> AdxOutput {
    let n = bars.len();
    let empty = || vec![None; n];
    if period == 0 || n < 2 * period + 1 {
        return AdxOutput {
            adx: empty(),
            plus_di: empty(),
            minus_di: empty(),
        };
    }

    let mut tr = vec![0.0; n];
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
        let prev_close = bars[i - 1].close;
        tr[i] = (bars[i].high - bars[i].low)
            .max((bars[i].high - prev_close).abs())
            .max((bars[i].low - prev_close).abs());
    }

    // Wilder-smoothed sums, seeded over bars 1..=period.
    let mut sm_tr: f64 = tr[1..=period].iter().sum();
    let mut sm_plus: f64 = plus_dm[1..=period].iter().sum();
    let mut sm_minus: f64 = minus_dm[1..=period].iter().sum();

    let mut plus_di = empty();
    let mut minus_di = empty();
    let mut dx = vec![None; n];

    for i in period..n {
        if i > period {
            sm_tr = sm_tr - sm_tr / period as f64 + tr[i];
            sm_plus = sm_plus - sm_plus / period as f64 + plus_dm[i];
            sm_minus = sm_minus - sm_minus / period as f64 + minus_dm[i];
        }
        if sm_tr > 0.0 {
            let p = 100.0 * sm_plus / sm_tr;
            let m = 100.0 * sm_minus / sm_tr;
            plus_di[i] = Some(p);
            minus_di[i] = Some(m);
            let denom = p + m;
            dx[i] = Some(if denom > 0.0 {
                100.0 * (p - m).abs() / denom
            } else {
                0.0
            });
        }
    }

    let mut adx_col = empty();
    let seed_end = 2 * period;
    let seed: f64 = dx[period..seed_end]
        .iter()
        .map(|v| v.unwrap_or(0.0))
        .sum::<f64>()
        / period as f64;
    adx_col[seed_end - 1] = Some(seed);
    let mut prev = seed;
    for i in seed_end..n {
        let d = dx[i].unwrap_or(0.0);
        prev = (prev * (period - 1) as f64 + d) / period as f64;
        adx_col[i] = Some(prev);
    }

    AdxOutput {
        adx: adx_col,
        plus_di,
        minus_di,
    }
}

/// Bollinger Bands (population standard deviation, like the SMA midline).
pub struct BollingerOutput {
    pub upper: Column,
    pub middle: Column,
    pub lower: Column,
}

pub fn bollinger_bands(data: &[f64], period: usize, width: f64) -> BollingerOutput {
    let n = data.len();
    let middle = sma(data, period);
    let mut upper = vec![None; n];
    let mut lower = vec![None; n];
    if period == 0 || n < period {
        return BollingerOutput {
            upper,
            middle,
            lower,
        };
    }

    for i in period - 1..n {
        if let Some(mean) = middle[i] {
            let slice = &data[i + 1 - period..=i];
            let variance =
                slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
            let std = variance.sqrt();
            upper[i] = Some(mean + width * std);
            lower[i] = Some(mean - width * std);
        }
    }

    BollingerOutput {
        upper,
        middle,
        lower,
    }
}

/// Stochastic oscillator (the KD pair).
pub struct StochasticOutput {
    pub k: Column,
    pub d: Column,
}

pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> StochasticOutput {
    let n = bars.len();
    let mut k = vec![None; n];
    if k_period == 0 || n < k_period {
        return StochasticOutput {
            k,
            d: vec![None; n],
        };
    }

    for i in k_period - 1..n {
        let window = &bars[i + 1 - k_period..=i];
        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let range = highest - lowest;
        k[i] = Some(if range > 0.0 {
            100.0 * (bars[i].close - lowest) / range
        } else {
            50.0
        });
    }

    // %D: SMA of the valid %K values, re-aligned.
    let k_values: Vec<f64> = k[k_period - 1..].iter().map(|v| v.unwrap_or(50.0)).collect();
    let d_compact = sma(&k_values, d_period);
    let mut d = vec![None; n];
    for (j, value) in d_compact.iter().enumerate() {
        if value.is_some() {
            d[k_period - 1 + j] = *value;
        }
    }

    StochasticOutput { k, d }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(i: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(u64::from(i))
    }

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(day(i as u32), c, c + 1.0, c - 1.0, c, 1_000_000))
            .collect()
    }

    #[test]
    fn test_sma_warmup_is_none() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&data, 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(2.0));
        assert_eq!(out[4], Some(4.0));
    }

    #[test]
    fn test_sma_short_input_all_none() {
        let out = sma(&[1.0, 2.0], 5);
        assert!(out.iter().all(Option::is_none));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_ema_converges_toward_last_value() {
        let data = vec![10.0; 30];
        let out = ema(&data, 10);
        assert_eq!(out[9], Some(10.0));
        assert!((out[29].unwrap() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let data: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&data, 14);
        assert_eq!(out[13], None);
        assert!((out[14].unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_flat_series_neutral_handling() {
        let data = vec![100.0; 30];
        let out = rsi(&data, 14);
        // No losses and no gains → avg_loss == 0 → pinned at 100 by convention.
        assert_eq!(out[20], Some(100.0));
    }

    #[test]
    fn test_macd_alignment() {
        let data: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64) * 0.5).collect();
        let out = macd(&data, 12, 26, 9);
        assert_eq!(out.line.len(), 60);
        assert_eq!(out.line[24], None);
        assert!(out.line[25].is_some());
        assert_eq!(out.signal[32], None);
        assert!(out.signal[33].is_some());
        assert!(out.histogram[33].is_some());
    }

    #[test]
    fn test_atr_constant_range() {
        // Every bar has high-low == 2 and no gaps, so TR is 2 everywhere.
        let bars = bars_from_closes(&vec![100.0; 40]);
        let out = atr(&bars, 14);
        assert_eq!(out[13], None);
        assert!((out[14].unwrap() - 2.0).abs() < 1e-9);
        assert!((out[39].unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_adx_uptrend_has_plus_di_dominant() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from_closes(&closes);
        let out = adx(&bars, 14);
        let last = bars.len() - 1;
        assert!(out.adx[last].unwrap() > 25.0);
        assert!(out.plus_di[last].unwrap() > out.minus_di[last].unwrap());
    }

    #[test]
    fn test_bollinger_flat_series() {
        let data = vec![50.0; 30];
        let out = bollinger_bands(&data, 20, 2.0);
        assert_eq!(out.middle[19], Some(50.0));
        assert_eq!(out.upper[19], Some(50.0));
        assert_eq!(out.lower[19], Some(50.0));
    }

    #[test]
    fn test_stochastic_range() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 7) as f64).collect();
        let bars = bars_from_closes(&closes);
        let out = stochastic(&bars, 9, 3);
        for v in out.k.iter().flatten() {
            assert!((0.0..=100.0).contains(v));
        }
        assert_eq!(out.k[7], None);
        assert!(out.k[8].is_some());
        assert!(out.d[10].is_some());
    }
}
