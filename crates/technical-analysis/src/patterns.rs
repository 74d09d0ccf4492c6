//! Chart pattern detection.
//!
//! Each detector emits one boolean flag column aligned with the bar axis.
//! The pattern library is an extension point; the contract downstream is
//! only "one flag column per enabled pattern".

use strategy_core::{Bar, ChartPattern};

/// Detect a single pattern over the whole series.
pub fn detect(pattern: ChartPattern, bars: &[Bar]) -> Vec<bool> {
    match pattern {
        ChartPattern::Doji => single_bar(bars, is_doji),
        ChartPattern::Hammer => single_bar(bars, is_hammer),
        ChartPattern::InvertedHammer => single_bar(bars, is_inverted_hammer),
        ChartPattern::ShootingStar => single_bar(bars, is_shooting_star),
        ChartPattern::BullishEngulfing => two_bar(bars, is_bullish_engulfing),
        ChartPattern::BearishEngulfing => two_bar(bars, is_bearish_engulfing),
        ChartPattern::MorningStar => three_bar(bars, is_morning_star),
        ChartPattern::EveningStar => three_bar(bars, is_evening_star),
        ChartPattern::DoubleBottom => double_bottom(bars, 20),
        ChartPattern::DoubleTop => double_top(bars, 20),
        ChartPattern::HeadAndShoulders => head_and_shoulders(bars, 30),
        ChartPattern::FallingWedge => falling_wedge(bars, 20),
    }
}

fn single_bar(bars: &[Bar], f: fn(&Bar) -> bool) -> Vec<bool> {
    bars.iter().map(f).collect()
}

fn two_bar(bars: &[Bar], f: fn(&Bar, &Bar) -> bool) -> Vec<bool> {
    let mut out = vec![false; bars.len()];
    for i in 1..bars.len() {
        out[i] = f(&bars[i - 1], &bars[i]);
    }
    out
}

fn three_bar(bars: &[Bar], f: fn(&Bar, &Bar, &Bar) -> bool) -> Vec<bool> {
    let mut out = vec![false; bars.len()];
    for i in 2..bars.len() {
        out[i] = f(&bars[i - 2], &bars[i - 1], &bars[i]);
    }
    out
}

fn body(bar: &Bar) -> f64 {
    (bar.close - bar.open).abs()
}

fn range(bar: &Bar) -> f64 {
    bar.high - bar.low
}

fn lower_shadow(bar: &Bar) -> f64 {
    bar.open.min(bar.close) - bar.low
}

fn upper_shadow(bar: &Bar) -> f64 {
    bar.high - bar.open.max(bar.close)
}

fn is_doji(bar: &Bar) -> bool {
    let r = range(bar);
    r > 0.0 && body(bar) / r < 0.1
}

/// Small body, long lower shadow, little upper shadow.
fn is_hammer(bar: &Bar) -> bool {
    let r = range(bar);
    let b = body(bar);
    r > 0.0 && b > 0.0 && b / r < 0.3 && lower_shadow(bar) > 2.0 * b && upper_shadow(bar) < 0.5 * b
}

fn is_inverted_hammer(bar: &Bar) -> bool {
    let r = range(bar);
    let b = body(bar);
    r > 0.0 && b > 0.0 && b / r < 0.3 && upper_shadow(bar) > 2.0 * b && lower_shadow(bar) < 0.5 * b
}

/// Same geometry as the inverted hammer, read bearish after an up-close.
fn is_shooting_star(bar: &Bar) -> bool {
    is_inverted_hammer(bar) && bar.close < bar.open
}

fn is_bullish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.close < prev.open
        && curr.close > curr.open
        && curr.open <= prev.close
        && curr.close >= prev.open
        && body(curr) > body(prev)
}

fn is_bearish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.close > prev.open
        && curr.close < curr.open
        && curr.open >= prev.close
        && curr.close <= prev.open
        && body(curr) > body(prev)
}

fn is_morning_star(first: &Bar, second: &Bar, third: &Bar) -> bool {
    let first_bearish = first.close < first.open;
    let third_bullish = third.close > third.open;
    let small_middle = range(second) > 0.0 && body(second) / range(second) < 0.3;
    let recovers = third.close > (first.open + first.close) / 2.0;
    first_bearish && small_middle && third_bullish && recovers
}

fn is_evening_star(first: &Bar, second: &Bar, third: &Bar) -> bool {
    let first_bullish = first.close > first.open;
    let third_bearish = third.close < third.open;
    let small_middle = range(second) > 0.0 && body(second) / range(second) < 0.3;
    let gives_back = third.close < (first.open + first.close) / 2.0;
    first_bullish && small_middle && third_bearish && gives_back
}

/// Windowed double-bottom scan: two local lows within 2% of each other
/// separated by a bounce, with the current close above the interim high.
fn double_bottom(bars: &[Bar], window: usize) -> Vec<bool> {
    let mut out = vec![false; bars.len()];
    if bars.len() < window {
        return out;
    }

    for i in window - 1..bars.len() {
        let slice = &bars[i + 1 - window..=i];
        let lows: Vec<f64> = slice.iter().map(|b| b.low).collect();

        // First trough in the front half, second in the back half.
        let half = window / 2;
        let (front, back) = lows.split_at(half);
        let first_low = front.iter().copied().fold(f64::MAX, f64::min);
        let second_low = back.iter().copied().fold(f64::MAX, f64::min);
        if first_low == f64::MAX || second_low == f64::MAX || first_low <= 0.0 {
            continue;
        }

        let similar = (first_low - second_low).abs() / first_low < 0.02;
        let interim_high = slice[half.saturating_sub(2)..half + 2]
            .iter()
            .map(|b| b.high)
            .fold(f64::MIN, f64::max);
        let breakout = bars[i].close > interim_high;

        out[i] = similar && breakout;
    }
    out
}

/// Mirror image of the double bottom: two similar peaks around a dip, with
/// the current close breaking below the interim low.
fn double_top(bars: &[Bar], window: usize) -> Vec<bool> {
    let mut out = vec![false; bars.len()];
    if bars.len() < window {
        return out;
    }

    for i in window - 1..bars.len() {
        let slice = &bars[i + 1 - window..=i];
        let highs: Vec<f64> = slice.iter().map(|b| b.high).collect();

        let half = window / 2;
        let (front, back) = highs.split_at(half);
        let first_high = front.iter().copied().fold(f64::MIN, f64::max);
        let second_high = back.iter().copied().fold(f64::MIN, f64::max);
        if first_high == f64::MIN || second_high == f64::MIN || first_high <= 0.0 {
            continue;
        }

        let similar = (first_high - second_high).abs() / first_high < 0.02;
        let interim_low = slice[half.saturating_sub(2)..half + 2]
            .iter()
            .map(|b| b.low)
            .fold(f64::MAX, f64::min);
        let breakdown = bars[i].close < interim_low;

        out[i] = similar && breakdown;
    }
    out
}

/// Three-peak scan: a higher middle peak flanked by two similar shoulders,
/// with the close breaking the neckline formed by the interleaved troughs.
fn head_and_shoulders(bars: &[Bar], window: usize) -> Vec<bool> {
    let mut out = vec![false; bars.len()];
    if bars.len() < window || window < 6 {
        return out;
    }

    for i in window - 1..bars.len() {
        let slice = &bars[i + 1 - window..=i];
        let third = window / 3;

        let peak = |part: &[Bar]| part.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let trough = |part: &[Bar]| part.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        let left = peak(&slice[..third]);
        let head = peak(&slice[third..2 * third]);
        let right = peak(&slice[2 * third..]);
        if left <= 0.0 || left == f64::MIN || head == f64::MIN || right == f64::MIN {
            continue;
        }

        let head_dominates = head > left * 1.02 && head > right * 1.02;
        let shoulders_level = (left - right).abs() / left < 0.03;
        // Neckline from the structure bars only; the breakout bar itself
        // does not define it.
        let neckline =
            trough(&slice[third..2 * third]).min(trough(&slice[2 * third..window - 1]));
        let breakdown = bars[i].close < neckline * 1.001;

        out[i] = head_dominates && shoulders_level && breakdown;
    }
    out
}

/// Falling wedge: both highs and lows step down, with the band contracting;
/// flagged while the compression holds.
fn falling_wedge(bars: &[Bar], window: usize) -> Vec<bool> {
    let mut out = vec![false; bars.len()];
    if bars.len() < window || window < 4 {
        return out;
    }

    for i in window - 1..bars.len() {
        let slice = &bars[i + 1 - window..=i];
        let half = window / 2;
        let (front, back) = slice.split_at(half);

        let front_high = front.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let back_high = back.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let front_low = front.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let back_low = back.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        let falling = back_high < front_high && back_low < front_low;
        let front_band = front_high - front_low;
        let back_band = back_high - back_low;
        let contracting = front_band > 0.0 && back_band < front_band * 0.75;

        out[i] = falling && contracting;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open,
            high,
            low,
            close,
            1_000_000,
        )
    }

    #[test]
    fn test_hammer() {
        // Long lower shadow, small body near the top.
        let b = bar(100.0, 100.6, 96.0, 100.5);
        assert!(is_hammer(&b));
        assert!(!is_shooting_star(&b));
    }

    #[test]
    fn test_doji() {
        let b = bar(100.0, 101.0, 99.0, 100.05);
        assert!(is_doji(&b));
    }

    #[test]
    fn test_bullish_engulfing() {
        let prev = bar(101.0, 101.5, 99.5, 100.0);
        let curr = bar(99.8, 102.5, 99.5, 102.0);
        assert!(is_bullish_engulfing(&prev, &curr));
        assert!(!is_bearish_engulfing(&prev, &curr));
    }

    #[test]
    fn test_detect_alignment() {
        let bars = vec![
            bar(100.0, 101.0, 99.0, 100.5),
            bar(101.0, 101.5, 99.5, 100.0),
            bar(99.8, 102.5, 99.5, 102.0),
        ];
        let flags = detect(ChartPattern::BullishEngulfing, &bars);
        assert_eq!(flags, vec![false, false, true]);
    }

    #[test]
    fn test_morning_star() {
        let first = bar(102.0, 102.5, 99.0, 99.5);
        let middle = bar(99.4, 100.2, 98.8, 99.6);
        let third = bar(99.8, 103.0, 99.5, 102.5);
        assert!(is_morning_star(&first, &middle, &third));
    }

    fn bar_hl(high: f64, low: f64) -> Bar {
        let mid = (high + low) / 2.0;
        bar(mid, high, low, mid)
    }

    #[test]
    fn test_double_top_breakdown() {
        // Peak, dip, matching peak, then a break below the interim low.
        let mut bars: Vec<Bar> = Vec::new();
        for _ in 0..8 {
            bars.push(bar_hl(110.0, 105.0)); // first peak zone
        }
        for _ in 0..4 {
            bars.push(bar_hl(102.0, 98.0)); // dip
        }
        for _ in 0..7 {
            bars.push(bar_hl(110.2, 105.0)); // second peak zone
        }
        bars.push(bar(100.0, 100.0, 96.0, 96.5)); // breakdown close
        let flags = double_top(&bars, 20);
        assert!(flags[bars.len() - 1]);
    }

    #[test]
    fn test_head_and_shoulders_needs_dominant_head() {
        let mut bars: Vec<Bar> = Vec::new();
        for _ in 0..10 {
            bars.push(bar_hl(105.0, 100.0)); // left shoulder
        }
        for _ in 0..10 {
            bars.push(bar_hl(112.0, 101.0)); // head
        }
        for _ in 0..9 {
            bars.push(bar_hl(105.5, 101.0)); // right shoulder
        }
        bars.push(bar(101.0, 101.0, 99.0, 99.5)); // neckline break
        let flags = head_and_shoulders(&bars, 30);
        assert!(flags[bars.len() - 1]);

        // Without the breakdown the pattern stays unflagged.
        let mut no_break = bars.clone();
        let last = no_break.len() - 1;
        no_break[last] = bar_hl(105.0, 102.0);
        let flags = head_and_shoulders(&no_break, 30);
        assert!(!flags[last]);
    }

    #[test]
    fn test_falling_wedge_contraction() {
        let mut bars: Vec<Bar> = Vec::new();
        for i in 0..10 {
            let drop = i as f64 * 0.5;
            bars.push(bar_hl(110.0 - drop, 100.0 - drop)); // wide falling band
        }
        for i in 0..10 {
            let drop = 5.0 + i as f64 * 0.4;
            bars.push(bar_hl(107.0 - drop, 101.0 - drop)); // tighter falling band
        }
        let flags = falling_wedge(&bars, 20);
        assert!(flags[bars.len() - 1]);

        // A widening decline is not a wedge.
        let mut widening: Vec<Bar> = Vec::new();
        for i in 0..10 {
            let drop = i as f64 * 0.5;
            widening.push(bar_hl(108.0 - drop, 102.0 - drop));
        }
        for i in 0..10 {
            let drop = 5.0 + i as f64 * 0.5;
            widening.push(bar_hl(112.0 - drop, 96.0 - drop));
        }
        let flags = falling_wedge(&widening, 20);
        assert!(!flags[widening.len() - 1]);
    }
}
