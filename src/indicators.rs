/// indicators.rs — Pure technical-indicator library
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// RSI (period p, Wilder-style over the last p deltas):
///
///   RS  = avg_gain / avg_loss
///   RSI = 100 − 100 / (1 + RS)
///
///   Fewer than p+1 closes → neutral 50.  avg_loss = 0 → 100.
///
/// EMA (period p):
///
///   k     = 2 / (p + 1)
///   ema_0 = SMA(first p values)
///   ema_t = price_t·k + ema_{t−1}·(1 − k)
///
/// MACD:
///
///   line      = EMA(closes, 12) − EMA(closes, 26)
///   signal    = EMA(line series, 9)   (falls back to `line` when the
///                                      history cannot seed the 9-EMA)
///   histogram = line − signal
///   trend     = bullish iff line > 0
///
/// BOLLINGER (period p = 20):
///
///   middle = SMA(p),  band = 2·σ_pop(window),  upper/lower = middle ± band
///
/// ATR (period p = 14):
///
///   TR_t = max(high−low, |high−prevClose|, |low−prevClose|)
///   ATR  = mean of the last p true ranges
///
/// SUPPORT / RESISTANCE (window w = 20):
///
///   support = min(low), resistance = max(high) over the last w bars,
///   pivot = (support + resistance + lastClose) / 3
/// ─────────────────────────────────────────────────────────────────────────

use crate::models::{Bollinger, Candle, Macd, MacdTrend};

pub const RSI_PERIOD: usize = 14;
pub const BOLLINGER_PERIOD: usize = 20;
pub const ATR_PERIOD: usize = 14;
pub const SR_WINDOW: usize = 20;

/// Relative Strength Index over the last `period` deltas.
/// Neutral 50 when history is too short; 100 on a pure uptrend.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 50.0;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for w in closes.windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(-change);
        }
    }

    let avg_gain: f64 = gains[gains.len() - period..].iter().sum::<f64>() / period as f64;
    let avg_loss: f64 = losses[losses.len() - period..].iter().sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    round2(100.0 - 100.0 / (1.0 + rs))
}

/// Exponential moving average; `None` when the series cannot seed the SMA.
pub fn ema(series: &[f64], period: usize) -> Option<f64> {
    ema_series(series, period).map(|s| *s.last().expect("non-empty by construction"))
}

/// Full EMA series, aligned so element 0 corresponds to input index
/// `period − 1`.
fn ema_series(series: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || series.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(series.len() - period + 1);
    let mut ema = series[..period].iter().sum::<f64>() / period as f64;
    out.push(ema);
    for &price in &series[period..] {
        ema = price * k + ema * (1.0 - k);
        out.push(ema);
    }
    Some(out)
}

/// MACD(12, 26, 9). Requires at least 26 closes. With fewer than 34 closes
/// the 9-EMA of the line cannot be seeded; the signal then degrades to the
/// line itself and the histogram to 0, leaving the MACD scoring rule inert
/// exactly where history is too short to judge a cross.
pub fn macd(closes: &[f64]) -> Option<Macd> {
    let e12 = ema_series(closes, 12)?;
    let e26 = ema_series(closes, 26)?;

    // Both series end at the last close; align on the shorter tail.
    let n = e26.len();
    let line_series: Vec<f64> = (0..n)
        .map(|i| e12[e12.len() - n + i] - e26[i])
        .collect();
    let line = *line_series.last()?;

    let (signal, histogram) = match ema(&line_series, 9) {
        Some(s) => (s, line - s),
        None => (line, 0.0),
    };

    let trend = if line > 0.0 {
        MacdTrend::Bullish
    } else {
        MacdTrend::Bearish
    };

    Some(Macd {
        line: round4(line),
        signal: round4(signal),
        histogram: round4(histogram),
        trend,
    })
}

/// Bollinger Bands at ±2 population standard deviations around the SMA.
pub fn bollinger_bands(closes: &[f64], period: usize) -> Option<Bollinger> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / period as f64;
    let band = 2.0 * variance.sqrt();

    Some(Bollinger {
        upper: middle + band,
        middle,
        lower: middle - band,
        width: 2.0 * band,
    })
}

/// Average True Range over the last `period` true ranges; 0 when history
/// is insufficient.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let n = highs.len().min(lows.len()).min(closes.len());
    if period == 0 || n < period + 1 {
        return 0.0;
    }

    let mut true_ranges = Vec::with_capacity(n - 1);
    for i in 1..n {
        let tr = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        true_ranges.push(tr);
    }

    let avg = true_ranges[true_ranges.len() - period..].iter().sum::<f64>() / period as f64;
    round4(avg)
}

/// Support/resistance levels and pivot from the last `window` bars.
pub fn support_resistance(candles: &[Candle], window: usize) -> (f64, f64, f64) {
    let take = window.min(candles.len()).max(1);
    let tail = &candles[candles.len() - take..];

    let support = tail.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let resistance = tail.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let last_close = candles.last().map(|c| c.close).unwrap_or(0.0);
    let pivot = (support + resistance + last_close) / 3.0;

    (support, resistance, pivot)
}

/// Simple moving average of the last `period` values; last value when the
/// series is shorter than the period.
pub fn sma_or_last(series: &[f64], period: usize) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    if series.len() < period {
        return *series.last().expect("non-empty");
    }
    series[series.len() - period..].iter().sum::<f64>() / period as f64
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn rsi_short_history_is_neutral() {
        let closes: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), 50.0);
    }

    #[test]
    fn rsi_pure_uptrend_is_100() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), 100.0);
    }

    #[test]
    fn rsi_pure_downtrend_is_0() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi(&closes, 14), 0.0);
    }

    proptest! {
        #[test]
        fn rsi_stays_in_range(closes in prop::collection::vec(1.0f64..10_000.0, 0..120)) {
            let v = rsi(&closes, 14);
            prop_assert!((0.0..=100.0).contains(&v), "rsi = {v}");
        }
    }

    #[test]
    fn ema_needs_full_period() {
        let series = [1.0, 2.0, 3.0];
        assert!(ema(&series, 4).is_none());
    }

    #[test]
    fn ema_of_constant_series_is_that_value() {
        let series = [42.0; 10];
        let v = ema(&series, 10).unwrap();
        assert!((v - 42.0).abs() < 1e-12);
    }

    #[test]
    fn ema_follows_recurrence() {
        // Seed SMA(3) = 2.0, then 2 steps with k = 0.5
        let series = [1.0, 2.0, 3.0, 4.0, 5.0];
        let v = ema(&series, 3).unwrap();
        let expected = {
            let e1 = 4.0 * 0.5 + 2.0 * 0.5;
            5.0 * 0.5 + e1 * 0.5
        };
        assert!((v - expected).abs() < 1e-12);
    }

    #[test]
    fn macd_needs_26_closes() {
        let closes: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        assert!(macd(&closes).is_none());
    }

    #[test]
    fn macd_uptrend_is_bullish_with_positive_histogram() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let m = macd(&closes).unwrap();
        assert_eq!(m.trend, MacdTrend::Bullish);
        assert!(m.line > 0.0);
        // Accelerating series keeps the line above its own 9-EMA
        assert!(m.histogram > 0.0);
    }

    #[test]
    fn macd_short_history_degrades_to_zero_histogram() {
        // 26..34 closes: line exists, 9-EMA of the line cannot be seeded
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let m = macd(&closes).unwrap();
        assert_eq!(m.histogram, 0.0);
        assert_eq!(m.signal, m.line);
    }

    #[test]
    fn bollinger_constant_series_collapses_bands() {
        let closes = [50.0; 25];
        let bb = bollinger_bands(&closes, 20).unwrap();
        assert!((bb.upper - 50.0).abs() < 1e-12);
        assert!((bb.lower - 50.0).abs() < 1e-12);
        assert!((bb.width).abs() < 1e-12);
    }

    #[test]
    fn bollinger_needs_full_window() {
        let closes = [50.0; 19];
        assert!(bollinger_bands(&closes, 20).is_none());
    }

    #[test]
    fn atr_insufficient_history_is_zero() {
        let h = [10.0; 10];
        let l = [9.0; 10];
        let c = [9.5; 10];
        assert_eq!(atr(&h, &l, &c, 14), 0.0);
    }

    #[test]
    fn atr_of_constant_range_equals_range() {
        let n = 30;
        let h = vec![10.0; n];
        let l = vec![8.0; n];
        let c = vec![9.0; n];
        assert!((atr(&h, &l, &c, 14) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn support_resistance_over_window() {
        let mut candles: Vec<Candle> = (0..30)
            .map(|i| candle(100.0 + i as f64, 90.0 + i as f64, 95.0 + i as f64))
            .collect();
        candles.push(candle(200.0, 50.0, 100.0));
        let (s, r, pivot) = support_resistance(&candles, 20);
        assert_eq!(s, 50.0);
        assert_eq!(r, 200.0);
        assert!((pivot - (50.0 + 200.0 + 100.0) / 3.0).abs() < 1e-12);
    }
}
