/// scorer.rs — Rule-based scorer for a single timeframe
///
/// Fixed-weight additive scoring over one timeframe's indicator snapshot.
/// Positive deltas favour LONG, negative favour SHORT. Reasons are recorded
/// in evaluation order; the volume rule confirms whichever direction the
/// running score already points to.

use crate::indicators::{
    atr, bollinger_bands, macd, rsi, sma_or_last, support_resistance, ATR_PERIOD,
    BOLLINGER_PERIOD, RSI_PERIOD, SR_WINDOW,
};
use crate::models::{Candle, IndicatorSet, MacdTrend, TimeframeSignal};

/// A timeframe with fewer candles than this contributes nothing
/// (absent, not zero).
pub const MIN_CANDLES: usize = 50;

const MA_FAST_PERIOD: usize = 20;
const MA_SLOW_PERIOD: usize = 50;
const VOLUME_MA_PERIOD: usize = 20;
const VOLUME_SURGE: f64 = 1.5;
const SR_PROXIMITY: f64 = 0.02;

/// Score one timeframe's candle series. `None` when the series is too
/// short to be scored.
pub fn score_timeframe(candles: &[Candle]) -> Option<TimeframeSignal> {
    if candles.len() < MIN_CANDLES {
        return None;
    }

    let indicators = compute_indicator_set(candles);
    let price = candles.last().expect("len checked").close;
    let (score, reasons) = score_indicators(&indicators, price);

    Some(TimeframeSignal {
        score,
        reasons,
        indicators,
    })
}

/// Build the full indicator snapshot for a candle series.
pub fn compute_indicator_set(candles: &[Candle]) -> IndicatorSet {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let volume_ma = sma_or_last(&volumes, VOLUME_MA_PERIOD);
    let volume_ratio = if volume_ma > 0.0 {
        volumes.last().copied().unwrap_or(0.0) / volume_ma
    } else {
        1.0
    };

    let (support, resistance, _pivot) = support_resistance(candles, SR_WINDOW);

    IndicatorSet {
        rsi: rsi(&closes, RSI_PERIOD),
        macd: macd(&closes),
        ma_fast: sma_or_last(&closes, MA_FAST_PERIOD),
        ma_slow: sma_or_last(&closes, MA_SLOW_PERIOD),
        bollinger: bollinger_bands(&closes, BOLLINGER_PERIOD),
        atr: atr(&highs, &lows, &closes, ATR_PERIOD),
        volume_ratio,
        support,
        resistance,
    }
}

/// The scoring table. Order-independent accumulation except for the volume
/// rule, which reads the running score.
pub fn score_indicators(ind: &IndicatorSet, price: f64) -> (i32, Vec<String>) {
    let mut score = 0i32;
    let mut reasons = Vec::new();

    // RSI — weight 25
    let rsi = ind.rsi;
    if rsi < 30.0 {
        score += 25;
        reasons.push(format!("RSI oversold ({rsi:.1})"));
    } else if rsi < 40.0 {
        score += 10;
        reasons.push(format!("RSI low ({rsi:.1})"));
    } else if rsi > 70.0 {
        score -= 25;
        reasons.push(format!("RSI overbought ({rsi:.1})"));
    } else if rsi > 60.0 {
        score -= 10;
        reasons.push(format!("RSI high ({rsi:.1})"));
    }

    // MACD — weight 20
    if let Some(m) = &ind.macd {
        if m.histogram > 0.0 && m.trend == MacdTrend::Bullish {
            score += 20;
            reasons.push("MACD bullish cross".to_owned());
        } else if m.histogram < 0.0 && m.trend == MacdTrend::Bearish {
            score -= 20;
            reasons.push("MACD bearish cross".to_owned());
        }
    }

    // Moving averages — weight 20 + 10
    if price > ind.ma_fast && price > ind.ma_slow {
        score += 20;
        reasons.push("price above MAs".to_owned());
    } else if price < ind.ma_fast && price < ind.ma_slow {
        score -= 20;
        reasons.push("price below MAs".to_owned());
    }

    if ind.ma_fast > ind.ma_slow {
        score += 10;
        reasons.push("short MA above long MA".to_owned());
    } else {
        score -= 10;
        reasons.push("short MA below long MA".to_owned());
    }

    // Bollinger — weight 15
    if let Some(bb) = &ind.bollinger {
        if price < bb.lower {
            score += 15;
            reasons.push("touched lower band".to_owned());
        } else if price > bb.upper {
            score -= 15;
            reasons.push("touched upper band".to_owned());
        }
    }

    // Volume confirmation — weight 10, sign follows the running score
    if ind.volume_ratio > VOLUME_SURGE {
        if score > 0 {
            score += 10;
            reasons.push("volume-confirmed rally".to_owned());
        } else if score < 0 {
            score -= 10;
            reasons.push("volume-confirmed selloff".to_owned());
        }
    }

    // Support / resistance proximity — weight 10
    if price <= ind.support * (1.0 + SR_PROXIMITY) {
        score += 10;
        reasons.push("near support".to_owned());
    } else if price >= ind.resistance * (1.0 - SR_PROXIMITY) {
        score -= 10;
        reasons.push("near resistance".to_owned());
    }

    (score, reasons)
}
