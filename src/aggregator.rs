/// aggregator.rs — Multi-timeframe signal synthesis
///
/// Weights the per-timeframe scores into one directional signal. Nothing is
/// emitted below the strength floor: a sub-60 total is discarded, not
/// reported as HOLD. Stop-loss / take-profit levels are derived from the
/// average support/resistance of the contributing timeframes.

use chrono::{DateTime, Utc};

use crate::models::{AggregatedSignal, Side, SignalLevel, TimeframeSignal};

/// Minimum weighted strength for a signal to exist at all.
pub const EMISSION_FLOOR: f64 = 60.0;
/// Strength at or above this is classified STRONG.
pub const STRONG_FLOOR: f64 = 80.0;
/// Reasons carried on the final signal, most material first.
const MAX_REASONS: usize = 5;
/// Reasons taken from each contributing timeframe.
const REASONS_PER_TIMEFRAME: usize = 2;

const STOP_LOSS_FACTOR: f64 = 0.98;
const TAKE_PROFIT_1_FACTOR: f64 = 0.99;
const TAKE_PROFIT_2_FACTOR: f64 = 1.02;

/// One timeframe's contribution to the aggregate.
#[derive(Debug, Clone)]
pub struct ScoredTimeframe {
    pub interval: String,
    pub weight: f64,
    pub signal: TimeframeSignal,
}

pub fn classify(strength: f64) -> SignalLevel {
    if strength >= STRONG_FLOOR {
        SignalLevel::Strong
    } else if strength >= EMISSION_FLOOR {
        SignalLevel::Clear
    } else {
        SignalLevel::Weak
    }
}

/// Merge the contributing timeframes into a final signal.
///
/// Returns `None` when no timeframe contributed or when the weighted
/// strength stays below the emission floor (the boundary is exact:
/// 59.999… is discarded, 60.0 is emitted).
pub fn aggregate(frames: &[ScoredTimeframe], now: DateTime<Utc>) -> Option<AggregatedSignal> {
    if frames.is_empty() {
        return None;
    }

    let total: f64 = frames
        .iter()
        .map(|f| f.signal.score as f64 * f.weight)
        .sum();

    let strength = total.abs().min(100.0);
    if strength < EMISSION_FLOOR {
        return None;
    }

    let action = if total > 0.0 { Side::Long } else { Side::Short };

    // Dominant timeframe: largest absolute raw score, first wins ties.
    let mut dominant = &frames[0];
    for f in &frames[1..] {
        if f.signal.score.abs() > dominant.signal.score.abs() {
            dominant = f;
        }
    }
    let dominant_timeframe = dominant.interval.clone();

    let mut reasons: Vec<String> = Vec::with_capacity(MAX_REASONS);
    for frame in frames {
        for reason in frame.signal.reasons.iter().take(REASONS_PER_TIMEFRAME) {
            reasons.push(format!("{}: {}", frame.interval, reason));
        }
    }
    reasons.truncate(MAX_REASONS);

    let avg_support = frames
        .iter()
        .map(|f| f.signal.indicators.support)
        .sum::<f64>()
        / frames.len() as f64;
    let avg_resistance = frames
        .iter()
        .map(|f| f.signal.indicators.resistance)
        .sum::<f64>()
        / frames.len() as f64;

    Some(AggregatedSignal {
        action,
        strength,
        level: classify(strength),
        dominant_timeframe,
        reasons,
        stop_loss: avg_support * STOP_LOSS_FACTOR,
        take_profit_1: avg_resistance * TAKE_PROFIT_1_FACTOR,
        take_profit_2: avg_resistance * TAKE_PROFIT_2_FACTOR,
        timestamp: now,
    })
}
