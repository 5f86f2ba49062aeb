/// models.rs — Shared domain types
///
/// Everything that crosses a module boundary lives here: candles as the
/// market-data provider delivers them, the per-timeframe indicator snapshot,
/// the scored/aggregated signal types, and the simulated-position records
/// owned by the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

/// Trade direction. Doubles as the signal action (LONG/SHORT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// One OHLCV bar, ordered ascending by `open_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// 24h ticker snapshot from the market-data provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub price: f64,
    pub change_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacdTrend {
    Bullish,
    Bearish,
}

/// MACD line / signal / histogram triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
    pub trend: MacdTrend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
}

/// Per-timeframe indicator snapshot. Derived and ephemeral: recomputed each
/// cycle, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi: f64,
    pub macd: Option<Macd>,
    /// 20-period simple moving average
    pub ma_fast: f64,
    /// 50-period simple moving average
    pub ma_slow: f64,
    pub bollinger: Option<Bollinger>,
    pub atr: f64,
    /// Last volume relative to its 20-period average
    pub volume_ratio: f64,
    pub support: f64,
    pub resistance: f64,
}

/// Output of the rule scorer for a single timeframe.
#[derive(Debug, Clone)]
pub struct TimeframeSignal {
    /// Additive score, roughly in [-110, 110] before weighting
    pub score: i32,
    /// Reason strings in evaluation order
    pub reasons: Vec<String>,
    pub indicators: IndicatorSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalLevel {
    Weak,
    Clear,
    Strong,
}

impl std::fmt::Display for SignalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalLevel::Weak => write!(f, "WEAK"),
            SignalLevel::Clear => write!(f, "CLEAR"),
            SignalLevel::Strong => write!(f, "STRONG"),
        }
    }
}

/// Final directional signal after multi-timeframe weighting. Only produced
/// when the weighted strength clears the emission floor.
#[derive(Debug, Clone)]
pub struct AggregatedSignal {
    pub action: Side,
    /// |weighted total|, clamped to 100
    pub strength: f64,
    pub level: SignalLevel,
    /// Timeframe with the largest absolute raw score
    pub dominant_timeframe: String,
    /// At most 5, most material first, prefixed with their timeframe
    pub reasons: Vec<String>,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub timestamp: DateTime<Utc>,
}

/// An open simulated position. At most one per (user, symbol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    /// Base-asset units (notional / entry price)
    pub amount: f64,
    pub avg_price: f64,
    pub current_price: f64,
    pub margin: f64,
    pub leverage: u32,
    pub liquidation_price: f64,
    pub pnl: f64,
    /// pnl / margin * 100
    pub pnl_ratio: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeKind {
    Open,
    Close,
}

/// One entry in the per-user trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub notional: f64,
    pub leverage: u32,
    /// Realized pnl, present on close records only
    pub pnl: Option<f64>,
    pub kind: TradeKind,
}

/// Read-only summary of a simulated account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub available: f64,
    pub open_positions: usize,
    pub daily_pnl: f64,
    pub total_pnl: f64,
    pub total_trades: u32,
    pub win_rate: f64,
}

/// Result of closing a position.
#[derive(Debug, Clone)]
pub struct CloseReport {
    pub symbol: String,
    pub side: Side,
    pub exit_price: f64,
    pub pnl: f64,
    pub balance: f64,
}

/// What an `open` call actually did: a reverse-side request against an
/// existing position collapses to a close (net-position semantics).
#[derive(Debug, Clone)]
pub enum TradeOutcome {
    Opened(Position),
    Closed(CloseReport),
}
