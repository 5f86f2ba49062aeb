use thiserror::Error;

use crate::models::{Side, UserId};

/// Market-data failures. Provider-side retries have already been exhausted
/// by the time one of these reaches the core; the current symbol/timeframe
/// is simply skipped for the cycle.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("data unavailable for {symbol}: {reason}")]
    Unavailable { symbol: String, reason: String },

    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Ledger precondition violations. Returned to the caller, never fatal.
#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("insufficient margin: need ${needed:.2}, available ${available:.2}")]
    InsufficientMargin { needed: f64, available: f64 },

    #[error("{symbol} already has an open {side} position")]
    PositionExists { symbol: String, side: Side },

    #[error("no open position in {symbol}")]
    NoPosition { symbol: String },

    #[error("no account for user {0}")]
    NoAccount(UserId),
}

/// Risk-gate rejections, strictly ordered: the first failing check wins.
/// The Display strings are user-facing.
#[derive(Debug, Error, PartialEq)]
pub enum RiskRejection {
    #[error("symbol {0} not allowed")]
    SymbolNotAllowed(String),

    #[error("exceeds max position size ${limit:.0}")]
    MaxPositionSize { limit: f64 },

    #[error("exceeds daily trade limit {limit}")]
    DailyTradeLimit { limit: u32 },

    #[error("exceeds daily loss limit ${limit:.0}")]
    DailyLossLimit { limit: f64 },
}
