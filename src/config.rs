/// config.rs — Centralised configuration loaded from .env
///
/// `AppConfig` covers process-wide settings for the monitor binary; loading
/// happens once at startup. `TradingConfig` is the per-user trading policy
/// owned by the configuration store and mutated only through explicit user
/// actions.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Real,
    Simulation,
}

/// Per-user trading policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub mode: TradingMode,
    pub auto_trade: bool,
    /// Default notional per trade (USDT)
    pub default_amount: f64,
    pub default_leverage: u32,
    /// Cap on Σ(margin × leverage) + new notional
    pub max_position_size: f64,
    /// 0.05 = close at -5% pnl ratio
    pub stop_loss_ratio: f64,
    /// 0.10 = close at +10% pnl ratio
    pub take_profit_ratio: f64,
    pub max_daily_trades: u32,
    /// Daily loss cap (USDT, positive number)
    pub max_daily_loss: f64,
    /// Empty or None means every symbol is allowed
    pub allowed_symbols: Option<Vec<String>>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Simulation,
            auto_trade: false,
            default_amount: 100.0,
            default_leverage: 10,
            max_position_size: 1000.0,
            stop_loss_ratio: 0.05,
            take_profit_ratio: 0.10,
            max_daily_trades: 10,
            max_daily_loss: 500.0,
            allowed_symbols: None,
        }
    }
}

/// One timeframe contributing to the aggregated signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeSpec {
    /// Provider interval string, e.g. "1h", "4h", "1d"
    pub interval: String,
    pub weight: f64,
}

impl TimeframeSpec {
    pub fn new(interval: &str, weight: f64) -> Self {
        Self {
            interval: interval.to_owned(),
            weight,
        }
    }
}

/// Default weight set: the daily frame dominates.
pub fn default_timeframes() -> Vec<TimeframeSpec> {
    vec![
        TimeframeSpec::new("1h", 0.2),
        TimeframeSpec::new("4h", 0.3),
        TimeframeSpec::new("1d", 0.5),
    ]
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // ── Market data ──────────────────────────────────────────────────
    pub rest_url: String,
    /// Candles requested per timeframe scan
    pub candle_limit: u32,

    // ── Monitoring universe ──────────────────────────────────────────
    pub monitored_pairs: Vec<String>,
    pub timeframes: Vec<TimeframeSpec>,

    // ── Scheduler cadence ────────────────────────────────────────────
    /// Signal-scan interval in seconds
    pub signal_scan_secs: u64,
    /// Auto-trade / stop-check interval in seconds
    pub trade_check_secs: u64,

    // ── Signal emission ──────────────────────────────────────────────
    /// Same (symbol, action) is suppressed within this window
    pub cooldown_secs: i64,

    // ── Simulated accounts ───────────────────────────────────────────
    pub initial_balance: f64,
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let rest_url = env::var("MARKET_REST_URL")
            .unwrap_or_else(|_| "https://api.binance.com".into());

        let monitored_pairs: Vec<String> = env::var("MONITORED_PAIRS")
            .unwrap_or_else(|_| "BTCUSDT,ETHUSDT,BNBUSDT,SOLUSDT,ADAUSDT".into())
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            rest_url,
            candle_limit: parse_env("CANDLE_LIMIT", 100u32)?,
            monitored_pairs,
            timeframes: default_timeframes(),
            signal_scan_secs: parse_env("SIGNAL_SCAN_SECS", 300u64)?,
            trade_check_secs: parse_env("TRADE_CHECK_SECS", 60u64)?,
            cooldown_secs: parse_env("SIGNAL_COOLDOWN_SECS", 3600i64)?,
            initial_balance: parse_env("INITIAL_BALANCE", 10_000.0)?,
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}
