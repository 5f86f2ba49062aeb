/// main.rs — Monitor Entry Point
///
/// Runs the signal monitor against Binance spot market data with simulated
/// accounts.
///
/// FLOW:
///   1. Load config from .env (MARKET_REST_URL, MONITORED_PAIRS, etc.)
///   2. Wire market data, ledger, deduplicator, config store, notifier
///   3. Start the scheduler (signal loop + trade loop)
///   4. Run until Ctrl-C, then stop cleanly
///
/// NOTE: Notifications go to the log by default; swap in another
///       `NotificationSink` to deliver them elsewhere.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signal_engine::clock::SystemClock;
use signal_engine::config::{AppConfig, TradingConfig};
use signal_engine::dedup::SignalDeduplicator;
use signal_engine::ledger::PositionLedger;
use signal_engine::market::BinanceMarketData;
use signal_engine::monitor::{
    ConfigStore, LogNotifier, MemoryConfigStore, MonitorScheduler, SignalPipeline,
};

/// Default local account seeded into the in-memory store.
const DEFAULT_USER: i64 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::from_env()?;

    info!("╔══════════════════════════════════════════════╗");
    info!("║     SIGNAL ENGINE  —  MONITOR MODE           ║");
    info!("╚══════════════════════════════════════════════╝");
    info!(pairs = ?cfg.monitored_pairs, "monitoring");
    info!(
        scan_secs = cfg.signal_scan_secs,
        trade_secs = cfg.trade_check_secs,
        cooldown_secs = cfg.cooldown_secs,
        "cadence"
    );

    let clock = Arc::new(SystemClock);
    let market = Arc::new(BinanceMarketData::new(&cfg.rest_url));
    let ledger = Arc::new(PositionLedger::new(clock.clone(), cfg.initial_balance));
    let dedup = Arc::new(SignalDeduplicator::new(cfg.cooldown_secs, clock.clone()));
    let trade_cooldown = Arc::new(SignalDeduplicator::new(cfg.cooldown_secs, clock.clone()));

    let store = Arc::new(MemoryConfigStore::new());
    store.save_trading_config(DEFAULT_USER, TradingConfig::default());
    store.subscribe(DEFAULT_USER, cfg.monitored_pairs.clone());
    ledger.ensure_account(DEFAULT_USER);

    let pipeline = Arc::new(SignalPipeline::new(
        market.clone(),
        cfg.timeframes.clone(),
        cfg.candle_limit,
        clock,
    ));

    let scheduler = Arc::new(MonitorScheduler::new(
        pipeline,
        market,
        ledger,
        dedup,
        trade_cooldown,
        store,
        Arc::new(LogNotifier),
        cfg.monitored_pairs,
        Duration::from_secs(cfg.signal_scan_secs),
        Duration::from_secs(cfg.trade_check_secs),
    ));

    scheduler.start().await;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    scheduler.stop().await;

    Ok(())
}
