/// monitor.rs — Periodic monitoring scheduler
///
/// Two cooperative loops drive the whole system:
///
///   signal loop (default 300 s)
///     per monitored symbol: fetch candles → score timeframes → aggregate
///     → deduplicate → broadcast to subscribers
///
///   trade loop (default 60 s)
///     1. per auto-trade user: open on a ≥70-strength signal that survives
///        the per-user entry cooldown and the risk gate
///     2. per open position: refresh unrealized pnl, close on stop-loss /
///        take-profit (inclusive boundaries)
///
/// A failure in any single symbol/user iteration is logged and skipped;
/// the loops never die of one bad cycle. Ticks never overlap: the interval
/// delays a missed tick instead of bursting.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::{aggregate, ScoredTimeframe};
use crate::clock::Clock;
use crate::config::{TimeframeSpec, TradingConfig, TradingMode};
use crate::dedup::SignalDeduplicator;
use crate::ledger::PositionLedger;
use crate::market::MarketData;
use crate::models::{AggregatedSignal, Side, TradeOutcome, UserId};
use crate::risk;
use crate::scorer::score_timeframe;

/// Auto-trading only acts on signals at or above this strength.
pub const AUTO_TRADE_FLOOR: f64 = 70.0;
/// Bounded fan-out while scanning symbols.
const SCAN_CONCURRENCY: usize = 4;

// ── Collaborator traits ───────────────────────────────────────────────────

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Fire-and-forget: delivery failures are the sink's problem, never
    /// retried by the core.
    async fn notify(&self, user: UserId, text: &str);
}

/// Default sink: writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, user: UserId, text: &str) {
        info!(user, "notification:\n{text}");
    }
}

/// Read-mostly per-cycle access to user configuration and subscriptions.
/// Writes happen only in response to explicit user actions.
pub trait ConfigStore: Send + Sync {
    fn load_trading_config(&self, user: UserId) -> Option<TradingConfig>;
    fn save_trading_config(&self, user: UserId, cfg: TradingConfig);
    /// Subscribed symbols; the literal "ALL" subscribes to every symbol.
    fn load_subscriptions(&self, user: UserId) -> Vec<String>;
    fn user_ids(&self) -> Vec<UserId>;
}

/// In-memory store used by the monitor binary and tests.
#[derive(Default)]
pub struct MemoryConfigStore {
    inner: RwLock<AHashMap<UserId, UserEntry>>,
}

#[derive(Default)]
struct UserEntry {
    config: Option<TradingConfig>,
    subscriptions: Vec<String>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, user: UserId, symbols: Vec<String>) {
        let mut inner = self.inner.write().expect("config store poisoned");
        inner.entry(user).or_default().subscriptions = symbols;
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_trading_config(&self, user: UserId) -> Option<TradingConfig> {
        self.inner
            .read()
            .expect("config store poisoned")
            .get(&user)
            .and_then(|e| e.config.clone())
    }

    fn save_trading_config(&self, user: UserId, cfg: TradingConfig) {
        let mut inner = self.inner.write().expect("config store poisoned");
        inner.entry(user).or_default().config = Some(cfg);
    }

    fn load_subscriptions(&self, user: UserId) -> Vec<String> {
        self.inner
            .read()
            .expect("config store poisoned")
            .get(&user)
            .map(|e| e.subscriptions.clone())
            .unwrap_or_default()
    }

    fn user_ids(&self) -> Vec<UserId> {
        self.inner
            .read()
            .expect("config store poisoned")
            .keys()
            .copied()
            .collect()
    }
}

// ── Signal pipeline ───────────────────────────────────────────────────────

/// Anything that can turn a symbol into an aggregated signal.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn analyze_symbol(&self, symbol: &str) -> Option<AggregatedSignal>;
}

/// The production pipeline: candles per timeframe → scorer → aggregator.
pub struct SignalPipeline {
    market: Arc<dyn MarketData>,
    timeframes: Vec<TimeframeSpec>,
    candle_limit: u32,
    clock: Arc<dyn Clock>,
}

impl SignalPipeline {
    pub fn new(
        market: Arc<dyn MarketData>,
        timeframes: Vec<TimeframeSpec>,
        candle_limit: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            market,
            timeframes,
            candle_limit,
            clock,
        }
    }
}

#[async_trait]
impl SignalSource for SignalPipeline {
    async fn analyze_symbol(&self, symbol: &str) -> Option<AggregatedSignal> {
        let mut frames = Vec::with_capacity(self.timeframes.len());

        for tf in &self.timeframes {
            match self
                .market
                .get_candles(symbol, &tf.interval, self.candle_limit)
                .await
            {
                Ok(candles) => match score_timeframe(&candles) {
                    Some(signal) => frames.push(ScoredTimeframe {
                        interval: tf.interval.clone(),
                        weight: tf.weight,
                        signal,
                    }),
                    None => {
                        debug!(symbol, interval = %tf.interval, "not enough history, timeframe absent");
                    }
                },
                // One unavailable timeframe costs only itself this cycle
                Err(e) => warn!(symbol, interval = %tf.interval, error = %e, "timeframe skipped"),
            }
        }

        aggregate(&frames, self.clock.now())
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────

struct RunningTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct MonitorScheduler {
    pipeline: Arc<dyn SignalSource>,
    market: Arc<dyn MarketData>,
    ledger: Arc<PositionLedger>,
    dedup: Arc<SignalDeduplicator>,
    /// Entry cooldown for the auto-trade path, keyed per user so it cannot
    /// starve (or be starved by) the broadcast cooldown.
    trade_cooldown: Arc<SignalDeduplicator<(UserId, String, Side)>>,
    store: Arc<dyn ConfigStore>,
    sink: Arc<dyn NotificationSink>,
    monitored: Vec<String>,
    signal_interval: Duration,
    trade_interval: Duration,
    state: tokio::sync::Mutex<Option<RunningTasks>>,
}

impl MonitorScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Arc<dyn SignalSource>,
        market: Arc<dyn MarketData>,
        ledger: Arc<PositionLedger>,
        dedup: Arc<SignalDeduplicator>,
        trade_cooldown: Arc<SignalDeduplicator<(UserId, String, Side)>>,
        store: Arc<dyn ConfigStore>,
        sink: Arc<dyn NotificationSink>,
        monitored: Vec<String>,
        signal_interval: Duration,
        trade_interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            market,
            ledger,
            dedup,
            trade_cooldown,
            store,
            sink,
            monitored,
            signal_interval,
            trade_interval,
            state: tokio::sync::Mutex::new(None),
        }
    }

    /// Spawn the signal and trade loops. Starting an already-running
    /// scheduler is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("monitor already running");
            return;
        }

        let (shutdown, rx) = watch::channel(false);
        let signal_task = tokio::spawn(Self::signal_loop(self.clone(), rx.clone()));
        let trade_task = tokio::spawn(Self::trade_loop(self.clone(), rx));

        *state = Some(RunningTasks {
            shutdown,
            handles: vec![signal_task, trade_task],
        });
        info!(
            symbols = self.monitored.len(),
            signal_secs = self.signal_interval.as_secs(),
            trade_secs = self.trade_interval.as_secs(),
            "monitor started"
        );
    }

    /// Request shutdown and wait for both loops to exit at their next
    /// iteration boundary. Stopping a stopped scheduler is a no-op.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        for handle in running.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "monitor task join failed");
            }
        }
        info!("monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    async fn signal_loop(this: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        // The interval's first tick completes immediately, so a freshly
        // started monitor scans right away instead of after a full period.
        let mut tick = tokio::time::interval(this.signal_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => this.scan_signals().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn trade_loop(this: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(this.trade_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => this.trade_cycle().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One pass over the monitored universe.
    async fn scan_signals(&self) {
        stream::iter(self.monitored.clone())
            .for_each_concurrent(SCAN_CONCURRENCY, |symbol| async move {
                self.scan_symbol(&symbol).await;
            })
            .await;
    }

    async fn scan_symbol(&self, symbol: &str) {
        let Some(signal) = self.pipeline.analyze_symbol(symbol).await else {
            return;
        };

        if !self.dedup.should_emit((symbol.to_owned(), signal.action)) {
            debug!(symbol, action = %signal.action, "signal suppressed by cooldown");
            return;
        }

        info!(
            symbol,
            action = %signal.action,
            strength = signal.strength,
            level = %signal.level,
            "signal emitted"
        );
        self.broadcast(symbol, &signal).await;
    }

    async fn broadcast(&self, symbol: &str, signal: &AggregatedSignal) {
        let text = format_signal(symbol, signal);
        for user in self.store.user_ids() {
            let subs = self.store.load_subscriptions(user);
            if subs.iter().any(|s| s == symbol || s == "ALL") {
                self.sink.notify(user, &text).await;
            }
        }
    }

    /// One pass of auto-trade entries followed by the stop sweep.
    async fn trade_cycle(&self) {
        for user in self.store.user_ids() {
            let Some(cfg) = self.store.load_trading_config(user) else {
                continue;
            };
            if cfg.auto_trade {
                self.process_user_signals(user, &cfg).await;
            }
        }

        self.check_stop_orders().await;
    }

    async fn process_user_signals(&self, user: UserId, cfg: &TradingConfig) {
        if cfg.mode != TradingMode::Simulation {
            warn!(user, "real order routing is not supported, auto-trade skipped");
            return;
        }
        self.ledger.ensure_account(user);

        for symbol in self.store.load_subscriptions(user) {
            if symbol == "ALL" {
                continue; // wildcard only routes notifications
            }
            if self.ledger.has_position(user, &symbol) {
                continue;
            }

            let Some(signal) = self.pipeline.analyze_symbol(&symbol).await else {
                continue;
            };
            if signal.strength < AUTO_TRADE_FLOOR {
                continue;
            }

            // One entry attempt per cooldown window: recording here (not on
            // open) also stops a rejected entry from retrying every tick.
            if !self
                .trade_cooldown
                .should_emit((user, symbol.clone(), signal.action))
            {
                debug!(user, symbol, action = %signal.action, "entry suppressed by cooldown");
                continue;
            }

            let view = self.ledger.risk_view(user);
            if let Err(rejection) =
                risk::check(cfg, &view, &symbol, signal.action, cfg.default_amount)
            {
                info!(user, symbol, %rejection, "auto-trade rejected");
                continue;
            }

            let price = match self.market.get_price(&symbol).await {
                Ok(ticker) => ticker.price,
                Err(e) => {
                    warn!(user, symbol, error = %e, "price unavailable, entry skipped");
                    continue;
                }
            };

            match self.ledger.open(
                user,
                &symbol,
                signal.action,
                cfg.default_amount,
                cfg.default_leverage,
                price,
            ) {
                Ok(TradeOutcome::Opened(pos)) => {
                    info!(
                        user,
                        symbol,
                        side = %pos.side,
                        price,
                        margin = pos.margin,
                        "auto-trade opened"
                    );
                }
                Ok(TradeOutcome::Closed(report)) => {
                    info!(user, symbol, pnl = report.pnl, "auto-trade reversed out");
                }
                Err(e) => warn!(user, symbol, error = %e, "auto-trade open failed"),
            }
        }
    }

    /// Refresh every open position and enforce stop-loss / take-profit.
    async fn check_stop_orders(&self) {
        for user in self.store.user_ids() {
            let Some(cfg) = self.store.load_trading_config(user) else {
                continue;
            };

            for position in self.ledger.positions(user) {
                let price = match self.market.get_price(&position.symbol).await {
                    Ok(ticker) => ticker.price,
                    Err(e) => {
                        warn!(user, symbol = %position.symbol, error = %e, "price unavailable, stop check skipped");
                        continue;
                    }
                };

                let refreshed =
                    match self
                        .ledger
                        .refresh_unrealized(user, &position.symbol, price)
                    {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(user, symbol = %position.symbol, error = %e, "refresh failed");
                            continue;
                        }
                    };

                let stop = refreshed.pnl_ratio <= -cfg.stop_loss_ratio * 100.0;
                let take = refreshed.pnl_ratio >= cfg.take_profit_ratio * 100.0;
                if !(stop || take) {
                    continue;
                }

                match self.ledger.close(user, &position.symbol, price) {
                    Ok(report) => info!(
                        user,
                        symbol = %position.symbol,
                        pnl = report.pnl,
                        trigger = if stop { "stop loss" } else { "take profit" },
                        "position closed"
                    ),
                    Err(e) => warn!(user, symbol = %position.symbol, error = %e, "stop close failed"),
                }
            }
        }
    }
}

/// Human-readable rendering of an aggregated signal for the sink.
pub fn format_signal(symbol: &str, signal: &AggregatedSignal) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "Trading signal: {symbol}");
    let _ = writeln!(
        out,
        "Action: {} | strength {:.0}/100 ({})",
        signal.action, signal.strength, signal.level
    );
    let _ = writeln!(out, "Dominant timeframe: {}", signal.dominant_timeframe);
    let _ = writeln!(out, "Reasons:");
    for reason in &signal.reasons {
        let _ = writeln!(out, "  - {reason}");
    }
    let _ = writeln!(out, "Stop loss: ${:.2}", signal.stop_loss);
    let _ = writeln!(
        out,
        "Targets: ${:.2} / ${:.2}",
        signal.take_profit_1, signal.take_profit_2
    );
    let _ = write!(out, "Time: {}", signal.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::default_timeframes;
    use crate::error::MarketError;
    use crate::models::{Candle, SignalLevel, Ticker};
    use chrono::Utc;
    use std::sync::Mutex;

    // ── Test doubles ──────────────────────────────────────────────────

    struct StaticMarket {
        price: f64,
        candles: Vec<Candle>,
    }

    #[async_trait]
    impl MarketData for StaticMarket {
        async fn get_price(&self, _symbol: &str) -> Result<Ticker, MarketError> {
            Ok(Ticker {
                price: self.price,
                change_24h: 0.0,
                high_24h: self.price,
                low_24h: self.price,
                volume_24h: 0.0,
            })
        }

        async fn get_candles(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: u32,
        ) -> Result<Vec<Candle>, MarketError> {
            Ok(self.candles.clone())
        }
    }

    struct DownMarket;

    #[async_trait]
    impl MarketData for DownMarket {
        async fn get_price(&self, symbol: &str) -> Result<Ticker, MarketError> {
            Err(MarketError::Unavailable {
                symbol: symbol.to_owned(),
                reason: "down".into(),
            })
        }

        async fn get_candles(
            &self,
            symbol: &str,
            _interval: &str,
            _limit: u32,
        ) -> Result<Vec<Candle>, MarketError> {
            Err(MarketError::Unavailable {
                symbol: symbol.to_owned(),
                reason: "down".into(),
            })
        }
    }

    struct FixedSignalSource {
        signal: Option<AggregatedSignal>,
    }

    #[async_trait]
    impl SignalSource for FixedSignalSource {
        async fn analyze_symbol(&self, _symbol: &str) -> Option<AggregatedSignal> {
            self.signal.clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<(UserId, String)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, user: UserId, text: &str) {
            self.messages
                .lock()
                .expect("sink poisoned")
                .push((user, text.to_owned()));
        }
    }

    fn long_signal(strength: f64) -> AggregatedSignal {
        AggregatedSignal {
            action: Side::Long,
            strength,
            level: SignalLevel::Clear,
            dominant_timeframe: "1d".into(),
            reasons: vec!["1d: price above MAs".into()],
            stop_loss: 49_000.0,
            take_profit_1: 52_000.0,
            take_profit_2: 53_000.0,
            timestamp: Utc::now(),
        }
    }

    fn flat_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|_| Candle {
                open_time: Utc::now(),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect()
    }

    fn scheduler(
        source: Arc<dyn SignalSource>,
        market: Arc<dyn MarketData>,
        store: Arc<MemoryConfigStore>,
        sink: Arc<RecordingSink>,
    ) -> (Arc<MonitorScheduler>, Arc<PositionLedger>) {
        let clock = Arc::new(SystemClock);
        let ledger = Arc::new(PositionLedger::new(clock.clone(), 10_000.0));
        let dedup = Arc::new(SignalDeduplicator::new(3600, clock.clone()));
        let trade_cooldown = Arc::new(SignalDeduplicator::new(3600, clock));
        let sched = Arc::new(MonitorScheduler::new(
            source,
            market,
            ledger.clone(),
            dedup,
            trade_cooldown,
            store,
            sink,
            vec!["BTCUSDT".into()],
            Duration::from_millis(10),
            Duration::from_millis(10),
        ));
        (sched, ledger)
    }

    fn auto_trade_store(user: UserId) -> Arc<MemoryConfigStore> {
        let store = Arc::new(MemoryConfigStore::new());
        store.save_trading_config(
            user,
            TradingConfig {
                auto_trade: true,
                ..TradingConfig::default()
            },
        );
        store.subscribe(user, vec!["BTCUSDT".into()]);
        store
    }

    // ── Pipeline ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn pipeline_yields_nothing_when_market_is_down() {
        let pipeline = SignalPipeline::new(
            Arc::new(DownMarket),
            default_timeframes(),
            100,
            Arc::new(SystemClock),
        );
        assert!(pipeline.analyze_symbol("BTCUSDT").await.is_none());
    }

    #[tokio::test]
    async fn pipeline_yields_nothing_on_short_history() {
        let market = StaticMarket {
            price: 100.0,
            candles: flat_candles(30),
        };
        let pipeline = SignalPipeline::new(
            Arc::new(market),
            default_timeframes(),
            100,
            Arc::new(SystemClock),
        );
        assert!(pipeline.analyze_symbol("BTCUSDT").await.is_none());
    }

    #[tokio::test]
    async fn pipeline_discards_weak_totals() {
        // Flat candles score well below the emission floor
        let market = StaticMarket {
            price: 100.0,
            candles: flat_candles(100),
        };
        let pipeline = SignalPipeline::new(
            Arc::new(market),
            default_timeframes(),
            100,
            Arc::new(SystemClock),
        );
        assert!(pipeline.analyze_symbol("BTCUSDT").await.is_none());
    }

    // ── Auto-trade path ───────────────────────────────────────────────

    #[tokio::test]
    async fn strong_signal_opens_a_position() {
        let store = auto_trade_store(1);
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource {
            signal: Some(long_signal(75.0)),
        });
        let market = Arc::new(StaticMarket {
            price: 50_000.0,
            candles: vec![],
        });
        let (sched, ledger) = scheduler(source, market, store, sink);

        sched.trade_cycle().await;
        assert!(ledger.has_position(1, "BTCUSDT"));

        // Second cycle: position already open, nothing doubles up
        sched.trade_cycle().await;
        assert_eq!(ledger.positions(1).len(), 1);
    }

    #[tokio::test]
    async fn cooldown_blocks_reopening_after_a_close() {
        let store = auto_trade_store(1);
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource {
            signal: Some(long_signal(90.0)),
        });
        let market = Arc::new(StaticMarket {
            price: 50_000.0,
            candles: vec![],
        });
        let (sched, ledger) = scheduler(source, market, store, sink);

        sched.trade_cycle().await;
        assert!(ledger.has_position(1, "BTCUSDT"));

        // Position closed while the same-direction signal persists: the
        // next tick must not re-enter inside the cooldown window.
        ledger.close(1, "BTCUSDT", 50_000.0).unwrap();
        sched.trade_cycle().await;
        assert!(!ledger.has_position(1, "BTCUSDT"));
    }

    #[tokio::test]
    async fn rejected_entry_is_not_retried_every_tick() {
        let store = Arc::new(MemoryConfigStore::new());
        store.save_trading_config(
            1,
            TradingConfig {
                auto_trade: true,
                allowed_symbols: Some(vec!["ETHUSDT".into()]),
                ..TradingConfig::default()
            },
        );
        store.subscribe(1, vec!["BTCUSDT".into()]);

        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource {
            signal: Some(long_signal(90.0)),
        });
        let market = Arc::new(StaticMarket {
            price: 50_000.0,
            candles: vec![],
        });
        let (sched, ledger) = scheduler(source, market, store.clone(), sink);

        sched.trade_cycle().await;
        assert!(!ledger.has_position(1, "BTCUSDT"));

        // Symbol allowed now, but the rejected attempt consumed the window
        store.save_trading_config(
            1,
            TradingConfig {
                auto_trade: true,
                ..TradingConfig::default()
            },
        );
        sched.trade_cycle().await;
        assert!(!ledger.has_position(1, "BTCUSDT"));
    }

    #[tokio::test]
    async fn sub_70_signal_is_ignored_for_auto_trade() {
        let store = auto_trade_store(1);
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource {
            signal: Some(long_signal(65.0)),
        });
        let market = Arc::new(StaticMarket {
            price: 50_000.0,
            candles: vec![],
        });
        let (sched, ledger) = scheduler(source, market, store, sink);

        sched.trade_cycle().await;
        assert!(!ledger.has_position(1, "BTCUSDT"));
    }

    #[tokio::test]
    async fn risk_rejection_blocks_the_entry() {
        let store = Arc::new(MemoryConfigStore::new());
        store.save_trading_config(
            1,
            TradingConfig {
                auto_trade: true,
                allowed_symbols: Some(vec!["ETHUSDT".into()]),
                ..TradingConfig::default()
            },
        );
        store.subscribe(1, vec!["BTCUSDT".into()]);

        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource {
            signal: Some(long_signal(90.0)),
        });
        let market = Arc::new(StaticMarket {
            price: 50_000.0,
            candles: vec![],
        });
        let (sched, ledger) = scheduler(source, market, store, sink);

        sched.trade_cycle().await;
        assert!(!ledger.has_position(1, "BTCUSDT"));
    }

    #[tokio::test]
    async fn real_mode_users_are_skipped() {
        let store = Arc::new(MemoryConfigStore::new());
        store.save_trading_config(
            1,
            TradingConfig {
                mode: TradingMode::Real,
                auto_trade: true,
                ..TradingConfig::default()
            },
        );
        store.subscribe(1, vec!["BTCUSDT".into()]);

        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource {
            signal: Some(long_signal(90.0)),
        });
        let market = Arc::new(StaticMarket {
            price: 50_000.0,
            candles: vec![],
        });
        let (sched, ledger) = scheduler(source, market, store, sink);

        sched.trade_cycle().await;
        assert!(!ledger.has_position(1, "BTCUSDT"));
    }

    #[tokio::test]
    async fn stop_loss_closes_exactly_at_threshold() {
        let store = auto_trade_store(1);
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource { signal: None });
        // −5% on margin 100 with amount 0.02 → price 49 750
        let market = Arc::new(StaticMarket {
            price: 49_750.0,
            candles: vec![],
        });
        let (sched, ledger) = scheduler(source, market, store, sink);

        ledger.ensure_account(1);
        ledger
            .open(1, "BTCUSDT", Side::Long, 1000.0, 10, 50_000.0)
            .unwrap();

        sched.trade_cycle().await;
        assert!(!ledger.has_position(1, "BTCUSDT"));
        let snap = ledger.snapshot(1).unwrap();
        assert!((snap.balance - 9_995.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn take_profit_closes_at_threshold() {
        let store = auto_trade_store(1);
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource { signal: None });
        // +10% on margin 100 → pnl +10 → price 50 500
        let market = Arc::new(StaticMarket {
            price: 50_500.0,
            candles: vec![],
        });
        let (sched, ledger) = scheduler(source, market, store, sink);

        ledger.ensure_account(1);
        ledger
            .open(1, "BTCUSDT", Side::Long, 1000.0, 10, 50_000.0)
            .unwrap();

        sched.trade_cycle().await;
        assert!(!ledger.has_position(1, "BTCUSDT"));
        let snap = ledger.snapshot(1).unwrap();
        assert!((snap.balance - 10_010.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn small_move_leaves_position_open() {
        let store = auto_trade_store(1);
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource { signal: None });
        // −1% pnl ratio: inside both thresholds
        let market = Arc::new(StaticMarket {
            price: 49_950.0,
            candles: vec![],
        });
        let (sched, ledger) = scheduler(source, market, store, sink);

        ledger.ensure_account(1);
        ledger
            .open(1, "BTCUSDT", Side::Long, 1000.0, 10, 50_000.0)
            .unwrap();

        sched.trade_cycle().await;
        assert!(ledger.has_position(1, "BTCUSDT"));
        // mark-to-market happened
        let pos = &ledger.positions(1)[0];
        assert!((pos.pnl_ratio + 1.0).abs() < 1e-9);
    }

    // ── Broadcast + dedup ─────────────────────────────────────────────

    #[tokio::test]
    async fn scan_notifies_subscribers_once_per_cooldown() {
        let store = Arc::new(MemoryConfigStore::new());
        store.subscribe(10, vec!["BTCUSDT".into()]);
        store.subscribe(11, vec!["ALL".into()]);
        store.subscribe(12, vec!["ETHUSDT".into()]);

        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource {
            signal: Some(long_signal(80.0)),
        });
        let market = Arc::new(StaticMarket {
            price: 50_000.0,
            candles: vec![],
        });
        let (sched, _ledger) = scheduler(source, market, store, sink.clone());

        sched.scan_signals().await;
        sched.scan_signals().await; // suppressed by cooldown

        let messages = sink.messages.lock().unwrap();
        let users: Vec<UserId> = messages.iter().map(|(u, _)| *u).collect();
        assert_eq!(messages.len(), 2);
        assert!(users.contains(&10));
        assert!(users.contains(&11));
        assert!(!users.contains(&12));
        assert!(messages[0].1.contains("LONG"));
    }

    #[tokio::test]
    async fn first_scan_runs_immediately_on_start() {
        let store = Arc::new(MemoryConfigStore::new());
        store.subscribe(10, vec!["BTCUSDT".into()]);

        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource {
            signal: Some(long_signal(80.0)),
        });
        let market = Arc::new(StaticMarket {
            price: 50_000.0,
            candles: vec![],
        });
        // Intervals far longer than the test: only an immediate first tick
        // can produce this notification.
        let clock = Arc::new(SystemClock);
        let ledger = Arc::new(PositionLedger::new(clock.clone(), 10_000.0));
        let sched = Arc::new(MonitorScheduler::new(
            source,
            market,
            ledger,
            Arc::new(SignalDeduplicator::new(3600, clock.clone())),
            Arc::new(SignalDeduplicator::new(3600, clock)),
            store,
            sink.clone(),
            vec!["BTCUSDT".into()],
            Duration::from_secs(300),
            Duration::from_secs(300),
        ));
        sched.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        sched.stop().await;

        assert!(!sink.messages.lock().unwrap().is_empty());
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let store = Arc::new(MemoryConfigStore::new());
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FixedSignalSource { signal: None });
        let market = Arc::new(DownMarket);
        let (sched, _ledger) = scheduler(source, market, store, sink);

        sched.start().await;
        assert!(sched.is_running().await);
        sched.start().await; // no-op
        assert!(sched.is_running().await);

        tokio::time::sleep(Duration::from_millis(30)).await;

        sched.stop().await;
        assert!(!sched.is_running().await);
        sched.stop().await; // no-op
        assert!(!sched.is_running().await);

        // restartable after a stop
        sched.start().await;
        assert!(sched.is_running().await);
        sched.stop().await;
    }
}
