/// ledger.rs — Simulated position ledger
///
/// Owns every simulated account: balance, reserved margin, open positions,
/// trade history and realized/unrealized pnl. All mutation funnels through
/// this module. Accounts are held behind per-user mutexes inside a shared
/// map, so concurrent calls for the same user serialize while different
/// users proceed independently.
///
/// Margin model (documented approximation, not exchange-accurate):
///   margin            = notional / leverage
///   liquidation LONG  = entry × (1 − 0.9 / leverage)
///   liquidation SHORT = entry × (1 + 0.9 / leverage)

use std::sync::{Arc, Mutex, RwLock};

use ahash::AHashMap;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::clock::Clock;
use crate::error::LedgerError;
use crate::models::{
    AccountSnapshot, CloseReport, Position, Side, TradeKind, TradeOutcome, TradeRecord, UserId,
};
use crate::risk::RiskView;

/// Liquidation sits at 90% of the inverse-leverage distance from entry.
const LIQ_FACTOR: f64 = 0.9;

struct Account {
    balance: f64,
    available: f64,
    positions: AHashMap<String, Position>,
    trade_history: Vec<TradeRecord>,
    daily_pnl: f64,
    total_pnl: f64,
    total_trades: u32,
    winning_trades: u32,
    win_rate: f64,
    /// UTC day the daily counters refer to
    day: NaiveDate,
}

impl Account {
    fn new(initial_balance: f64, day: NaiveDate) -> Self {
        Self {
            balance: initial_balance,
            available: initial_balance,
            positions: AHashMap::new(),
            trade_history: Vec::new(),
            daily_pnl: 0.0,
            total_pnl: 0.0,
            total_trades: 0,
            winning_trades: 0,
            win_rate: 0.0,
            day,
        }
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.day != today {
            self.day = today;
            self.daily_pnl = 0.0;
        }
    }

    fn today_trades(&self, today: NaiveDate) -> u32 {
        self.trade_history
            .iter()
            .filter(|t| t.timestamp.date_naive() == today)
            .count() as u32
    }
}

pub struct PositionLedger {
    clock: Arc<dyn Clock>,
    initial_balance: f64,
    accounts: RwLock<AHashMap<UserId, Arc<Mutex<Account>>>>,
}

impl PositionLedger {
    pub fn new(clock: Arc<dyn Clock>, initial_balance: f64) -> Self {
        Self {
            clock,
            initial_balance,
            accounts: RwLock::new(AHashMap::new()),
        }
    }

    /// Create the user's simulated account if it does not exist yet.
    /// Each account gets fresh, independent containers.
    pub fn ensure_account(&self, user: UserId) {
        let mut accounts = self.accounts.write().expect("account map poisoned");
        accounts.entry(user).or_insert_with(|| {
            Arc::new(Mutex::new(Account::new(
                self.initial_balance,
                self.clock.now().date_naive(),
            )))
        });
    }

    fn account(&self, user: UserId) -> Result<Arc<Mutex<Account>>, LedgerError> {
        self.accounts
            .read()
            .expect("account map poisoned")
            .get(&user)
            .cloned()
            .ok_or(LedgerError::NoAccount(user))
    }

    /// Open a position. An opposite-side request against an existing
    /// position collapses to a close of that position (net-position
    /// semantics); a same-side request fails with `PositionExists`.
    pub fn open(
        &self,
        user: UserId,
        symbol: &str,
        side: Side,
        notional: f64,
        leverage: u32,
        price: f64,
    ) -> Result<TradeOutcome, LedgerError> {
        let now = self.clock.now();
        let account = self.account(user)?;
        let mut acc = account.lock().expect("account poisoned");
        acc.roll_day(now.date_naive());

        let margin = notional / leverage as f64;
        if margin > acc.available {
            return Err(LedgerError::InsufficientMargin {
                needed: margin,
                available: acc.available,
            });
        }

        if let Some(existing) = acc.positions.get(symbol) {
            if existing.side == side {
                return Err(LedgerError::PositionExists {
                    symbol: symbol.to_owned(),
                    side,
                });
            }
            let report = close_locked(&mut acc, symbol, price, now)?;
            return Ok(TradeOutcome::Closed(report));
        }

        let liquidation_price = match side {
            Side::Long => price * (1.0 - LIQ_FACTOR / leverage as f64),
            Side::Short => price * (1.0 + LIQ_FACTOR / leverage as f64),
        };

        let position = Position {
            symbol: symbol.to_owned(),
            side,
            amount: notional / price,
            avg_price: price,
            current_price: price,
            margin,
            leverage,
            liquidation_price,
            pnl: 0.0,
            pnl_ratio: 0.0,
            opened_at: now,
        };

        acc.available -= margin;
        acc.total_trades += 1;
        acc.trade_history.push(TradeRecord {
            timestamp: now,
            symbol: symbol.to_owned(),
            side,
            price,
            notional,
            leverage,
            pnl: None,
            kind: TradeKind::Open,
        });
        acc.positions.insert(symbol.to_owned(), position.clone());

        info!(user, symbol, %side, notional, leverage, price, "position opened");
        Ok(TradeOutcome::Opened(position))
    }

    /// Close the open position in `symbol` at `exit_price`, realizing pnl.
    pub fn close(
        &self,
        user: UserId,
        symbol: &str,
        exit_price: f64,
    ) -> Result<CloseReport, LedgerError> {
        let now = self.clock.now();
        let account = self.account(user)?;
        let mut acc = account.lock().expect("account poisoned");
        acc.roll_day(now.date_naive());

        let report = close_locked(&mut acc, symbol, exit_price, now)?;
        info!(
            user,
            symbol,
            exit_price,
            pnl = report.pnl,
            "position closed"
        );
        Ok(report)
    }

    /// Mark the open position to `current_price` without touching
    /// balance/available (unrealized only).
    pub fn refresh_unrealized(
        &self,
        user: UserId,
        symbol: &str,
        current_price: f64,
    ) -> Result<Position, LedgerError> {
        let account = self.account(user)?;
        let mut acc = account.lock().expect("account poisoned");

        let position = acc
            .positions
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::NoPosition {
                symbol: symbol.to_owned(),
            })?;

        position.current_price = current_price;
        position.pnl = unrealized_pnl(position, current_price);
        position.pnl_ratio = if position.margin > 0.0 {
            position.pnl / position.margin * 100.0
        } else {
            0.0
        };

        Ok(position.clone())
    }

    pub fn positions(&self, user: UserId) -> Vec<Position> {
        match self.account(user) {
            Ok(account) => {
                let acc = account.lock().expect("account poisoned");
                acc.positions.values().cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn has_position(&self, user: UserId, symbol: &str) -> bool {
        match self.account(user) {
            Ok(account) => account
                .lock()
                .expect("account poisoned")
                .positions
                .contains_key(symbol),
            Err(_) => false,
        }
    }

    pub fn snapshot(&self, user: UserId) -> Option<AccountSnapshot> {
        let account = self.account(user).ok()?;
        let acc = account.lock().expect("account poisoned");
        Some(AccountSnapshot {
            balance: acc.balance,
            available: acc.available,
            open_positions: acc.positions.len(),
            daily_pnl: acc.daily_pnl,
            total_pnl: acc.total_pnl,
            total_trades: acc.total_trades,
            win_rate: acc.win_rate,
        })
    }

    pub fn trade_history(&self, user: UserId) -> Vec<TradeRecord> {
        match self.account(user) {
            Ok(account) => account
                .lock()
                .expect("account poisoned")
                .trade_history
                .clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Consistent snapshot for the risk gate, taken under one lock.
    pub fn risk_view(&self, user: UserId) -> RiskView {
        let today = self.clock.now().date_naive();
        match self.account(user) {
            Ok(account) => {
                let mut acc = account.lock().expect("account poisoned");
                acc.roll_day(today);
                RiskView {
                    open_exposure: acc
                        .positions
                        .values()
                        .map(|p| p.margin * p.leverage as f64)
                        .sum(),
                    today_trades: acc.today_trades(today),
                    daily_pnl: acc.daily_pnl,
                }
            }
            Err(_) => RiskView::default(),
        }
    }

    /// Performance report over the account's realized trade log.
    pub fn performance(&self, user: UserId) -> Option<PerfStats> {
        let account = self.account(user).ok()?;
        let acc = account.lock().expect("account poisoned");

        let closed_pnls: Vec<f64> = acc
            .trade_history
            .iter()
            .filter_map(|t| t.pnl)
            .collect();

        Some(PerfStats {
            total_trades: acc.total_trades,
            winning_trades: acc.winning_trades,
            win_rate: acc.win_rate,
            total_pnl: acc.total_pnl,
            daily_pnl: acc.daily_pnl,
            balance: acc.balance,
            roi: (acc.balance - self.initial_balance) / self.initial_balance * 100.0,
            max_drawdown: max_drawdown(self.initial_balance, &closed_pnls),
            sharpe: sharpe_ratio(self.initial_balance, &closed_pnls),
            profit_factor: profit_factor(&closed_pnls),
        })
    }
}

fn unrealized_pnl(position: &Position, price: f64) -> f64 {
    match position.side {
        Side::Long => (price - position.avg_price) * position.amount,
        Side::Short => (position.avg_price - price) * position.amount,
    }
}

/// Close under an already-held account lock. Shared by `close` and the
/// reverse-side collapse inside `open`.
fn close_locked(
    acc: &mut Account,
    symbol: &str,
    exit_price: f64,
    now: DateTime<Utc>,
) -> Result<CloseReport, LedgerError> {
    let position = acc
        .positions
        .remove(symbol)
        .ok_or_else(|| LedgerError::NoPosition {
            symbol: symbol.to_owned(),
        })?;

    let pnl = unrealized_pnl(&position, exit_price);

    acc.balance += pnl;
    acc.available += position.margin + pnl;
    acc.total_pnl += pnl;
    acc.daily_pnl += pnl;
    if pnl > 0.0 {
        acc.winning_trades += 1;
    }
    acc.win_rate = if acc.total_trades > 0 {
        acc.winning_trades as f64 / acc.total_trades as f64 * 100.0
    } else {
        0.0
    };

    acc.trade_history.push(TradeRecord {
        timestamp: now,
        symbol: symbol.to_owned(),
        side: position.side,
        price: exit_price,
        notional: position.amount * exit_price,
        leverage: position.leverage,
        pnl: Some(pnl),
        kind: TradeKind::Close,
    });

    Ok(CloseReport {
        symbol: symbol.to_owned(),
        side: position.side,
        exit_price,
        pnl,
        balance: acc.balance,
    })
}

// ── Performance statistics ────────────────────────────────────────────────

/// Realized performance over an account's closed trades.
#[derive(Debug, Clone)]
pub struct PerfStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub daily_pnl: f64,
    pub balance: f64,
    /// Percent return on the initial balance
    pub roi: f64,
    /// Worst peak-to-trough decline over the realized equity walk, percent
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub profit_factor: f64,
}

impl std::fmt::Display for PerfStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  SIMULATED ACCOUNT — PERFORMANCE REPORT")?;
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  Trades         : {}", self.total_trades)?;
        writeln!(f, "  Winning        : {}", self.winning_trades)?;
        writeln!(f, "  Win Rate       : {:.2}%", self.win_rate)?;
        writeln!(f, "  Total PnL      : ${:.2}", self.total_pnl)?;
        writeln!(f, "  Daily PnL      : ${:.2}", self.daily_pnl)?;
        writeln!(f, "  Balance        : ${:.2}", self.balance)?;
        writeln!(f, "  ROI            : {:.2}%", self.roi)?;
        writeln!(f, "  Max Drawdown   : {:.2}%", self.max_drawdown)?;
        writeln!(f, "  Sharpe Ratio   : {:.3}", self.sharpe)?;
        writeln!(f, "  Profit Factor  : {:.3}", self.profit_factor)?;
        writeln!(f, "════════════════════════════════════════════")
    }
}

/// Walk realized pnls from the initial balance, tracking the worst decline
/// from the running peak (positive percent).
fn max_drawdown(initial: f64, pnls: &[f64]) -> f64 {
    let mut balance = initial;
    let mut peak = initial;
    let mut max_dd = 0.0f64;

    for pnl in pnls {
        balance += pnl;
        if balance > peak {
            peak = balance;
        }
        let dd = (peak - balance) / peak * 100.0;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}

/// Simplified per-trade Sharpe, annualised assuming ~10 trades a day.
fn sharpe_ratio(initial: f64, pnls: &[f64]) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = pnls.iter().map(|p| p / initial).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std = var.sqrt();
    if std < 1e-12 {
        return 0.0;
    }
    let periods_per_year = 252.0 * 10.0;
    (mean * periods_per_year) / (std * periods_per_year.sqrt())
}

fn profit_factor(pnls: &[f64]) -> f64 {
    let total_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let total_loss: f64 = pnls.iter().filter(|p| **p <= 0.0).map(|p| p.abs()).sum();
    if total_loss == 0.0 {
        return if total_profit > 0.0 { total_profit } else { 0.0 };
    }
    total_profit / total_loss
}
