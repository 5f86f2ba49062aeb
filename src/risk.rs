/// risk.rs — Pre-trade risk gate
///
/// Four checks evaluated strictly in order; the first failure wins. The
/// gate is advisory-then-binding: callers must not open unless the check
/// passed for the same parameters in the same cycle.

use tracing::debug;

use crate::config::TradingConfig;
use crate::error::RiskRejection;
use crate::models::Side;

/// Ledger-derived view of the account, taken under one lock so the gate
/// sees a consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct RiskView {
    /// Σ(open position margin × leverage)
    pub open_exposure: f64,
    /// Trade-history entries dated today (UTC)
    pub today_trades: u32,
    pub daily_pnl: f64,
}

pub fn check(
    cfg: &TradingConfig,
    view: &RiskView,
    symbol: &str,
    side: Side,
    notional: f64,
) -> Result<(), RiskRejection> {
    debug!(symbol, %side, notional, "risk check");

    if let Some(allowed) = &cfg.allowed_symbols {
        if !allowed.is_empty() && !allowed.iter().any(|s| s == symbol) {
            return Err(RiskRejection::SymbolNotAllowed(symbol.to_owned()));
        }
    }

    if view.open_exposure + notional > cfg.max_position_size {
        return Err(RiskRejection::MaxPositionSize {
            limit: cfg.max_position_size,
        });
    }

    if view.today_trades >= cfg.max_daily_trades {
        return Err(RiskRejection::DailyTradeLimit {
            limit: cfg.max_daily_trades,
        });
    }

    if view.daily_pnl < -cfg.max_daily_loss {
        return Err(RiskRejection::DailyLossLimit {
            limit: cfg.max_daily_loss,
        });
    }

    Ok(())
}
