//! Trade lifecycle manager: open, pending triggers, modify, close, cancel,
//! and the stop-out sweep.
//!
//! Every account mutation runs under that account's lock; the margin
//! validation and the trade insert happen inside one critical section, so
//! two concurrent opens cannot both pass the same free-margin check.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::credit::CreditService;
use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::locks::AccountLocks;
use crate::models::{
    CloseReason, CreditLedgerEntry, LedgerKind, OrderType, Trade, TradeSide, TradeStatus,
    TradingAccount,
};
use crate::outbox::Outbox;
use crate::pricing::{contract_size, session_open, PriceCache, Quote};

use super::config::EngineConfig;
use super::margin::{close_price, direction_pnl, execution_price, required_margin, round2};

/// Request to open a trade.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub account_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Trigger price; required for pending order types.
    pub pending_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Opened by the replication engine on a follower account.
    pub is_copy: bool,
    /// Fill at this price instead of the cached quote; replication passes
    /// the master's execution price here for price parity.
    pub price_override: Option<Decimal>,
}

impl OpenRequest {
    pub fn market(account_id: &str, symbol: &str, side: TradeSide, quantity: Decimal) -> Self {
        Self {
            account_id: account_id.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            pending_price: None,
            stop_loss: None,
            take_profit: None,
            is_copy: false,
            price_override: None,
        }
    }
}

/// Point-in-time view of an account's exposure. Equity is derived here and
/// never persisted.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub account: TradingAccount,
    pub open_trades: Vec<Trade>,
    pub floating_pnl: Decimal,
    pub used_margin: Decimal,
    pub equity: Decimal,
    pub free_margin: Decimal,
    pub margin_level: Option<Decimal>,
}

/// Everything a price tick caused for one symbol.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Pending orders that fired and opened.
    pub triggered: Vec<Trade>,
    /// Pending orders cancelled at trigger (failed re-validation).
    pub cancelled: Vec<Trade>,
    /// Trades closed by stop loss or take profit.
    pub closed: Vec<Trade>,
    pub stop_outs: Vec<StopOutReport>,
}

/// Result of one stop-out sweep.
#[derive(Debug)]
pub struct StopOutReport {
    pub account_id: String,
    pub equity: Decimal,
    pub closed: Vec<Trade>,
    /// Trade ids whose close failed; the sweep continued past them.
    pub failed: Vec<String>,
}

/// The trade state machine.
pub struct TradeEngine {
    db: Arc<Database>,
    prices: Arc<PriceCache>,
    locks: Arc<AccountLocks>,
    credit: Arc<CreditService>,
    outbox: Arc<Outbox>,
    config: EngineConfig,
}

impl TradeEngine {
    pub fn new(
        db: Arc<Database>,
        prices: Arc<PriceCache>,
        locks: Arc<AccountLocks>,
        credit: Arc<CreditService>,
        outbox: Arc<Outbox>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            prices,
            locks,
            credit,
            outbox,
            config,
        }
    }

    // ==================== Open ====================

    /// Open a market order (fills immediately) or place a pending order.
    pub async fn open_trade(&self, req: OpenRequest) -> EngineResult<Trade> {
        let symbol = req.symbol.to_uppercase();
        let quantity = req.quantity.round_dp(2);

        if quantity < self.config.min_lot {
            return Err(EngineError::Validation(format!(
                "quantity {} below minimum lot {}",
                quantity, self.config.min_lot
            )));
        }
        if quantity > self.config.max_lot {
            return Err(EngineError::Validation(format!(
                "quantity {} above maximum lot {}",
                quantity, self.config.max_lot
            )));
        }
        if req.order_type.is_pending() {
            let price = req
                .pending_price
                .ok_or_else(|| EngineError::Validation("pending order needs a price".to_string()))?;
            if price <= Decimal::ZERO {
                return Err(EngineError::Validation("pending price must be positive".to_string()));
            }
            if let Some(implied) = req.order_type.implied_side() {
                if implied != req.side {
                    return Err(EngineError::Validation(format!(
                        "{} order cannot be a {}",
                        req.order_type.as_str(),
                        req.side.as_str()
                    )));
                }
            }
        }

        if !session_open(&symbol, Utc::now()) {
            return Err(EngineError::MarketClosed(format!("{symbol} session is closed")));
        }
        // Replication fills at the master's price; everyone else needs a
        // live two-sided quote.
        let quote = if req.price_override.is_some() {
            None
        } else {
            Some(self.live_quote(&symbol).await?)
        };

        let _guard = self.locks.lock(&req.account_id).await;

        let mut account = self.load_account(&req.account_id).await?;
        if !account.is_active() {
            return Err(EngineError::AccountInactive(account.id));
        }
        if account.balance + account.credit <= Decimal::ZERO {
            return Err(EngineError::Validation("account has no funds".to_string()));
        }

        let active = self.db.active_trades_for_account(&req.account_id).await?;
        if active.len() >= self.config.max_open_trades {
            return Err(EngineError::Validation(format!(
                "open trade cap {} reached",
                self.config.max_open_trades
            )));
        }
        let total_lots: Decimal = active.iter().map(|t| t.quantity).sum();
        if total_lots + quantity > self.config.max_total_lots {
            return Err(EngineError::Validation(format!(
                "total lot cap {} exceeded",
                self.config.max_total_lots
            )));
        }

        let contract = contract_size(&symbol);
        let fill_price = if req.order_type.is_pending() {
            req.pending_price.unwrap_or_default()
        } else if let Some(px) = req.price_override {
            px
        } else {
            execution_price(
                req.side,
                &quote.unwrap_or_else(|| Quote::new(Decimal::ZERO, Decimal::ZERO)),
                self.config.spread_value,
                self.config.spread_type,
            )
        };

        let margin = required_margin(quantity, fill_price, account.leverage, contract);
        let open = self.db.open_trades_for_account(&req.account_id).await?;
        let (floating, used) = self.mark_trades(&open).await;
        let equity = account.equity(floating);
        let free_margin = equity - used;
        if margin > free_margin {
            return Err(EngineError::InsufficientMargin {
                required: margin,
                free: free_margin,
            });
        }
        if margin > equity {
            return Err(EngineError::InsufficientEquity {
                required: margin,
                equity,
            });
        }

        let mut trade = Trade::new(
            req.account_id.clone(),
            symbol.clone(),
            req.side,
            req.order_type,
            quantity,
            fill_price,
            account.leverage,
            contract,
            req.is_copy,
        );
        trade.stop_loss = req.stop_loss;
        trade.take_profit = req.take_profit;
        trade.margin_used = margin;

        // Market-order commission hits the wallet up front; copy trades
        // settle theirs later out of the profit split.
        if !req.order_type.is_pending()
            && !req.is_copy
            && self.config.commission_per_lot > Decimal::ZERO
        {
            let commission = round2(self.config.commission_per_lot * quantity);
            if commission > account.balance {
                return Err(EngineError::Validation(
                    "balance cannot cover the open commission".to_string(),
                ));
            }
            account.balance -= commission;
            trade.commission = commission;
            self.db.update_account(&account).await?;
        }

        self.db.insert_trade(&trade).await?;

        if req.is_copy && trade.is_open() {
            let entry = CreditLedgerEntry::new(
                trade.account_id.clone(),
                None,
                Some(trade.id.clone()),
                LedgerKind::MarginHold,
                Decimal::ZERO,
                account.credit,
                Decimal::ZERO,
                Decimal::ZERO,
                format!("margin {} reserved for copy trade", margin),
            );
            self.db.insert_ledger_entry(&entry).await?;
        }

        info!(
            trade = %trade.id,
            account = %trade.account_id,
            symbol = %trade.symbol,
            side = ?trade.side,
            lots = %trade.quantity,
            price = %trade.open_price,
            status = ?trade.status,
            "Trade opened"
        );
        Ok(trade)
    }

    // ==================== Modify ====================

    /// Set or clear SL/TP levels on an open trade. `None` clears a level.
    pub async fn modify_trade(
        &self,
        trade_id: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> EngineResult<Trade> {
        let probe = self.load_trade(trade_id).await?;
        let _guard = self.locks.lock(&probe.account_id).await;

        let mut trade = self.load_trade(trade_id).await?;
        if trade.status != TradeStatus::Open {
            return Err(EngineError::TradeState(format!(
                "trade {} is {}, not OPEN",
                trade.id,
                trade.status.as_str()
            )));
        }

        trade.stop_loss = stop_loss;
        trade.take_profit = take_profit;
        self.db.update_trade(&trade).await?;
        Ok(trade)
    }

    /// Accrue overnight swap on an open trade.
    pub async fn apply_swap(&self, trade_id: &str, amount: Decimal) -> EngineResult<Trade> {
        let probe = self.load_trade(trade_id).await?;
        let _guard = self.locks.lock(&probe.account_id).await;

        let mut trade = self.load_trade(trade_id).await?;
        if trade.status != TradeStatus::Open {
            return Err(EngineError::TradeState(format!(
                "trade {} is {}, not OPEN",
                trade.id,
                trade.status.as_str()
            )));
        }
        trade.swap += amount;
        self.db.update_trade(&trade).await?;
        Ok(trade)
    }

    // ==================== Close ====================

    /// Close an open trade. The transition is terminal; closing an already
    /// Closed/Cancelled trade is rejected.
    ///
    /// Non-copy trades apply realized pnl to the wallet, spilling a loss
    /// beyond the balance into credit (balance floors at zero first). Copy
    /// trades skip the wallet mutation entirely: the credit service owns
    /// their distribution and runs immediately after the close persists.
    pub async fn close_trade(
        &self,
        trade_id: &str,
        reason: CloseReason,
        price_override: Option<Decimal>,
    ) -> EngineResult<Trade> {
        let probe = self.load_trade(trade_id).await?;
        if probe.status == TradeStatus::Pending {
            if reason == CloseReason::Cancelled {
                return self.cancel_pending(trade_id).await;
            }
            return Err(EngineError::TradeState(format!(
                "trade {} is PENDING; cancel it instead",
                probe.id
            )));
        }

        let close_px = match price_override {
            Some(px) => px,
            None => {
                let quote = self.live_quote(&probe.symbol).await?;
                close_price(probe.side, &quote)
            }
        };

        let closed = {
            let _guard = self.locks.lock(&probe.account_id).await;

            let mut trade = self.load_trade(trade_id).await?;
            if trade.status.is_terminal() {
                return Err(EngineError::TradeState(format!(
                    "trade {} already {}",
                    trade.id,
                    trade.status.as_str()
                )));
            }

            let close_commission = if self.config.close_commission {
                round2(self.config.commission_per_lot * trade.quantity)
            } else {
                Decimal::ZERO
            };
            let realized = direction_pnl(
                trade.side,
                trade.open_price,
                close_px,
                trade.quantity,
                trade.contract_size,
            ) - trade.swap
                - close_commission;

            trade.commission += close_commission;
            trade.close_price = Some(close_px);
            trade.realized_pnl = Some(realized);
            trade.status = TradeStatus::Closed;
            trade.close_reason = Some(reason);
            trade.closed_at = Some(Utc::now());
            self.db.update_trade(&trade).await?;

            let mut account = self.load_account(&trade.account_id).await?;
            if trade.is_copy {
                let entry = CreditLedgerEntry::new(
                    trade.account_id.clone(),
                    None,
                    Some(trade.id.clone()),
                    LedgerKind::MarginRelease,
                    Decimal::ZERO,
                    account.credit,
                    Decimal::ZERO,
                    Decimal::ZERO,
                    format!("margin {} released on copy trade close", trade.margin_used),
                );
                self.db.insert_ledger_entry(&entry).await?;
            } else {
                account.balance += realized;
                if account.balance < Decimal::ZERO {
                    // Balance floors at zero; the overshoot burns credit.
                    let spill = -account.balance;
                    account.balance = Decimal::ZERO;
                    let consumed = spill.min(account.credit);
                    let credit_before = account.credit;
                    account.credit -= consumed;
                    if consumed > Decimal::ZERO {
                        let entry = CreditLedgerEntry::new(
                            trade.account_id.clone(),
                            None,
                            Some(trade.id.clone()),
                            LedgerKind::TradeLoss,
                            -consumed,
                            credit_before,
                            Decimal::ZERO,
                            Decimal::ZERO,
                            format!("loss beyond balance absorbed by credit on {}", trade.symbol),
                        );
                        self.db.insert_ledger_entry(&entry).await?;
                    }
                }
                self.db.update_account(&account).await?;
            }

            info!(
                trade = %trade.id,
                account = %trade.account_id,
                reason = ?reason,
                close_price = %close_px,
                pnl = %realized,
                "Trade closed"
            );
            trade
        };

        // Copy-trade distribution runs outside the account lock; a failure
        // leaves the copy trade unsettled for the reconciliation pass.
        if closed.is_copy {
            if let Err(e) = self.credit.settle_copy_close(&closed).await {
                warn!(trade = %closed.id, error = %e, "Settlement deferred to reconciliation");
            }
        }
        if let Err(e) = self.outbox.enqueue_trade_closed(&closed).await {
            warn!(trade = %closed.id, error = %e, "Failed to enqueue close event");
        }

        Ok(closed)
    }

    /// Cancel a pending order. Margin was never charged.
    pub async fn cancel_pending(&self, trade_id: &str) -> EngineResult<Trade> {
        let probe = self.load_trade(trade_id).await?;
        let _guard = self.locks.lock(&probe.account_id).await;

        let mut trade = self.load_trade(trade_id).await?;
        if trade.status != TradeStatus::Pending {
            return Err(EngineError::TradeState(format!(
                "trade {} is {}, not PENDING",
                trade.id,
                trade.status.as_str()
            )));
        }
        trade.status = TradeStatus::Cancelled;
        trade.close_reason = Some(CloseReason::Cancelled);
        trade.closed_at = Some(Utc::now());
        self.db.update_trade(&trade).await?;

        info!(trade = %trade.id, "Pending order cancelled");
        Ok(trade)
    }

    // ==================== Ticks ====================

    /// Process one price tick for a symbol: fire pending orders, enforce
    /// SL/TP, then run the margin-safety check on every exposed account.
    pub async fn process_tick(&self, symbol: &str) -> EngineResult<TickReport> {
        let symbol = symbol.to_uppercase();
        let quote = self.live_quote(&symbol).await?;
        let mut report = TickReport::default();

        for trade in self.db.pending_trades_for_symbol(&symbol).await? {
            if !pending_triggered(&trade, &quote) {
                continue;
            }
            match self.trigger_pending(&trade.id, &quote).await {
                Ok(t) if t.status == TradeStatus::Open => report.triggered.push(t),
                Ok(t) => report.cancelled.push(t),
                Err(e) => warn!(trade = %trade.id, error = %e, "Pending trigger failed"),
            }
        }

        for trade in self.db.open_trades_for_symbol(&symbol).await? {
            let market_px = close_price(trade.side, &quote);
            let reason = if trade.stop_loss_hit(market_px) {
                Some(CloseReason::StopLoss)
            } else if trade.take_profit_hit(market_px) {
                Some(CloseReason::TakeProfit)
            } else {
                None
            };
            if let Some(reason) = reason {
                match self.close_trade(&trade.id, reason, None).await {
                    Ok(t) => report.closed.push(t),
                    Err(e) => warn!(trade = %trade.id, error = %e, "Protective close failed"),
                }
            }
        }

        let mut checked = HashSet::new();
        for trade in self.db.open_trades_for_symbol(&symbol).await? {
            if checked.insert(trade.account_id.clone()) {
                if let Some(sweep) = self.stop_out_check(&trade.account_id).await? {
                    report.stop_outs.push(sweep);
                }
            }
        }

        Ok(report)
    }

    /// Fire one pending order: re-validate margin at the fill price, then
    /// either open at the triggering side's live price or cancel.
    async fn trigger_pending(&self, trade_id: &str, quote: &Quote) -> EngineResult<Trade> {
        let probe = self.load_trade(trade_id).await?;
        let _guard = self.locks.lock(&probe.account_id).await;

        let mut trade = self.load_trade(trade_id).await?;
        if trade.status != TradeStatus::Pending {
            return Err(EngineError::TradeState(format!(
                "trade {} is {}, not PENDING",
                trade.id,
                trade.status.as_str()
            )));
        }

        let fill = match trade.side {
            TradeSide::Buy => quote.ask,
            TradeSide::Sell => quote.bid,
        };
        let margin = required_margin(trade.quantity, fill, trade.leverage, trade.contract_size);
        let snapshot = self.snapshot(&trade.account_id).await?;

        if !snapshot.account.is_active()
            || margin > snapshot.free_margin
            || margin > snapshot.equity
        {
            trade.status = TradeStatus::Cancelled;
            trade.close_reason = Some(CloseReason::Cancelled);
            trade.closed_at = Some(Utc::now());
            self.db.update_trade(&trade).await?;
            warn!(
                trade = %trade.id,
                required = %margin,
                free = %snapshot.free_margin,
                "Pending order cancelled at trigger"
            );
            return Ok(trade);
        }

        trade.status = TradeStatus::Open;
        trade.open_price = fill;
        trade.margin_used = margin;
        self.db.update_trade(&trade).await?;

        info!(trade = %trade.id, price = %fill, "Pending order triggered");
        Ok(trade)
    }

    // ==================== Stop-out ====================

    /// Force-liquidate an account when equity, free margin, or margin level
    /// breaches the floor. The sweep runs to completion even when single
    /// closes fail, then floors a still-negative balance at zero.
    pub async fn stop_out_check(&self, account_id: &str) -> EngineResult<Option<StopOutReport>> {
        let snapshot = {
            let _guard = self.locks.lock(account_id).await;
            self.snapshot(account_id).await?
        };
        if snapshot.open_trades.is_empty() {
            return Ok(None);
        }

        let level_breached = snapshot
            .margin_level
            .map(|level| level <= self.config.stop_out_level_pct)
            .unwrap_or(false);
        if snapshot.equity > Decimal::ZERO
            && snapshot.free_margin >= Decimal::ZERO
            && !level_breached
        {
            return Ok(None);
        }

        warn!(
            account = %account_id,
            equity = %snapshot.equity,
            free_margin = %snapshot.free_margin,
            margin_level = ?snapshot.margin_level,
            "Stop-out triggered"
        );

        let mut closed = Vec::new();
        let mut failed = Vec::new();
        for trade in &snapshot.open_trades {
            // Fall back to the open price when the feed is gone; the sweep
            // must still complete.
            let px = match self.prices.get(&trade.symbol).await {
                Some(q) => close_price(trade.side, &q),
                None => trade.open_price,
            };
            match self.close_trade(&trade.id, CloseReason::StopOut, Some(px)).await {
                Ok(t) => closed.push(t),
                Err(e) => {
                    warn!(trade = %trade.id, error = %e, "Stop-out close failed");
                    failed.push(trade.id.clone());
                }
            }
        }

        {
            let _guard = self.locks.lock(account_id).await;
            let mut account = self.load_account(account_id).await?;
            if account.balance < Decimal::ZERO {
                account.balance = Decimal::ZERO;
                self.db.update_account(&account).await?;
            }
        }

        Ok(Some(StopOutReport {
            account_id: account_id.to_string(),
            equity: snapshot.equity,
            closed,
            failed,
        }))
    }

    /// Close everything and reset the wallet (demo accounts).
    pub async fn reset_account(&self, account_id: &str, balance: Decimal) -> EngineResult<usize> {
        let mut closed = 0;
        for trade in self.db.open_trades_for_account(account_id).await? {
            let px = match self.prices.get(&trade.symbol).await {
                Some(q) => close_price(trade.side, &q),
                None => trade.open_price,
            };
            match self.close_trade(&trade.id, CloseReason::DemoReset, Some(px)).await {
                Ok(_) => closed += 1,
                Err(e) => warn!(trade = %trade.id, error = %e, "Reset close failed"),
            }
        }
        for trade in self.db.active_trades_for_account(account_id).await? {
            if trade.status == TradeStatus::Pending {
                if let Err(e) = self.cancel_pending(&trade.id).await {
                    warn!(trade = %trade.id, error = %e, "Reset cancel failed");
                }
            }
        }

        let _guard = self.locks.lock(account_id).await;
        let mut account = self.load_account(account_id).await?;
        account.balance = balance;
        self.db.update_account(&account).await?;
        Ok(closed)
    }

    // ==================== Views ====================

    /// Locked snapshot for external callers.
    pub async fn account_snapshot(&self, account_id: &str) -> EngineResult<AccountSnapshot> {
        let _guard = self.locks.lock(account_id).await;
        self.snapshot(account_id).await
    }

    /// Unlocked snapshot; callers hold the account lock where it matters.
    pub(crate) async fn snapshot(&self, account_id: &str) -> EngineResult<AccountSnapshot> {
        let account = self.load_account(account_id).await?;
        let open_trades = self.db.open_trades_for_account(account_id).await?;
        let (floating_pnl, used_margin) = self.mark_trades(&open_trades).await;
        let equity = account.equity(floating_pnl);
        Ok(AccountSnapshot {
            free_margin: equity - used_margin,
            margin_level: account.margin_level(floating_pnl, used_margin),
            equity,
            floating_pnl,
            used_margin,
            open_trades,
            account,
        })
    }

    /// Sum floating pnl and used margin across open trades; trades without a
    /// live quote contribute no floating pnl.
    async fn mark_trades(&self, trades: &[Trade]) -> (Decimal, Decimal) {
        let mut floating = Decimal::ZERO;
        let mut used = Decimal::ZERO;
        for trade in trades {
            used += trade.margin_used;
            if let Some(quote) = self.prices.get(&trade.symbol).await {
                floating += trade.floating_pnl(close_price(trade.side, &quote));
            }
        }
        (floating, used)
    }

    async fn live_quote(&self, symbol: &str) -> EngineResult<Quote> {
        self.prices
            .get(symbol)
            .await
            .ok_or_else(|| EngineError::MarketClosed(format!("no live quote for {symbol}")))
    }

    async fn load_account(&self, account_id: &str) -> EngineResult<TradingAccount> {
        self.db
            .get_account(account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {account_id}")))
    }

    async fn load_trade(&self, trade_id: &str) -> EngineResult<Trade> {
        self.db
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("trade {trade_id}")))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Whether a pending order fires on this quote. Limit-style orders fire
/// when the market falls to or through their price, stop-style when it
/// rises to or through it; buys trigger off the ask, sells off the bid.
fn pending_triggered(trade: &Trade, quote: &Quote) -> bool {
    match trade.order_type {
        OrderType::BuyLimit => quote.ask <= trade.open_price,
        OrderType::SellStop => quote.bid <= trade.open_price,
        OrderType::BuyStop => quote.ask >= trade.open_price,
        OrderType::SellLimit => quote.bid >= trade.open_price,
        OrderType::Market => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct Fixture {
        db: Arc<Database>,
        prices: Arc<PriceCache>,
        engine: TradeEngine,
    }

    // Crypto symbol keeps the session calendar out of the way.
    const SYMBOL: &str = "BTCUSD";

    async fn fixture(config: EngineConfig) -> Fixture {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let prices = Arc::new(PriceCache::new(config.price_ttl_secs));
        let locks = Arc::new(AccountLocks::new());
        let credit = Arc::new(CreditService::new(db.clone(), locks.clone(), config.clone()));
        let outbox = Arc::new(Outbox::new(db.clone()));
        let engine = TradeEngine::new(db.clone(), prices.clone(), locks, credit, outbox, config);
        Fixture { db, prices, engine }
    }

    async fn account(fx: &Fixture, balance: Decimal, credit: Decimal) -> TradingAccount {
        let acc = TradingAccount::new("test".to_string(), balance, credit, 100);
        fx.db.insert_account(&acc).await.unwrap();
        acc
    }

    #[tokio::test]
    async fn market_open_reserves_margin() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(10000), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let trade = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10)))
            .await
            .unwrap();

        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.open_price, dec!(65010));
        // 0.10 * 1 * 65010 / 100 = 65.01
        assert_eq!(trade.margin_used, dec!(65.01));
    }

    #[tokio::test]
    async fn open_commission_hits_wallet_immediately() {
        let mut config = EngineConfig::default();
        config.commission_per_lot = dec!(7);
        let fx = fixture(config).await;
        let acc = account(&fx, dec!(10000), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let trade = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.50)))
            .await
            .unwrap();
        assert_eq!(trade.commission, dec!(3.50));

        let stored = fx.db.get_account(&acc.id).await.unwrap().unwrap();
        assert_eq!(stored.balance, dec!(9996.50));
    }

    #[tokio::test]
    async fn open_rejections() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(100), dec!(0)).await;

        // No quote in the cache.
        let err = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MARKET_CLOSED");

        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        // Margin for 1 lot is 650.10 against 100 of equity.
        let err = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_MARGIN");

        // Lot below the minimum.
        let err = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.001)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        // Suspended account.
        let mut suspended = account(&fx, dec!(1000), dec!(0)).await;
        suspended.status = crate::models::AccountStatus::Suspended;
        fx.db.update_account(&suspended).await.unwrap();
        let err = fx
            .engine
            .open_trade(OpenRequest::market(&suspended.id, SYMBOL, TradeSide::Buy, dec!(0.10)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_INACTIVE");
    }

    #[tokio::test]
    async fn close_applies_pnl_to_wallet() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(10000), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let trade = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10)))
            .await
            .unwrap();

        fx.prices.put(SYMBOL, dec!(66000), dec!(66010)).await;
        let closed = fx
            .engine
            .close_trade(&trade.id, CloseReason::Manual, None)
            .await
            .unwrap();

        // Buy closes into the bid: (66000 - 65010) * 0.10 = 99
        assert_eq!(closed.close_price, Some(dec!(66000)));
        assert_eq!(closed.realized_pnl, Some(dec!(99.000)));

        let stored = fx.db.get_account(&acc.id).await.unwrap().unwrap();
        assert_eq!(stored.balance, dec!(10099));
    }

    #[tokio::test]
    async fn loss_beyond_balance_spills_into_credit() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(100), dec!(500)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let trade = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.50)))
            .await
            .unwrap();

        fx.prices.put(SYMBOL, dec!(64000), dec!(64010)).await;
        let closed = fx
            .engine
            .close_trade(&trade.id, CloseReason::Manual, None)
            .await
            .unwrap();
        // (64000 - 65010) * 0.50 = -505
        assert_eq!(closed.realized_pnl, Some(dec!(-505.000)));

        let stored = fx.db.get_account(&acc.id).await.unwrap().unwrap();
        assert_eq!(stored.balance, Decimal::ZERO);
        assert_eq!(stored.credit, dec!(95));

        let ledger = fx.db.ledger_for_account(&acc.id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, LedgerKind::TradeLoss);
        assert_eq!(ledger[0].amount, dec!(-405));
    }

    #[tokio::test]
    async fn closed_trades_stay_closed() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(10000), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let trade = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10)))
            .await
            .unwrap();
        fx.engine
            .close_trade(&trade.id, CloseReason::Manual, None)
            .await
            .unwrap();

        let err = fx
            .engine
            .close_trade(&trade.id, CloseReason::Manual, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRADE_STATE");

        let err = fx
            .engine
            .modify_trade(&trade.id, Some(dec!(60000)), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRADE_STATE");
    }

    #[tokio::test]
    async fn modify_sets_and_clears_levels() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(10000), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let trade = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10)))
            .await
            .unwrap();

        let modified = fx
            .engine
            .modify_trade(&trade.id, Some(dec!(64000)), Some(dec!(67000)))
            .await
            .unwrap();
        assert_eq!(modified.stop_loss, Some(dec!(64000)));
        assert_eq!(modified.take_profit, Some(dec!(67000)));

        let cleared = fx.engine.modify_trade(&trade.id, None, None).await.unwrap();
        assert_eq!(cleared.stop_loss, None);
        assert_eq!(cleared.take_profit, None);
    }

    #[tokio::test]
    async fn buy_limit_triggers_when_ask_falls_to_price() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(10000), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let mut req = OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10));
        req.order_type = OrderType::BuyLimit;
        req.pending_price = Some(dec!(64000));
        let pending = fx.engine.open_trade(req).await.unwrap();
        assert_eq!(pending.status, TradeStatus::Pending);

        // Above the limit price: nothing fires.
        let report = fx.engine.process_tick(SYMBOL).await.unwrap();
        assert!(report.triggered.is_empty());

        // Ask falls to the limit: fills at the ask.
        fx.prices.put(SYMBOL, dec!(63990), dec!(64000)).await;
        let report = fx.engine.process_tick(SYMBOL).await.unwrap();
        assert_eq!(report.triggered.len(), 1);
        assert_eq!(report.triggered[0].open_price, dec!(64000));
        assert_eq!(report.triggered[0].status, TradeStatus::Open);
        // 0.10 * 64000 / 100
        assert_eq!(report.triggered[0].margin_used, dec!(64.00));
    }

    #[tokio::test]
    async fn trigger_revalidates_margin_and_cancels() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(200), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let mut req = OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.15));
        req.order_type = OrderType::BuyLimit;
        req.pending_price = Some(dec!(64000));
        let pending = fx.engine.open_trade(req).await.unwrap();

        // Funds drained between placement and trigger.
        let mut drained = fx.db.get_account(&acc.id).await.unwrap().unwrap();
        drained.balance = dec!(10);
        fx.db.update_account(&drained).await.unwrap();

        fx.prices.put(SYMBOL, dec!(63990), dec!(64000)).await;
        let report = fx.engine.process_tick(SYMBOL).await.unwrap();
        assert!(report.triggered.is_empty());
        assert_eq!(report.cancelled.len(), 1);
        assert_eq!(report.cancelled[0].id, pending.id);
        assert_eq!(report.cancelled[0].status, TradeStatus::Cancelled);
    }

    #[tokio::test]
    async fn stop_loss_closes_on_tick() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(10000), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let mut req = OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10));
        req.stop_loss = Some(dec!(64500));
        let trade = fx.engine.open_trade(req).await.unwrap();

        fx.prices.put(SYMBOL, dec!(64500), dec!(64510)).await;
        let report = fx.engine.process_tick(SYMBOL).await.unwrap();
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].id, trade.id);
        assert_eq!(report.closed[0].close_reason, Some(CloseReason::StopLoss));
    }

    #[tokio::test]
    async fn stop_out_sweeps_account_and_floors_balance() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(100), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        fx.engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10)))
            .await
            .unwrap();

        // Floating pnl (64000 - 65010) * 0.10 = -101 drives equity to -1.
        fx.prices.put(SYMBOL, dec!(64000), dec!(64010)).await;
        let report = fx.engine.process_tick(SYMBOL).await.unwrap();
        assert_eq!(report.stop_outs.len(), 1);
        let sweep = &report.stop_outs[0];
        assert_eq!(sweep.closed.len(), 1);
        assert_eq!(sweep.closed[0].close_reason, Some(CloseReason::StopOut));
        assert!(sweep.failed.is_empty());

        let stored = fx.db.get_account(&acc.id).await.unwrap().unwrap();
        assert_eq!(stored.balance, Decimal::ZERO);
        assert!(stored.credit >= Decimal::ZERO);
        assert!(fx.db.open_trades_for_account(&acc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_equity_is_derived() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(1000), dec!(500)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        fx.engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10)))
            .await
            .unwrap();

        fx.prices.put(SYMBOL, dec!(65500), dec!(65510)).await;
        let snap = fx.engine.account_snapshot(&acc.id).await.unwrap();
        // Floating: (65500 - 65010) * 0.10 = 49
        assert_eq!(snap.floating_pnl, dec!(49.000));
        assert_eq!(snap.equity, dec!(1549.000));
        assert_eq!(snap.used_margin, dec!(65.01));
        assert_eq!(snap.free_margin, dec!(1483.990));
    }

    #[tokio::test]
    async fn cancel_pending_only() {
        let fx = fixture(EngineConfig::default()).await;
        let acc = account(&fx, dec!(10000), dec!(0)).await;
        fx.prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        let mut req = OpenRequest::market(&acc.id, SYMBOL, TradeSide::Sell, dec!(0.10));
        req.order_type = OrderType::SellLimit;
        req.pending_price = Some(dec!(66000));
        let pending = fx.engine.open_trade(req).await.unwrap();

        let cancelled = fx.engine.cancel_pending(&pending.id).await.unwrap();
        assert_eq!(cancelled.status, TradeStatus::Cancelled);

        let open = fx
            .engine
            .open_trade(OpenRequest::market(&acc.id, SYMBOL, TradeSide::Buy, dec!(0.10)))
            .await
            .unwrap();
        let err = fx.engine.cancel_pending(&open.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRADE_STATE");
    }
}
