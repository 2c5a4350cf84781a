//! Copy replication engine.
//!
//! Every master trade event (open, SL/TP modify, close) fans out to the
//! master's active followers as independent concurrent tasks. A follower
//! failure (margin shortfall, inactive account, storage error) becomes a
//! FAILED result for that follower and never aborts the rest of the batch.
//! The (master_trade_id, follower_id) unique index is the idempotency guard:
//! replaying an event yields Skipped outcomes, not duplicates.

use std::sync::Arc;

use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::locks::AccountLocks;
use crate::models::{
    AccountStatus, CloseReason, CopyFollower, CopyTrade, Trade,
};

use super::config::EngineConfig;
use super::lifecycle::{OpenRequest, TradeEngine};
use super::lot_sizer::{LotSizer, SizingSnapshot};

/// How one follower fared in a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationStatus {
    Opened,
    Modified,
    Closed,
    Skipped,
    Failed,
}

/// Per-follower result of one replication unit.
#[derive(Debug, Clone)]
pub struct ReplicationOutcome {
    /// Subscription id.
    pub follower_id: String,
    pub follower_account_id: String,
    pub status: ReplicationStatus,
    pub copy_trade_id: Option<String>,
    pub follower_trade_id: Option<String>,
    pub follower_lot: Option<Decimal>,
    pub detail: String,
}

impl ReplicationOutcome {
    fn failed(sub: &CopyFollower, detail: impl Into<String>) -> Self {
        Self {
            follower_id: sub.id.clone(),
            follower_account_id: sub.follower_account_id.clone(),
            status: ReplicationStatus::Failed,
            copy_trade_id: None,
            follower_trade_id: None,
            follower_lot: None,
            detail: detail.into(),
        }
    }

    fn skipped(sub: &CopyFollower, detail: impl Into<String>) -> Self {
        Self {
            follower_id: sub.id.clone(),
            follower_account_id: sub.follower_account_id.clone(),
            status: ReplicationStatus::Skipped,
            copy_trade_id: None,
            follower_trade_id: None,
            follower_lot: None,
            detail: detail.into(),
        }
    }
}

/// Fans master trade events out to followers.
#[derive(Clone)]
pub struct ReplicationEngine {
    db: Arc<Database>,
    engine: Arc<TradeEngine>,
    locks: Arc<AccountLocks>,
    config: EngineConfig,
}

impl ReplicationEngine {
    pub fn new(
        db: Arc<Database>,
        engine: Arc<TradeEngine>,
        locks: Arc<AccountLocks>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            engine,
            locks,
            config,
        }
    }

    /// Replicate a freshly opened master trade to every active follower.
    pub async fn replicate_open(&self, master_trade: &Trade) -> EngineResult<Vec<ReplicationOutcome>> {
        let master_account = self
            .db
            .get_account(&master_trade.account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {}", master_trade.account_id)))?;

        let followers = self.db.active_followers_of_master(&master_account.id).await?;
        if followers.is_empty() {
            return Ok(Vec::new());
        }

        // One sizing snapshot of the master for the whole batch.
        let master_snap = self.engine.account_snapshot(&master_account.id).await?;
        let master_balance = master_snap.account.balance;
        let master_equity = master_snap.equity;

        let mut handles = Vec::with_capacity(followers.len());
        for sub in followers {
            let this = self.clone();
            let trade = master_trade.clone();
            let sub_for_panic = sub.clone();
            let handle = tokio::spawn(async move {
                this.replicate_one(sub, trade, master_balance, master_equity).await
            });
            handles.push((sub_for_panic, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (sub, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(ReplicationOutcome::failed(
                    &sub,
                    format!("replication task panicked: {e}"),
                )),
            }
        }

        let opened = outcomes
            .iter()
            .filter(|o| o.status == ReplicationStatus::Opened)
            .count();
        info!(
            master_trade = %master_trade.id,
            followers = outcomes.len(),
            opened,
            "Replication fan-out complete"
        );
        Ok(outcomes)
    }

    /// One follower's replication unit; every failure path is converted
    /// into an outcome.
    async fn replicate_one(
        &self,
        sub: CopyFollower,
        master_trade: Trade,
        master_balance: Decimal,
        master_equity: Decimal,
    ) -> ReplicationOutcome {
        // Idempotency: one copy trade per (master trade, follower).
        match self.db.get_copy_trade(&master_trade.id, &sub.id).await {
            Ok(Some(existing)) => {
                return ReplicationOutcome {
                    copy_trade_id: Some(existing.id),
                    ..ReplicationOutcome::skipped(&sub, "already replicated")
                };
            }
            Ok(None) => {}
            Err(e) => return ReplicationOutcome::failed(&sub, format!("idempotency check: {e}")),
        }

        let follower_snap = match self.engine.account_snapshot(&sub.follower_account_id).await {
            Ok(snap) => snap,
            Err(e) => return ReplicationOutcome::failed(&sub, format!("follower snapshot: {e}")),
        };

        let sizer = LotSizer::new(self.config.min_lot);
        let lot = sizer.size(
            &sub,
            &SizingSnapshot {
                master_lot: master_trade.quantity,
                master_balance,
                master_equity,
                follower_balance: follower_snap.account.balance,
                follower_equity: follower_snap.equity,
            },
        );

        // Fill at the master's execution price so master and follower stay
        // price-identical.
        let request = OpenRequest {
            account_id: sub.follower_account_id.clone(),
            symbol: master_trade.symbol.clone(),
            side: master_trade.side,
            order_type: crate::models::OrderType::Market,
            quantity: lot,
            pending_price: None,
            stop_loss: master_trade.stop_loss,
            take_profit: master_trade.take_profit,
            is_copy: true,
            price_override: Some(master_trade.open_price),
        };

        match self.engine.open_trade(request).await {
            Ok(follower_trade) => {
                let ct = CopyTrade::opened(
                    master_trade.id.clone(),
                    sub.id.clone(),
                    sub.follower_account_id.clone(),
                    follower_trade.id.clone(),
                    master_trade.symbol.clone(),
                    master_trade.side,
                    master_trade.quantity,
                    lot,
                    sub.copy_mode,
                    sub.copy_value,
                    master_trade.open_price,
                );
                match self.db.insert_copy_trade(&ct).await {
                    Ok(true) => {
                        if let Err(e) = self.bump_counters(&sub, &master_trade).await {
                            warn!(subscription = %sub.id, error = %e, "Counter update failed");
                        }
                        ReplicationOutcome {
                            follower_id: sub.id.clone(),
                            follower_account_id: sub.follower_account_id.clone(),
                            status: ReplicationStatus::Opened,
                            copy_trade_id: Some(ct.id),
                            follower_trade_id: Some(follower_trade.id),
                            follower_lot: Some(lot),
                            detail: "opened".to_string(),
                        }
                    }
                    Ok(false) => {
                        // Lost a race with a concurrent replication of the
                        // same pair; unwind the extra trade at its own price.
                        if let Err(e) = self
                            .engine
                            .close_trade(
                                &follower_trade.id,
                                CloseReason::Manual,
                                Some(follower_trade.open_price),
                            )
                            .await
                        {
                            warn!(trade = %follower_trade.id, error = %e, "Duplicate unwind failed");
                        }
                        ReplicationOutcome::skipped(&sub, "concurrent replication won")
                    }
                    Err(e) => ReplicationOutcome::failed(&sub, format!("record copy trade: {e}")),
                }
            }
            Err(e) => {
                // Margin shortfall, inactive account, and friends become a
                // FAILED record; the fan-out to other followers continues.
                let ct = CopyTrade::failed(
                    master_trade.id.clone(),
                    sub.id.clone(),
                    sub.follower_account_id.clone(),
                    master_trade.symbol.clone(),
                    master_trade.side,
                    master_trade.quantity,
                    lot,
                    sub.copy_mode,
                    sub.copy_value,
                    master_trade.open_price,
                    format!("{} ({})", e, e.code()),
                );
                let copy_trade_id = match self.db.insert_copy_trade(&ct).await {
                    Ok(true) => Some(ct.id),
                    Ok(false) => return ReplicationOutcome::skipped(&sub, "already replicated"),
                    Err(db_err) => {
                        warn!(subscription = %sub.id, error = %db_err, "Failed record not stored");
                        None
                    }
                };
                warn!(
                    subscription = %sub.id,
                    account = %sub.follower_account_id,
                    error = %e,
                    "Follower replication failed"
                );
                ReplicationOutcome {
                    copy_trade_id,
                    follower_lot: Some(lot),
                    ..ReplicationOutcome::failed(&sub, format!("{} ({})", e, e.code()))
                }
            }
        }
    }

    async fn bump_counters(&self, sub: &CopyFollower, master_trade: &Trade) -> EngineResult<()> {
        {
            let _guard = self.locks.lock(&sub.follower_account_id).await;
            if let Some(mut fresh) = self.db.get_follower(&sub.id).await? {
                fresh.total_copied_trades += 1;
                self.db.update_follower(&fresh).await?;
            }
            if let Some(mut account) = self.db.get_account(&sub.follower_account_id).await? {
                account.total_copied_trades += 1;
                self.db.update_account(&account).await?;
            }
        }
        {
            let _guard = self.locks.lock(&master_trade.account_id).await;
            if let Some(mut master) = self.db.get_account(&master_trade.account_id).await? {
                master.total_copied_trades += 1;
                self.db.update_account(&master).await?;
            }
        }
        Ok(())
    }

    /// Mirror an SL/TP change on the master trade to every open copy of it.
    pub async fn mirror_modify(
        &self,
        master_trade_id: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> EngineResult<Vec<ReplicationOutcome>> {
        let copies = self.db.open_copy_trades_for_master_trade(master_trade_id).await?;

        let mut handles = Vec::with_capacity(copies.len());
        for ct in copies {
            let engine = self.engine.clone();
            handles.push(tokio::spawn(async move {
                let Some(trade_id) = ct.follower_trade_id.clone() else {
                    return ReplicationOutcome {
                        follower_id: ct.follower_id.clone(),
                        follower_account_id: ct.follower_account_id.clone(),
                        status: ReplicationStatus::Failed,
                        copy_trade_id: Some(ct.id.clone()),
                        follower_trade_id: None,
                        follower_lot: None,
                        detail: "copy trade has no follower trade".to_string(),
                    };
                };
                let (status, detail) = match engine.modify_trade(&trade_id, stop_loss, take_profit).await
                {
                    Ok(_) => (ReplicationStatus::Modified, "modified".to_string()),
                    Err(e) => (ReplicationStatus::Failed, e.to_string()),
                };
                ReplicationOutcome {
                    follower_id: ct.follower_id.clone(),
                    follower_account_id: ct.follower_account_id.clone(),
                    status,
                    copy_trade_id: Some(ct.id.clone()),
                    follower_trade_id: Some(trade_id),
                    follower_lot: Some(ct.follower_lot),
                    detail,
                }
            }));
        }

        let outcomes = join_all(handles)
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .collect();
        Ok(outcomes)
    }

    /// Close every open copy of a closed master trade at the master's close
    /// price. Each close settles its own commission/credit distribution
    /// immediately inside the lifecycle manager.
    pub async fn replicate_close(&self, master_trade: &Trade) -> EngineResult<Vec<ReplicationOutcome>> {
        let close_px = master_trade.close_price.ok_or_else(|| {
            EngineError::Validation(format!("master trade {} has no close price", master_trade.id))
        })?;
        let copies = self.db.open_copy_trades_for_master_trade(&master_trade.id).await?;

        let mut handles = Vec::with_capacity(copies.len());
        for ct in copies {
            let engine = self.engine.clone();
            handles.push(tokio::spawn(async move {
                close_one(engine, ct, Some(close_px)).await
            }));
        }

        let outcomes: Vec<ReplicationOutcome> = join_all(handles)
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .collect();

        info!(
            master_trade = %master_trade.id,
            followers = outcomes.len(),
            "Follower closes complete"
        );
        Ok(outcomes)
    }

    /// Suspend a master and force-close all of its followers' open copy
    /// trades at the best available live quote. Per-trade failures are
    /// collected, never fatal to the sweep.
    pub async fn suspend_master(&self, master_account_id: &str) -> EngineResult<Vec<ReplicationOutcome>> {
        {
            let _guard = self.locks.lock(master_account_id).await;
            let mut master = self
                .db
                .get_account(master_account_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("account {master_account_id}")))?;
            master.status = AccountStatus::Suspended;
            self.db.update_account(&master).await?;
        }

        let copies = self.db.open_copy_trades_for_master_account(master_account_id).await?;
        let mut handles = Vec::with_capacity(copies.len());
        for ct in copies {
            let engine = self.engine.clone();
            handles.push(tokio::spawn(async move { close_one(engine, ct, None).await }));
        }

        let outcomes: Vec<ReplicationOutcome> = join_all(handles)
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .collect();

        warn!(
            master = %master_account_id,
            closed = outcomes.iter().filter(|o| o.status == ReplicationStatus::Closed).count(),
            failed = outcomes.iter().filter(|o| o.status == ReplicationStatus::Failed).count(),
            "Master suspended, follower positions swept"
        );
        Ok(outcomes)
    }
}

async fn close_one(
    engine: Arc<TradeEngine>,
    ct: CopyTrade,
    price_override: Option<Decimal>,
) -> ReplicationOutcome {
    let Some(trade_id) = ct.follower_trade_id.clone() else {
        return ReplicationOutcome {
            follower_id: ct.follower_id.clone(),
            follower_account_id: ct.follower_account_id.clone(),
            status: ReplicationStatus::Failed,
            copy_trade_id: Some(ct.id.clone()),
            follower_trade_id: None,
            follower_lot: None,
            detail: "copy trade has no follower trade".to_string(),
        };
    };
    let (status, detail) = match engine
        .close_trade(&trade_id, CloseReason::Manual, price_override)
        .await
    {
        Ok(t) => (
            ReplicationStatus::Closed,
            format!("closed, pnl {}", t.realized_pnl.unwrap_or_default()),
        ),
        Err(e) => (ReplicationStatus::Failed, e.to_string()),
    };
    ReplicationOutcome {
        follower_id: ct.follower_id.clone(),
        follower_account_id: ct.follower_account_id.clone(),
        status,
        copy_trade_id: Some(ct.id.clone()),
        follower_trade_id: Some(trade_id),
        follower_lot: Some(ct.follower_lot),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credit::CreditService;
    use crate::models::{CopyMode, CopyTradeStatus, TradeSide, TradeStatus, TradingAccount};
    use crate::outbox::Outbox;
    use crate::pricing::PriceCache;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "BTCUSD";

    struct Fixture {
        db: Arc<Database>,
        prices: Arc<PriceCache>,
        engine: Arc<TradeEngine>,
        replication: ReplicationEngine,
        master: TradingAccount,
    }

    async fn fixture() -> Fixture {
        let config = EngineConfig::default();
        let db = Arc::new(Database::in_memory().await.unwrap());
        let prices = Arc::new(PriceCache::new(config.price_ttl_secs));
        let locks = Arc::new(AccountLocks::new());
        let credit = Arc::new(CreditService::new(db.clone(), locks.clone(), config.clone()));
        let outbox = Arc::new(Outbox::new(db.clone()));
        let engine = Arc::new(TradeEngine::new(
            db.clone(),
            prices.clone(),
            locks.clone(),
            credit,
            outbox,
            config.clone(),
        ));
        let replication = ReplicationEngine::new(db.clone(), engine.clone(), locks, config);

        let mut master = TradingAccount::new("master".to_string(), dec!(10000), dec!(0), 100);
        master.is_master = true;
        db.insert_account(&master).await.unwrap();

        prices.put(SYMBOL, dec!(65000), dec!(65010)).await;

        Fixture {
            db,
            prices,
            engine,
            replication,
            master,
        }
    }

    async fn follower(fx: &Fixture, balance: Decimal, credit: Decimal, mode: CopyMode) -> CopyFollower {
        let acc = TradingAccount::new("follower".to_string(), balance, credit, 100);
        fx.db.insert_account(&acc).await.unwrap();
        let sub = CopyFollower::new(
            acc.id.clone(),
            fx.master.id.clone(),
            mode,
            Decimal::ZERO,
            dec!(10),
            dec!(1000),
        );
        fx.db.insert_follower(&sub).await.unwrap();
        sub
    }

    async fn master_open(fx: &Fixture, lots: Decimal) -> Trade {
        fx.engine
            .open_trade(OpenRequest::market(&fx.master.id, SYMBOL, TradeSide::Buy, lots))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fan_out_opens_proportional_follower_trades() {
        let fx = fixture().await;
        let sub = follower(&fx, dec!(1000), dec!(0), CopyMode::BalanceBased).await;

        let master_trade = master_open(&fx, dec!(1)).await;
        let outcomes = fx.replication.replicate_open(&master_trade).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ReplicationStatus::Opened);
        // masterBalance 10000, followerBalance 1000, masterLot 1.00 -> 0.10
        assert_eq!(outcomes[0].follower_lot, Some(dec!(0.10)));

        let follower_trade = fx
            .db
            .get_trade(outcomes[0].follower_trade_id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        // Price parity with the master fill, not a fresh quote.
        assert_eq!(follower_trade.open_price, master_trade.open_price);
        assert!(follower_trade.is_copy);
        assert_eq!(follower_trade.status, TradeStatus::Open);

        let ct = fx
            .db
            .get_copy_trade(&master_trade.id, &sub.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ct.status, CopyTradeStatus::Open);
        assert_eq!(ct.master_lot, dec!(1));
        assert_eq!(ct.follower_lot, dec!(0.10));

        let master = fx.db.get_account(&fx.master.id).await.unwrap().unwrap();
        assert_eq!(master.total_copied_trades, 1);
        let fresh_sub = fx.db.get_follower(&sub.id).await.unwrap().unwrap();
        assert_eq!(fresh_sub.total_copied_trades, 1);
    }

    #[tokio::test]
    async fn replication_is_idempotent() {
        let fx = fixture().await;
        let sub = follower(&fx, dec!(1000), dec!(0), CopyMode::BalanceBased).await;

        let master_trade = master_open(&fx, dec!(1)).await;
        let first = fx.replication.replicate_open(&master_trade).await.unwrap();
        assert_eq!(first[0].status, ReplicationStatus::Opened);

        let second = fx.replication.replicate_open(&master_trade).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].status, ReplicationStatus::Skipped);

        // Still exactly one copy trade for the pair.
        assert!(fx
            .db
            .get_copy_trade(&master_trade.id, &sub.id)
            .await
            .unwrap()
            .is_some());
        let follower_trades = fx
            .db
            .open_trades_for_account(&sub.follower_account_id)
            .await
            .unwrap();
        assert_eq!(follower_trades.len(), 1);
    }

    #[tokio::test]
    async fn one_failing_follower_does_not_abort_the_batch() {
        let fx = fixture().await;
        let rich = follower(&fx, dec!(1000), dec!(0), CopyMode::BalanceBased).await;
        // Equity 3: cannot carry even the floored 0.01 lot.
        let poor = follower(&fx, dec!(3), dec!(0), CopyMode::BalanceBased).await;

        let master_trade = master_open(&fx, dec!(1)).await;
        let outcomes = fx.replication.replicate_open(&master_trade).await.unwrap();
        assert_eq!(outcomes.len(), 2);

        let by_id = |id: &str| outcomes.iter().find(|o| o.follower_id == id).unwrap();
        assert_eq!(by_id(&rich.id).status, ReplicationStatus::Opened);

        let failed = by_id(&poor.id);
        assert_eq!(failed.status, ReplicationStatus::Failed);
        assert!(failed.detail.contains("INSUFFICIENT_MARGIN"));

        // The failure is recorded as a FAILED copy trade, not an exception.
        let ct = fx
            .db
            .get_copy_trade(&master_trade.id, &poor.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ct.status, CopyTradeStatus::Failed);
        assert!(ct.follower_trade_id.is_none());
    }

    #[tokio::test]
    async fn equity_based_sizing_uses_floating_pnl() {
        let fx = fixture().await;
        // Equity 2500 against master equity 10000 (no open master trades at
        // sizing time beyond the one being copied).
        follower(&fx, dec!(1500), dec!(1000), CopyMode::EquityBased).await;

        let master_trade = master_open(&fx, dec!(0.50)).await;
        let outcomes = fx.replication.replicate_open(&master_trade).await.unwrap();

        // Master equity includes its own open trade's floating pnl:
        // 10000 + (65000 - 65010) * 0.5 = 9995; 0.5 * 2500/9995 = 0.1251 -> 0.13
        assert_eq!(outcomes[0].status, ReplicationStatus::Opened);
        assert_eq!(outcomes[0].follower_lot, Some(dec!(0.13)));
    }

    #[tokio::test]
    async fn master_close_fans_out_and_settles() {
        let fx = fixture().await;
        let sub = follower(&fx, dec!(1000), dec!(1000), CopyMode::BalanceBased).await;

        let master_trade = master_open(&fx, dec!(1)).await;
        fx.replication.replicate_open(&master_trade).await.unwrap();

        fx.prices.put(SYMBOL, dec!(66000), dec!(66010)).await;
        let closed_master = fx
            .engine
            .close_trade(&master_trade.id, CloseReason::Manual, None)
            .await
            .unwrap();
        let outcomes = fx.replication.replicate_close(&closed_master).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ReplicationStatus::Closed);

        // Follower: (66000 - 65010) * 0.10 = 99 profit, 50% commission.
        let ct = fx
            .db
            .get_copy_trade(&master_trade.id, &sub.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ct.status, CopyTradeStatus::Closed);
        assert!(ct.settled);
        assert_eq!(ct.realized_pnl, Some(dec!(99.000)));
        assert_eq!(ct.commission_paid, dec!(49.50));
        assert_eq!(ct.profit_to_wallet, dec!(49.50));
        assert_eq!(ct.close_price, Some(dec!(66000)));

        let follower_acc = fx
            .db
            .get_account(&sub.follower_account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(follower_acc.balance, dec!(1049.50));
        assert_eq!(follower_acc.credit, dec!(1000));

        let master_acc = fx.db.get_account(&fx.master.id).await.unwrap().unwrap();
        assert_eq!(master_acc.pending_commission, dec!(49.50));
        // Master wallet took its own pnl: 10000 + (66000 - 65010) * 1 = 10990
        assert_eq!(master_acc.balance, dec!(10990));
    }

    #[tokio::test]
    async fn sl_tp_changes_mirror_to_followers() {
        let fx = fixture().await;
        let sub = follower(&fx, dec!(1000), dec!(0), CopyMode::BalanceBased).await;

        let master_trade = master_open(&fx, dec!(1)).await;
        fx.replication.replicate_open(&master_trade).await.unwrap();

        fx.engine
            .modify_trade(&master_trade.id, Some(dec!(64000)), Some(dec!(67000)))
            .await
            .unwrap();
        let outcomes = fx
            .replication
            .mirror_modify(&master_trade.id, Some(dec!(64000)), Some(dec!(67000)))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ReplicationStatus::Modified);

        let ct = fx
            .db
            .get_copy_trade(&master_trade.id, &sub.id)
            .await
            .unwrap()
            .unwrap();
        let follower_trade = fx
            .db
            .get_trade(ct.follower_trade_id.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(follower_trade.stop_loss, Some(dec!(64000)));
        assert_eq!(follower_trade.take_profit, Some(dec!(67000)));
    }

    #[tokio::test]
    async fn suspended_master_sweeps_follower_positions() {
        let fx = fixture().await;
        let sub = follower(&fx, dec!(1000), dec!(1000), CopyMode::BalanceBased).await;

        let master_trade = master_open(&fx, dec!(1)).await;
        fx.replication.replicate_open(&master_trade).await.unwrap();

        let outcomes = fx.replication.suspend_master(&fx.master.id).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ReplicationStatus::Closed);

        let master = fx.db.get_account(&fx.master.id).await.unwrap().unwrap();
        assert_eq!(master.status, AccountStatus::Suspended);

        let open = fx
            .db
            .open_trades_for_account(&sub.follower_account_id)
            .await
            .unwrap();
        assert!(open.is_empty());
    }
}
