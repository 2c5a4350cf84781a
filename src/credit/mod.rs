//! Credit ledger and auto-refill service.
//!
//! Copy-trading losses never reduce a follower's withdrawable wallet
//! balance; they consume the non-withdrawable credit buffer. A configured
//! credit floor is defended by diverting future copy-trading profits back
//! into credit before any profit reaches the wallet, and by pulling from the
//! wallet immediately when a loss drives credit below the floor.
//!
//! Every mutation here runs under the follower account's lock and appends
//! immutable ledger entries; `verify_ledger` replays an account's chain and
//! reports drift between the ledger and the stored credit value.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::locks::AccountLocks;
use crate::models::{
    CopyCommission, CopyFollower, CopyTrade, CopyTradeStatus, CreditLedgerEntry, FollowerStatus,
    LedgerKind, Trade, TradingAccount,
};
use crate::trading::{round2, EngineConfig};

/// Result of settling one closed copy trade.
#[derive(Debug, Clone)]
pub struct DistributionOutcome {
    pub copy_trade_id: String,
    pub follower_trade_id: String,
    pub realized_pnl: Decimal,
    pub total_commission: Decimal,
    pub admin_share: Decimal,
    pub master_share: Decimal,
    /// Loss absorbed by the credit buffer.
    pub credit_consumed: Decimal,
    /// Wallet funds pulled in to restore the credit floor.
    pub wallet_refill: Decimal,
    /// Profit diverted into credit.
    pub profit_to_credit: Decimal,
    /// Profit routed to the wallet.
    pub profit_to_wallet: Decimal,
    pub refill_completed: bool,
    pub subscription_stopped: bool,
}

/// Ledger replay audit for one account.
#[derive(Debug, Clone)]
pub struct LedgerAudit {
    pub account_id: String,
    pub entries: usize,
    pub replayed_credit: Decimal,
    pub stored_credit: Decimal,
    pub consistent: bool,
    /// First entry that broke the chain, if any.
    pub broken_entry: Option<String>,
}

/// Credit distribution and auto-refill.
pub struct CreditService {
    db: Arc<Database>,
    locks: Arc<AccountLocks>,
    config: EngineConfig,
}

impl CreditService {
    pub fn new(db: Arc<Database>, locks: Arc<AccountLocks>, config: EngineConfig) -> Self {
        Self { db, locks, config }
    }

    /// Settle a closed follower trade: split off commission, route the rest
    /// between credit and wallet, and record the whole sequence in the
    /// ledger. Idempotent: a trade that is already settled returns `None`.
    pub async fn settle_copy_close(&self, trade: &Trade) -> EngineResult<Option<DistributionOutcome>> {
        let Some(probe) = self.db.copy_trade_by_follower_trade(&trade.id).await? else {
            return Ok(None);
        };

        let _guard = self.locks.lock(&probe.follower_account_id).await;

        // Re-read under the lock; a concurrent settlement may have won.
        let Some(mut ct) = self.db.copy_trade_by_follower_trade(&trade.id).await? else {
            return Ok(None);
        };
        if ct.settled {
            return Ok(None);
        }

        let mut sub = self
            .db
            .get_follower(&ct.follower_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("subscription {}", ct.follower_id)))?;
        let mut account = self
            .db
            .get_account(&sub.follower_account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {}", sub.follower_account_id)))?;

        let pnl = trade.realized_pnl.unwrap_or_default();
        let mut outcome = DistributionOutcome {
            copy_trade_id: ct.id.clone(),
            follower_trade_id: trade.id.clone(),
            realized_pnl: pnl,
            total_commission: Decimal::ZERO,
            admin_share: Decimal::ZERO,
            master_share: Decimal::ZERO,
            credit_consumed: Decimal::ZERO,
            wallet_refill: Decimal::ZERO,
            profit_to_credit: Decimal::ZERO,
            profit_to_wallet: Decimal::ZERO,
            refill_completed: false,
            subscription_stopped: false,
        };

        let mut entries = Vec::new();
        if pnl < Decimal::ZERO {
            self.apply_loss(&mut account, &mut sub, trade, -pnl, &mut outcome, &mut entries);
        } else if pnl > Decimal::ZERO {
            self.apply_profit(&mut account, &mut sub, trade, pnl, &mut outcome, &mut entries);
        }

        ct.close_price = trade.close_price;
        ct.realized_pnl = Some(pnl);
        ct.profit_to_credit = outcome.profit_to_credit;
        ct.profit_to_wallet = outcome.profit_to_wallet;
        ct.commission_paid = outcome.total_commission;
        ct.status = CopyTradeStatus::Closed;
        ct.closed_at = trade.closed_at.or_else(|| Some(Utc::now()));
        ct.settled = true;

        self.db.update_account(&account).await?;
        self.db.update_follower(&sub).await?;
        for entry in &entries {
            self.db.insert_ledger_entry(entry).await?;
        }
        self.db.update_copy_trade(&ct).await?;

        // Master side: commission accrual, ordered after the follower lock.
        if outcome.master_share > Decimal::ZERO || outcome.admin_share > Decimal::ZERO {
            self.accrue_commission(&sub, &ct, trade, &outcome).await?;
        }

        info!(
            copy_trade = %ct.id,
            pnl = %pnl,
            to_credit = %outcome.profit_to_credit,
            to_wallet = %outcome.profit_to_wallet,
            commission = %outcome.total_commission,
            "Copy trade settled"
        );

        Ok(Some(outcome))
    }

    fn apply_loss(
        &self,
        account: &mut TradingAccount,
        sub: &mut CopyFollower,
        trade: &Trade,
        loss: Decimal,
        outcome: &mut DistributionOutcome,
        entries: &mut Vec<CreditLedgerEntry>,
    ) {
        let deficit_before = sub.credit_deficit;

        // Credit absorbs the loss, never going below zero.
        let consumed = loss.min(account.credit);
        let credit_before = account.credit;
        account.credit -= consumed;
        outcome.credit_consumed = consumed;
        let deficit_mid = (sub.minimum_credit - account.credit).max(Decimal::ZERO);
        entries.push(CreditLedgerEntry::new(
            account.id.clone(),
            Some(sub.id.clone()),
            Some(trade.id.clone()),
            LedgerKind::TradeLoss,
            -consumed,
            credit_before,
            deficit_before,
            deficit_mid,
            format!("loss {} on {} absorbed by credit", loss, trade.symbol),
        ));

        // Defend the floor from the wallet first when funds are there.
        let mut refill = Decimal::ZERO;
        if account.credit < sub.minimum_credit {
            let shortfall = sub.minimum_credit - account.credit;
            refill = account.balance.min(shortfall);
            if refill > Decimal::ZERO {
                let credit_before = account.credit;
                account.balance -= refill;
                account.credit += refill;
                outcome.wallet_refill = refill;
                let deficit_after = (sub.minimum_credit - account.credit).max(Decimal::ZERO);
                entries.push(CreditLedgerEntry::new(
                    account.id.clone(),
                    Some(sub.id.clone()),
                    Some(trade.id.clone()),
                    LedgerKind::WalletRefill,
                    refill,
                    credit_before,
                    deficit_mid,
                    deficit_after,
                    format!("auto-refill {} pulled from wallet", refill),
                ));
                sub.total_refilled += refill;
                sub.refill_count += 1;
                sub.last_refill_at = Some(Utc::now());
            }
        }

        sub.total_loss += loss;
        sub.sync_deficit(account.credit);

        if sub.credit_deficit > Decimal::ZERO {
            entries.push(CreditLedgerEntry::new(
                account.id.clone(),
                Some(sub.id.clone()),
                Some(trade.id.clone()),
                LedgerKind::DeficitRecorded,
                Decimal::ZERO,
                account.credit,
                deficit_mid,
                sub.credit_deficit,
                format!("deficit {} remains, refill mode on", sub.credit_deficit),
            ));
        }

        // Out of credit with nothing in the wallet: the subscription stops.
        if account.credit == Decimal::ZERO && refill == Decimal::ZERO {
            sub.status = FollowerStatus::Stopped;
            outcome.subscription_stopped = true;
            warn!(
                subscription = %sub.id,
                account = %account.id,
                "Credit exhausted, subscription stopped"
            );
        }
    }

    fn apply_profit(
        &self,
        account: &mut TradingAccount,
        sub: &mut CopyFollower,
        trade: &Trade,
        profit: Decimal,
        outcome: &mut DistributionOutcome,
        entries: &mut Vec<CreditLedgerEntry>,
    ) {
        let commission = round2(profit * self.config.copy_commission_pct / dec!(100));
        let admin_share = round2(commission * self.config.admin_commission_pct / dec!(100));
        let master_share = commission - admin_share;
        let gross = profit - commission;

        outcome.total_commission = commission;
        outcome.admin_share = admin_share;
        outcome.master_share = master_share;

        let deficit_before = sub.credit_deficit;

        if sub.is_refill_mode {
            let current_deficit = (sub.minimum_credit - account.credit).max(Decimal::ZERO);
            if gross >= current_deficit {
                // Restore the floor exactly; the remainder reaches the wallet.
                let credit_before = account.credit;
                account.credit += current_deficit;
                account.balance += gross - current_deficit;
                outcome.profit_to_credit = current_deficit;
                outcome.profit_to_wallet = gross - current_deficit;
                outcome.refill_completed = true;
                entries.push(CreditLedgerEntry::new(
                    account.id.clone(),
                    Some(sub.id.clone()),
                    Some(trade.id.clone()),
                    LedgerKind::RefillComplete,
                    current_deficit,
                    credit_before,
                    deficit_before,
                    Decimal::ZERO,
                    format!("refill complete, credit restored to {}", sub.minimum_credit),
                ));
                if outcome.profit_to_wallet > Decimal::ZERO {
                    entries.push(CreditLedgerEntry::new(
                        account.id.clone(),
                        Some(sub.id.clone()),
                        Some(trade.id.clone()),
                        LedgerKind::ProfitToWallet,
                        Decimal::ZERO,
                        account.credit,
                        Decimal::ZERO,
                        Decimal::ZERO,
                        format!("profit {} to wallet", outcome.profit_to_wallet),
                    ));
                }
            } else {
                // Partial refill: everything into credit, deficit shrinks.
                let credit_before = account.credit;
                account.credit += gross;
                outcome.profit_to_credit = gross;
                let deficit_after = (sub.minimum_credit - account.credit).max(Decimal::ZERO);
                entries.push(CreditLedgerEntry::new(
                    account.id.clone(),
                    Some(sub.id.clone()),
                    Some(trade.id.clone()),
                    LedgerKind::ProfitRefill,
                    gross,
                    credit_before,
                    deficit_before,
                    deficit_after,
                    format!("partial refill {}, deficit {} remains", gross, deficit_after),
                ));
            }
        } else {
            account.balance += gross;
            outcome.profit_to_wallet = gross;
            entries.push(CreditLedgerEntry::new(
                account.id.clone(),
                Some(sub.id.clone()),
                Some(trade.id.clone()),
                LedgerKind::ProfitToWallet,
                Decimal::ZERO,
                account.credit,
                deficit_before,
                deficit_before,
                format!("profit {} to wallet", gross),
            ));
        }

        sub.total_profit += profit;
        sub.total_profit_to_wallet += outcome.profit_to_wallet;
        if outcome.profit_to_credit > Decimal::ZERO {
            sub.total_refilled += outcome.profit_to_credit;
            sub.refill_count += 1;
            sub.last_refill_at = Some(Utc::now());
        }
        sub.sync_deficit(account.credit);
    }

    /// Credit the master's pending commission and record the event, at most
    /// once per (master, follower trade).
    async fn accrue_commission(
        &self,
        sub: &CopyFollower,
        ct: &CopyTrade,
        trade: &Trade,
        outcome: &DistributionOutcome,
    ) -> EngineResult<()> {
        let _guard = self.locks.lock(&sub.master_account_id).await;

        let record = CopyCommission::new(
            sub.master_account_id.clone(),
            sub.id.clone(),
            trade.id.clone(),
            ct.id.clone(),
            outcome.realized_pnl,
            self.config.copy_commission_pct,
            outcome.total_commission,
            outcome.admin_share,
            outcome.master_share,
        );

        if !self.db.insert_commission(&record).await? {
            // Already recorded by an earlier settlement attempt.
            return Ok(());
        }

        let mut master = self
            .db
            .get_account(&sub.master_account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {}", sub.master_account_id)))?;
        master.pending_commission += outcome.master_share;
        self.db.update_account(&master).await?;

        Ok(())
    }

    /// Admin credit adjustment with its ledger entry.
    pub async fn admin_adjust_credit(
        &self,
        account_id: &str,
        amount: Decimal,
        description: &str,
    ) -> EngineResult<TradingAccount> {
        if amount == Decimal::ZERO {
            return Err(EngineError::Validation("adjustment amount is zero".to_string()));
        }

        let _guard = self.locks.lock(account_id).await;
        let mut account = self
            .db
            .get_account(account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {account_id}")))?;

        if amount < Decimal::ZERO && account.credit + amount < Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "debit {} exceeds credit {}",
                -amount, account.credit
            )));
        }

        let credit_before = account.credit;
        account.credit += amount;

        let kind = if amount > Decimal::ZERO {
            LedgerKind::AdminCredit
        } else {
            LedgerKind::AdminDebit
        };
        let entry = CreditLedgerEntry::new(
            account.id.clone(),
            None,
            None,
            kind,
            amount,
            credit_before,
            Decimal::ZERO,
            Decimal::ZERO,
            description.to_string(),
        );

        self.db.update_account(&account).await?;
        self.db.insert_ledger_entry(&entry).await?;

        Ok(account)
    }

    /// Replay an account's ledger chain and compare it to the stored credit.
    pub async fn verify_ledger(&self, account_id: &str) -> EngineResult<LedgerAudit> {
        let account = self
            .db
            .get_account(account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {account_id}")))?;
        let entries = self.db.ledger_for_account(account_id).await?;

        let (replayed, broken) = match crate::models::replay_chain(&entries) {
            Ok(value) => (value, None),
            Err(id) => (Decimal::ZERO, Some(id)),
        };

        let consistent = broken.is_none() && (entries.is_empty() || replayed == account.credit);
        if !consistent {
            warn!(
                account = %account_id,
                replayed = %replayed,
                stored = %account.credit,
                "Ledger drift detected"
            );
        }

        Ok(LedgerAudit {
            account_id: account_id.to_string(),
            entries: entries.len(),
            replayed_credit: replayed,
            stored_credit: account.credit,
            consistent,
            broken_entry: broken,
        })
    }

    /// Reconciliation fallback: settle closed copy trades the per-trade path
    /// missed. Per-trade failures are logged and skipped.
    pub async fn settle_unsettled(&self) -> EngineResult<Vec<DistributionOutcome>> {
        let pending = self.db.unsettled_copy_trades().await?;
        let mut outcomes = Vec::new();

        for ct in pending {
            let Some(trade_id) = ct.follower_trade_id.clone() else {
                continue;
            };
            let trade = match self.db.get_trade(&trade_id).await? {
                Some(t) => t,
                None => {
                    warn!(copy_trade = %ct.id, "Unsettled copy trade has no follower trade");
                    continue;
                }
            };
            match self.settle_copy_close(&trade).await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => {
                    warn!(copy_trade = %ct.id, error = %e, "Reconciliation settlement failed");
                }
            }
        }

        Ok(outcomes)
    }
}
