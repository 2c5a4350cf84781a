//! Append-only credit ledger.
//!
//! Every credit mutation on an account writes one entry carrying the credit
//! and deficit values before and after. Replaying an account's entries in
//! order must reconstruct its current credit exactly; the reconciliation
//! routine in the credit service checks this chain.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of credit mutation being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerKind {
    AdminCredit,
    AdminDebit,
    /// Copy-trade loss absorbed by credit.
    TradeLoss,
    /// Margin reserved against credit-backed exposure (no credit delta).
    MarginHold,
    /// Margin released on close (no credit delta).
    MarginRelease,
    /// Wallet funds pulled in to restore the credit floor.
    WalletRefill,
    /// Remaining shortfall after a loss the wallet could not cover.
    DeficitRecorded,
    /// Profit diverted into credit while below the floor.
    ProfitRefill,
    /// Refill that restored credit exactly to its floor.
    RefillComplete,
    /// Profit routed to the wallet (no credit delta).
    ProfitToWallet,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::AdminCredit => "ADMIN_CREDIT",
            LedgerKind::AdminDebit => "ADMIN_DEBIT",
            LedgerKind::TradeLoss => "TRADE_LOSS",
            LedgerKind::MarginHold => "MARGIN_HOLD",
            LedgerKind::MarginRelease => "MARGIN_RELEASE",
            LedgerKind::WalletRefill => "WALLET_REFILL",
            LedgerKind::DeficitRecorded => "DEFICIT_RECORDED",
            LedgerKind::ProfitRefill => "PROFIT_REFILL",
            LedgerKind::RefillComplete => "REFILL_COMPLETE",
            LedgerKind::ProfitToWallet => "PROFIT_TO_WALLET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ADMIN_CREDIT" => Some(LedgerKind::AdminCredit),
            "ADMIN_DEBIT" => Some(LedgerKind::AdminDebit),
            "TRADE_LOSS" => Some(LedgerKind::TradeLoss),
            "MARGIN_HOLD" => Some(LedgerKind::MarginHold),
            "MARGIN_RELEASE" => Some(LedgerKind::MarginRelease),
            "WALLET_REFILL" => Some(LedgerKind::WalletRefill),
            "DEFICIT_RECORDED" => Some(LedgerKind::DeficitRecorded),
            "PROFIT_REFILL" => Some(LedgerKind::ProfitRefill),
            "REFILL_COMPLETE" => Some(LedgerKind::RefillComplete),
            "PROFIT_TO_WALLET" => Some(LedgerKind::ProfitToWallet),
            _ => None,
        }
    }
}

/// Immutable audit record of one credit mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub id: String,

    pub account_id: String,

    /// Subscription involved, when the mutation came from copy trading.
    pub follower_id: Option<String>,

    /// Trade that caused the mutation, when applicable.
    pub trade_id: Option<String>,

    pub kind: LedgerKind,

    /// Signed credit delta; zero for wallet-only and margin-audit entries.
    pub amount: Decimal,

    pub credit_before: Decimal,
    pub credit_after: Decimal,

    pub deficit_before: Decimal,
    pub deficit_after: Decimal,

    pub description: String,

    pub created_at: DateTime<Utc>,
}

impl CreditLedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: String,
        follower_id: Option<String>,
        trade_id: Option<String>,
        kind: LedgerKind,
        amount: Decimal,
        credit_before: Decimal,
        deficit_before: Decimal,
        deficit_after: Decimal,
        description: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            follower_id,
            trade_id,
            kind,
            amount,
            credit_before,
            credit_after: credit_before + amount,
            deficit_before,
            deficit_after,
            description,
            created_at: Utc::now(),
        }
    }

    /// Whether this entry is internally consistent.
    pub fn balances(&self) -> bool {
        self.credit_after == self.credit_before + self.amount
    }
}

/// Replay a chain of entries, verifying continuity and arithmetic.
///
/// Returns the final credit value, or the id of the first entry that breaks
/// the chain.
pub fn replay_chain(entries: &[CreditLedgerEntry]) -> Result<Decimal, String> {
    let mut credit = match entries.first() {
        Some(first) => first.credit_before,
        None => return Ok(Decimal::ZERO),
    };
    for entry in entries {
        if entry.credit_before != credit || !entry.balances() {
            return Err(entry.id.clone());
        }
        credit = entry.credit_after;
    }
    Ok(credit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(kind: LedgerKind, amount: Decimal, before: Decimal) -> CreditLedgerEntry {
        CreditLedgerEntry::new(
            "acc".to_string(),
            None,
            None,
            kind,
            amount,
            before,
            Decimal::ZERO,
            Decimal::ZERO,
            String::new(),
        )
    }

    #[test]
    fn chain_replays_to_current_credit() {
        let entries = vec![
            entry(LedgerKind::AdminCredit, dec!(1000), dec!(0)),
            entry(LedgerKind::TradeLoss, dec!(-200), dec!(1000)),
            entry(LedgerKind::ProfitRefill, dec!(150), dec!(800)),
        ];
        assert_eq!(replay_chain(&entries), Ok(dec!(950)));
    }

    #[test]
    fn broken_chain_is_detected() {
        let good = entry(LedgerKind::AdminCredit, dec!(1000), dec!(0));
        // Skips the 1000 the previous entry produced.
        let bad = entry(LedgerKind::TradeLoss, dec!(-200), dec!(500));
        let bad_id = bad.id.clone();
        assert_eq!(replay_chain(&[good, bad]), Err(bad_id));
    }

    #[test]
    fn empty_chain_is_zero() {
        assert_eq!(replay_chain(&[]), Ok(Decimal::ZERO));
    }
}
