//! Trading account: withdrawable balance plus non-withdrawable credit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account status; only Active accounts may open or mutate trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    Banned,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Suspended => "SUSPENDED",
            AccountStatus::Banned => "BANNED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(AccountStatus::Active),
            "SUSPENDED" => Some(AccountStatus::Suspended),
            "BANNED" => Some(AccountStatus::Banned),
            _ => None,
        }
    }
}

/// A trading account.
///
/// `balance` is withdrawable wallet money; `credit` is the non-withdrawable
/// exposure buffer that absorbs copy-trading losses. `credit >= 0` holds
/// after every operation. Equity is never stored: it is always computed as
/// `balance + credit + sum of open trades' floating pnl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingAccount {
    pub id: String,

    pub name: String,

    /// Withdrawable wallet balance.
    pub balance: Decimal,

    /// Non-withdrawable exposure buffer.
    pub credit: Decimal,

    /// Leverage applied to new positions on this account.
    pub leverage: u32,

    pub status: AccountStatus,

    /// Masters are accounts whose trades fan out to followers.
    pub is_master: bool,

    /// Commission earned as a master, awaiting payout.
    pub pending_commission: Decimal,

    /// Lifetime count of trades replicated from (master) or onto (follower)
    /// this account.
    pub total_copied_trades: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl TradingAccount {
    pub fn new(name: String, balance: Decimal, credit: Decimal, leverage: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            balance,
            credit,
            leverage,
            status: AccountStatus::Active,
            is_master: false,
            pending_commission: Decimal::ZERO,
            total_copied_trades: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Equity given the summed floating pnl of the account's open trades.
    pub fn equity(&self, floating_pnl: Decimal) -> Decimal {
        self.balance + self.credit + floating_pnl
    }

    /// Margin level in percent, `None` when no margin is in use.
    pub fn margin_level(&self, floating_pnl: Decimal, used_margin: Decimal) -> Option<Decimal> {
        if used_margin <= Decimal::ZERO {
            return None;
        }
        Some(self.equity(floating_pnl) / used_margin * Decimal::ONE_HUNDRED)
    }
}
