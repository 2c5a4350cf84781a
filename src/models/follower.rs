//! Copy-follower subscription: links a follower account to a master.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sizing rule used to derive the follower's lot from the master's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopyMode {
    /// Always trade `copy_value` lots.
    FixedLot,
    /// Scale the master lot by balance ratio.
    BalanceBased,
    /// Scale the master lot by equity ratio.
    EquityBased,
    /// Scale the master lot by a fixed multiplier.
    Multiplier,
    /// Same as EquityBased.
    Auto,
}

impl CopyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyMode::FixedLot => "FIXED_LOT",
            CopyMode::BalanceBased => "BALANCE_BASED",
            CopyMode::EquityBased => "EQUITY_BASED",
            CopyMode::Multiplier => "MULTIPLIER",
            CopyMode::Auto => "AUTO",
        }
    }

    /// Accepts the legacy `LOT_MULTIPLIER` spelling for Multiplier.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "FIXED_LOT" => Some(CopyMode::FixedLot),
            "BALANCE_BASED" => Some(CopyMode::BalanceBased),
            "EQUITY_BASED" => Some(CopyMode::EquityBased),
            "MULTIPLIER" | "LOT_MULTIPLIER" => Some(CopyMode::Multiplier),
            "AUTO" => Some(CopyMode::Auto),
            _ => None,
        }
    }
}

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FollowerStatus {
    Active,
    Paused,
    Stopped,
}

impl FollowerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowerStatus::Active => "ACTIVE",
            FollowerStatus::Paused => "PAUSED",
            FollowerStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(FollowerStatus::Active),
            "PAUSED" => Some(FollowerStatus::Paused),
            "STOPPED" => Some(FollowerStatus::Stopped),
            _ => None,
        }
    }
}

/// One follower-to-master subscription.
///
/// Mutated by every replicated trade and every refill event; moves to
/// Stopped when the follower's credit is exhausted with nothing left in the
/// wallet to refill from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyFollower {
    pub id: String,

    pub follower_account_id: String,

    pub master_account_id: String,

    pub copy_mode: CopyMode,

    /// Fixed lot for FixedLot, multiplier for Multiplier; unused otherwise.
    pub copy_value: Decimal,

    /// Upper bound on any single replicated lot.
    pub max_lot_size: Decimal,

    /// Credit floor defended by the auto-refill service.
    pub minimum_credit: Decimal,

    /// `max(0, minimum_credit - credit)` tracked at the last mutation.
    pub credit_deficit: Decimal,

    /// True while profits are being diverted to restore the credit floor.
    pub is_refill_mode: bool,

    pub status: FollowerStatus,

    // Lifetime counters
    pub total_copied_trades: i64,
    pub total_profit: Decimal,
    pub total_loss: Decimal,
    pub total_refilled: Decimal,
    pub total_profit_to_wallet: Decimal,
    pub refill_count: i64,
    pub last_refill_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl CopyFollower {
    pub fn new(
        follower_account_id: String,
        master_account_id: String,
        copy_mode: CopyMode,
        copy_value: Decimal,
        max_lot_size: Decimal,
        minimum_credit: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            follower_account_id,
            master_account_id,
            copy_mode,
            copy_value,
            max_lot_size,
            minimum_credit,
            credit_deficit: Decimal::ZERO,
            is_refill_mode: false,
            status: FollowerStatus::Active,
            total_copied_trades: 0,
            total_profit: Decimal::ZERO,
            total_loss: Decimal::ZERO,
            total_refilled: Decimal::ZERO,
            total_profit_to_wallet: Decimal::ZERO,
            refill_count: 0,
            last_refill_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == FollowerStatus::Active
    }

    /// Sync deficit/refill state from the follower account's current credit.
    pub fn sync_deficit(&mut self, credit: Decimal) {
        self.credit_deficit = (self.minimum_credit - credit).max(Decimal::ZERO);
        self.is_refill_mode = self.credit_deficit > Decimal::ZERO;
    }
}
