//! Commission record for one profitable follower close.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommissionStatus {
    Pending,
    Deducted,
    Settled,
    Failed,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "PENDING",
            CommissionStatus::Deducted => "DEDUCTED",
            CommissionStatus::Settled => "SETTLED",
            CommissionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(CommissionStatus::Pending),
            "DEDUCTED" => Some(CommissionStatus::Deducted),
            "SETTLED" => Some(CommissionStatus::Settled),
            "FAILED" => Some(CommissionStatus::Failed),
            _ => None,
        }
    }
}

/// One commission event. Created at most once per (master_id, trade_id)
/// pair, where the trade is the follower's own closed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyCommission {
    pub id: String,

    pub master_id: String,

    pub follower_id: String,

    /// The follower trade the commission was charged on.
    pub trade_id: String,

    pub copy_trade_id: String,

    /// Realized profit the split was computed from.
    pub profit: Decimal,

    pub commission_pct: Decimal,

    pub total_commission: Decimal,

    pub admin_share: Decimal,

    pub master_share: Decimal,

    pub status: CommissionStatus,

    pub created_at: DateTime<Utc>,
}

impl CopyCommission {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        master_id: String,
        follower_id: String,
        trade_id: String,
        copy_trade_id: String,
        profit: Decimal,
        commission_pct: Decimal,
        total_commission: Decimal,
        admin_share: Decimal,
        master_share: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            master_id,
            follower_id,
            trade_id,
            copy_trade_id,
            profit,
            commission_pct,
            total_commission,
            admin_share,
            master_share,
            status: CommissionStatus::Deducted,
            created_at: Utc::now(),
        }
    }
}
