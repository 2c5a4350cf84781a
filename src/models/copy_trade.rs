//! Copy trade: one replicated position linking a master trade to a
//! follower's own trade.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::follower::CopyMode;
use super::trade::TradeSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CopyTradeStatus {
    Open,
    Closed,
    Failed,
}

impl CopyTradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyTradeStatus::Open => "OPEN",
            CopyTradeStatus::Closed => "CLOSED",
            CopyTradeStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "OPEN" => Some(CopyTradeStatus::Open),
            "CLOSED" => Some(CopyTradeStatus::Closed),
            "FAILED" => Some(CopyTradeStatus::Failed),
            _ => None,
        }
    }
}

/// One replication of a master trade onto one follower.
///
/// At most one row exists per (master_trade_id, follower_id) pair; the
/// storage layer enforces this with a unique index and it doubles as the
/// idempotency key for replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyTrade {
    pub id: String,

    pub master_trade_id: String,

    /// Subscription this replication ran under.
    pub follower_id: String,

    pub follower_account_id: String,

    /// The follower's own trade; absent when replication failed before open.
    pub follower_trade_id: Option<String>,

    pub symbol: String,

    pub side: TradeSide,

    pub master_lot: Decimal,

    pub follower_lot: Decimal,

    /// Sizing rule and value in effect when the lot was computed.
    pub copy_mode: CopyMode,
    pub copy_value: Decimal,

    pub open_price: Decimal,

    pub close_price: Option<Decimal>,

    pub realized_pnl: Option<Decimal>,

    // Split of the realized pnl applied at settlement.
    pub profit_to_credit: Decimal,
    pub profit_to_wallet: Decimal,
    pub commission_paid: Decimal,

    pub status: CopyTradeStatus,

    pub fail_reason: Option<String>,

    /// Set once the per-trade commission/credit settlement ran; the daily
    /// reconciliation pass picks up closed rows where this is still false.
    pub settled: bool,

    pub opened_at: DateTime<Utc>,

    pub closed_at: Option<DateTime<Utc>>,
}

impl CopyTrade {
    #[allow(clippy::too_many_arguments)]
    pub fn opened(
        master_trade_id: String,
        follower_id: String,
        follower_account_id: String,
        follower_trade_id: String,
        symbol: String,
        side: TradeSide,
        master_lot: Decimal,
        follower_lot: Decimal,
        copy_mode: CopyMode,
        copy_value: Decimal,
        open_price: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            master_trade_id,
            follower_id,
            follower_account_id,
            follower_trade_id: Some(follower_trade_id),
            symbol,
            side,
            master_lot,
            follower_lot,
            copy_mode,
            copy_value,
            open_price,
            close_price: None,
            realized_pnl: None,
            profit_to_credit: Decimal::ZERO,
            profit_to_wallet: Decimal::ZERO,
            commission_paid: Decimal::ZERO,
            status: CopyTradeStatus::Open,
            fail_reason: None,
            settled: false,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    /// A record of a replication that could not open a follower trade.
    #[allow(clippy::too_many_arguments)]
    pub fn failed(
        master_trade_id: String,
        follower_id: String,
        follower_account_id: String,
        symbol: String,
        side: TradeSide,
        master_lot: Decimal,
        follower_lot: Decimal,
        copy_mode: CopyMode,
        copy_value: Decimal,
        open_price: Decimal,
        reason: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            master_trade_id,
            follower_id,
            follower_account_id,
            follower_trade_id: None,
            symbol,
            side,
            master_lot,
            follower_lot,
            copy_mode,
            copy_value,
            open_price,
            close_price: None,
            realized_pnl: None,
            profit_to_credit: Decimal::ZERO,
            profit_to_wallet: Decimal::ZERO,
            commission_paid: Decimal::ZERO,
            status: CopyTradeStatus::Failed,
            fail_reason: Some(reason),
            settled: true,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }
}
