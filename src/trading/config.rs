//! Engine configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::margin::SpreadType;

/// Configuration for the lifecycle, replication, and credit services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum simultaneously open/pending trades per account
    pub max_open_trades: usize,

    /// Maximum summed lots across an account's open trades
    pub max_total_lots: Decimal,

    /// Smallest tradable lot
    pub min_lot: Decimal,

    /// Largest single-trade lot
    pub max_lot: Decimal,

    /// Margin level (percent) at or below which the stop-out sweep fires
    pub stop_out_level_pct: Decimal,

    /// Commission charged per lot when a market order opens
    pub commission_per_lot: Decimal,

    /// Whether the per-lot commission is also charged on close
    pub close_commission: bool,

    /// Spread added to the quoted price on execution
    pub spread_value: Decimal,
    pub spread_type: SpreadType,

    /// Share of a follower's realized profit taken as commission (percent)
    pub copy_commission_pct: Decimal,

    /// Admin's cut of that commission (percent); the rest goes to the master
    pub admin_commission_pct: Decimal,

    /// Default credit floor for new subscriptions
    pub default_minimum_credit: Decimal,

    /// Quote cache TTL in seconds
    pub price_ttl_secs: i64,

    /// Outbox drain interval in seconds
    pub outbox_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_open_trades: 100,
            max_total_lots: dec!(100),
            min_lot: dec!(0.01),
            max_lot: dec!(50),
            stop_out_level_pct: dec!(20),   // force-liquidate at 20% margin level
            commission_per_lot: dec!(0),
            close_commission: false,
            spread_value: dec!(0),
            spread_type: SpreadType::Absolute,
            copy_commission_pct: dec!(50),  // half of follower profit
            admin_commission_pct: dec!(0),  // all of it to the master by default
            default_minimum_credit: dec!(1000),
            price_ttl_secs: 5,
            outbox_interval_secs: 10,
        }
    }
}
