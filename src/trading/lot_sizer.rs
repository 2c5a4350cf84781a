//! Follower lot sizing: derives a follower's lot from the master's trade
//! under the subscription's copy mode.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{CopyFollower, CopyMode};

/// Balance/equity snapshot of both sides, taken at replication time.
#[derive(Debug, Clone, Copy)]
pub struct SizingSnapshot {
    pub master_lot: Decimal,
    pub master_balance: Decimal,
    pub master_equity: Decimal,
    pub follower_balance: Decimal,
    pub follower_equity: Decimal,
}

/// Calculator for follower lot sizes.
pub struct LotSizer {
    min_lot: Decimal,
}

impl LotSizer {
    pub fn new(min_lot: Decimal) -> Self {
        Self { min_lot }
    }

    /// Compute the follower lot for one replication.
    ///
    /// The raw mode-specific size is rounded to 2 decimals, floored at the
    /// minimum lot, and capped at the subscription's max lot size.
    pub fn size(&self, sub: &CopyFollower, snap: &SizingSnapshot) -> Decimal {
        let raw = match sub.copy_mode {
            CopyMode::FixedLot => sub.copy_value,
            CopyMode::BalanceBased => self.balance_based(snap),
            CopyMode::EquityBased | CopyMode::Auto => self.equity_based(snap),
            CopyMode::Multiplier => snap.master_lot * sub.copy_value,
        };
        self.clamp(raw, sub.max_lot_size)
    }

    fn balance_based(&self, snap: &SizingSnapshot) -> Decimal {
        if snap.master_balance <= Decimal::ZERO {
            // No meaningful ratio; copy the master lot unscaled.
            return snap.master_lot;
        }
        snap.master_lot * snap.follower_balance / snap.master_balance
    }

    fn equity_based(&self, snap: &SizingSnapshot) -> Decimal {
        if snap.master_equity <= Decimal::ZERO {
            return snap.master_lot;
        }
        snap.master_lot * snap.follower_equity / snap.master_equity
    }

    fn clamp(&self, raw: Decimal, max_lot: Decimal) -> Decimal {
        let mut lot = raw.round_dp(2);
        if lot < self.min_lot {
            lot = self.min_lot;
        }
        if max_lot > Decimal::ZERO && lot > max_lot {
            lot = max_lot;
        }
        lot
    }
}

impl Default for LotSizer {
    fn default() -> Self {
        Self::new(dec!(0.01))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(mode: CopyMode, value: Decimal, max_lot: Decimal) -> CopyFollower {
        CopyFollower::new(
            "follower".to_string(),
            "master".to_string(),
            mode,
            value,
            max_lot,
            dec!(1000),
        )
    }

    fn snap(master_lot: Decimal) -> SizingSnapshot {
        SizingSnapshot {
            master_lot,
            master_balance: dec!(10000),
            master_equity: dec!(5000),
            follower_balance: dec!(1000),
            follower_equity: dec!(2500),
        }
    }

    #[test]
    fn fixed_lot_capped_by_max() {
        let sizer = LotSizer::default();
        let s = sub(CopyMode::FixedLot, dec!(0.50), dec!(0.30));
        assert_eq!(sizer.size(&s, &snap(dec!(2))), dec!(0.30));

        let s = sub(CopyMode::FixedLot, dec!(0.25), dec!(1));
        assert_eq!(sizer.size(&s, &snap(dec!(2))), dec!(0.25));
    }

    #[test]
    fn balance_based_ratio() {
        // masterBalance=10000, followerBalance=1000, masterLot=1.00 -> 0.10
        let sizer = LotSizer::default();
        let s = sub(CopyMode::BalanceBased, Decimal::ZERO, dec!(10));
        assert_eq!(sizer.size(&s, &snap(dec!(1.00))), dec!(0.10));
    }

    #[test]
    fn balance_based_falls_back_unscaled() {
        let sizer = LotSizer::default();
        let s = sub(CopyMode::BalanceBased, Decimal::ZERO, dec!(10));
        let mut sn = snap(dec!(0.40));
        sn.master_balance = Decimal::ZERO;
        assert_eq!(sizer.size(&s, &sn), dec!(0.40));
    }

    #[test]
    fn equity_based_ratio() {
        // masterEquity=5000, followerEquity=2500, masterLot=0.50 -> 0.25
        let sizer = LotSizer::default();
        let s = sub(CopyMode::EquityBased, Decimal::ZERO, dec!(10));
        assert_eq!(sizer.size(&s, &snap(dec!(0.50))), dec!(0.25));

        // AUTO behaves identically.
        let s = sub(CopyMode::Auto, Decimal::ZERO, dec!(10));
        assert_eq!(sizer.size(&s, &snap(dec!(0.50))), dec!(0.25));
    }

    #[test]
    fn multiplier_scales_master_lot() {
        let sizer = LotSizer::default();
        let s = sub(CopyMode::Multiplier, dec!(2.5), dec!(10));
        assert_eq!(sizer.size(&s, &snap(dec!(0.40))), dec!(1.00));
    }

    #[test]
    fn rounds_and_floors_at_min_lot() {
        let sizer = LotSizer::default();
        let s = sub(CopyMode::BalanceBased, Decimal::ZERO, dec!(10));
        let mut sn = snap(dec!(0.01));
        sn.follower_balance = dec!(137);
        // 0.01 * 137/10000 = 0.000137 -> rounds to 0.00 -> floored to 0.01
        assert_eq!(sizer.size(&s, &sn), dec!(0.01));

        let mut sn = snap(dec!(1));
        sn.follower_balance = dec!(3333);
        // 0.3333 -> 0.33
        assert_eq!(sizer.size(&s, &sn), dec!(0.33));
    }

    #[test]
    fn cap_applies_after_scaling() {
        let sizer = LotSizer::default();
        let s = sub(CopyMode::Multiplier, dec!(10), dec!(2));
        assert_eq!(sizer.size(&s, &snap(dec!(1))), dec!(2));
    }
}
