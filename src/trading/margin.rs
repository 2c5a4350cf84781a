//! Pure margin, execution-price, and pnl calculators.
//!
//! Every function here is a deterministic function of its inputs; all
//! account-state dependent logic lives in the lifecycle manager.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::TradeSide;
use crate::pricing::Quote;

/// How the configured spread value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpreadType {
    /// Added as-is in price units.
    Absolute,
    /// Percentage of the bid/ask gap.
    GapPercent,
}

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Price a market order fills at: BUY at ask plus spread, SELL at bid minus
/// spread.
pub fn execution_price(
    side: TradeSide,
    quote: &Quote,
    spread_value: Decimal,
    spread_type: SpreadType,
) -> Decimal {
    let spread = match spread_type {
        SpreadType::Absolute => spread_value,
        SpreadType::GapPercent => quote.gap() * spread_value / dec!(100),
    };
    match side {
        TradeSide::Buy => quote.ask + spread,
        TradeSide::Sell => quote.bid - spread,
    }
}

/// Price a close fills at: the opposite side of the quoting convention used
/// at open. A BUY position closes into the bid, a SELL into the ask.
pub fn close_price(side: TradeSide, quote: &Quote) -> Decimal {
    match side {
        TradeSide::Buy => quote.bid,
        TradeSide::Sell => quote.ask,
    }
}

/// Margin reserved for a position, rounded to 2 decimals.
pub fn required_margin(
    quantity: Decimal,
    price: Decimal,
    leverage: u32,
    contract_size: Decimal,
) -> Decimal {
    if leverage == 0 {
        return Decimal::ZERO;
    }
    round2(quantity * contract_size * price / Decimal::from(leverage))
}

/// Directional pnl: BUY gains when price rises, SELL when it falls.
pub fn direction_pnl(
    side: TradeSide,
    open_price: Decimal,
    current_price: Decimal,
    quantity: Decimal,
    contract_size: Decimal,
) -> Decimal {
    let diff = match side {
        TradeSide::Buy => current_price - open_price,
        TradeSide::Sell => open_price - current_price,
    };
    diff * quantity * contract_size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: Decimal, ask: Decimal) -> Quote {
        Quote::new(bid, ask)
    }

    #[test]
    fn margin_formula() {
        // 1 lot EURUSD at 1.10, 1:100 -> 100000 * 1.10 / 100 = 1100.00
        assert_eq!(
            required_margin(dec!(1), dec!(1.10), 100, dec!(100000)),
            dec!(1100.00)
        );
        // 0.10 lot XAUUSD at 2400, 1:50 -> 0.1 * 100 * 2400 / 50 = 480.00
        assert_eq!(
            required_margin(dec!(0.10), dec!(2400), 50, dec!(100)),
            dec!(480.00)
        );
    }

    #[test]
    fn margin_rounds_to_cents() {
        // 0.03 * 100000 * 1.23456 / 100 = 37.0368 -> 37.04
        assert_eq!(
            required_margin(dec!(0.03), dec!(1.23456), 100, dec!(100000)),
            dec!(37.04)
        );
    }

    #[test]
    fn zero_leverage_reserves_nothing() {
        assert_eq!(
            required_margin(dec!(1), dec!(1.10), 0, dec!(100000)),
            Decimal::ZERO
        );
    }

    #[test]
    fn execution_price_sides() {
        let q = quote(dec!(1.1000), dec!(1.1002));
        assert_eq!(
            execution_price(TradeSide::Buy, &q, Decimal::ZERO, SpreadType::Absolute),
            dec!(1.1002)
        );
        assert_eq!(
            execution_price(TradeSide::Sell, &q, Decimal::ZERO, SpreadType::Absolute),
            dec!(1.1000)
        );
    }

    #[test]
    fn absolute_spread_widens_fill() {
        let q = quote(dec!(1.1000), dec!(1.1002));
        assert_eq!(
            execution_price(TradeSide::Buy, &q, dec!(0.0001), SpreadType::Absolute),
            dec!(1.1003)
        );
        assert_eq!(
            execution_price(TradeSide::Sell, &q, dec!(0.0001), SpreadType::Absolute),
            dec!(1.0999)
        );
    }

    #[test]
    fn gap_percent_spread() {
        // Gap is 0.0002; 50% of it is 0.0001.
        let q = quote(dec!(1.1000), dec!(1.1002));
        assert_eq!(
            execution_price(TradeSide::Buy, &q, dec!(50), SpreadType::GapPercent),
            dec!(1.1003)
        );
        assert_eq!(
            execution_price(TradeSide::Sell, &q, dec!(50), SpreadType::GapPercent),
            dec!(1.0999)
        );
    }

    #[test]
    fn close_price_is_opposite_side() {
        let q = quote(dec!(1.1000), dec!(1.1002));
        assert_eq!(close_price(TradeSide::Buy, &q), dec!(1.1000));
        assert_eq!(close_price(TradeSide::Sell, &q), dec!(1.1002));
    }

    #[test]
    fn pnl_directions() {
        assert_eq!(
            direction_pnl(TradeSide::Buy, dec!(1.10), dec!(1.11), dec!(1), dec!(100000)),
            dec!(1000.00)
        );
        assert_eq!(
            direction_pnl(TradeSide::Sell, dec!(1.10), dec!(1.11), dec!(1), dec!(100000)),
            dec!(-1000.00)
        );
    }
}
