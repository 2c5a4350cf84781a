//! Trade model: one leveraged position and its lifecycle states.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// Order type: market orders fill immediately, the four pending variants
/// wait for the market to reach their trigger price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    BuyLimit,
    SellLimit,
    BuyStop,
    SellStop,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::BuyLimit => "BUY_LIMIT",
            OrderType::SellLimit => "SELL_LIMIT",
            OrderType::BuyStop => "BUY_STOP",
            OrderType::SellStop => "SELL_STOP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "MARKET" => Some(OrderType::Market),
            "BUY_LIMIT" => Some(OrderType::BuyLimit),
            "SELL_LIMIT" => Some(OrderType::SellLimit),
            "BUY_STOP" => Some(OrderType::BuyStop),
            "SELL_STOP" => Some(OrderType::SellStop),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, OrderType::Market)
    }

    /// Side implied by the order type; pending orders fix their side.
    pub fn implied_side(&self) -> Option<TradeSide> {
        match self {
            OrderType::Market => None,
            OrderType::BuyLimit | OrderType::BuyStop => Some(TradeSide::Buy),
            OrderType::SellLimit | OrderType::SellStop => Some(TradeSide::Sell),
        }
    }
}

/// Lifecycle status. Transitions are monotonic: a Closed or Cancelled trade
/// never comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Open,
    Closed,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(TradeStatus::Pending),
            "OPEN" => Some(TradeStatus::Open),
            "CLOSED" => Some(TradeStatus::Closed),
            "CANCELLED" => Some(TradeStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Closed | TradeStatus::Cancelled)
    }
}

/// What triggered a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    Manual,
    StopLoss,
    TakeProfit,
    StopOut,
    DemoReset,
    Cancelled,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Manual => "MANUAL",
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::StopOut => "STOP_OUT",
            CloseReason::DemoReset => "DEMO_RESET",
            CloseReason::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "MANUAL" => Some(CloseReason::Manual),
            "STOP_LOSS" => Some(CloseReason::StopLoss),
            "TAKE_PROFIT" => Some(CloseReason::TakeProfit),
            "STOP_OUT" => Some(CloseReason::StopOut),
            "DEMO_RESET" => Some(CloseReason::DemoReset),
            "CANCELLED" => Some(CloseReason::Cancelled),
            _ => None,
        }
    }
}

/// One leveraged position, owned exclusively by the account that holds it.
///
/// `margin_used` is fixed when the trade fills and never changes afterward;
/// everything mark-to-market (equity, floating pnl) is derived at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,

    /// Owning account.
    pub account_id: String,

    pub symbol: String,

    pub side: TradeSide,

    pub order_type: OrderType,

    /// Position size in lots (>= 0.01).
    pub quantity: Decimal,

    /// Fill price; for a Pending trade this is the requested trigger price
    /// until the order fires.
    pub open_price: Decimal,

    pub close_price: Option<Decimal>,

    pub stop_loss: Option<Decimal>,

    pub take_profit: Option<Decimal>,

    /// Margin reserved at fill time.
    pub margin_used: Decimal,

    pub leverage: u32,

    /// Symbol-class constant captured at open time.
    pub contract_size: Decimal,

    /// Commission accrued on this trade.
    pub commission: Decimal,

    /// Overnight swap accrued on this trade.
    pub swap: Decimal,

    pub realized_pnl: Option<Decimal>,

    /// True when this trade was opened by the replication engine on a
    /// follower account; its realized pnl is settled through the credit
    /// service instead of the wallet.
    pub is_copy: bool,

    pub status: TradeStatus,

    pub close_reason: Option<CloseReason>,

    pub opened_at: DateTime<Utc>,

    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: String,
        symbol: String,
        side: TradeSide,
        order_type: OrderType,
        quantity: Decimal,
        open_price: Decimal,
        leverage: u32,
        contract_size: Decimal,
        is_copy: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            symbol,
            side,
            order_type,
            quantity,
            open_price,
            close_price: None,
            stop_loss: None,
            take_profit: None,
            margin_used: Decimal::ZERO,
            leverage,
            contract_size,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            realized_pnl: None,
            is_copy,
            status: if order_type.is_pending() {
                TradeStatus::Pending
            } else {
                TradeStatus::Open
            },
            close_reason: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Notional exposure of the position.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.contract_size * self.open_price
    }

    /// Directional pnl at `current_price`, before commission and swap.
    pub fn direction_pnl(&self, current_price: Decimal) -> Decimal {
        let diff = match self.side {
            TradeSide::Buy => current_price - self.open_price,
            TradeSide::Sell => self.open_price - current_price,
        };
        diff * self.quantity * self.contract_size
    }

    /// Mark-to-market pnl net of accrued commission and swap.
    pub fn floating_pnl(&self, current_price: Decimal) -> Decimal {
        self.direction_pnl(current_price) - self.commission - self.swap
    }

    /// Whether the stop loss fires at `market_price` (the quote side a close
    /// would fill at).
    pub fn stop_loss_hit(&self, market_price: Decimal) -> bool {
        match (self.stop_loss, self.side) {
            (Some(sl), TradeSide::Buy) => market_price <= sl,
            (Some(sl), TradeSide::Sell) => market_price >= sl,
            (None, _) => false,
        }
    }

    /// Whether the take profit fires at `market_price`.
    pub fn take_profit_hit(&self, market_price: Decimal) -> bool {
        match (self.take_profit, self.side) {
            (Some(tp), TradeSide::Buy) => market_price >= tp,
            (Some(tp), TradeSide::Sell) => market_price <= tp,
            (None, _) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_trade(side: TradeSide) -> Trade {
        Trade::new(
            "acc-1".to_string(),
            "EURUSD".to_string(),
            side,
            OrderType::Market,
            dec!(1),
            dec!(1.1000),
            100,
            dec!(100000),
            false,
        )
    }

    #[test]
    fn direction_pnl_buy() {
        let trade = sample_trade(TradeSide::Buy);
        assert_eq!(trade.direction_pnl(dec!(1.1050)), dec!(500.0000));
        assert_eq!(trade.direction_pnl(dec!(1.0950)), dec!(-500.0000));
    }

    #[test]
    fn direction_pnl_sell() {
        let trade = sample_trade(TradeSide::Sell);
        assert_eq!(trade.direction_pnl(dec!(1.0950)), dec!(500.0000));
        assert_eq!(trade.direction_pnl(dec!(1.1050)), dec!(-500.0000));
    }

    #[test]
    fn floating_pnl_nets_costs() {
        let mut trade = sample_trade(TradeSide::Buy);
        trade.commission = dec!(7);
        trade.swap = dec!(3);
        assert_eq!(trade.floating_pnl(dec!(1.1050)), dec!(490.0000));
    }

    #[test]
    fn stop_levels() {
        let mut trade = sample_trade(TradeSide::Buy);
        trade.stop_loss = Some(dec!(1.0900));
        trade.take_profit = Some(dec!(1.1200));

        assert!(trade.stop_loss_hit(dec!(1.0900)));
        assert!(trade.stop_loss_hit(dec!(1.0850)));
        assert!(!trade.stop_loss_hit(dec!(1.0950)));

        assert!(trade.take_profit_hit(dec!(1.1200)));
        assert!(!trade.take_profit_hit(dec!(1.1150)));
    }

    #[test]
    fn pending_orders_start_pending() {
        let trade = Trade::new(
            "acc-1".to_string(),
            "EURUSD".to_string(),
            TradeSide::Buy,
            OrderType::BuyLimit,
            dec!(0.10),
            dec!(1.0900),
            100,
            dec!(100000),
            false,
        );
        assert_eq!(trade.status, TradeStatus::Pending);
        assert!(!trade.is_open());
    }

    #[test]
    fn enum_round_trips() {
        assert_eq!(OrderType::parse("BUY_LIMIT"), Some(OrderType::BuyLimit));
        assert_eq!(OrderType::BuyLimit.as_str(), "BUY_LIMIT");
        assert_eq!(CloseReason::parse("STOP_OUT"), Some(CloseReason::StopOut));
        assert_eq!(TradeStatus::parse("cancelled"), Some(TradeStatus::Cancelled));
        assert!(TradeStatus::Cancelled.is_terminal());
    }
}
