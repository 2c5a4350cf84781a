//! Data models for accounts, trades, subscriptions, and the credit ledger.

mod account;
mod commission;
mod copy_trade;
mod follower;
mod ledger;
mod trade;

pub use account::{AccountStatus, TradingAccount};
pub use commission::{CommissionStatus, CopyCommission};
pub use copy_trade::{CopyTrade, CopyTradeStatus};
pub use follower::{CopyFollower, CopyMode, FollowerStatus};
pub use ledger::{replay_chain, CreditLedgerEntry, LedgerKind};
pub use trade::{CloseReason, OrderType, Trade, TradeSide, TradeStatus};
