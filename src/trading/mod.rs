//! Trading engine: margin math, lot sizing, trade lifecycle, replication.

mod config;
mod lifecycle;
mod lot_sizer;
mod margin;
mod replication;

pub use config::EngineConfig;
pub use lifecycle::{AccountSnapshot, OpenRequest, StopOutReport, TickReport, TradeEngine};
pub use lot_sizer::{LotSizer, SizingSnapshot};
pub use margin::{
    close_price, direction_pnl, execution_price, required_margin, round2, SpreadType,
};
pub use replication::{ReplicationEngine, ReplicationOutcome, ReplicationStatus};
