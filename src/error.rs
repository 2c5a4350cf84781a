//! Engine error taxonomy.
//!
//! Every synchronous rejection carries a human-readable reason plus a stable
//! machine code for API consumers. Replication fan-out failures are *not*
//! errors at this level: they are converted into per-follower results by the
//! replication engine and never abort the batch.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced to the caller of a trade-lifecycle operation.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No live quote, or the symbol's market session is closed.
    #[error("market closed: {0}")]
    MarketClosed(String),

    /// Required margin exceeds the account's free margin.
    #[error("insufficient margin: required {required}, free {free}")]
    InsufficientMargin { required: Decimal, free: Decimal },

    /// Required margin exceeds total account equity.
    #[error("insufficient equity: required {required}, equity {equity}")]
    InsufficientEquity { required: Decimal, equity: Decimal },

    /// Mutation attempted on a non-Active account.
    #[error("account {0} is not active")]
    AccountInactive(String),

    /// Transition not allowed from the trade's current status.
    #[error("invalid trade state: {0}")]
    TradeState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable machine code for this error class.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::MarketClosed(_) => "MARKET_CLOSED",
            EngineError::InsufficientMargin { .. } => "INSUFFICIENT_MARGIN",
            EngineError::InsufficientEquity { .. } => "INSUFFICIENT_EQUITY",
            EngineError::AccountInactive(_) => "ACCOUNT_INACTIVE",
            EngineError::TradeState(_) => "INVALID_TRADE_STATE",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
