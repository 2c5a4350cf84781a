//! Database persistence for the back office.
//!
//! Stores accounts, trades, copy subscriptions, replicated trades, the
//! credit ledger, commission records, and the side-effect outbox. The
//! unique indexes on copy_trades(master_trade_id, follower_id) and
//! copy_commissions(master_id, trade_id) are the storage-level idempotency
//! guards behind replication and commission settlement.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{
    AccountStatus, CloseReason, CommissionStatus, CopyCommission, CopyFollower, CopyMode,
    CopyTrade, CopyTradeStatus, CreditLedgerEntry, FollowerStatus, LedgerKind, OrderType, Trade,
    TradeSide, TradeStatus, TradingAccount,
};

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn to_f64_opt(value: Option<Decimal>) -> Option<f64> {
    value.map(to_f64)
}

// REAL columns round-trip through f64; normalize the float noise away.
fn to_dec(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or_default().round_dp(6)
}

fn to_dec_opt(value: Option<f64>) -> Option<Decimal> {
    value.map(to_dec)
}

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored account row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredAccount {
    pub id: String,
    pub name: String,
    pub balance: f64,
    pub credit: f64,
    pub leverage: i64,
    pub status: String,
    pub is_master: bool,
    pub pending_commission: f64,
    pub total_copied_trades: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredAccount {
    fn into_account(self) -> Result<TradingAccount> {
        Ok(TradingAccount {
            status: AccountStatus::parse(&self.status)
                .with_context(|| format!("bad account status: {}", self.status))?,
            id: self.id,
            name: self.name,
            balance: to_dec(self.balance),
            credit: to_dec(self.credit),
            leverage: self.leverage as u32,
            is_master: self.is_master,
            pending_commission: to_dec(self.pending_commission),
            total_copied_trades: self.total_copied_trades,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: f64,
    pub open_price: f64,
    pub close_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub margin_used: f64,
    pub leverage: i64,
    pub contract_size: f64,
    pub commission: f64,
    pub swap: f64,
    pub realized_pnl: Option<f64>,
    pub is_copy: bool,
    pub status: String,
    pub close_reason: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl StoredTrade {
    fn into_trade(self) -> Result<Trade> {
        Ok(Trade {
            side: TradeSide::parse(&self.side)
                .with_context(|| format!("bad trade side: {}", self.side))?,
            order_type: OrderType::parse(&self.order_type)
                .with_context(|| format!("bad order type: {}", self.order_type))?,
            status: TradeStatus::parse(&self.status)
                .with_context(|| format!("bad trade status: {}", self.status))?,
            close_reason: match self.close_reason {
                Some(r) => Some(
                    CloseReason::parse(&r).with_context(|| format!("bad close reason: {r}"))?,
                ),
                None => None,
            },
            id: self.id,
            account_id: self.account_id,
            symbol: self.symbol,
            quantity: to_dec(self.quantity),
            open_price: to_dec(self.open_price),
            close_price: to_dec_opt(self.close_price),
            stop_loss: to_dec_opt(self.stop_loss),
            take_profit: to_dec_opt(self.take_profit),
            margin_used: to_dec(self.margin_used),
            leverage: self.leverage as u32,
            contract_size: to_dec(self.contract_size),
            commission: to_dec(self.commission),
            swap: to_dec(self.swap),
            realized_pnl: to_dec_opt(self.realized_pnl),
            is_copy: self.is_copy,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        })
    }
}

/// Stored subscription row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredFollower {
    pub id: String,
    pub follower_account_id: String,
    pub master_account_id: String,
    pub copy_mode: String,
    pub copy_value: f64,
    pub max_lot_size: f64,
    pub minimum_credit: f64,
    pub credit_deficit: f64,
    pub is_refill_mode: bool,
    pub status: String,
    pub total_copied_trades: i64,
    pub total_profit: f64,
    pub total_loss: f64,
    pub total_refilled: f64,
    pub total_profit_to_wallet: f64,
    pub refill_count: i64,
    pub last_refill_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredFollower {
    fn into_follower(self) -> Result<CopyFollower> {
        Ok(CopyFollower {
            copy_mode: CopyMode::parse(&self.copy_mode)
                .with_context(|| format!("bad copy mode: {}", self.copy_mode))?,
            status: FollowerStatus::parse(&self.status)
                .with_context(|| format!("bad follower status: {}", self.status))?,
            id: self.id,
            follower_account_id: self.follower_account_id,
            master_account_id: self.master_account_id,
            copy_value: to_dec(self.copy_value),
            max_lot_size: to_dec(self.max_lot_size),
            minimum_credit: to_dec(self.minimum_credit),
            credit_deficit: to_dec(self.credit_deficit),
            is_refill_mode: self.is_refill_mode,
            total_copied_trades: self.total_copied_trades,
            total_profit: to_dec(self.total_profit),
            total_loss: to_dec(self.total_loss),
            total_refilled: to_dec(self.total_refilled),
            total_profit_to_wallet: to_dec(self.total_profit_to_wallet),
            refill_count: self.refill_count,
            last_refill_at: self.last_refill_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Stored copy trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredCopyTrade {
    pub id: String,
    pub master_trade_id: String,
    pub follower_id: String,
    pub follower_account_id: String,
    pub follower_trade_id: Option<String>,
    pub symbol: String,
    pub side: String,
    pub master_lot: f64,
    pub follower_lot: f64,
    pub copy_mode: String,
    pub copy_value: f64,
    pub open_price: f64,
    pub close_price: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub profit_to_credit: f64,
    pub profit_to_wallet: f64,
    pub commission_paid: f64,
    pub status: String,
    pub fail_reason: Option<String>,
    pub settled: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl StoredCopyTrade {
    fn into_copy_trade(self) -> Result<CopyTrade> {
        Ok(CopyTrade {
            side: TradeSide::parse(&self.side)
                .with_context(|| format!("bad trade side: {}", self.side))?,
            copy_mode: CopyMode::parse(&self.copy_mode)
                .with_context(|| format!("bad copy mode: {}", self.copy_mode))?,
            status: CopyTradeStatus::parse(&self.status)
                .with_context(|| format!("bad copy trade status: {}", self.status))?,
            id: self.id,
            master_trade_id: self.master_trade_id,
            follower_id: self.follower_id,
            follower_account_id: self.follower_account_id,
            follower_trade_id: self.follower_trade_id,
            symbol: self.symbol,
            master_lot: to_dec(self.master_lot),
            follower_lot: to_dec(self.follower_lot),
            copy_value: to_dec(self.copy_value),
            open_price: to_dec(self.open_price),
            close_price: to_dec_opt(self.close_price),
            realized_pnl: to_dec_opt(self.realized_pnl),
            profit_to_credit: to_dec(self.profit_to_credit),
            profit_to_wallet: to_dec(self.profit_to_wallet),
            commission_paid: to_dec(self.commission_paid),
            fail_reason: self.fail_reason,
            settled: self.settled,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        })
    }
}

/// Stored ledger entry row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredLedgerEntry {
    pub id: String,
    pub account_id: String,
    pub follower_id: Option<String>,
    pub trade_id: Option<String>,
    pub kind: String,
    pub amount: f64,
    pub credit_before: f64,
    pub credit_after: f64,
    pub deficit_before: f64,
    pub deficit_after: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl StoredLedgerEntry {
    fn into_entry(self) -> Result<CreditLedgerEntry> {
        Ok(CreditLedgerEntry {
            kind: LedgerKind::parse(&self.kind)
                .with_context(|| format!("bad ledger kind: {}", self.kind))?,
            id: self.id,
            account_id: self.account_id,
            follower_id: self.follower_id,
            trade_id: self.trade_id,
            amount: to_dec(self.amount),
            credit_before: to_dec(self.credit_before),
            credit_after: to_dec(self.credit_after),
            deficit_before: to_dec(self.deficit_before),
            deficit_after: to_dec(self.deficit_after),
            description: self.description,
            created_at: self.created_at,
        })
    }
}

/// Stored commission row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredCommission {
    pub id: String,
    pub master_id: String,
    pub follower_id: String,
    pub trade_id: String,
    pub copy_trade_id: String,
    pub profit: f64,
    pub commission_pct: f64,
    pub total_commission: f64,
    pub admin_share: f64,
    pub master_share: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl StoredCommission {
    fn into_commission(self) -> Result<CopyCommission> {
        Ok(CopyCommission {
            status: CommissionStatus::parse(&self.status)
                .with_context(|| format!("bad commission status: {}", self.status))?,
            id: self.id,
            master_id: self.master_id,
            follower_id: self.follower_id,
            trade_id: self.trade_id,
            copy_trade_id: self.copy_trade_id,
            profit: to_dec(self.profit),
            commission_pct: to_dec(self.commission_pct),
            total_commission: to_dec(self.total_commission),
            admin_share: to_dec(self.admin_share),
            master_share: to_dec(self.master_share),
            created_at: self.created_at,
        })
    }
}

/// Stored outbox event row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredOutboxEvent {
    pub id: String,
    pub idempotency_key: String,
    pub kind: String,
    pub payload: String,
    pub dispatched: bool,
    pub attempts: i64,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.message().contains("UNIQUE constraint failed"))
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Single-connection in-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                balance REAL NOT NULL DEFAULT 0,
                credit REAL NOT NULL DEFAULT 0,
                leverage INTEGER NOT NULL DEFAULT 100,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                is_master INTEGER NOT NULL DEFAULT 0,
                pending_commission REAL NOT NULL DEFAULT 0,
                total_copied_trades INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                quantity REAL NOT NULL,
                open_price REAL NOT NULL,
                close_price REAL,
                stop_loss REAL,
                take_profit REAL,
                margin_used REAL NOT NULL DEFAULT 0,
                leverage INTEGER NOT NULL,
                contract_size REAL NOT NULL,
                commission REAL NOT NULL DEFAULT 0,
                swap REAL NOT NULL DEFAULT 0,
                realized_pnl REAL,
                is_copy INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                close_reason TEXT,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copy_followers (
                id TEXT PRIMARY KEY,
                follower_account_id TEXT NOT NULL,
                master_account_id TEXT NOT NULL,
                copy_mode TEXT NOT NULL,
                copy_value REAL NOT NULL DEFAULT 0,
                max_lot_size REAL NOT NULL DEFAULT 0,
                minimum_credit REAL NOT NULL DEFAULT 1000,
                credit_deficit REAL NOT NULL DEFAULT 0,
                is_refill_mode INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                total_copied_trades INTEGER NOT NULL DEFAULT 0,
                total_profit REAL NOT NULL DEFAULT 0,
                total_loss REAL NOT NULL DEFAULT 0,
                total_refilled REAL NOT NULL DEFAULT 0,
                total_profit_to_wallet REAL NOT NULL DEFAULT 0,
                refill_count INTEGER NOT NULL DEFAULT 0,
                last_refill_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(follower_account_id, master_account_id),
                FOREIGN KEY (follower_account_id) REFERENCES accounts(id),
                FOREIGN KEY (master_account_id) REFERENCES accounts(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copy_trades (
                id TEXT PRIMARY KEY,
                master_trade_id TEXT NOT NULL,
                follower_id TEXT NOT NULL,
                follower_account_id TEXT NOT NULL,
                follower_trade_id TEXT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                master_lot REAL NOT NULL,
                follower_lot REAL NOT NULL,
                copy_mode TEXT NOT NULL,
                copy_value REAL NOT NULL DEFAULT 0,
                open_price REAL NOT NULL,
                close_price REAL,
                realized_pnl REAL,
                profit_to_credit REAL NOT NULL DEFAULT 0,
                profit_to_wallet REAL NOT NULL DEFAULT 0,
                commission_paid REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                fail_reason TEXT,
                settled INTEGER NOT NULL DEFAULT 0,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                UNIQUE(master_trade_id, follower_id),
                FOREIGN KEY (follower_id) REFERENCES copy_followers(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credit_ledger (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                follower_id TEXT,
                trade_id TEXT,
                kind TEXT NOT NULL,
                amount REAL NOT NULL,
                credit_before REAL NOT NULL,
                credit_after REAL NOT NULL,
                deficit_before REAL NOT NULL DEFAULT 0,
                deficit_after REAL NOT NULL DEFAULT 0,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copy_commissions (
                id TEXT PRIMARY KEY,
                master_id TEXT NOT NULL,
                follower_id TEXT NOT NULL,
                trade_id TEXT NOT NULL,
                copy_trade_id TEXT NOT NULL,
                profit REAL NOT NULL,
                commission_pct REAL NOT NULL,
                total_commission REAL NOT NULL,
                admin_share REAL NOT NULL DEFAULT 0,
                master_share REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(master_id, trade_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                id TEXT PRIMARY KEY,
                idempotency_key TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                dispatched INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                dispatched_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_account ON trades(account_id, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_followers_master ON copy_followers(master_account_id, status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_copy_trades_master ON copy_trades(master_trade_id, status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_copy_trades_follower_trade ON copy_trades(follower_trade_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_account ON credit_ledger(account_id, created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(dispatched, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Accounts ====================

    pub async fn insert_account(&self, account: &TradingAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, name, balance, credit, leverage, status, is_master,
                pending_commission, total_copied_trades, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.name)
        .bind(to_f64(account.balance))
        .bind(to_f64(account.credit))
        .bind(account.leverage as i64)
        .bind(account.status.as_str())
        .bind(account.is_master)
        .bind(to_f64(account.pending_commission))
        .bind(account.total_copied_trades)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<TradingAccount>> {
        let row = sqlx::query_as::<_, StoredAccount>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredAccount::into_account).transpose()
    }

    pub async fn update_account(&self, account: &TradingAccount) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts SET
                name = ?, balance = ?, credit = ?, leverage = ?, status = ?,
                is_master = ?, pending_commission = ?, total_copied_trades = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&account.name)
        .bind(to_f64(account.balance))
        .bind(to_f64(account.credit))
        .bind(account.leverage as i64)
        .bind(account.status.as_str())
        .bind(account.is_master)
        .bind(to_f64(account.pending_commission))
        .bind(account.total_copied_trades)
        .bind(Utc::now())
        .bind(&account.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_accounts(&self) -> Result<Vec<TradingAccount>> {
        let rows = sqlx::query_as::<_, StoredAccount>("SELECT * FROM accounts ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(StoredAccount::into_account).collect()
    }

    // ==================== Trades ====================

    pub async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, account_id, symbol, side, order_type, quantity, open_price,
                close_price, stop_loss, take_profit, margin_used, leverage,
                contract_size, commission, swap, realized_pnl, is_copy, status,
                close_reason, opened_at, closed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.account_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.order_type.as_str())
        .bind(to_f64(trade.quantity))
        .bind(to_f64(trade.open_price))
        .bind(to_f64_opt(trade.close_price))
        .bind(to_f64_opt(trade.stop_loss))
        .bind(to_f64_opt(trade.take_profit))
        .bind(to_f64(trade.margin_used))
        .bind(trade.leverage as i64)
        .bind(to_f64(trade.contract_size))
        .bind(to_f64(trade.commission))
        .bind(to_f64(trade.swap))
        .bind(to_f64_opt(trade.realized_pnl))
        .bind(trade.is_copy)
        .bind(trade.status.as_str())
        .bind(trade.close_reason.map(|r| r.as_str()))
        .bind(trade.opened_at)
        .bind(trade.closed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_trade(&self, id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query_as::<_, StoredTrade>("SELECT * FROM trades WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredTrade::into_trade).transpose()
    }

    pub async fn update_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades SET
                quantity = ?, open_price = ?, close_price = ?, stop_loss = ?,
                take_profit = ?, margin_used = ?, commission = ?, swap = ?,
                realized_pnl = ?, status = ?, close_reason = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(to_f64(trade.quantity))
        .bind(to_f64(trade.open_price))
        .bind(to_f64_opt(trade.close_price))
        .bind(to_f64_opt(trade.stop_loss))
        .bind(to_f64_opt(trade.take_profit))
        .bind(to_f64(trade.margin_used))
        .bind(to_f64(trade.commission))
        .bind(to_f64(trade.swap))
        .bind(to_f64_opt(trade.realized_pnl))
        .bind(trade.status.as_str())
        .bind(trade.close_reason.map(|r| r.as_str()))
        .bind(trade.closed_at)
        .bind(&trade.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Open trades on one account.
    pub async fn open_trades_for_account(&self, account_id: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades WHERE account_id = ? AND status = 'OPEN' ORDER BY opened_at",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredTrade::into_trade).collect()
    }

    /// Open and pending trades on one account (for trade-count caps).
    pub async fn active_trades_for_account(&self, account_id: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades WHERE account_id = ? AND status IN ('OPEN', 'PENDING') ORDER BY opened_at",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredTrade::into_trade).collect()
    }

    pub async fn open_trades_for_symbol(&self, symbol: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades WHERE symbol = ? AND status = 'OPEN' ORDER BY opened_at",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredTrade::into_trade).collect()
    }

    pub async fn pending_trades_for_symbol(&self, symbol: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades WHERE symbol = ? AND status = 'PENDING' ORDER BY opened_at",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredTrade::into_trade).collect()
    }

    // ==================== Followers ====================

    pub async fn insert_follower(&self, sub: &CopyFollower) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO copy_followers (
                id, follower_account_id, master_account_id, copy_mode, copy_value,
                max_lot_size, minimum_credit, credit_deficit, is_refill_mode, status,
                total_copied_trades, total_profit, total_loss, total_refilled,
                total_profit_to_wallet, refill_count, last_refill_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sub.id)
        .bind(&sub.follower_account_id)
        .bind(&sub.master_account_id)
        .bind(sub.copy_mode.as_str())
        .bind(to_f64(sub.copy_value))
        .bind(to_f64(sub.max_lot_size))
        .bind(to_f64(sub.minimum_credit))
        .bind(to_f64(sub.credit_deficit))
        .bind(sub.is_refill_mode)
        .bind(sub.status.as_str())
        .bind(sub.total_copied_trades)
        .bind(to_f64(sub.total_profit))
        .bind(to_f64(sub.total_loss))
        .bind(to_f64(sub.total_refilled))
        .bind(to_f64(sub.total_profit_to_wallet))
        .bind(sub.refill_count)
        .bind(sub.last_refill_at)
        .bind(sub.created_at)
        .bind(sub.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_follower(&self, id: &str) -> Result<Option<CopyFollower>> {
        let row = sqlx::query_as::<_, StoredFollower>("SELECT * FROM copy_followers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredFollower::into_follower).transpose()
    }

    pub async fn follower_by_accounts(
        &self,
        follower_account_id: &str,
        master_account_id: &str,
    ) -> Result<Option<CopyFollower>> {
        let row = sqlx::query_as::<_, StoredFollower>(
            "SELECT * FROM copy_followers WHERE follower_account_id = ? AND master_account_id = ?",
        )
        .bind(follower_account_id)
        .bind(master_account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredFollower::into_follower).transpose()
    }

    pub async fn update_follower(&self, sub: &CopyFollower) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE copy_followers SET
                copy_mode = ?, copy_value = ?, max_lot_size = ?, minimum_credit = ?,
                credit_deficit = ?, is_refill_mode = ?, status = ?,
                total_copied_trades = ?, total_profit = ?, total_loss = ?,
                total_refilled = ?, total_profit_to_wallet = ?, refill_count = ?,
                last_refill_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(sub.copy_mode.as_str())
        .bind(to_f64(sub.copy_value))
        .bind(to_f64(sub.max_lot_size))
        .bind(to_f64(sub.minimum_credit))
        .bind(to_f64(sub.credit_deficit))
        .bind(sub.is_refill_mode)
        .bind(sub.status.as_str())
        .bind(sub.total_copied_trades)
        .bind(to_f64(sub.total_profit))
        .bind(to_f64(sub.total_loss))
        .bind(to_f64(sub.total_refilled))
        .bind(to_f64(sub.total_profit_to_wallet))
        .bind(sub.refill_count)
        .bind(sub.last_refill_at)
        .bind(Utc::now())
        .bind(&sub.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn active_followers_of_master(
        &self,
        master_account_id: &str,
    ) -> Result<Vec<CopyFollower>> {
        let rows = sqlx::query_as::<_, StoredFollower>(
            "SELECT * FROM copy_followers WHERE master_account_id = ? AND status = 'ACTIVE' ORDER BY created_at",
        )
        .bind(master_account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredFollower::into_follower).collect()
    }

    // ==================== Copy Trades ====================

    /// Insert a copy trade. Returns false when the (master_trade_id,
    /// follower_id) unique index rejected it; callers treat that as an
    /// idempotent skip.
    pub async fn insert_copy_trade(&self, ct: &CopyTrade) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO copy_trades (
                id, master_trade_id, follower_id, follower_account_id, follower_trade_id,
                symbol, side, master_lot, follower_lot, copy_mode, copy_value,
                open_price, close_price, realized_pnl, profit_to_credit,
                profit_to_wallet, commission_paid, status, fail_reason, settled,
                opened_at, closed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ct.id)
        .bind(&ct.master_trade_id)
        .bind(&ct.follower_id)
        .bind(&ct.follower_account_id)
        .bind(&ct.follower_trade_id)
        .bind(&ct.symbol)
        .bind(ct.side.as_str())
        .bind(to_f64(ct.master_lot))
        .bind(to_f64(ct.follower_lot))
        .bind(ct.copy_mode.as_str())
        .bind(to_f64(ct.copy_value))
        .bind(to_f64(ct.open_price))
        .bind(to_f64_opt(ct.close_price))
        .bind(to_f64_opt(ct.realized_pnl))
        .bind(to_f64(ct.profit_to_credit))
        .bind(to_f64(ct.profit_to_wallet))
        .bind(to_f64(ct.commission_paid))
        .bind(ct.status.as_str())
        .bind(&ct.fail_reason)
        .bind(ct.settled)
        .bind(ct.opened_at)
        .bind(ct.closed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_copy_trade(
        &self,
        master_trade_id: &str,
        follower_id: &str,
    ) -> Result<Option<CopyTrade>> {
        let row = sqlx::query_as::<_, StoredCopyTrade>(
            "SELECT * FROM copy_trades WHERE master_trade_id = ? AND follower_id = ?",
        )
        .bind(master_trade_id)
        .bind(follower_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredCopyTrade::into_copy_trade).transpose()
    }

    pub async fn copy_trade_by_follower_trade(
        &self,
        follower_trade_id: &str,
    ) -> Result<Option<CopyTrade>> {
        let row = sqlx::query_as::<_, StoredCopyTrade>(
            "SELECT * FROM copy_trades WHERE follower_trade_id = ?",
        )
        .bind(follower_trade_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredCopyTrade::into_copy_trade).transpose()
    }

    pub async fn update_copy_trade(&self, ct: &CopyTrade) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE copy_trades SET
                follower_trade_id = ?, close_price = ?, realized_pnl = ?,
                profit_to_credit = ?, profit_to_wallet = ?, commission_paid = ?,
                status = ?, fail_reason = ?, settled = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&ct.follower_trade_id)
        .bind(to_f64_opt(ct.close_price))
        .bind(to_f64_opt(ct.realized_pnl))
        .bind(to_f64(ct.profit_to_credit))
        .bind(to_f64(ct.profit_to_wallet))
        .bind(to_f64(ct.commission_paid))
        .bind(ct.status.as_str())
        .bind(&ct.fail_reason)
        .bind(ct.settled)
        .bind(ct.closed_at)
        .bind(&ct.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn open_copy_trades_for_master_trade(
        &self,
        master_trade_id: &str,
    ) -> Result<Vec<CopyTrade>> {
        let rows = sqlx::query_as::<_, StoredCopyTrade>(
            "SELECT * FROM copy_trades WHERE master_trade_id = ? AND status = 'OPEN' ORDER BY opened_at",
        )
        .bind(master_trade_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredCopyTrade::into_copy_trade).collect()
    }

    /// Open copy trades across all of a master's trades.
    pub async fn open_copy_trades_for_master_account(
        &self,
        master_account_id: &str,
    ) -> Result<Vec<CopyTrade>> {
        let rows = sqlx::query_as::<_, StoredCopyTrade>(
            r#"
            SELECT ct.* FROM copy_trades ct
            JOIN copy_followers f ON f.id = ct.follower_id
            WHERE f.master_account_id = ? AND ct.status = 'OPEN'
            ORDER BY ct.opened_at
            "#,
        )
        .bind(master_account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredCopyTrade::into_copy_trade).collect()
    }

    /// Closed copy trades whose per-trade settlement never ran.
    pub async fn unsettled_copy_trades(&self) -> Result<Vec<CopyTrade>> {
        let rows = sqlx::query_as::<_, StoredCopyTrade>(
            "SELECT * FROM copy_trades WHERE status = 'CLOSED' AND settled = 0 ORDER BY closed_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredCopyTrade::into_copy_trade).collect()
    }

    // ==================== Credit Ledger ====================

    pub async fn insert_ledger_entry(&self, entry: &CreditLedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_ledger (
                id, account_id, follower_id, trade_id, kind, amount,
                credit_before, credit_after, deficit_before, deficit_after,
                description, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.account_id)
        .bind(&entry.follower_id)
        .bind(&entry.trade_id)
        .bind(entry.kind.as_str())
        .bind(to_f64(entry.amount))
        .bind(to_f64(entry.credit_before))
        .bind(to_f64(entry.credit_after))
        .bind(to_f64(entry.deficit_before))
        .bind(to_f64(entry.deficit_after))
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn ledger_for_account(&self, account_id: &str) -> Result<Vec<CreditLedgerEntry>> {
        let rows = sqlx::query_as::<_, StoredLedgerEntry>(
            "SELECT * FROM credit_ledger WHERE account_id = ? ORDER BY created_at, id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredLedgerEntry::into_entry).collect()
    }

    // ==================== Commissions ====================

    /// Insert a commission record. Returns false when the (master_id,
    /// trade_id) unique index rejected it.
    pub async fn insert_commission(&self, c: &CopyCommission) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO copy_commissions (
                id, master_id, follower_id, trade_id, copy_trade_id, profit,
                commission_pct, total_commission, admin_share, master_share,
                status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&c.id)
        .bind(&c.master_id)
        .bind(&c.follower_id)
        .bind(&c.trade_id)
        .bind(&c.copy_trade_id)
        .bind(to_f64(c.profit))
        .bind(to_f64(c.commission_pct))
        .bind(to_f64(c.total_commission))
        .bind(to_f64(c.admin_share))
        .bind(to_f64(c.master_share))
        .bind(c.status.as_str())
        .bind(c.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn commissions_for_master(&self, master_id: &str) -> Result<Vec<CopyCommission>> {
        let rows = sqlx::query_as::<_, StoredCommission>(
            "SELECT * FROM copy_commissions WHERE master_id = ? ORDER BY created_at",
        )
        .bind(master_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredCommission::into_commission).collect()
    }

    // ==================== Outbox ====================

    /// Enqueue a side-effect event. Returns false when the idempotency key
    /// already exists.
    pub async fn enqueue_outbox(
        &self,
        id: &str,
        idempotency_key: &str,
        kind: &str,
        payload: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO outbox (id, idempotency_key, kind, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(idempotency_key)
        .bind(kind)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn pending_outbox(&self, limit: i64) -> Result<Vec<StoredOutboxEvent>> {
        let rows = sqlx::query_as::<_, StoredOutboxEvent>(
            "SELECT * FROM outbox WHERE dispatched = 0 ORDER BY created_at LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn mark_outbox_dispatched(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE outbox SET dispatched = 1, dispatched_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn bump_outbox_attempts(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE outbox SET attempts = attempts + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Connection pool for ad-hoc queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CopyMode, OrderType, TradeSide};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn account_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let mut acc = TradingAccount::new("alice".to_string(), dec!(1000), dec!(500), 100);
        acc.is_master = true;
        db.insert_account(&acc).await.unwrap();

        let loaded = db.get_account(&acc.id).await.unwrap().unwrap();
        assert_eq!(loaded.balance, dec!(1000));
        assert_eq!(loaded.credit, dec!(500));
        assert!(loaded.is_master);
        assert_eq!(loaded.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn trade_round_trip_and_queries() {
        let db = Database::in_memory().await.unwrap();
        let acc = TradingAccount::new("bob".to_string(), dec!(5000), dec!(0), 100);
        db.insert_account(&acc).await.unwrap();

        let mut trade = Trade::new(
            acc.id.clone(),
            "EURUSD".to_string(),
            TradeSide::Buy,
            OrderType::Market,
            dec!(0.10),
            dec!(1.1002),
            100,
            dec!(100000),
            false,
        );
        trade.margin_used = dec!(110.02);
        db.insert_trade(&trade).await.unwrap();

        let open = db.open_trades_for_account(&acc.id).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].margin_used, dec!(110.02));

        let by_symbol = db.open_trades_for_symbol("EURUSD").await.unwrap();
        assert_eq!(by_symbol.len(), 1);
        assert!(db.pending_trades_for_symbol("EURUSD").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn copy_trade_unique_index_is_idempotency_guard() {
        let db = Database::in_memory().await.unwrap();

        let first = CopyTrade::opened(
            "master-trade".to_string(),
            "sub-1".to_string(),
            "acc-f".to_string(),
            "trade-f".to_string(),
            "EURUSD".to_string(),
            TradeSide::Buy,
            dec!(1),
            dec!(0.10),
            CopyMode::BalanceBased,
            Decimal::ZERO,
            dec!(1.1002),
        );
        assert!(db.insert_copy_trade(&first).await.unwrap());

        // Same (master_trade_id, follower_id), different row id.
        let duplicate = CopyTrade::opened(
            "master-trade".to_string(),
            "sub-1".to_string(),
            "acc-f".to_string(),
            "trade-f2".to_string(),
            "EURUSD".to_string(),
            TradeSide::Buy,
            dec!(1),
            dec!(0.10),
            CopyMode::BalanceBased,
            Decimal::ZERO,
            dec!(1.1002),
        );
        assert!(!db.insert_copy_trade(&duplicate).await.unwrap());
    }

    #[tokio::test]
    async fn commission_unique_per_master_and_trade() {
        let db = Database::in_memory().await.unwrap();
        let c = CopyCommission::new(
            "master".to_string(),
            "sub".to_string(),
            "trade".to_string(),
            "ct".to_string(),
            dec!(100),
            dec!(50),
            dec!(50),
            dec!(0),
            dec!(50),
        );
        assert!(db.insert_commission(&c).await.unwrap());

        let again = CopyCommission::new(
            "master".to_string(),
            "sub-2".to_string(),
            "trade".to_string(),
            "ct-2".to_string(),
            dec!(100),
            dec!(50),
            dec!(50),
            dec!(0),
            dec!(50),
        );
        assert!(!db.insert_commission(&again).await.unwrap());
    }

    #[tokio::test]
    async fn outbox_dedupes_on_idempotency_key() {
        let db = Database::in_memory().await.unwrap();
        assert!(db
            .enqueue_outbox("evt-1", "trade-closed:t1", "trade_closed", "{}")
            .await
            .unwrap());
        assert!(!db
            .enqueue_outbox("evt-2", "trade-closed:t1", "trade_closed", "{}")
            .await
            .unwrap());

        let pending = db.pending_outbox(10).await.unwrap();
        assert_eq!(pending.len(), 1);

        db.mark_outbox_dispatched("evt-1").await.unwrap();
        assert!(db.pending_outbox(10).await.unwrap().is_empty());
    }
}
