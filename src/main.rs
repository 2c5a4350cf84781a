//! copydesk: back office for leveraged copy trading.
//!
//! Trade lifecycle engine, proportional copy replication, and the
//! credit/auto-refill ledger, driven by an operator CLI. Quotes arrive from
//! an external pricing gateway; commands that act on prices take the gateway
//! snapshot as arguments and seed the in-process quote cache with it.

mod credit;
mod db;
mod error;
mod locks;
mod models;
mod outbox;
mod pricing;
mod trading;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::credit::CreditService;
use crate::db::Database;
use crate::locks::AccountLocks;
use crate::models::{
    CloseReason, CopyFollower, CopyMode, FollowerStatus, OrderType, Trade, TradeSide,
    TradingAccount,
};
use crate::outbox::Outbox;
use crate::pricing::PriceCache;
use crate::trading::{
    EngineConfig, OpenRequest, ReplicationEngine, ReplicationStatus, TradeEngine,
};

/// Copy-trading back office CLI.
#[derive(Parser)]
#[command(name = "copydesk")]
#[command(about = "Leveraged copy-trading back office", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./copydesk.db?mode=rwc", env = "COPYDESK_DB")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a trading account
    CreateAccount {
        name: String,

        /// Opening wallet balance
        #[arg(short, long, default_value = "10000")]
        balance: Decimal,

        /// Opening credit buffer
        #[arg(short, long, default_value = "0")]
        credit: Decimal,

        /// Account leverage
        #[arg(short, long, default_value = "100")]
        leverage: u32,

        /// Mark the account as a copyable master
        #[arg(short, long)]
        master: bool,
    },

    /// List all accounts
    Accounts,

    /// Show one account's exposure, subscriptions, and ledger audit
    Status {
        account_id: String,
    },

    /// Open a trade (replicates to followers when the account is a master)
    Open {
        account_id: String,
        symbol: String,

        /// BUY or SELL
        side: String,

        /// Lots
        lots: Decimal,

        /// MARKET, BUY_LIMIT, SELL_LIMIT, BUY_STOP, SELL_STOP
        #[arg(short, long, default_value = "MARKET")]
        order_type: String,

        /// Trigger price for pending order types
        #[arg(short, long)]
        price: Option<Decimal>,

        #[arg(long)]
        stop_loss: Option<Decimal>,

        #[arg(long)]
        take_profit: Option<Decimal>,

        /// Gateway bid
        #[arg(long)]
        bid: Decimal,

        /// Gateway ask
        #[arg(long)]
        ask: Decimal,
    },

    /// Close an open trade (fans out when it has open copies)
    Close {
        trade_id: String,

        #[arg(long)]
        bid: Decimal,

        #[arg(long)]
        ask: Decimal,
    },

    /// Set or clear SL/TP on a trade, mirrored to open copies
    Modify {
        trade_id: String,

        #[arg(long)]
        stop_loss: Option<Decimal>,

        #[arg(long)]
        take_profit: Option<Decimal>,
    },

    /// Cancel a pending order
    Cancel {
        trade_id: String,
    },

    /// Feed one price tick: fires pending orders, SL/TP, stop-out sweeps
    Tick {
        symbol: String,

        #[arg(long)]
        bid: Decimal,

        #[arg(long)]
        ask: Decimal,
    },

    /// Subscribe a follower account to a master
    Follow {
        follower_account_id: String,
        master_account_id: String,

        /// FIXED_LOT, BALANCE_BASED, EQUITY_BASED, MULTIPLIER, AUTO
        #[arg(short, long, default_value = "BALANCE_BASED")]
        mode: String,

        /// Fixed lot or multiplier, depending on mode
        #[arg(short, long, default_value = "0")]
        value: Decimal,

        /// Per-trade lot cap
        #[arg(long, default_value = "10")]
        max_lot: Decimal,

        /// Credit floor defended by auto-refill
        #[arg(long)]
        minimum_credit: Option<Decimal>,
    },

    /// Stop a follower subscription
    Unfollow {
        follower_account_id: String,
        master_account_id: String,
    },

    /// Suspend a master and sweep its followers' open copy trades
    SuspendMaster {
        account_id: String,

        #[arg(long)]
        bid: Decimal,

        #[arg(long)]
        ask: Decimal,

        /// Symbol the quote belongs to
        #[arg(long)]
        symbol: String,
    },

    /// Admin credit adjustment (positive credits, negative debits)
    AdjustCredit {
        account_id: String,
        amount: Decimal,

        #[arg(short, long, default_value = "manual adjustment")]
        description: String,
    },

    /// Close everything on an account and reset its wallet
    Reset {
        account_id: String,

        #[arg(short, long, default_value = "10000")]
        balance: Decimal,
    },

    /// Settle missed copy closes and audit every ledger chain
    Reconcile,

    /// Run the reconciliation and outbox workers until interrupted
    Watch {
        /// Seconds between reconciliation passes
        #[arg(short, long, default_value = "60")]
        interval: u64,
    },
}

struct Desk {
    db: Arc<Database>,
    prices: Arc<PriceCache>,
    engine: Arc<TradeEngine>,
    replication: ReplicationEngine,
    credit: Arc<CreditService>,
    outbox: Arc<Outbox>,
}

impl Desk {
    async fn build(database_url: &str, config: EngineConfig) -> Result<Self> {
        let db = Arc::new(Database::new(database_url).await?);
        let prices = Arc::new(PriceCache::new(config.price_ttl_secs));
        let locks = Arc::new(AccountLocks::new());
        let credit = Arc::new(CreditService::new(db.clone(), locks.clone(), config.clone()));
        let outbox = Arc::new(Outbox::new(db.clone()));
        let engine = Arc::new(TradeEngine::new(
            db.clone(),
            prices.clone(),
            locks.clone(),
            credit.clone(),
            outbox.clone(),
            config.clone(),
        ));
        let replication = ReplicationEngine::new(db.clone(), engine.clone(), locks, config);

        Ok(Self {
            db,
            prices,
            engine,
            replication,
            credit,
            outbox,
        })
    }

    /// Fan a closed master trade out to its followers; copy trades and
    /// non-master trades are left alone.
    async fn fan_out_close(&self, trade: &Trade) -> Result<()> {
        if trade.is_copy {
            return Ok(());
        }
        let Some(account) = self.db.get_account(&trade.account_id).await? else {
            return Ok(());
        };
        if !account.is_master {
            return Ok(());
        }
        let outcomes = self.replication.replicate_close(trade).await?;
        for outcome in &outcomes {
            println!(
                "  follower {} -> {:?} ({})",
                outcome.follower_account_id, outcome.status, outcome.detail
            );
            if outcome.status == ReplicationStatus::Closed {
                let payload = serde_json::json!({
                    "master_trade_id": trade.id,
                    "follower_id": outcome.follower_id,
                    "follower_trade_id": outcome.follower_trade_id,
                });
                if let Err(e) = self
                    .outbox
                    .enqueue_copy_settled(&trade.id, &outcome.follower_id, payload)
                    .await
                {
                    warn!(error = %e, "Failed to enqueue settlement event");
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let desk = Desk::build(&cli.database, EngineConfig::default()).await?;

    match cli.command {
        Commands::CreateAccount {
            name,
            balance,
            credit,
            leverage,
            master,
        } => {
            let mut account = TradingAccount::new(name, balance, credit, leverage);
            account.is_master = master;
            desk.db.insert_account(&account).await?;
            println!("created account {} ({})", account.id, account.name);
        }

        Commands::Accounts => {
            for account in desk.db.list_accounts().await? {
                println!(
                    "{}  {:<12} balance={:<12} credit={:<10} {}{}",
                    account.id,
                    account.name,
                    account.balance,
                    account.credit,
                    account.status.as_str(),
                    if account.is_master { " [master]" } else { "" },
                );
            }
        }

        Commands::Status { account_id } => {
            let snap = desk.engine.account_snapshot(&account_id).await?;
            println!("account   {} ({})", snap.account.id, snap.account.name);
            println!("status    {}", snap.account.status.as_str());
            println!("balance   {}", snap.account.balance);
            println!("credit    {}", snap.account.credit);
            println!("equity    {}", snap.equity);
            println!("margin    used={} free={}", snap.used_margin, snap.free_margin);
            if let Some(level) = snap.margin_level {
                println!("level     {:.2}%", level);
            }
            println!("pending commission {}", snap.account.pending_commission);
            for trade in &snap.open_trades {
                println!(
                    "  open {} {} {} {} @ {} margin={} exposure={}",
                    trade.id,
                    trade.symbol,
                    trade.side.as_str(),
                    trade.quantity,
                    trade.open_price,
                    trade.margin_used,
                    trade.notional(),
                );
            }
            if snap.account.is_master {
                for c in desk.db.commissions_for_master(&account_id).await? {
                    println!(
                        "  commission {} on trade {} (master share {})",
                        c.total_commission, c.trade_id, c.master_share,
                    );
                }
            }
            let audit = desk.credit.verify_ledger(&account_id).await?;
            println!(
                "ledger    {} entries, replayed={} stored={} {}",
                audit.entries,
                audit.replayed_credit,
                audit.stored_credit,
                if audit.consistent { "OK" } else { "DRIFT" },
            );
        }

        Commands::Open {
            account_id,
            symbol,
            side,
            lots,
            order_type,
            price,
            stop_loss,
            take_profit,
            bid,
            ask,
        } => {
            let side = TradeSide::parse(&side).ok_or_else(|| anyhow!("bad side: {side}"))?;
            let order_type = OrderType::parse(&order_type)
                .ok_or_else(|| anyhow!("bad order type: {order_type}"))?;
            desk.prices.put(&symbol, bid, ask).await;

            let request = OpenRequest {
                account_id: account_id.clone(),
                symbol,
                side,
                order_type,
                quantity: lots,
                pending_price: price,
                stop_loss,
                take_profit,
                is_copy: false,
                price_override: None,
            };
            let trade = desk
                .engine
                .open_trade(request)
                .await
                .map_err(|e| anyhow!("{} ({})", e, e.code()))?;
            println!(
                "trade {} {} @ {} [{}]",
                trade.id,
                trade.symbol,
                trade.open_price,
                trade.status.as_str()
            );

            let account = desk
                .db
                .get_account(&account_id)
                .await?
                .context("account vanished")?;
            if account.is_master && trade.is_open() {
                let outcomes = desk.replication.replicate_open(&trade).await?;
                for outcome in &outcomes {
                    println!(
                        "  follower {} -> {:?} lot={} ({})",
                        outcome.follower_account_id,
                        outcome.status,
                        outcome
                            .follower_lot
                            .map(|l| l.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        outcome.detail,
                    );
                }
            }
        }

        Commands::Close { trade_id, bid, ask } => {
            let trade = desk
                .db
                .get_trade(&trade_id)
                .await?
                .context("trade not found")?;
            desk.prices.put(&trade.symbol, bid, ask).await;

            let closed = desk
                .engine
                .close_trade(&trade_id, CloseReason::Manual, None)
                .await
                .map_err(|e| anyhow!("{} ({})", e, e.code()))?;
            println!(
                "closed {} @ {} pnl={}",
                closed.id,
                closed.close_price.unwrap_or_default(),
                closed.realized_pnl.unwrap_or_default(),
            );
            desk.fan_out_close(&closed).await?;
            desk.outbox.drain().await?;
        }

        Commands::Modify {
            trade_id,
            stop_loss,
            take_profit,
        } => {
            let trade = desk
                .engine
                .modify_trade(&trade_id, stop_loss, take_profit)
                .await
                .map_err(|e| anyhow!("{} ({})", e, e.code()))?;
            println!(
                "modified {} sl={:?} tp={:?}",
                trade.id, trade.stop_loss, trade.take_profit
            );
            if !trade.is_copy {
                let outcomes = desk
                    .replication
                    .mirror_modify(&trade_id, stop_loss, take_profit)
                    .await?;
                for outcome in &outcomes {
                    println!(
                        "  follower {} -> {:?} ({})",
                        outcome.follower_account_id, outcome.status, outcome.detail
                    );
                }
            }
        }

        Commands::Cancel { trade_id } => {
            let trade = desk
                .engine
                .cancel_pending(&trade_id)
                .await
                .map_err(|e| anyhow!("{} ({})", e, e.code()))?;
            println!("cancelled {}", trade.id);
        }

        Commands::Tick { symbol, bid, ask } => {
            desk.prices.put(&symbol, bid, ask).await;
            let report = desk
                .engine
                .process_tick(&symbol)
                .await
                .map_err(|e| anyhow!("{} ({})", e, e.code()))?;

            for trade in &report.triggered {
                println!("triggered {} @ {}", trade.id, trade.open_price);
            }
            for trade in &report.cancelled {
                println!("cancelled {} at trigger", trade.id);
            }
            for trade in &report.closed {
                println!(
                    "closed {} ({:?}) pnl={}",
                    trade.id,
                    trade.close_reason.unwrap_or(CloseReason::Manual),
                    trade.realized_pnl.unwrap_or_default(),
                );
                desk.fan_out_close(trade).await?;
            }
            for sweep in &report.stop_outs {
                println!(
                    "stop-out on {} (equity {}): {} closed, {} failed",
                    sweep.account_id,
                    sweep.equity,
                    sweep.closed.len(),
                    sweep.failed.len(),
                );
                for trade in &sweep.closed {
                    desk.fan_out_close(trade).await?;
                }
            }
            desk.outbox.drain().await?;
        }

        Commands::Follow {
            follower_account_id,
            master_account_id,
            mode,
            value,
            max_lot,
            minimum_credit,
        } => {
            let mode = CopyMode::parse(&mode).ok_or_else(|| anyhow!("bad copy mode: {mode}"))?;
            let master = desk
                .db
                .get_account(&master_account_id)
                .await?
                .context("master account not found")?;
            if !master.is_master {
                return Err(anyhow!("{} is not a master account", master.id));
            }
            desk.db
                .get_account(&follower_account_id)
                .await?
                .context("follower account not found")?;
            if desk
                .db
                .follower_by_accounts(&follower_account_id, &master_account_id)
                .await?
                .is_some()
            {
                return Err(anyhow!("subscription already exists"));
            }

            let minimum = minimum_credit
                .unwrap_or(desk.engine.config().default_minimum_credit);
            let sub = CopyFollower::new(
                follower_account_id,
                master_account_id,
                mode,
                value,
                max_lot,
                minimum,
            );
            desk.db.insert_follower(&sub).await?;
            println!("subscription {} ({})", sub.id, sub.copy_mode.as_str());
        }

        Commands::Unfollow {
            follower_account_id,
            master_account_id,
        } => {
            let mut sub = desk
                .db
                .follower_by_accounts(&follower_account_id, &master_account_id)
                .await?
                .context("subscription not found")?;
            sub.status = FollowerStatus::Stopped;
            desk.db.update_follower(&sub).await?;
            println!("subscription {} stopped", sub.id);
        }

        Commands::SuspendMaster {
            account_id,
            bid,
            ask,
            symbol,
        } => {
            desk.prices.put(&symbol, bid, ask).await;
            let outcomes = desk.replication.suspend_master(&account_id).await?;
            println!("master {} suspended, {} copy trades swept", account_id, outcomes.len());
            for outcome in &outcomes {
                println!(
                    "  follower {} -> {:?} ({})",
                    outcome.follower_account_id, outcome.status, outcome.detail
                );
            }
            desk.outbox.drain().await?;
        }

        Commands::AdjustCredit {
            account_id,
            amount,
            description,
        } => {
            let account = desk
                .credit
                .admin_adjust_credit(&account_id, amount, &description)
                .await
                .map_err(|e| anyhow!("{} ({})", e, e.code()))?;
            println!("credit on {} is now {}", account.id, account.credit);
        }

        Commands::Reset { account_id, balance } => {
            let closed = desk
                .engine
                .reset_account(&account_id, balance)
                .await
                .map_err(|e| anyhow!("{} ({})", e, e.code()))?;
            println!("reset {} ({} trades closed)", account_id, closed);
        }

        Commands::Reconcile => {
            let settled = desk.credit.settle_unsettled().await?;
            println!("{} missed settlements applied", settled.len());
            for account in desk.db.list_accounts().await? {
                let audit = desk.credit.verify_ledger(&account.id).await?;
                if !audit.consistent {
                    warn!(
                        account = %account.id,
                        replayed = %audit.replayed_credit,
                        stored = %audit.stored_credit,
                        "Ledger drift"
                    );
                    println!("DRIFT on {}: {:?}", account.id, audit.broken_entry);
                }
            }
            desk.outbox.drain().await?;
            println!("reconciliation done");
        }

        Commands::Watch { interval } => {
            info!(interval, "Reconciliation watcher started");
            let worker = desk
                .outbox
                .clone()
                .spawn_worker(desk.engine.config().outbox_interval_secs);

            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        desk.prices.evict_expired().await;
                        match desk.credit.settle_unsettled().await {
                            Ok(settled) if !settled.is_empty() => {
                                info!(count = settled.len(), "Reconciled missed settlements");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "Reconciliation pass failed"),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received");
                        break;
                    }
                }
            }
            worker.abort();
        }
    }

    Ok(())
}
