//! Side-effect outbox.
//!
//! Downstream consumers (notifications, commission-tree processing) receive
//! closed-trade events asynchronously and best-effort. Events are persisted
//! with an idempotency key before the primary response returns, then drained
//! by a background worker with at-least-once delivery; a failed delivery is
//! logged and retried on the next drain, never surfaced to the trade
//! originator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::models::Trade;

/// Destination for drained events.
pub trait EventSink: Send + Sync {
    fn deliver(&self, kind: &str, payload: &serde_json::Value) -> Result<()>;
}

/// Default sink: structured log lines for external collectors.
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&self, kind: &str, payload: &serde_json::Value) -> Result<()> {
        tracing::info!(kind = %kind, payload = %payload, "Outbox event");
        Ok(())
    }
}

/// Persisted queue of post-trade side effects.
pub struct Outbox {
    db: Arc<Database>,
    sink: Box<dyn EventSink>,
}

impl Outbox {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            sink: Box::new(LogSink),
        }
    }

    pub fn with_sink(db: Arc<Database>, sink: Box<dyn EventSink>) -> Self {
        Self { db, sink }
    }

    /// Queue a closed-trade event; duplicate keys are dropped silently.
    pub async fn enqueue_trade_closed(&self, trade: &Trade) -> Result<()> {
        let payload = json!({
            "trade_id": trade.id,
            "account_id": trade.account_id,
            "symbol": trade.symbol,
            "side": trade.side.as_str(),
            "quantity": trade.quantity,
            "open_price": trade.open_price,
            "close_price": trade.close_price,
            "realized_pnl": trade.realized_pnl,
            "close_reason": trade.close_reason.map(|r| r.as_str()),
            "is_copy": trade.is_copy,
        });
        self.db
            .enqueue_outbox(
                &Uuid::new_v4().to_string(),
                &format!("trade-closed:{}", trade.id),
                "trade_closed",
                &payload.to_string(),
            )
            .await?;
        Ok(())
    }

    /// Queue a settlement event keyed by the replication pair.
    pub async fn enqueue_copy_settled(
        &self,
        master_trade_id: &str,
        follower_id: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.db
            .enqueue_outbox(
                &Uuid::new_v4().to_string(),
                &format!("copy-settled:{master_trade_id}:{follower_id}"),
                "copy_settled",
                &payload.to_string(),
            )
            .await?;
        Ok(())
    }

    /// Deliver pending events. Returns how many were dispatched.
    pub async fn drain(&self) -> Result<usize> {
        let pending = self.db.pending_outbox(100).await?;
        let mut dispatched = 0;

        for event in pending {
            let payload: serde_json::Value =
                serde_json::from_str(&event.payload).unwrap_or(serde_json::Value::Null);
            match self.sink.deliver(&event.kind, &payload) {
                Ok(()) => {
                    self.db.mark_outbox_dispatched(&event.id).await?;
                    dispatched += 1;
                }
                Err(e) => {
                    warn!(
                        event = %event.id,
                        key = %event.idempotency_key,
                        attempts = event.attempts + 1,
                        error = %e,
                        "Outbox delivery failed, will retry"
                    );
                    self.db.bump_outbox_attempts(&event.id).await?;
                }
            }
        }

        if dispatched > 0 {
            debug!(count = dispatched, "Outbox drained");
        }
        Ok(dispatched)
    }

    /// Spawn the background drain loop.
    pub fn spawn_worker(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = self.drain().await {
                    warn!(error = %e, "Outbox drain failed");
                }
            }
        })
    }
}
