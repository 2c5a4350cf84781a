//! In-process quote cache fed by the external pricing gateway.
//!
//! The engine never opens or closes a trade without a live two-sided quote;
//! a missing or expired entry reads as "market closed / no data".

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One two-sided quote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub at: DateTime<Utc>,
}

impl Quote {
    pub fn new(bid: Decimal, ask: Decimal) -> Self {
        Self {
            bid,
            ask,
            at: Utc::now(),
        }
    }

    /// A quote is usable only when both sides are present and positive.
    pub fn is_live(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }

    pub fn gap(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// Owned, injectable quote cache with TTL-based staleness.
pub struct PriceCache {
    quotes: RwLock<HashMap<String, Quote>>,
    ttl: Duration,
}

impl PriceCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub async fn put(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        let mut quotes = self.quotes.write().await;
        quotes.insert(symbol.to_uppercase(), Quote::new(bid, ask));
    }

    /// Current quote, or `None` when missing, stale, or one-sided.
    pub async fn get(&self, symbol: &str) -> Option<Quote> {
        let quotes = self.quotes.read().await;
        let quote = quotes.get(&symbol.to_uppercase()).copied()?;
        if Utc::now() - quote.at > self.ttl || !quote.is_live() {
            return None;
        }
        Some(quote)
    }

    pub async fn evict(&self, symbol: &str) {
        let mut quotes = self.quotes.write().await;
        quotes.remove(&symbol.to_uppercase());
    }

    /// Drop every entry older than the TTL.
    pub async fn evict_expired(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut quotes = self.quotes.write().await;
        let before = quotes.len();
        quotes.retain(|_, q| q.at >= cutoff);
        before - quotes.len()
    }

    pub async fn len(&self) -> usize {
        self.quotes.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn put_and_get() {
        let cache = PriceCache::new(5);
        cache.put("eurusd", dec!(1.1000), dec!(1.1002)).await;

        let quote = cache.get("EURUSD").await.expect("quote");
        assert_eq!(quote.bid, dec!(1.1000));
        assert_eq!(quote.gap(), dec!(0.0002));
    }

    #[tokio::test]
    async fn one_sided_quote_is_not_live() {
        let cache = PriceCache::new(5);
        cache.put("EURUSD", Decimal::ZERO, dec!(1.1002)).await;
        assert!(cache.get("EURUSD").await.is_none());
    }

    #[tokio::test]
    async fn stale_quote_expires() {
        let cache = PriceCache::new(0);
        cache.put("EURUSD", dec!(1.1000), dec!(1.1002)).await;
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(cache.get("EURUSD").await.is_none());
        assert_eq!(cache.evict_expired().await, 1);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn evict_removes_entry() {
        let cache = PriceCache::new(5);
        cache.put("EURUSD", dec!(1.1000), dec!(1.1002)).await;
        cache.evict("EURUSD").await;
        assert!(cache.get("EURUSD").await.is_none());
    }
}
