//! Symbol classification, contract sizes, and market-session calendar.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Asset class of a symbol; drives contract size and session hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    Fx,
    Metal,
    Crypto,
}

const METAL_PREFIXES: [&str; 4] = ["XAU", "XAG", "XPT", "XPD"];
const CRYPTO_PREFIXES: [&str; 8] = ["BTC", "ETH", "SOL", "XRP", "LTC", "BNB", "ADA", "DOGE"];

/// Classify a symbol by its base-asset prefix; anything unrecognized is FX.
pub fn classify(symbol: &str) -> SymbolClass {
    let upper = symbol.to_uppercase();
    if METAL_PREFIXES.iter().any(|p| upper.starts_with(p)) {
        SymbolClass::Metal
    } else if CRYPTO_PREFIXES.iter().any(|p| upper.starts_with(p)) {
        SymbolClass::Crypto
    } else {
        SymbolClass::Fx
    }
}

/// Units per lot. Metals and crypto carry per-symbol constants; everything
/// else uses the standard 100,000-unit FX lot.
pub fn contract_size(symbol: &str) -> Decimal {
    let upper = symbol.to_uppercase();
    if upper.starts_with("XAU") {
        return dec!(100);
    }
    if upper.starts_with("XAG") {
        return dec!(5000);
    }
    if upper.starts_with("XPT") || upper.starts_with("XPD") {
        return dec!(100);
    }
    if classify(&upper) == SymbolClass::Crypto {
        return Decimal::ONE;
    }
    dec!(100000)
}

/// Whether the symbol's market session is open at `at`.
///
/// Crypto trades around the clock. FX and metals are closed from Friday
/// 22:00 UTC until Sunday 22:00 UTC.
pub fn session_open(symbol: &str, at: DateTime<Utc>) -> bool {
    if classify(symbol) == SymbolClass::Crypto {
        return true;
    }
    match at.weekday() {
        Weekday::Sat => false,
        Weekday::Fri => at.hour() < 22,
        Weekday::Sun => at.hour() >= 22,
        _ => true,
    }
}
