//! Quote cache, symbol metadata, and market-session calendar.

mod cache;
mod session;

pub use cache::{PriceCache, Quote};
pub use session::{classify, contract_size, session_open, SymbolClass};
