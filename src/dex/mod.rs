// src/dex/mod.rs
pub mod clients;
pub mod market;
pub mod math;
pub mod pool_listing;
pub mod quote;

pub use market::{DexLabel, Market, MarketRegistry};
pub use quote::{QuoteRequest, SwapInstructions, SwapQuote, SwapQuoter};
