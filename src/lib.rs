pub mod arbitrage;
pub mod bundle;
pub mod config;
pub mod dex;
pub mod error;
pub mod jito_bundle;
pub mod solana;
pub mod utils;
pub mod workers;

pub use arbitrage::{ArbOpportunity, BackrunPipeline, MarketGraph, PriorityScheduler, RouteSearchEngine};
pub use bundle::{BundleBuilder, BundleSender};
pub use error::ArbError;
pub use workers::QuoteWorkerPool;
