// src/arbitrage/routing/mod.rs
pub mod graph;

pub use graph::{MarketGraph, TwoHopRoute};
