// src/dex/clients/mod.rs
//! Clients for external swap-quoting services.

pub mod jupiter;

pub use jupiter::JupiterClient;
