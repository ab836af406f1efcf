// src/arbitrage/types.rs
use crate::dex::market::Market;
use crate::utils::Timings;
use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
use std::collections::HashSet;
use std::sync::Arc;

/// The known in/out of the victim trade, replayed instead of quoting the
/// pool it hit (whose pre-trade state is what the workers hold).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeOutputOverride {
    pub input: u64,
    pub estimated_out: u64,
}

#[derive(Debug, Clone)]
pub struct Hop {
    pub market: Arc<Market>,
    /// Trade direction: true sells mint A for mint B.
    pub from_a: bool,
    pub trade_output_override: Option<TradeOutputOverride>,
}

impl Hop {
    pub fn new(market: Arc<Market>, from_a: bool) -> Self {
        Self {
            market,
            from_a,
            trade_output_override: None,
        }
    }

    pub fn with_override(market: Arc<Market>, from_a: bool, input: u64, estimated_out: u64) -> Self {
        Self {
            market,
            from_a,
            trade_output_override: Some(TradeOutputOverride { input, estimated_out }),
        }
    }

    pub fn source_mint(&self) -> Pubkey {
        if self.from_a {
            self.market.mint_a
        } else {
            self.market.mint_b
        }
    }

    pub fn destination_mint(&self) -> Pubkey {
        if self.from_a {
            self.market.mint_b
        } else {
            self.market.mint_a
        }
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub hops: Vec<Hop>,
}

impl Route {
    pub fn new(hops: Vec<Hop>) -> Self {
        Self { hops }
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn source_mint(&self) -> Option<Pubkey> {
        self.hops.first().map(Hop::source_mint)
    }

    pub fn has_repeated_market(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.hops.len());
        self.hops.iter().any(|hop| !seen.insert(hop.market.id))
    }

    /// Each hop's input mint is the previous hop's output mint.
    pub fn is_connected(&self) -> bool {
        self.hops
            .windows(2)
            .all(|pair| pair[0].destination_mint() == pair[1].source_mint())
    }

    pub fn describe(&self) -> String {
        self.hops
            .iter()
            .map(|hop| hop.market.dex_label.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// `output == 0` is the uniform "route unusable at this size" signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quote {
    pub input: u64,
    pub output: u64,
    pub raw: Option<serde_json::Value>,
}

impl Quote {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            raw: None,
        }
    }

    pub fn failed(input: u64) -> Self {
        Self::new(input, 0)
    }

    pub fn is_failed(&self) -> bool {
        self.output == 0
    }

    pub fn profit(&self) -> i128 {
        i128::from(self.output) - i128::from(self.input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    /// The victim took base out of the pool.
    BoughtBase,
    /// The victim put base into the pool.
    SoldBase,
}

/// A mempool transaction whose simulated effect on one market is known.
#[derive(Debug, Clone)]
pub struct BackrunnableTrade {
    pub txn: VersionedTransaction,
    pub market: Arc<Market>,
    pub base_is_token_a: bool,
    pub trade_direction: TradeDirection,
    pub trade_size_a: u64,
    pub trade_size_b: u64,
    pub timings: Timings,
}

impl BackrunnableTrade {
    pub fn trade_size_base(&self) -> u64 {
        if self.base_is_token_a {
            self.trade_size_a
        } else {
            self.trade_size_b
        }
    }

    pub fn trade_size_quote(&self) -> u64 {
        if self.base_is_token_a {
            self.trade_size_b
        } else {
            self.trade_size_a
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArbOpportunity {
    pub source_txn: VersionedTransaction,
    pub route: Route,
    pub arb_size: u64,
    pub expected_profit: u64,
    pub timings: Timings,
}
