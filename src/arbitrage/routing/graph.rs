// src/arbitrage/routing/graph.rs
//! Mint/market multigraph used to enumerate backrun routes.
//!
//! Nodes are mints, edges are markets. A pair of mints may be connected by
//! several markets (one per pool for the same pair). 2-hop route queries are
//! cached per ordered (source, destination) and the reverse direction is
//! filled in from the same computation. The cache is explicit state owned by
//! the graph and is cleared whenever a new market is registered.

use dashmap::{DashMap, DashSet};
use log::{debug, warn};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::sync::Arc;

use crate::dex::market::Market;

/// Order-independent key for a mint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PairKey(Pubkey, Pubkey);

impl PairKey {
    fn new(a: Pubkey, b: Pubkey) -> Self {
        if a <= b {
            PairKey(a, b)
        } else {
            PairKey(b, a)
        }
    }
}

/// `hop1` touches the source mint, `hop2` touches the destination mint and
/// both touch the same intermediate mint.
#[derive(Debug, Clone)]
pub struct TwoHopRoute {
    pub hop1: Arc<Market>,
    pub hop2: Arc<Market>,
}

#[derive(Debug, Default)]
pub struct MarketGraph {
    adjacency: DashMap<Pubkey, HashSet<Pubkey>>,
    pair_markets: DashMap<PairKey, Vec<Arc<Market>>>,
    market_ids: DashSet<Pubkey>,
    route_cache: DashMap<(Pubkey, Pubkey), Arc<Vec<TwoHopRoute>>>,
}

impl MarketGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `market` between `mint_a` and `mint_b`. Returns false if a
    /// market with the same id was already registered.
    pub fn add_market(&self, mint_a: Pubkey, mint_b: Pubkey, market: Arc<Market>) -> bool {
        if mint_a == mint_b {
            warn!("Refusing self-loop market {} on mint {}", market.id, mint_a);
            return false;
        }
        if !self.market_ids.insert(market.id) {
            return false;
        }

        self.adjacency.entry(mint_a).or_default().insert(mint_b);
        self.adjacency.entry(mint_b).or_default().insert(mint_a);
        self.pair_markets
            .entry(PairKey::new(mint_a, mint_b))
            .or_default()
            .push(market);

        self.route_cache.clear();
        true
    }

    pub fn get_neighbours(&self, mint: &Pubkey) -> HashSet<Pubkey> {
        self.adjacency
            .get(mint)
            .map(|n| n.value().clone())
            .unwrap_or_default()
    }

    pub fn get_markets_for_pair(&self, mint_a: &Pubkey, mint_b: &Pubkey) -> Vec<Arc<Market>> {
        self.pair_markets
            .get(&PairKey::new(*mint_a, *mint_b))
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    pub fn get_all_2hop_routes(&self, source: &Pubkey, destination: &Pubkey) -> Arc<Vec<TwoHopRoute>> {
        if let Some(cached) = self.route_cache.get(&(*source, *destination)) {
            debug!("Cache hit for {}-{}", source, destination);
            return cached.value().clone();
        }

        let source_neighbours = self.get_neighbours(source);
        let dest_neighbours = self.get_neighbours(destination);
        let (smaller, larger) = if source_neighbours.len() < dest_neighbours.len() {
            (&source_neighbours, &dest_neighbours)
        } else {
            (&dest_neighbours, &source_neighbours)
        };

        let mut routes = Vec::new();
        let mut routes_reverse = Vec::new();
        for intermediate in smaller.iter().filter(|m| larger.contains(m)) {
            let hop1_markets = self.get_markets_for_pair(source, intermediate);
            let hop2_markets = self.get_markets_for_pair(intermediate, destination);
            for hop1 in &hop1_markets {
                for hop2 in &hop2_markets {
                    routes.push(TwoHopRoute {
                        hop1: hop1.clone(),
                        hop2: hop2.clone(),
                    });
                    routes_reverse.push(TwoHopRoute {
                        hop1: hop2.clone(),
                        hop2: hop1.clone(),
                    });
                }
            }
        }

        let routes = Arc::new(routes);
        self.route_cache.insert((*source, *destination), routes.clone());
        if source != destination {
            self.route_cache
                .insert((*destination, *source), Arc::new(routes_reverse));
        }
        routes
    }

    pub fn market_count(&self) -> usize {
        self.market_ids.len()
    }

    pub fn mint_count(&self) -> usize {
        self.adjacency.len()
    }
}
