// src/arbitrage/calculator.rs
//! Backrun route search.
//!
//! For every backrunnable trade the engine builds the 2-hop and 3-hop routes
//! that trade against the victim's price move, then walks the trade size up
//! in equal steps, quoting every surviving route in parallel on the worker
//! pool. A route drops out as soon as it fails or stops improving.

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info};
use rand::seq::SliceRandom;
use solana_sdk::pubkey::Pubkey;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::arbitrage::routing::{MarketGraph, TwoHopRoute};
use crate::arbitrage::scheduler::prioritize;
use crate::arbitrage::types::{
    ArbOpportunity, BackrunnableTrade, Hop, Quote, Route, TradeDirection,
};
use crate::config::Config;
use crate::utils::now_ms;

/// Quotes a whole route for a given input amount.
#[async_trait]
pub trait RouteQuoter: Send + Sync {
    /// `None` when no answer arrived within `timeout`.
    async fn calculate_route(&self, route: &Route, amount: u64, timeout: Duration) -> Option<Quote>;
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub num_steps: u64,
    pub max_calc_time: Duration,
    pub max_hops: usize,
    pub max_trade_age_ms: u64,
    pub max_trade_size_by_mint: HashMap<Pubkey, u64>,
}

impl SearchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            num_steps: config.arb_calculation_num_steps,
            max_calc_time: Duration::from_millis(config.max_arb_calculation_time_ms),
            max_hops: config.max_hops,
            max_trade_age_ms: config.max_trade_age_ms,
            max_trade_size_by_mint: config.max_trade_size_by_mint.clone().unwrap_or_default(),
        }
    }
}

/// Larger base-side trades first; profit is bounded by the victim's size.
pub fn larger_trade_first(a: &BackrunnableTrade, b: &BackrunnableTrade) -> Ordering {
    b.trade_size_base().cmp(&a.trade_size_base())
}

struct Candidate {
    route: Route,
    best: Option<Quote>,
}

pub struct RouteSearchEngine {
    graph: Arc<MarketGraph>,
    quoter: Arc<dyn RouteQuoter>,
    base_mints: HashSet<Pubkey>,
    settings: SearchSettings,
}

impl RouteSearchEngine {
    pub fn new(
        graph: Arc<MarketGraph>,
        quoter: Arc<dyn RouteQuoter>,
        base_mints: HashSet<Pubkey>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            graph,
            quoter,
            base_mints,
            settings,
        }
    }

    /// Searches one trade. `None` if the trade is stale, too small, not
    /// against a base mint, or no route shows a positive profit.
    pub async fn calculate_arb(&self, trade: &BackrunnableTrade) -> Option<ArbOpportunity> {
        if trade.timings.is_older_than(self.settings.max_trade_age_ms, now_ms()) {
            info!("Trade is too old, skipping");
            return None;
        }

        let original = &trade.market;
        let (source_mint, intermediate_mint) = if trade.base_is_token_a {
            (original.mint_a, original.mint_b)
        } else {
            (original.mint_b, original.mint_a)
        };
        if !self.base_mints.contains(&source_mint) {
            debug!("Backrun source {} is not a base mint", source_mint);
            return None;
        }

        let (size_base, size_quote) = self.capped_sizes(
            &source_mint,
            trade.trade_size_base(),
            trade.trade_size_quote(),
        );
        let step_size = size_base / self.settings.num_steps.max(1);
        if step_size == 0 {
            debug!("Trade of {} base units is too small to step", size_base);
            return None;
        }

        let routes = self.build_routes(trade, source_mint, intermediate_mint, size_base, size_quote);
        let (route, quote) = self.step_search(routes, step_size).await?;

        let profit = quote.profit();
        let expected_profit = u64::try_from(profit).ok()?;
        info!(
            "Potential arb: profit {} of {} on {} ::: BUY {} on {} backrunning {}",
            profit,
            source_mint,
            original.dex_label,
            quote.input,
            route.describe(),
            trade.txn.signatures.first().copied().unwrap_or_default()
        );

        Some(ArbOpportunity {
            source_txn: trade.txn.clone(),
            route,
            arb_size: quote.input,
            expected_profit,
            timings: trade.timings.with_calc_arb_end(now_ms()),
        })
    }

    /// Applies the per-mint cap to the base size, scaling the quote size with it.
    fn capped_sizes(&self, source_mint: &Pubkey, size_base: u64, size_quote: u64) -> (u64, u64) {
        match self.settings.max_trade_size_by_mint.get(source_mint) {
            Some(&cap) if size_base > cap => {
                let scaled = u128::from(size_quote) * u128::from(cap) / u128::from(size_base);
                (cap, u64::try_from(scaled).unwrap_or(u64::MAX))
            }
            _ => (size_base, size_quote),
        }
    }

    /// Candidate routes for a trade. The hop on the victim's market replays
    /// the victim's own in/out instead of quoting stale state.
    pub fn build_routes(
        &self,
        trade: &BackrunnableTrade,
        source_mint: Pubkey,
        intermediate_mint: Pubkey,
        size_base: u64,
        size_quote: u64,
    ) -> Vec<Route> {
        let original = &trade.market;
        let base_is_a = trade.base_is_token_a;
        // less base in the pool after the victim bought it: the other token is cheap there
        let buy_first = trade.trade_direction == TradeDirection::BoughtBase;

        let replay_buy = || Hop::with_override(original.clone(), base_is_a, size_base, size_quote);
        let replay_sell = || Hop::with_override(original.clone(), !base_is_a, size_quote, size_base);

        let direct = self.graph.get_markets_for_pair(&source_mint, &intermediate_mint);
        let mut routes: Vec<Route> = direct
            .iter()
            .map(|m| {
                if buy_first {
                    Route::new(vec![
                        replay_buy(),
                        Hop::new(m.clone(), m.mint_a == intermediate_mint),
                    ])
                } else {
                    Route::new(vec![Hop::new(m.clone(), m.mint_a == source_mint), replay_sell()])
                }
            })
            .collect();

        let mut two_hops: Vec<TwoHopRoute> = Vec::new();
        if self.settings.max_hops >= 3 {
            let cached = if buy_first {
                self.graph.get_all_2hop_routes(&intermediate_mint, &source_mint)
            } else {
                self.graph.get_all_2hop_routes(&source_mint, &intermediate_mint)
            };
            two_hops = cached.as_ref().clone();
            // the time budget may cut the search short; do not always starve the same routes
            two_hops.shuffle(&mut rand::thread_rng());
        }

        for TwoHopRoute { hop1, hop2 } in &two_hops {
            let route = if buy_first {
                let second_intermediate = if hop1.mint_a == intermediate_mint {
                    hop1.mint_b
                } else {
                    hop1.mint_a
                };
                Route::new(vec![
                    replay_buy(),
                    Hop::new(hop1.clone(), hop1.mint_a == intermediate_mint),
                    Hop::new(hop2.clone(), hop2.mint_a == second_intermediate),
                ])
            } else {
                let first_intermediate = if hop1.mint_a == source_mint {
                    hop1.mint_b
                } else {
                    hop1.mint_a
                };
                Route::new(vec![
                    Hop::new(hop1.clone(), hop1.mint_a == source_mint),
                    Hop::new(hop2.clone(), hop2.mint_a == first_intermediate),
                    replay_sell(),
                ])
            };
            routes.push(route);
        }

        routes.retain(|route| !route.has_repeated_market());
        info!(
            "Found {} arb routes from {} 2hop and {} 3hop routes",
            routes.len(),
            direct.len(),
            two_hops.len()
        );
        routes
    }

    /// Walks `step_size * i` for `i = 1..=num_steps` and returns the route
    /// with the highest profit seen at any step.
    pub async fn step_search(&self, routes: Vec<Route>, step_size: u64) -> Option<(Route, Quote)> {
        let budget = self.settings.max_calc_time;
        let start = Instant::now();
        let mut candidates: Vec<Candidate> = routes
            .into_iter()
            .map(|route| Candidate { route, best: None })
            .collect();
        let mut alive: Vec<usize> = (0..candidates.len()).collect();

        for step in 1..=self.settings.num_steps {
            if alive.is_empty() {
                break;
            }
            let elapsed = start.elapsed();
            if elapsed > budget {
                info!("Arb calculation took too long, stopping at iteration {}", step);
                break;
            }
            let remaining = budget.saturating_sub(elapsed);
            let amount = step_size.saturating_mul(step);

            let quotes = join_all(alive.iter().map(|&i| {
                self.quoter
                    .calculate_route(&candidates[i].route, amount, remaining)
            }))
            .await;

            let mut improved = false;
            let mut still_alive = Vec::with_capacity(alive.len());
            for (&i, quote) in alive.iter().zip(quotes) {
                let quote = quote.unwrap_or_else(|| Quote::failed(amount));
                // some markets fail once the size gets too big
                if quote.is_failed() {
                    continue;
                }
                let previous_best = candidates[i].best.as_ref().map_or(0, Quote::profit);
                if quote.profit() > previous_best {
                    candidates[i].best = Some(quote);
                    improved = true;
                    still_alive.push(i);
                }
            }
            alive = still_alive;

            if !improved {
                break;
            }
        }

        let best = candidates
            .into_iter()
            .filter_map(|c| c.best.map(|q| (c.route, q)))
            .reduce(|best, current| {
                if current.1.profit() > best.1.profit() {
                    current
                } else {
                    best
                }
            });
        if best.is_none() {
            debug!("No route with positive profit");
        }
        best
    }

    /// Runs the search stage: trades are buffered largest first and searched
    /// one at a time.
    pub fn spawn(
        self: Arc<Self>,
        trades: mpsc::UnboundedReceiver<BackrunnableTrade>,
        high_water_mark: usize,
    ) -> mpsc::UnboundedReceiver<ArbOpportunity> {
        let mut prioritized = prioritize(trades, larger_trade_first, high_water_mark, "calc-arb");
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(trade) = prioritized.recv().await {
                if let Some(opportunity) = self.calculate_arb(&trade).await {
                    if tx.send(opportunity).is_err() {
                        break;
                    }
                }
            }
            debug!("calc-arb stage stopped");
        });

        rx
    }
}
