#[cfg(test)]
mod tests {
    use crate::arbitrage::calculator::{larger_trade_first, RouteQuoter, RouteSearchEngine, SearchSettings};
    use crate::arbitrage::routing::MarketGraph;
    use crate::arbitrage::types::{BackrunnableTrade, Hop, Quote, Route, TradeDirection};
    use crate::dex::market::{DexLabel, Market};
    use crate::utils::{now_ms, Timings};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const STEP: u64 = 100_000_000;

    /// Mock worker pool: profit is a function of the route and the size.
    /// `None` from the curve behaves like a worker timeout.
    struct CurveQuoter<F> {
        curve: F,
        calls: Mutex<Vec<(u64, Route)>>,
    }

    impl<F> CurveQuoter<F>
    where
        F: Fn(&Route, u64) -> Option<i128> + Send + Sync,
    {
        fn new(curve: F) -> Arc<Self> {
            Arc::new(Self {
                curve,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn amounts(&self) -> Vec<u64> {
            self.calls.lock().unwrap().iter().map(|(a, _)| *a).collect()
        }
    }

    #[async_trait]
    impl<F> RouteQuoter for CurveQuoter<F>
    where
        F: Fn(&Route, u64) -> Option<i128> + Send + Sync,
    {
        async fn calculate_route(&self, route: &Route, amount: u64, _timeout: Duration) -> Option<Quote> {
            self.calls.lock().unwrap().push((amount, route.clone()));
            let profit = (self.curve)(route, amount)?;
            let output = (i128::from(amount) + profit).max(0) as u64;
            Some(Quote::new(amount, output))
        }
    }

    fn market(mint_a: Pubkey, mint_b: Pubkey) -> Arc<Market> {
        Arc::new(Market {
            id: Pubkey::new_unique(),
            mint_a,
            mint_b,
            vault_a: Pubkey::new_unique(),
            vault_b: Pubkey::new_unique(),
            dex_label: DexLabel::Raydium,
            fee_bps: 25,
        })
    }

    fn settings(num_steps: u64, max_hops: usize) -> SearchSettings {
        SearchSettings {
            num_steps,
            max_calc_time: Duration::from_secs(5),
            max_hops,
            max_trade_age_ms: 60_000,
            max_trade_size_by_mint: HashMap::new(),
        }
    }

    fn trade(
        market: &Arc<Market>,
        direction: TradeDirection,
        size_base: u64,
        size_quote: u64,
    ) -> BackrunnableTrade {
        BackrunnableTrade {
            txn: VersionedTransaction::default(),
            market: market.clone(),
            base_is_token_a: true,
            trade_direction: direction,
            trade_size_a: size_base,
            trade_size_b: size_quote,
            timings: Timings::received_at(now_ms()),
        }
    }

    /// sol/x victim pool plus one more sol/x pool: exactly one 2-hop backrun.
    fn single_route_setup() -> (Arc<MarketGraph>, Pubkey, Arc<Market>, Arc<Market>) {
        let (sol, x) = (Pubkey::new_unique(), Pubkey::new_unique());
        let graph = Arc::new(MarketGraph::new());
        let original = market(sol, x);
        let other = market(x, sol);
        graph.add_market(sol, x, original.clone());
        graph.add_market(x, sol, other.clone());
        (graph, sol, original, other)
    }

    fn engine(
        graph: Arc<MarketGraph>,
        quoter: Arc<dyn RouteQuoter>,
        base: Pubkey,
        settings: SearchSettings,
    ) -> RouteSearchEngine {
        RouteSearchEngine::new(graph, quoter, [base].into_iter().collect(), settings)
    }

    #[tokio::test]
    async fn test_profit_peak_at_step_six() {
        let (graph, sol, original, _) = single_route_setup();
        let quoter = CurveQuoter::new(|_: &Route, amount: u64| {
            let step = amount / STEP;
            Some(match step {
                1..=6 => step as i128 * 1_000,
                7 => 5_000,
                _ => 100,
            })
        });
        let engine = engine(graph, quoter.clone(), sol, settings(10, 2));

        let trade = trade(&original, TradeDirection::SoldBase, 1_000_000_000, 50_000_000);
        let opportunity = engine.calculate_arb(&trade).await.unwrap();

        assert_eq!(opportunity.arb_size, 600_000_000);
        assert_eq!(opportunity.expected_profit, 6_000);
        // step 7 did not improve, so step 8 is never quoted
        assert_eq!(
            quoter.amounts(),
            (1..=7).map(|i| i * STEP).collect::<Vec<_>>()
        );
        assert!(opportunity.timings.calc_arb_end >= opportunity.timings.mempool_end);
    }

    #[tokio::test]
    async fn test_step_search_matches_exhaustive_search() {
        let base = Pubkey::new_unique();
        // (peak step, height) per route, all unimodal and positive at step 1
        let shapes = [(3i128, 15i128), (7, 12), (10, 20), (1, 11), (5, 19)];
        let markets: Vec<Arc<Market>> = shapes
            .iter()
            .map(|_| market(base, Pubkey::new_unique()))
            .collect();
        let by_market: HashMap<Pubkey, (i128, i128)> = markets
            .iter()
            .zip(shapes.iter())
            .map(|(m, s)| (m.id, *s))
            .collect();
        let curve = move |route: &Route, amount: u64| {
            let (peak, height) = by_market[&route.hops[0].market.id];
            let step = (amount / STEP) as i128;
            Some(height * 1_000 - (step - peak).pow(2) * 100)
        };

        let mut exhaustive: Option<(Pubkey, u64, i128)> = None;
        for m in &markets {
            let route = Route::new(vec![Hop::new(m.clone(), true)]);
            for step in 1..=10u64 {
                let profit = curve(&route, step * STEP).unwrap();
                if exhaustive.map_or(true, |(_, _, best)| profit > best) {
                    exhaustive = Some((m.id, step * STEP, profit));
                }
            }
        }

        let quoter = CurveQuoter::new(curve);
        let engine = engine(Arc::new(MarketGraph::new()), quoter, base, settings(10, 2));
        let routes = markets
            .iter()
            .map(|m| Route::new(vec![Hop::new(m.clone(), true)]))
            .collect();
        let (route, quote) = engine.step_search(routes, STEP).await.unwrap();

        let (market_id, size, profit) = exhaustive.unwrap();
        assert_eq!(route.hops[0].market.id, market_id);
        assert_eq!(quote.input, size);
        assert_eq!(quote.profit(), profit);
    }

    #[tokio::test]
    async fn test_routes_never_repeat_markets() {
        let (sol, x, y) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let graph = Arc::new(MarketGraph::new());
        let original = market(sol, x);
        for m in [
            original.clone(),
            market(x, sol),
            market(x, y),
            market(x, y),
            market(y, sol),
        ] {
            graph.add_market(m.mint_a, m.mint_b, m);
        }
        let quoter = CurveQuoter::new(|_: &Route, _| Some(1));
        let engine = engine(graph, quoter, sol, settings(10, 3));

        for direction in [TradeDirection::BoughtBase, TradeDirection::SoldBase] {
            let trade = trade(&original, direction, 1_000, 2_000);
            let routes = engine.build_routes(&trade, sol, x, 1_000, 2_000);
            // one direct route, two through y; the victim pool twice is dropped
            assert_eq!(routes.len(), 3);
            for route in &routes {
                assert!(!route.has_repeated_market(), "{}", route.describe());
                assert!(route.is_connected());
                assert_eq!(route.source_mint(), Some(sol));
                assert_eq!(route.hops.last().map(|h| h.destination_mint()), Some(sol));
                let replays = route
                    .hops
                    .iter()
                    .filter(|h| h.trade_output_override.is_some())
                    .count();
                assert_eq!(replays, 1);
            }
        }
    }

    #[tokio::test]
    async fn test_zero_step_is_skipped() {
        let (graph, sol, original, _) = single_route_setup();
        let quoter = CurveQuoter::new(|_: &Route, _| Some(1_000));
        let engine = engine(graph, quoter.clone(), sol, settings(10, 2));

        let trade = trade(&original, TradeDirection::SoldBase, 9, 9);
        assert!(engine.calculate_arb(&trade).await.is_none());
        assert!(quoter.amounts().is_empty());
    }

    #[tokio::test]
    async fn test_non_base_source_is_dropped() {
        let (graph, _sol, original, _) = single_route_setup();
        let quoter = CurveQuoter::new(|_: &Route, _| Some(1_000));
        let engine = engine(graph, quoter.clone(), Pubkey::new_unique(), settings(10, 2));

        let trade = trade(&original, TradeDirection::BoughtBase, 1_000_000_000, 1_000);
        assert!(engine.calculate_arb(&trade).await.is_none());
        assert!(quoter.amounts().is_empty());
    }

    #[tokio::test]
    async fn test_stale_trade_is_dropped() {
        let (graph, sol, original, _) = single_route_setup();
        let quoter = CurveQuoter::new(|_: &Route, _| Some(1_000));
        let mut settings = settings(10, 2);
        settings.max_trade_age_ms = 222;
        let engine = engine(graph, quoter.clone(), sol, settings);

        let mut trade = trade(&original, TradeDirection::SoldBase, 1_000_000_000, 1_000);
        trade.timings = Timings::received_at(now_ms() - 1_000);
        assert!(engine.calculate_arb(&trade).await.is_none());
        assert!(quoter.amounts().is_empty());
    }

    #[tokio::test]
    async fn test_trade_size_cap_scales_replayed_leg() {
        let (graph, sol, original, _) = single_route_setup();
        let quoter = CurveQuoter::new(|_: &Route, amount: u64| Some(amount as i128 / 1_000));
        let mut settings = settings(10, 2);
        settings.max_trade_size_by_mint = [(sol, 500_000_000)].into_iter().collect();
        let engine = engine(graph, quoter.clone(), sol, settings);

        let trade = trade(&original, TradeDirection::SoldBase, 1_000_000_000, 80_000);
        let opportunity = engine.calculate_arb(&trade).await.unwrap();
        assert_eq!(opportunity.arb_size, 500_000_000);

        let replay = opportunity
            .route
            .hops
            .iter()
            .find_map(|h| h.trade_output_override)
            .unwrap();
        assert_eq!(replay.input, 40_000);
        assert_eq!(replay.estimated_out, 500_000_000);
    }

    #[tokio::test]
    async fn test_timed_out_routes_are_eliminated() {
        let base = Pubkey::new_unique();
        let silent = market(base, Pubkey::new_unique());
        let live = market(base, Pubkey::new_unique());
        let silent_id = silent.id;
        let quoter = CurveQuoter::new(move |route: &Route, amount: u64| {
            if route.hops[0].market.id == silent_id {
                None
            } else {
                Some(amount as i128 / 100)
            }
        });
        let engine = engine(Arc::new(MarketGraph::new()), quoter.clone(), base, settings(4, 2));
        let routes = vec![
            Route::new(vec![Hop::new(silent, true)]),
            Route::new(vec![Hop::new(live.clone(), true)]),
        ];

        let (route, quote) = engine.step_search(routes, STEP).await.unwrap();
        assert_eq!(route.hops[0].market.id, live.id);
        assert_eq!(quote.input, 4 * STEP);
        // the silent route is only asked once
        let silent_calls = quoter
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.hops[0].market.id == silent_id)
            .count();
        assert_eq!(silent_calls, 1);
    }

    #[test]
    fn test_larger_trades_rank_first() {
        let (_, _, original, _) = single_route_setup();
        let small = trade(&original, TradeDirection::SoldBase, 10, 1);
        let big = trade(&original, TradeDirection::SoldBase, 1_000, 1);
        assert_eq!(
            larger_trade_first(&big, &small),
            std::cmp::Ordering::Less
        );
        let unique: HashSet<u64> = [small.trade_size_base(), big.trade_size_base()].into_iter().collect();
        assert_eq!(unique.len(), 2);
    }
}
