use async_trait::async_trait;
use pretty_assertions::assert_eq;
use solana_backrun_bot::arbitrage::{Hop, Quote, Route, RouteQuoter};
use solana_backrun_bot::dex::math::constant_product_output;
use solana_backrun_bot::dex::{DexLabel, Market};
use solana_backrun_bot::error::ArbError;
use solana_backrun_bot::solana::AccountSource;
use solana_backrun_bot::workers::{
    register_pools, seed_accounts, PoolReplica, QuoteWorkerPool, WorkerResult, WorkerState, WorkerTaskKind,
};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const TOKEN_ACCOUNT_LEN: usize = 165;

/// Raw SPL token account bytes holding `amount`.
fn token_account(amount: u64) -> Vec<u8> {
    let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
    data[64..72].copy_from_slice(&amount.to_le_bytes());
    data
}

struct StaticAccounts(HashMap<Pubkey, Vec<u8>>);

#[async_trait]
impl AccountSource for StaticAccounts {
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Vec<u8>>, ArbError> {
        Ok(self.0.get(pubkey).cloned())
    }

    async fn get_multiple_accounts(&self, pubkeys: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>, ArbError> {
        Ok(pubkeys.iter().map(|k| self.0.get(k).cloned()).collect())
    }
}

/// Takes `delay` to answer any query.
struct SlowWorker {
    delay: Duration,
}

#[async_trait]
impl WorkerState for SlowWorker {
    async fn handle(&mut self, kind: WorkerTaskKind) -> WorkerResult {
        tokio::time::sleep(self.delay).await;
        match kind {
            WorkerTaskKind::CalculateRoute { amount, .. } => WorkerResult::Route(Quote::new(amount, amount + 1)),
            _ => WorkerResult::Route(Quote::failed(0)),
        }
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

#[tokio::test]
async fn timed_out_query_returns_none_and_counts_the_late_reply() {
    let pool = QuoteWorkerPool::new(1, |_| SlowWorker {
        delay: Duration::from_millis(150),
    })
    .unwrap();
    let route = Route::new(vec![Hop::new(market(Pubkey::new_unique(), Pubkey::new_unique()), true)]);

    let quote = pool
        .calculate_route(&route, 1_000, Duration::from_millis(30))
        .await;
    assert!(quote.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.late_replies(), 1);

    let quote = pool
        .calculate_route(&route, 1_000, Duration::from_secs(2))
        .await;
    assert_eq!(quote, Some(Quote::new(1_000, 1_001)));
}

#[tokio::test]
async fn seeded_replicas_quote_two_hop_routes_from_vault_reserves() {
    let (sol, usdc, usdt) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
    let sol_usdc = market(sol, usdc);
    let usdt_usdc = market(usdt, usdc);
    let pool = QuoteWorkerPool::new(3, |_| PoolReplica::new(None)).unwrap();

    let tracked = register_pools(&pool, &[sol_usdc.clone(), usdt_usdc.clone()])
        .await
        .unwrap();
    assert_eq!(tracked.len(), 4);

    let source = StaticAccounts(
        [
            (sol_usdc.vault_a, token_account(1_000_000_000)),
            (sol_usdc.vault_b, token_account(150_000_000_000)),
            (usdt_usdc.vault_a, token_account(500_000_000_000)),
            (usdt_usdc.vault_b, token_account(500_000_000_000)),
        ]
        .into_iter()
        .collect(),
    );
    let failed = seed_accounts(&pool, &source, &tracked).await.unwrap();
    assert!(failed.is_empty());

    // sol -> usdc -> usdt
    let route = Route::new(vec![Hop::new(sol_usdc.clone(), true), Hop::new(usdt_usdc.clone(), false)]);
    let amount = 10_000_000;
    let usdc_out = constant_product_output(amount, 1_000_000_000, 150_000_000_000, 25).unwrap();
    let expected = constant_product_output(usdc_out, 500_000_000_000, 500_000_000_000, 25).unwrap();

    // every replica holds the same state, so repeated queries agree
    for _ in 0..6 {
        let quote = pool
            .calculate_route(&route, amount, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(quote, Quote::new(amount, expected));
    }
}

#[tokio::test]
async fn unseeded_pool_fails_the_route_without_a_fallback() {
    let (sol, usdc) = (Pubkey::new_unique(), Pubkey::new_unique());
    let m = market(sol, usdc);
    let pool = QuoteWorkerPool::new(2, |_| PoolReplica::new(None)).unwrap();
    register_pools(&pool, &[m.clone()]).await.unwrap();

    let quote = pool
        .calculate_route(&Route::new(vec![Hop::new(m, true)]), 5_000, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(quote.is_failed());
}
