//! Per-worker replica of pool state.
//!
//! Every quote worker owns one `PoolReplica`. Mutations (pool registration
//! and vault balance updates) are broadcast to all workers so the replicas
//! stay identical; quote and route queries are answered from the local copy.

use async_trait::async_trait;
use log::{debug, trace, warn};
use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::program_pack::Pack;
use std::collections::HashMap;
use std::sync::Arc;

use crate::arbitrage::types::{Hop, Quote, Route};
use crate::dex::market::Market;
use crate::dex::math::{constant_product_output, override_output};
use crate::dex::quote::{QuoteRequest, SwapQuoter};
use crate::workers::messages::{WorkerResult, WorkerTaskKind};

/// Byte offset of the `amount` field in an SPL token account.
const TOKEN_AMOUNT_OFFSET: usize = 64;

/// Anything that can sit behind a worker task loop.
#[async_trait]
pub trait WorkerState: Send + 'static {
    async fn handle(&mut self, kind: WorkerTaskKind) -> WorkerResult;
}

/// Reads the token amount out of a raw SPL token account.
pub fn decode_token_amount(data: &[u8]) -> Option<u64> {
    if data.len() < spl_token::state::Account::LEN {
        return None;
    }
    let bytes: [u8; 8] = data[TOKEN_AMOUNT_OFFSET..TOKEN_AMOUNT_OFFSET + 8].try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[derive(Debug, Clone)]
struct PoolState {
    market: Arc<Market>,
    reserve_a: Option<u64>,
    reserve_b: Option<u64>,
}

impl PoolState {
    /// (input reserve, output reserve) for a trade in the given direction.
    fn reserves(&self, from_a: bool) -> Option<(u64, u64)> {
        match (self.reserve_a, self.reserve_b) {
            (Some(a), Some(b)) if from_a => Some((a, b)),
            (Some(a), Some(b)) => Some((b, a)),
            _ => None,
        }
    }
}

/// Used when a pool's vaults have not been seeded yet.
pub struct FallbackQuoter {
    pub quoter: Arc<dyn SwapQuoter>,
    pub slippage_bps: u16,
    pub max_accounts: u16,
}

pub struct PoolReplica {
    pools: HashMap<Pubkey, PoolState>,
    /// vault address -> pools reading it
    account_index: HashMap<Pubkey, Vec<Pubkey>>,
    fallback: Option<FallbackQuoter>,
}

impl PoolReplica {
    pub fn new(fallback: Option<FallbackQuoter>) -> Self {
        Self {
            pools: HashMap::new(),
            account_index: HashMap::new(),
            fallback,
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn add_pool(&mut self, market: Arc<Market>) -> WorkerResult {
        let pool_id = market.id;
        let accounts_for_update = market.vaults().to_vec();
        if !self.pools.contains_key(&pool_id) {
            for vault in &accounts_for_update {
                self.account_index.entry(*vault).or_default().push(pool_id);
            }
            self.pools.insert(
                pool_id,
                PoolState {
                    market,
                    reserve_a: None,
                    reserve_b: None,
                },
            );
        }
        WorkerResult::AddPool {
            pool_id,
            accounts_for_update,
        }
    }

    fn apply_account_update(&mut self, address: Pubkey, data: Option<&[u8]>) -> WorkerResult {
        let amount = data.and_then(decode_token_amount);
        let mut error = false;

        if let Some(pool_ids) = self.account_index.get(&address) {
            for pool_id in pool_ids {
                let Some(pool) = self.pools.get_mut(pool_id) else {
                    continue;
                };
                if amount.is_none() {
                    error = true;
                }
                if pool.market.vault_a == address {
                    pool.reserve_a = amount;
                }
                if pool.market.vault_b == address {
                    pool.reserve_b = amount;
                }
            }
        }

        if error {
            warn!("Account {} could not be decoded as a token account", address);
        }
        WorkerResult::AccountUpdate { address, error }
    }

    async fn quote_pool(&self, market: &Market, from_a: bool, amount: u64) -> u64 {
        if amount == 0 {
            return 0;
        }
        if let Some((reserve_in, reserve_out)) =
            self.pools.get(&market.id).and_then(|pool| pool.reserves(from_a))
        {
            return constant_product_output(amount, reserve_in, reserve_out, market.fee_bps)
                .unwrap_or(0);
        }

        let Some(fallback) = &self.fallback else {
            trace!("No reserves for pool {} and no fallback quoter", market.id);
            return 0;
        };
        let (source_mint, destination_mint) = if from_a {
            (market.mint_a, market.mint_b)
        } else {
            (market.mint_b, market.mint_a)
        };
        let request = QuoteRequest {
            source_mint,
            destination_mint,
            amount,
            slippage_bps: fallback.slippage_bps,
            max_accounts: fallback.max_accounts,
        };
        match fallback.quoter.quote(&request).await {
            Ok(quote) => quote.out_amount,
            Err(e) => {
                debug!("Fallback quote for pool {} failed: {}", market.id, e);
                0
            }
        }
    }

    async fn quote_hop(&self, hop: &Hop, amount: u64) -> u64 {
        match hop.trade_output_override {
            Some(o) => override_output(amount, o.input, o.estimated_out, hop.market.fee_bps),
            None => self.quote_pool(&hop.market, hop.from_a, amount).await,
        }
    }

    /// Chains hop quotes; the first zero output fails the whole route.
    pub async fn quote_route(&self, route: &Route, amount: u64) -> Quote {
        let mut current = amount;
        for hop in &route.hops {
            current = self.quote_hop(hop, current).await;
            if current == 0 {
                return Quote::failed(amount);
            }
        }
        Quote::new(amount, current)
    }
}

#[async_trait]
impl WorkerState for PoolReplica {
    async fn handle(&mut self, kind: WorkerTaskKind) -> WorkerResult {
        match kind {
            WorkerTaskKind::AddPool { market } => self.add_pool(market),
            WorkerTaskKind::AccountUpdate { address, data } => {
                self.apply_account_update(address, data.as_deref().map(Vec::as_slice))
            }
            WorkerTaskKind::CalculateRoute { route, amount } => {
                WorkerResult::Route(self.quote_route(&route, amount).await)
            }
        }
    }
}
