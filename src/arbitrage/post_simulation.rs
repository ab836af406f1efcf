// src/arbitrage/post_simulation.rs
//! Infers trade direction and size from simulated vault balances.

use log::{debug, trace};
use solana_sdk::pubkey::Pubkey;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::arbitrage::scheduler::prioritize;
use crate::arbitrage::simulation::SimulationResult;
use crate::arbitrage::types::{BackrunnableTrade, TradeDirection};
use crate::dex::{Market, MarketRegistry};
use crate::utils::now_ms;
use crate::workers::replica::decode_token_amount;

#[derive(Debug, Default, Clone, Copy)]
struct VaultDeltas {
    a: Option<(u64, u64)>,
    b: Option<(u64, u64)>,
}

/// Most recently received victim first.
pub fn newest_result_first(a: &SimulationResult, b: &SimulationResult) -> Ordering {
    b.timings.mempool_end.cmp(&a.timings.mempool_end)
}

pub struct PostSimulationFilter {
    registry: Arc<MarketRegistry>,
    base_mints: HashSet<Pubkey>,
    max_age_ms: u64,
}

impl PostSimulationFilter {
    pub fn new(registry: Arc<MarketRegistry>, base_mints: HashSet<Pubkey>, max_age_ms: u64) -> Self {
        Self {
            registry,
            base_mints,
            max_age_ms,
        }
    }

    /// One trade per market whose two vaults moved in opposite directions.
    /// Results older than the stage's age limit yield nothing.
    pub fn backrunnable_trades(&self, result: &SimulationResult) -> Vec<BackrunnableTrade> {
        let now = now_ms();
        if result.timings.is_older_than(self.max_age_ms, now) {
            debug!("dropping stale simulation result - age: {}ms", result.timings.age_ms(now));
            return Vec::new();
        }
        if let Some(err) = result.response.transaction_results.first().and_then(|r| r.err.as_ref()) {
            debug!("Simulated transaction failed: {}", err);
            return Vec::new();
        }
        let (pre, post) = result.response.account_snapshots();

        let mut by_market: HashMap<Pubkey, (Arc<Market>, VaultDeltas)> = HashMap::new();
        for (i, account) in result.accounts_of_interest.iter().enumerate() {
            let Some(market) = self.registry.market_for_vault(account) else {
                continue;
            };
            let amounts = pre
                .get(i)
                .and_then(|d| d.as_deref())
                .and_then(decode_token_amount)
                .zip(post.get(i).and_then(|d| d.as_deref()).and_then(decode_token_amount));
            let Some(amounts) = amounts else {
                trace!("No token balance for {} in simulation", account);
                continue;
            };

            let entry = by_market
                .entry(market.id)
                .or_insert_with(|| (market.clone(), VaultDeltas::default()));
            if *account == market.vault_a {
                entry.1.a = Some(amounts);
            } else {
                entry.1.b = Some(amounts);
            }
        }

        by_market
            .into_values()
            .filter_map(|(market, deltas)| self.trade_for_market(result, market, deltas))
            .collect()
    }

    fn trade_for_market(
        &self,
        result: &SimulationResult,
        market: Arc<Market>,
        deltas: VaultDeltas,
    ) -> Option<BackrunnableTrade> {
        let ((pre_a, post_a), (pre_b, post_b)) = (deltas.a?, deltas.b?);
        let diff_a = i128::from(post_a) - i128::from(pre_a);
        let diff_b = i128::from(post_b) - i128::from(pre_b);
        // a swap moves the two vaults in opposite directions
        if diff_a.signum() * diff_b.signum() >= 0 {
            return None;
        }

        let base_is_token_a = if self.base_mints.contains(&market.mint_a) {
            true
        } else if self.base_mints.contains(&market.mint_b) {
            false
        } else {
            return None;
        };
        let base_diff = if base_is_token_a { diff_a } else { diff_b };
        let trade_direction = if base_diff < 0 {
            TradeDirection::BoughtBase
        } else {
            TradeDirection::SoldBase
        };

        Some(BackrunnableTrade {
            txn: result.txn.clone(),
            market,
            base_is_token_a,
            trade_direction,
            trade_size_a: u64::try_from(diff_a.unsigned_abs()).ok()?,
            trade_size_b: u64::try_from(diff_b.unsigned_abs()).ok()?,
            timings: result.timings.with_post_sim_end(now_ms()),
        })
    }

    pub fn spawn(
        self: Arc<Self>,
        results: mpsc::UnboundedReceiver<SimulationResult>,
        high_water_mark: usize,
    ) -> mpsc::UnboundedReceiver<BackrunnableTrade> {
        let mut results = prioritize(results, newest_result_first, high_water_mark, "post-sim");
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                for trade in self.backrunnable_trades(&result) {
                    if tx.send(trade).is_err() {
                        return;
                    }
                }
            }
            debug!("post-sim stage stopped");
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::simulation::{SimulatedBundle, SimulatedTransactionResult};
    use crate::dex::DexLabel;
    use crate::utils::Timings;
    use pretty_assertions::assert_eq;
    use solana_account_decoder::{UiAccount, UiAccountData, UiAccountEncoding};
    use solana_sdk::transaction::VersionedTransaction;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use spl_token::solana_program::program_pack::Pack;

    fn token_account(amount: u64) -> Option<UiAccount> {
        let mut data = vec![0u8; spl_token::state::Account::LEN];
        data[64..72].copy_from_slice(&amount.to_le_bytes());
        Some(UiAccount {
            lamports: 2_039_280,
            data: UiAccountData::Binary(BASE64.encode(data), UiAccountEncoding::Base64),
            owner: spl_token::id().to_string(),
            executable: false,
            rent_epoch: 0,
            space: Some(spl_token::state::Account::LEN as u64),
        })
    }

    fn setup(mint_a_is_base: bool) -> (PostSimulationFilter, Arc<Market>) {
        let market = Arc::new(Market {
            id: Pubkey::new_unique(),
            mint_a: Pubkey::new_unique(),
            mint_b: Pubkey::new_unique(),
            vault_a: Pubkey::new_unique(),
            vault_b: Pubkey::new_unique(),
            dex_label: DexLabel::Raydium,
            fee_bps: 25,
        });
        let mut registry = MarketRegistry::new();
        registry.insert(market.clone());
        let base = if mint_a_is_base { market.mint_a } else { market.mint_b };
        (
            PostSimulationFilter::new(Arc::new(registry), [base].into_iter().collect(), 222),
            market,
        )
    }

    fn result(market: &Market, pre: (u64, u64), post: (u64, u64)) -> SimulationResult {
        SimulationResult {
            txn: VersionedTransaction::default(),
            response: SimulatedBundle {
                summary: serde_json::json!("succeeded"),
                transaction_results: vec![SimulatedTransactionResult {
                    err: None,
                    logs: None,
                    pre_execution_accounts: Some(vec![token_account(pre.0), token_account(pre.1)]),
                    post_execution_accounts: Some(vec![token_account(post.0), token_account(post.1)]),
                    units_consumed: None,
                }],
            },
            accounts_of_interest: vec![market.vault_a, market.vault_b],
            timings: Timings::received_at(now_ms()),
        }
    }

    #[test]
    fn test_victim_buying_base_is_detected() {
        let (filter, market) = setup(true);
        // base (A) leaves the pool, quote (B) comes in
        let trades = filter.backrunnable_trades(&result(&market, (1_000, 5_000), (900, 5_600)));
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert!(trade.base_is_token_a);
        assert_eq!(trade.trade_direction, TradeDirection::BoughtBase);
        assert_eq!((trade.trade_size_a, trade.trade_size_b), (100, 600));
        assert_eq!(trade.trade_size_base(), 100);
        assert!(trade.timings.post_sim_end > 0);
    }

    #[test]
    fn test_base_on_side_b_selling() {
        let (filter, market) = setup(false);
        let trades = filter.backrunnable_trades(&result(&market, (1_000, 5_000), (900, 5_600)));
        assert_eq!(trades.len(), 1);
        assert!(!trades[0].base_is_token_a);
        assert_eq!(trades[0].trade_direction, TradeDirection::SoldBase);
        assert_eq!(trades[0].trade_size_base(), 600);
    }

    #[test]
    fn test_same_direction_moves_are_ignored() {
        let (filter, market) = setup(true);
        assert!(filter
            .backrunnable_trades(&result(&market, (1_000, 5_000), (1_100, 5_600)))
            .is_empty());
        assert!(filter
            .backrunnable_trades(&result(&market, (1_000, 5_000), (1_000, 5_600)))
            .is_empty());
    }

    #[test]
    fn test_failed_simulation_yields_nothing() {
        let (filter, market) = setup(true);
        let mut failed = result(&market, (1_000, 5_000), (900, 5_600));
        failed.response.transaction_results[0].err = Some(serde_json::json!({"InstructionError": [0, "Custom"]}));
        assert!(filter.backrunnable_trades(&failed).is_empty());
    }

    #[test]
    fn test_stale_result_is_dropped() {
        let (filter, market) = setup(true);
        let mut stale = result(&market, (1_000, 5_000), (900, 5_600));
        stale.timings = Timings::received_at(now_ms() - 60_000);
        assert!(filter.backrunnable_trades(&stale).is_empty());
    }

    #[test]
    fn test_newer_results_rank_first() {
        let (_, market) = setup(true);
        let mut older = result(&market, (1_000, 5_000), (900, 5_600));
        older.timings = Timings::received_at(1_000);
        let mut newer = older.clone();
        newer.timings = Timings::received_at(2_000);
        assert_eq!(newest_result_first(&newer, &older), Ordering::Less);
        assert_eq!(newest_result_first(&older, &newer), Ordering::Greater);
    }

    #[tokio::test]
    async fn test_spawned_stage_skips_stale_results() {
        let (filter, market) = setup(true);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut trades = Arc::new(filter).spawn(rx, 16);

        let mut stale = result(&market, (1_000, 5_000), (900, 5_600));
        stale.timings = Timings::received_at(now_ms() - 60_000);
        tx.send(stale).unwrap();
        tx.send(result(&market, (1_000, 5_000), (900, 5_600))).unwrap();
        drop(tx);

        let mut received = Vec::new();
        while let Some(trade) = trades.recv().await {
            received.push(trade);
        }
        assert_eq!(received.len(), 1);
        assert!(!received[0].timings.is_older_than(222, now_ms()));
    }
}
