//! Keeps worker replicas in step with the chain: pool registration at
//! startup, an initial RPC seed of every vault, then periodic polling.

use futures::future::join_all;
use itertools::Itertools;
use log::{debug, info, warn};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::dex::market::Market;
use crate::error::ArbError;
use crate::solana::AccountSource;
use crate::workers::messages::{WorkerResult, WorkerTaskKind};
use crate::workers::pool::QuoteWorkerPool;

/// Registers every market with every worker and returns the deduplicated set
/// of accounts the replicas need updates for.
pub async fn register_pools(
    pool: &QuoteWorkerPool,
    markets: &[Arc<Market>],
) -> Result<Vec<Pubkey>, ArbError> {
    let replies = join_all(markets.iter().map(|market| {
        pool.broadcast_first(WorkerTaskKind::AddPool {
            market: market.clone(),
        })
    }))
    .await;

    let mut accounts = Vec::new();
    for reply in replies {
        if let WorkerResult::AddPool {
            accounts_for_update,
            ..
        } = reply?
        {
            accounts.extend(accounts_for_update);
        }
    }
    let accounts: Vec<Pubkey> = accounts.into_iter().unique().collect();
    info!(
        "Registered {} pools, tracking {} accounts",
        markets.len(),
        accounts.len()
    );
    Ok(accounts)
}

/// Broadcasts one account's data; true if any replica failed to decode it.
async fn broadcast_update(
    pool: &QuoteWorkerPool,
    address: Pubkey,
    data: Option<Arc<Vec<u8>>>,
) -> bool {
    join_all(pool.run_task_on_all_workers(WorkerTaskKind::AccountUpdate { address, data }))
        .await
        .into_iter()
        .any(|reply| !matches!(reply, Ok(WorkerResult::AccountUpdate { error: false, .. })))
}

/// Fetches `accounts` over RPC and pushes them to all workers. Returns the
/// accounts that could not be applied.
pub async fn seed_accounts(
    pool: &QuoteWorkerPool,
    source: &dyn AccountSource,
    accounts: &[Pubkey],
) -> Result<Vec<Pubkey>, ArbError> {
    let fetched = source.get_multiple_accounts(accounts).await?;
    let mut failed = Vec::new();
    for (address, data) in accounts.iter().zip(fetched) {
        if broadcast_update(pool, *address, data.map(Arc::new)).await {
            failed.push(*address);
        }
    }
    if !failed.is_empty() {
        warn!("{} of {} accounts failed to seed", failed.len(), accounts.len());
    }
    Ok(failed)
}

/// Polls `accounts` every `interval` and broadcasts the ones whose data
/// changed. An account a replica could not decode is re-sent on the next poll.
pub fn spawn_account_refresh(
    pool: Arc<QuoteWorkerPool>,
    source: Arc<dyn AccountSource>,
    accounts: Vec<Pubkey>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen: HashMap<Pubkey, Option<Arc<Vec<u8>>>> = HashMap::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let fetched = match source.get_multiple_accounts(&accounts).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!("Account refresh failed: {}", e);
                    continue;
                }
            };

            let mut changed = 0usize;
            for (address, data) in accounts.iter().zip(fetched) {
                let data = data.map(Arc::new);
                if last_seen.get(address) == Some(&data) {
                    continue;
                }
                changed += 1;
                if broadcast_update(&pool, *address, data.clone()).await {
                    last_seen.remove(address);
                } else {
                    last_seen.insert(*address, data);
                }
            }
            if changed > 0 {
                debug!("Refreshed {} changed accounts", changed);
            }
        }
    })
}
