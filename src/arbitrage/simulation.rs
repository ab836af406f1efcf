// src/arbitrage/simulation.rs
//! Bundle simulation of filtered mempool transactions.
//!
//! `simulateBundle` (block-engine flavoured RPC) returns the accounts of
//! interest both before and after the transaction executed, which is what
//! the post-simulation filter needs to infer trade direction and size.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, warn};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use solana_account_decoder::UiAccount;
use solana_sdk::{account::Account, pubkey::Pubkey, transaction::VersionedTransaction};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::arbitrage::pre_simulation::FilteredTransaction;
use crate::arbitrage::scheduler::prioritize;
use crate::error::ArbError;
use crate::utils::{now_ms, Timings};

const SIMULATION_TIMEOUT_MS: u64 = 2_000;
/// Upper bounds (exclusive) of the random slot offsets used by the two retries.
const RETRY_SLOT_OFFSETS: [u64; 2] = [30, 69];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedTransactionResult {
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub logs: Option<Vec<String>>,
    #[serde(default)]
    pub pre_execution_accounts: Option<Vec<Option<UiAccount>>>,
    #[serde(default)]
    pub post_execution_accounts: Option<Vec<Option<UiAccount>>>,
    #[serde(default)]
    pub units_consumed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedBundle {
    pub summary: serde_json::Value,
    pub transaction_results: Vec<SimulatedTransactionResult>,
}

fn decode_accounts(accounts: &Option<Vec<Option<UiAccount>>>) -> Vec<Option<Vec<u8>>> {
    accounts
        .as_ref()
        .map(|accounts| {
            accounts
                .iter()
                .map(|a| a.as_ref().and_then(|a| a.decode::<Account>()).map(|a| a.data))
                .collect()
        })
        .unwrap_or_default()
}

impl SimulatedBundle {
    /// Raw account data of the first transaction, before and after it ran,
    /// in the order the addresses were requested.
    pub fn account_snapshots(&self) -> (Vec<Option<Vec<u8>>>, Vec<Option<Vec<u8>>>) {
        match self.transaction_results.first() {
            Some(result) => (
                decode_accounts(&result.pre_execution_accounts),
                decode_accounts(&result.post_execution_accounts),
            ),
            None => (Vec::new(), Vec::new()),
        }
    }
}

/// Bundle simulation collaborator.
#[async_trait]
pub trait BundleSimulator: Send + Sync {
    /// Simulates `txn` alone, returning `accounts` before and after. `slot`
    /// pins the simulation bank; `None` uses the latest one.
    async fn simulate_bundle(
        &self,
        txn: &VersionedTransaction,
        accounts: &[Pubkey],
        slot: Option<u64>,
    ) -> Result<SimulatedBundle, ArbError>;

    async fn current_slot(&self) -> Result<u64, ArbError>;
}

/// One attempt on the latest bank, then two on slightly older slots.
/// `None` once all three failed.
pub async fn simulate_with_retries(
    simulator: &dyn BundleSimulator,
    txn: &VersionedTransaction,
    accounts: &[Pubkey],
) -> Option<SimulatedBundle> {
    match simulator.simulate_bundle(txn, accounts, None).await {
        Ok(response) => return Some(response),
        Err(e) => debug!("Simulation failed, retrying on an older slot: {}", e),
    }

    for max_offset in RETRY_SLOT_OFFSETS {
        let latest = match simulator.current_slot().await {
            Ok(slot) => slot,
            Err(e) => {
                debug!("No slot for simulation retry: {}", e);
                continue;
            }
        };
        let offset = rand::thread_rng().gen_range(0..max_offset);
        let slot = latest.saturating_sub(offset);
        match simulator.simulate_bundle(txn, accounts, Some(slot)).await {
            Ok(response) => return Some(response),
            Err(e) => debug!("Simulation at slot {} failed: {}", slot, e),
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RpcContextValue<T> {
    value: T,
}

/// `simulateBundle` over JSON-RPC against a block-engine enabled validator.
pub struct JitoRpcSimulator {
    client: Client,
    url: String,
}

impl JitoRpcSimulator {
    pub fn new(url: impl Into<String>) -> Result<Self, ArbError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(SIMULATION_TIMEOUT_MS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ArbError> {
        let req = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });
        let resp: RpcResponse<T> = self.client.post(&self.url).json(&req).send().await?.json().await?;
        if let Some(error) = resp.error {
            return Err(ArbError::SimulationFailed(format!("{}: {}", method, error)));
        }
        resp.result
            .ok_or_else(|| ArbError::SimulationFailed(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl BundleSimulator for JitoRpcSimulator {
    async fn simulate_bundle(
        &self,
        txn: &VersionedTransaction,
        accounts: &[Pubkey],
        slot: Option<u64>,
    ) -> Result<SimulatedBundle, ArbError> {
        let encoded = BASE64.encode(bincode::serialize(txn)?);
        let addresses: Vec<String> = accounts.iter().map(Pubkey::to_string).collect();
        let accounts_config = json!([{ "addresses": addresses, "encoding": "base64" }]);
        let mut config = json!({
            "preExecutionAccountsConfigs": accounts_config,
            "postExecutionAccountsConfigs": accounts_config,
            "transactionEncoding": "base64",
            "skipSigVerify": true,
            "replaceRecentBlockhash": false,
        });
        if let Some(slot) = slot {
            config["simulationBank"] = json!(slot);
        }

        let response: RpcContextValue<SimulatedBundle> = self
            .call("simulateBundle", json!([{ "encodedTransactions": [encoded] }, config]))
            .await?;
        Ok(response.value)
    }

    async fn current_slot(&self) -> Result<u64, ArbError> {
        self.call("getSlot", json!([{ "commitment": "processed" }])).await
    }
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub txn: VersionedTransaction,
    pub response: SimulatedBundle,
    pub accounts_of_interest: Vec<Pubkey>,
    pub timings: Timings,
}

/// Most recently received transaction first.
pub fn newest_first(a: &FilteredTransaction, b: &FilteredTransaction) -> Ordering {
    b.timings.mempool_end.cmp(&a.timings.mempool_end)
}

pub struct SimulationStage {
    simulator: Arc<dyn BundleSimulator>,
    max_pending: usize,
    max_age_ms: u64,
    pending: Arc<AtomicUsize>,
}

impl SimulationStage {
    pub fn new(simulator: Arc<dyn BundleSimulator>, max_pending: usize, max_age_ms: u64) -> Self {
        Self {
            simulator,
            max_pending,
            max_age_ms,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(AtomicOrdering::Relaxed)
    }

    /// Simulations run concurrently; results are forwarded in completion order.
    pub fn spawn(
        self: Arc<Self>,
        txns: mpsc::UnboundedReceiver<FilteredTransaction>,
        high_water_mark: usize,
    ) -> mpsc::UnboundedReceiver<SimulationResult> {
        let mut txns = prioritize(txns, newest_first, high_water_mark, "simulation");
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(filtered) = txns.recv().await {
                if tx.is_closed() {
                    break;
                }
                let pending = self.pending.load(AtomicOrdering::Relaxed);
                if pending > self.max_pending {
                    warn!("dropping txn due to high pending simulation count: {}", pending);
                    continue;
                }
                self.pending.fetch_add(1, AtomicOrdering::Relaxed);

                let stage = Arc::clone(&self);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = simulate_with_retries(
                        stage.simulator.as_ref(),
                        &filtered.txn,
                        &filtered.accounts_of_interest,
                    )
                    .await;
                    stage.pending.fetch_sub(1, AtomicOrdering::Relaxed);
                    if let Some(result) = stage.accept(filtered, response) {
                        let _ = tx.send(result);
                    }
                });
            }
            debug!("simulation stage stopped");
        });

        rx
    }

    /// Drops stale and null results.
    fn accept(&self, filtered: FilteredTransaction, response: Option<SimulatedBundle>) -> Option<SimulationResult> {
        let now = now_ms();
        debug!("Simulation took {}ms", now.saturating_sub(filtered.timings.pre_sim_end));
        if filtered.timings.is_older_than(self.max_age_ms, now) {
            debug!("dropping slow simulation - age: {}ms", filtered.timings.age_ms(now));
            return None;
        }
        let response = response?;
        Some(SimulationResult {
            txn: filtered.txn,
            response,
            accounts_of_interest: filtered.accounts_of_interest,
            timings: filtered.timings.with_sim_end(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Fails `failures` times, then answers with an empty bundle result.
    struct FlakySimulator {
        failures: usize,
        calls: Mutex<Vec<Option<u64>>>,
    }

    #[async_trait]
    impl BundleSimulator for FlakySimulator {
        async fn simulate_bundle(
            &self,
            _txn: &VersionedTransaction,
            _accounts: &[Pubkey],
            slot: Option<u64>,
        ) -> Result<SimulatedBundle, ArbError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(slot);
            if calls.len() <= self.failures {
                return Err(ArbError::SimulationFailed("bank not found".to_string()));
            }
            Ok(SimulatedBundle {
                summary: json!("succeeded"),
                transaction_results: vec![],
            })
        }

        async fn current_slot(&self) -> Result<u64, ArbError> {
            Ok(1_000)
        }
    }

    fn filtered(mempool_end: u64) -> FilteredTransaction {
        FilteredTransaction {
            txn: VersionedTransaction::default(),
            accounts_of_interest: vec![Pubkey::new_unique()],
            timings: Timings::received_at(mempool_end),
        }
    }

    #[tokio::test]
    async fn test_retries_use_older_slots() {
        let simulator = FlakySimulator { failures: 2, calls: Mutex::new(vec![]) };
        let response = simulate_with_retries(&simulator, &VersionedTransaction::default(), &[]).await;
        assert!(response.is_some());

        let calls = simulator.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], None);
        assert!((971..=1_000).contains(&calls[1].unwrap()));
        assert!((932..=1_000).contains(&calls[2].unwrap()));
    }

    #[tokio::test]
    async fn test_null_response_yields_nothing() {
        let simulator = Arc::new(FlakySimulator { failures: usize::MAX, calls: Mutex::new(vec![]) });
        let stage = Arc::new(SimulationStage::new(simulator.clone(), 1_000, 60_000));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut results = stage.clone().spawn(rx, 16);

        tx.send(filtered(now_ms())).unwrap();
        drop(tx);

        assert!(results.recv().await.is_none());
        assert_eq!(simulator.calls.lock().unwrap().len(), 3);
        assert_eq!(stage.pending(), 0);
    }

    #[tokio::test]
    async fn test_stale_results_are_dropped() {
        let simulator = Arc::new(FlakySimulator { failures: 0, calls: Mutex::new(vec![]) });
        let stage = Arc::new(SimulationStage::new(simulator, 1_000, 222));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut results = stage.spawn(rx, 16);

        tx.send(filtered(now_ms() - 10_000)).unwrap();
        let fresh = filtered(now_ms());
        tx.send(fresh.clone()).unwrap();
        drop(tx);

        let result = results.recv().await.unwrap();
        assert_eq!(result.accounts_of_interest, fresh.accounts_of_interest);
        assert!(result.timings.sim_end >= fresh.timings.mempool_end);
        assert!(results.recv().await.is_none());
    }

    #[test]
    fn test_newest_first_ranks_recent_transactions_higher() {
        assert_eq!(newest_first(&filtered(10), &filtered(5)), Ordering::Less);
        assert_eq!(newest_first(&filtered(5), &filtered(10)), Ordering::Greater);
    }
}
