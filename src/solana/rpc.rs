// src/solana/rpc.rs
use crate::error::ArbError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rand::Rng;
use solana_client::nonblocking::rpc_client::RpcClient as NonBlockingRpcClient;
use solana_sdk::{
    clock::Slot,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const DEFAULT_COMMITMENT: CommitmentConfig = CommitmentConfig::confirmed();

/// Maximum keys per getMultipleAccounts call.
pub const MULTIPLE_ACCOUNTS_BATCH: usize = 100;

/// Raw account reads, the only chain access the engine's caches need.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn get_account(&self, pubkey: &Pubkey) -> std::result::Result<Option<Vec<u8>>, ArbError>;

    /// Same order as `pubkeys`; `None` for accounts that do not exist.
    async fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> std::result::Result<Vec<Option<Vec<u8>>>, ArbError>;
}

/// Provides high-availability RPC with retries/fallbacks.
pub struct SolanaRpcClient {
    pub primary_client: Arc<NonBlockingRpcClient>,
    pub fallback_clients: Vec<Arc<NonBlockingRpcClient>>,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

impl SolanaRpcClient {
    pub fn new(
        primary_endpoint: &str,
        fallback_endpoints: Vec<String>,
        max_retries: usize,
        retry_delay: Duration,
    ) -> Self {
        let primary_client = Arc::new(NonBlockingRpcClient::new_with_commitment(
            primary_endpoint.to_string(),
            DEFAULT_COMMITMENT,
        ));

        let fallback_clients = fallback_endpoints
            .iter()
            .map(|url| {
                Arc::new(NonBlockingRpcClient::new_with_commitment(
                    url.clone(),
                    DEFAULT_COMMITMENT,
                ))
            })
            .collect();

        Self {
            primary_client,
            fallback_clients,
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    async fn execute_with_retry_and_fallback<F, Fut, T>(
        &self,
        operation_name: &str,
        mut rpc_call_fn: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut(Arc<NonBlockingRpcClient>) -> Fut,
        Fut: std::future::Future<Output = Result<T, solana_client::client_error::ClientError>> + Send,
        T: Send,
    {
        let mut last_error: Option<solana_client::client_error::ClientError> = None;

        for attempt in 0..self.max_retries {
            match rpc_call_fn(Arc::clone(&self.primary_client)).await {
                Ok(result) => {
                    debug!("[RPC HA - {}] Primary client succeeded on attempt {}", operation_name, attempt + 1);
                    return Ok(result);
                }
                Err(e) => {
                    let classified = ArbError::from(&e);
                    warn!(
                        "[RPC HA - {}] Primary client attempt {}/{} failed ({:?}): {}",
                        operation_name,
                        attempt + 1,
                        self.max_retries,
                        classified.categorize(),
                        e
                    );
                    // the request itself is bad; another endpoint will not help
                    if !classified.is_recoverable() {
                        return Err(anyhow::Error::from(e)
                            .context(format!("[RPC HA - {}] Non-recoverable RPC error", operation_name)));
                    }
                    last_error = Some(e);
                    if attempt < self.max_retries - 1 {
                        let mut delay_ms = self.retry_delay.as_millis() as u64;
                        if delay_ms > 0 {
                            let jitter_val = rand::thread_rng().gen_range(0..(delay_ms / 4).max(1));
                            delay_ms += jitter_val;
                        }
                        sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }

        for (i, fallback_client) in self.fallback_clients.iter().enumerate() {
            debug!("[RPC HA - {}] Attempting with fallback client #{}", operation_name, i + 1);
            match rpc_call_fn(Arc::clone(fallback_client)).await {
                Ok(result) => {
                    info!("[RPC HA - {}] Fallback client #{} succeeded.", operation_name, i + 1);
                    return Ok(result);
                }
                Err(e) => {
                    warn!("[RPC HA - {}] Fallback client #{} failed: {}", operation_name, i + 1, e);
                    last_error = Some(e);
                }
            }
        }

        let final_error_message = format!("[RPC HA - {}] All RPC attempts failed.", operation_name);
        error!("{}", final_error_message);
        Err(match last_error {
            Some(e) => anyhow::Error::from(e).context(final_error_message),
            None => anyhow::anyhow!(final_error_message),
        })
    }

    pub async fn get_account_data(&self, pubkey: &Pubkey) -> Result<Vec<u8>> {
        let op_name = format!("get_account_data({})", pubkey);
        self.execute_with_retry_and_fallback(&op_name, |client| async move {
            client.get_account_data(pubkey).await
        })
        .await
        .with_context(|| format!("Failed to get account data for {}", pubkey))
    }

    pub async fn get_slot(&self) -> Result<Slot> {
        self.execute_with_retry_and_fallback("get_slot", |client| async move {
            client.get_slot().await
        })
        .await
    }

    pub async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.execute_with_retry_and_fallback("get_latest_blockhash", |client| async move {
            client.get_latest_blockhash().await
        })
        .await
    }

    /// Sends a legacy setup transaction and waits for confirmation.
    pub async fn send_and_confirm_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        self.execute_with_retry_and_fallback("send_and_confirm_transaction", |client| async move {
            client.send_and_confirm_transaction(transaction).await
        })
        .await
    }

    /// Whether a transaction signature reached the confirmed commitment.
    pub async fn signature_confirmed(&self, signature: &Signature) -> Result<bool> {
        let op_name = format!("get_signature_status({})", signature);
        let status = self
            .execute_with_retry_and_fallback(&op_name, |client| async move {
                client.get_signature_status(signature).await
            })
            .await?;
        Ok(matches!(status, Some(Ok(()))))
    }

    /// Checks the health of the RPC client, primarily by querying the primary client.
    pub async fn is_healthy(&self) -> bool {
        match self.primary_client.get_health().await {
            Ok(_) => true,
            Err(e) => {
                warn!("[RPC HA - is_healthy] Primary RPC client health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl AccountSource for SolanaRpcClient {
    async fn get_account(&self, pubkey: &Pubkey) -> std::result::Result<Option<Vec<u8>>, ArbError> {
        let op_name = format!("get_account({})", pubkey);
        let account = self
            .execute_with_retry_and_fallback(&op_name, |client| async move {
                client
                    .get_account_with_commitment(pubkey, DEFAULT_COMMITMENT)
                    .await
                    .map(|response| response.value)
            })
            .await?;
        Ok(account.map(|a| a.data))
    }

    async fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> std::result::Result<Vec<Option<Vec<u8>>>, ArbError> {
        let mut out = Vec::with_capacity(pubkeys.len());
        for batch in pubkeys.chunks(MULTIPLE_ACCOUNTS_BATCH) {
            let accounts = self
                .execute_with_retry_and_fallback("get_multiple_accounts", |client| async move {
                    client.get_multiple_accounts(batch).await
                })
                .await?;
            out.extend(accounts.into_iter().map(|a| a.map(|a| a.data)));
        }
        Ok(out)
    }
}
