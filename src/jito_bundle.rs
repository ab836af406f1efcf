//! Jito block-engine integration: bundle submission over JSON-RPC, tip
//! accounts and tip sizing.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, warn};
use rand::{seq::SliceRandom, Rng};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use solana_sdk::{
    instruction::Instruction, pubkey, pubkey::Pubkey, system_instruction,
    transaction::VersionedTransaction,
};
use std::time::Duration;

use crate::bundle::sender::{BundleStatus, BundleSubmitter};
use crate::error::ArbError;

/// Block-engine tip accounts. Tips are spread across them to avoid write
/// lock contention on a single hot account.
pub const TIP_ACCOUNTS: [Pubkey; 8] = [
    pubkey!("96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5"),
    pubkey!("HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe"),
    pubkey!("Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY"),
    pubkey!("ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49"),
    pubkey!("DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh"),
    pubkey!("ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt"),
    pubkey!("DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL"),
    pubkey!("3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT"),
];

/// Flat part of every tip, in lamports.
pub const BASE_TIP_LAMPORTS: u64 = 5_000;
const TIP_SHARE_MIN: f64 = 0.32;
const TIP_SHARE_MAX: f64 = 0.986;

const BLOCK_ENGINE_TIMEOUT_MS: u64 = 3_000;

pub fn select_random_tip_account<R: Rng + ?Sized>(rng: &mut R) -> Pubkey {
    *TIP_ACCOUNTS.choose(rng).unwrap_or(&TIP_ACCOUNTS[0])
}

/// Creates a system transfer instruction to tip the validator.
pub fn create_tip_instruction(from_pubkey: &Pubkey, tip_lamports: u64, tip_account: &Pubkey) -> Instruction {
    system_instruction::transfer(from_pubkey, tip_account, tip_lamports)
}

/// A random share of the profit plus the flat base, capped at `max_tip`.
pub fn compute_tip<R: Rng + ?Sized>(profit_lamports: u64, max_tip: u64, rng: &mut R) -> u64 {
    let share = rng.gen_range(TIP_SHARE_MIN..TIP_SHARE_MAX);
    let variable = (profit_lamports as f64 * share).ceil() as u64;
    variable.saturating_add(BASE_TIP_LAMPORTS).min(max_tip)
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RpcContextValue<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct InflightBundleStatus {
    status: String,
    landed_slot: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LandedBundleStatus {
    slot: u64,
    confirmation_status: Option<String>,
    err: Option<serde_json::Value>,
}

/// JSON-RPC client for the block-engine bundles endpoint.
pub struct JitoBundleSubmitter {
    client: Client,
    url: String,
}

impl JitoBundleSubmitter {
    pub fn new(url: impl Into<String>) -> Result<Self, ArbError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(BLOCK_ENGINE_TIMEOUT_MS))
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
            return Err(ArbError::BundleError(format!("{} failed: {}", method, error)));
        }
        resp.result
            .ok_or_else(|| ArbError::BundleError(format!("{} returned no result", method)))
    }
}

pub fn encode_bundle(bundle: &[VersionedTransaction]) -> Result<Vec<String>, ArbError> {
    bundle
        .iter()
        .map(|tx| Ok(BASE64.encode(bincode::serialize(tx)?)))
        .collect()
}

#[async_trait]
impl BundleSubmitter for JitoBundleSubmitter {
    async fn send_bundle(&self, bundle: &[VersionedTransaction]) -> Result<String, ArbError> {
        let encoded = encode_bundle(bundle)?;
        self.call("sendBundle", json!([encoded, { "encoding": "base64" }])).await
    }

    async fn bundle_status(&self, bundle_id: &str) -> Result<BundleStatus, ArbError> {
        let inflight: RpcContextValue<InflightBundleStatus> =
            self.call("getInflightBundleStatuses", json!([[bundle_id]])).await?;
        let Some(status) = inflight.value.into_iter().next() else {
            return Ok(BundleStatus::Pending);
        };
        debug!("Bundle {} in-flight status {}", bundle_id, status.status);
        Ok(match status.status.as_str() {
            "Landed" => BundleStatus::Accepted {
                slot: status.landed_slot.unwrap_or_default(),
            },
            "Failed" => BundleStatus::Rejected {
                error_type: "failed".to_string(),
                error_content: "bundle failed in the auction".to_string(),
            },
            "Invalid" => BundleStatus::Rejected {
                error_type: "invalid".to_string(),
                error_content: "bundle id unknown to the block engine".to_string(),
            },
            _ => BundleStatus::Pending,
        })
    }

    async fn bundle_landed(&self, bundle_id: &str) -> Result<bool, ArbError> {
        let statuses: RpcContextValue<Option<LandedBundleStatus>> =
            self.call("getBundleStatuses", json!([[bundle_id]])).await?;
        match statuses.value.into_iter().flatten().next() {
            Some(status) if status.err.as_ref().map_or(true, |e| e.get("Ok").is_some()) => {
                debug!(
                    "Bundle {} landed in slot {} ({})",
                    bundle_id,
                    status.slot,
                    status.confirmation_status.as_deref().unwrap_or("unknown")
                );
                Ok(true)
            }
            Some(status) => {
                warn!("Bundle {} landed with error {:?}", bundle_id, status.err);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
