// src/bundle/sender.rs
//! Bundle submission and trade telemetry.

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde::Serialize;
use solana_sdk::transaction::VersionedTransaction;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::arbitrage::scheduler::prioritize;
use crate::bundle::builder::BuiltBundle;
use crate::error::ArbError;
use crate::utils::{now_ms, to_decimal_string, Timings};

const LAMPORTS_DECIMALS: u8 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleStatus {
    Pending,
    Accepted { slot: u64 },
    Rejected { error_type: String, error_content: String },
}

/// External bundle submission collaborator.
#[async_trait]
pub trait BundleSubmitter: Send + Sync {
    /// Returns the bundle id.
    async fn send_bundle(&self, bundle: &[VersionedTransaction]) -> Result<String, ArbError>;

    async fn bundle_status(&self, bundle_id: &str) -> Result<BundleStatus, ArbError>;

    async fn bundle_landed(&self, bundle_id: &str) -> Result<bool, ArbError>;
}

/// One line of the trades log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub timestamp: u64,
    pub uuid: String,
    pub landed: bool,
    pub accepted: u32,
    pub rejected: bool,
    pub error_type: Option<String>,
    pub error_content: Option<String>,
    pub txn0_signature: String,
    pub txn1_signature: String,
    pub arb_size: String,
    pub expected_profit: String,
    pub hop1_dex: String,
    pub hop2_dex: String,
    pub hop3_dex: String,
    pub source_mint: String,
    pub intermediate_mint1: String,
    pub intermediate_mint2: String,
    pub tip_lamports: String,
    #[serde(flatten)]
    pub timings: Timings,
}

impl TradeRecord {
    pub fn new(built: &BuiltBundle, uuid: String) -> Self {
        let signature = |i: usize| {
            built
                .bundle
                .get(i)
                .and_then(|tx| tx.signatures.first())
                .map(|s| s.to_string())
                .unwrap_or_default()
        };
        let dex = |i: usize| built.hop_dexes.get(i).map(|d| d.to_string()).unwrap_or_default();
        let mint = |i: usize| {
            built
                .intermediate_mints
                .get(i)
                .map(|m| m.to_string())
                .unwrap_or_default()
        };
        Self {
            timestamp: now_ms(),
            uuid,
            landed: false,
            accepted: 0,
            rejected: false,
            error_type: None,
            error_content: None,
            txn0_signature: signature(0),
            txn1_signature: signature(1),
            arb_size: built.arb_size.to_string(),
            expected_profit: built.expected_profit.to_string(),
            hop1_dex: dex(0),
            hop2_dex: dex(1),
            hop3_dex: dex(2),
            source_mint: built.source_mint.to_string(),
            intermediate_mint1: mint(0),
            intermediate_mint2: mint(1),
            tip_lamports: built.tip_lamports.to_string(),
            timings: built.timings,
        }
    }
}

/// Append-only JSON lines file.
pub struct TradeLog {
    file: Mutex<File>,
}

impl TradeLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ArbError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| ArbError::ConfigError(format!("cannot open trades log {}: {}", path.display(), e)))?;
        Ok(Self { file: Mutex::new(file) })
    }

    pub async fn append(&self, record: &TradeRecord) -> Result<(), ArbError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| ArbError::Unknown(format!("trades log write failed: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| ArbError::Unknown(format!("trades log flush failed: {}", e)))
    }
}

/// Larger expected profit first.
pub fn more_profitable_bundle_first(a: &BuiltBundle, b: &BuiltBundle) -> Ordering {
    b.expected_profit.cmp(&a.expected_profit)
}

pub struct BundleSender {
    submitter: Arc<dyn BundleSubmitter>,
    trade_log: Arc<TradeLog>,
    in_transit: DashMap<String, TradeRecord>,
    check_landed_delay: Duration,
    max_age_ms: u64,
    dry_run: bool,
}

impl BundleSender {
    pub fn new(
        submitter: Arc<dyn BundleSubmitter>,
        trade_log: Arc<TradeLog>,
        check_landed_delay: Duration,
        max_age_ms: u64,
        dry_run: bool,
    ) -> Self {
        Self {
            submitter,
            trade_log,
            in_transit: DashMap::new(),
            check_landed_delay,
            max_age_ms,
            dry_run,
        }
    }

    pub fn in_transit_count(&self) -> usize {
        self.in_transit.len()
    }

    /// Submits one bundle. Submission is never retried; bundles past the
    /// age limit are dropped unsent.
    pub async fn send(self: &Arc<Self>, mut built: BuiltBundle) {
        let now = now_ms();
        if built.timings.is_older_than(self.max_age_ms, now) {
            debug!("dropping stale bundle - age: {}ms", built.timings.age_ms(now));
            return;
        }
        built.timings.bundle_sent = now;
        let victim = built
            .bundle
            .first()
            .and_then(|tx| tx.signatures.first())
            .map(|s| s.to_string())
            .unwrap_or_default();

        if self.dry_run {
            info!(
                "Dry run: not sending bundle backrunning {} (arb size {}, expected profit {}, tip {} SOL)",
                victim,
                built.arb_size,
                built.expected_profit,
                to_decimal_string(i128::from(built.tip_lamports), LAMPORTS_DECIMALS)
            );
            built.timings.log_chain_timings();
            return;
        }

        match self.submitter.send_bundle(&built.bundle).await {
            Ok(bundle_id) => {
                info!(
                    "Bundle {} sent, backrunning {} with a {} SOL tip",
                    bundle_id,
                    victim,
                    to_decimal_string(i128::from(built.tip_lamports), LAMPORTS_DECIMALS)
                );
                built.timings.log_chain_timings();
                self.in_transit
                    .insert(bundle_id.clone(), TradeRecord::new(&built, bundle_id.clone()));

                let sender = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(sender.check_landed_delay).await;
                    sender.process_completed_trade(&bundle_id).await;
                });
            }
            Err(e) => {
                built.timings.log_chain_timings();
                let message = e.to_string();
                if message.contains("Bundle Dropped, no connected leader up soon") {
                    error!("Error sending bundle: Bundle Dropped, no connected leader up soon.");
                } else {
                    error!("Error sending bundle: {}", message);
                }
                let mut record = TradeRecord::new(&built, String::new());
                record.rejected = true;
                record.error_type = Some("sendingError".to_string());
                record.error_content = Some(message);
                if let Err(e) = self.trade_log.append(&record).await {
                    warn!("{}", e);
                }
            }
        }
    }

    /// Applies an accept/reject notification to a bundle still in transit.
    pub fn on_bundle_result(&self, bundle_id: &str, status: BundleStatus) {
        let Some(mut trade) = self.in_transit.get_mut(bundle_id) else {
            return;
        };
        match status {
            BundleStatus::Accepted { slot } => {
                info!("Bundle {} accepted in slot {}", bundle_id, slot);
                trade.accepted += 1;
            }
            BundleStatus::Rejected {
                error_type,
                error_content,
            } => {
                info!("Bundle {} rejected: {} {}", bundle_id, error_type, error_content);
                trade.rejected = true;
                trade.error_type = Some(error_type);
                trade.error_content = Some(error_content);
            }
            BundleStatus::Pending => {}
        }
    }

    async fn process_completed_trade(&self, bundle_id: &str) {
        match self.submitter.bundle_status(bundle_id).await {
            Ok(status) => self.on_bundle_result(bundle_id, status),
            Err(e) => warn!("Bundle status for {} unavailable: {}", bundle_id, e),
        }
        let landed = match self.submitter.bundle_landed(bundle_id).await {
            Ok(landed) => landed,
            Err(e) => {
                info!("Landing check failed. Assuming bundle {} did not land: {}", bundle_id, e);
                false
            }
        };

        let Some((_, mut record)) = self.in_transit.remove(bundle_id) else {
            return;
        };
        record.landed = landed;
        record.timestamp = now_ms();
        if let Err(e) = self.trade_log.append(&record).await {
            warn!("{}", e);
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        bundles: mpsc::UnboundedReceiver<BuiltBundle>,
        high_water_mark: usize,
    ) -> JoinHandle<()> {
        let mut bundles = prioritize(bundles, more_profitable_bundle_first, high_water_mark, "send-bundle");
        tokio::spawn(async move {
            while let Some(built) = bundles.recv().await {
                self.send(built).await;
            }
            info!("send-bundle stage stopped");
        })
    }
}
