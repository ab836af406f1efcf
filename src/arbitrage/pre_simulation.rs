// src/arbitrage/pre_simulation.rs
//! Cheap account-key filter in front of the simulation stage.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use itertools::Itertools;
use log::{debug, trace};
use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::arbitrage::scheduler::{fifo, prioritize};
use crate::bundle::lookup_tables::LookupTableProvider;
use crate::dex::MarketRegistry;
use crate::error::ArbError;
use crate::utils::{now_ms, Timings};

/// A batch of pending transactions seen at the same moment.
#[derive(Debug, Clone)]
pub struct MempoolUpdate {
    pub txns: Vec<VersionedTransaction>,
    pub timings: Timings,
}

#[derive(Debug, Clone)]
pub struct FilteredTransaction {
    pub txn: VersionedTransaction,
    /// Vaults of registered markets the transaction touches.
    pub accounts_of_interest: Vec<Pubkey>,
    pub timings: Timings,
}

/// Decodes one line of whitespace separated base64 wire transactions.
pub fn parse_mempool_line(line: &str) -> Result<Vec<VersionedTransaction>, ArbError> {
    line.split_whitespace()
        .map(|encoded| {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| ArbError::ParseError(format!("bad base64 transaction: {}", e)))?;
            Ok(bincode::deserialize::<VersionedTransaction>(&bytes)?)
        })
        .collect()
}

pub struct PreSimulationFilter {
    registry: Arc<MarketRegistry>,
    lookup_tables: Arc<LookupTableProvider>,
    skip_addresses: HashSet<Pubkey>,
}

impl PreSimulationFilter {
    pub fn new(
        registry: Arc<MarketRegistry>,
        lookup_tables: Arc<LookupTableProvider>,
        skip_addresses: impl IntoIterator<Item = Pubkey>,
    ) -> Self {
        Self {
            registry,
            lookup_tables,
            skip_addresses: skip_addresses.into_iter().collect(),
        }
    }

    /// Static keys followed by the keys loaded through lookup tables. Lookups
    /// into tables that cannot be fetched contribute nothing.
    pub async fn resolve_account_keys(&self, txn: &VersionedTransaction) -> Vec<Pubkey> {
        let mut keys: Vec<Pubkey> = txn.message.static_account_keys().to_vec();
        let Some(lookups) = txn.message.address_table_lookups() else {
            return keys;
        };

        let mut readonly = Vec::new();
        for lookup in lookups {
            let Some(table) = self.lookup_tables.get_lookup_table(&lookup.account_key).await else {
                debug!("Lookup table {} missing, using resolved keys only", lookup.account_key);
                continue;
            };
            let index = |i: &u8| table.addresses.get(usize::from(*i)).copied();
            keys.extend(lookup.writable_indexes.iter().filter_map(index));
            readonly.extend(lookup.readonly_indexes.iter().filter_map(index));
        }
        keys.extend(readonly);
        keys
    }

    pub async fn filter(&self, txn: VersionedTransaction, timings: Timings) -> Option<FilteredTransaction> {
        let keys = self.resolve_account_keys(&txn).await;
        if keys.iter().any(|k| self.skip_addresses.contains(k)) {
            trace!("Skipping transaction touching a skip-listed address");
            return None;
        }

        let accounts_of_interest: Vec<Pubkey> = keys
            .into_iter()
            .filter(|k| self.registry.is_token_account_of_interest(k))
            .unique()
            .collect();
        if accounts_of_interest.is_empty() {
            return None;
        }

        debug!("Found txn with {} accounts of interest", accounts_of_interest.len());
        Some(FilteredTransaction {
            txn,
            accounts_of_interest,
            timings: timings.with_pre_sim_end(now_ms()),
        })
    }

    pub fn spawn(
        self: Arc<Self>,
        updates: mpsc::UnboundedReceiver<MempoolUpdate>,
        high_water_mark: usize,
    ) -> mpsc::UnboundedReceiver<FilteredTransaction> {
        let mut updates = prioritize(updates, fifo, high_water_mark, "mempool-updates");
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(MempoolUpdate { txns, timings }) = updates.recv().await {
                for txn in txns {
                    if let Some(filtered) = self.filter(txn, timings).await {
                        if tx.send(filtered).is_err() {
                            return;
                        }
                    }
                }
            }
            debug!("pre-sim stage stopped");
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::lookup_tables::LookupTableEntry;
    use crate::dex::{DexLabel, Market};
    use crate::solana::AccountSource;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use solana_sdk::{
        hash::Hash,
        message::{v0, MessageHeader, VersionedMessage},
        message::v0::MessageAddressTableLookup,
        signature::Signature,
    };

    struct NoAccounts;

    #[async_trait]
    impl AccountSource for NoAccounts {
        async fn get_account(&self, _pubkey: &Pubkey) -> Result<Option<Vec<u8>>, ArbError> {
            Ok(None)
        }

        async fn get_multiple_accounts(&self, pubkeys: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>, ArbError> {
            Ok(vec![None; pubkeys.len()])
        }
    }

    fn txn(static_keys: Vec<Pubkey>, lookups: Vec<MessageAddressTableLookup>) -> VersionedTransaction {
        VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::V0(v0::Message {
                header: MessageHeader {
                    num_required_signatures: 1,
                    num_readonly_signed_accounts: 0,
                    num_readonly_unsigned_accounts: 0,
                },
                account_keys: static_keys,
                recent_blockhash: Hash::new_unique(),
                instructions: vec![],
                address_table_lookups: lookups,
            }),
        }
    }

    fn setup() -> (PreSimulationFilter, Arc<Market>, Arc<LookupTableProvider>, Pubkey) {
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
        let tables = Arc::new(LookupTableProvider::new(Arc::new(NoAccounts)));
        let skip = Pubkey::new_unique();
        let filter = PreSimulationFilter::new(Arc::new(registry), tables.clone(), [skip]);
        (filter, market, tables, skip)
    }

    #[tokio::test]
    async fn test_keeps_transactions_touching_a_vault() {
        let (filter, market, _, _) = setup();
        let timings = Timings::received_at(now_ms());
        let out = filter
            .filter(txn(vec![Pubkey::new_unique(), market.vault_b], vec![]), timings)
            .await
            .unwrap();
        assert_eq!(out.accounts_of_interest, vec![market.vault_b]);
        assert!(out.timings.pre_sim_end >= timings.mempool_end);

        let unrelated = filter
            .filter(txn(vec![Pubkey::new_unique()], vec![]), timings)
            .await;
        assert!(unrelated.is_none());
    }

    #[test]
    fn test_mempool_line_parsing() {
        let a = txn(vec![Pubkey::new_unique()], vec![]);
        let b = txn(vec![Pubkey::new_unique()], vec![]);
        let line = format!(
            "  {} {}\n",
            BASE64.encode(bincode::serialize(&a).unwrap()),
            BASE64.encode(bincode::serialize(&b).unwrap())
        );
        assert_eq!(parse_mempool_line(&line).unwrap(), vec![a, b]);
        assert!(parse_mempool_line("").unwrap().is_empty());
        assert!(matches!(parse_mempool_line("not-base64!"), Err(ArbError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_skip_list_wins_over_interest() {
        let (filter, market, _, skip) = setup();
        let out = filter
            .filter(txn(vec![market.vault_a, skip], vec![]), Timings::default())
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_vaults_behind_lookup_tables_are_resolved() {
        let (filter, market, tables, _) = setup();
        let table = tables.insert(LookupTableEntry {
            key: Pubkey::new_unique(),
            addresses: vec![Pubkey::new_unique(), market.vault_a, market.vault_b],
            authority: None,
            active: true,
        });
        let lookups = vec![
            MessageAddressTableLookup {
                account_key: table.key,
                writable_indexes: vec![2],
                readonly_indexes: vec![1, 200],
            },
            // unknown table: its keys are simply not resolved
            MessageAddressTableLookup {
                account_key: Pubkey::new_unique(),
                writable_indexes: vec![0],
                readonly_indexes: vec![],
            },
        ];
        let out = filter
            .filter(txn(vec![Pubkey::new_unique()], lookups), Timings::default())
            .await
            .unwrap();
        assert_eq!(out.accounts_of_interest, vec![market.vault_b, market.vault_a]);
    }
}
