// src/bundle/lookup_tables.rs
//! Address lookup table cache and the on-chain table manager.

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use solana_sdk::{
    address_lookup_table::{
        instruction::{create_lookup_table, extend_lookup_table},
        state::AddressLookupTable,
    },
    address_lookup_table::AddressLookupTableAccount,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ArbError;
use crate::solana::{AccountSource, SolanaRpcClient};

/// Maximum addresses per extend instruction.
pub const EXTEND_CHUNK_SIZE: usize = 25;
/// Slots subtracted from the current slot when deriving a new table address.
const CREATE_SLOT_OFFSET: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTableEntry {
    pub key: Pubkey,
    pub addresses: Vec<Pubkey>,
    pub authority: Option<Pubkey>,
    pub active: bool,
}

impl LookupTableEntry {
    pub fn from_account_data(key: Pubkey, data: &[u8]) -> Result<Self, ArbError> {
        let table = AddressLookupTable::deserialize(data).map_err(|e| {
            ArbError::LookupTableError(format!("failed to decode table {}: {}", key, e))
        })?;
        Ok(Self {
            key,
            addresses: table.addresses.to_vec(),
            authority: table.meta.authority,
            active: table.meta.deactivation_slot == u64::MAX,
        })
    }

    pub fn to_account(&self) -> AddressLookupTableAccount {
        AddressLookupTableAccount {
            key: self.key,
            addresses: self.addresses.clone(),
        }
    }
}

/// Cache of lookup tables and a reverse index address -> tables. Unknown
/// tables are fetched on demand.
pub struct LookupTableProvider {
    source: Arc<dyn AccountSource>,
    tables: DashMap<Pubkey, Arc<LookupTableEntry>>,
    tables_for_address: DashMap<Pubkey, HashSet<Pubkey>>,
}

impl LookupTableProvider {
    pub fn new(source: Arc<dyn AccountSource>) -> Self {
        Self {
            source,
            tables: DashMap::new(),
            tables_for_address: DashMap::new(),
        }
    }

    pub fn insert(&self, entry: LookupTableEntry) -> Arc<LookupTableEntry> {
        self.remove_from_index(&entry.key);
        for address in &entry.addresses {
            self.tables_for_address
                .entry(*address)
                .or_default()
                .insert(entry.key);
        }
        let entry = Arc::new(entry);
        self.tables.insert(entry.key, entry.clone());
        entry
    }

    /// Forgets a table so the next lookup re-reads it from chain.
    pub fn invalidate(&self, key: &Pubkey) {
        self.remove_from_index(key);
        self.tables.remove(key);
    }

    fn remove_from_index(&self, key: &Pubkey) {
        if let Some((_, old)) = self.tables.remove(key) {
            for address in &old.addresses {
                if let Some(mut tables) = self.tables_for_address.get_mut(address) {
                    tables.remove(key);
                }
            }
        }
    }

    pub fn get_cached(&self, key: &Pubkey) -> Option<Arc<LookupTableEntry>> {
        self.tables.get(key).map(|t| t.value().clone())
    }

    /// Cached table, or a fresh read from chain. `None` if the table does not
    /// exist or cannot be decoded.
    pub async fn get_lookup_table(&self, key: &Pubkey) -> Option<Arc<LookupTableEntry>> {
        if let Some(cached) = self.get_cached(key) {
            return Some(cached);
        }
        match self.source.get_account(key).await {
            Ok(Some(data)) => match LookupTableEntry::from_account_data(*key, &data) {
                Ok(entry) => Some(self.insert(entry)),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            },
            Ok(None) => {
                debug!("Lookup table {} not found", key);
                None
            }
            Err(e) => {
                warn!("Failed to fetch lookup table {}: {}", key, e);
                None
            }
        }
    }

    pub fn tables_for_address(&self, address: &Pubkey) -> HashSet<Pubkey> {
        self.tables_for_address
            .get(address)
            .map(|t| t.value().clone())
            .unwrap_or_default()
    }

    pub fn tables(&self) -> Vec<Arc<LookupTableEntry>> {
        self.tables.iter().map(|t| t.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// On-chain lookup table maintenance.
#[async_trait]
pub trait LookupTableManager: Send + Sync {
    async fn extend_table(&self, table: &Pubkey, addresses: &[Pubkey]) -> Result<(), ArbError>;

    /// Creates an empty table owned by the payer and returns its address.
    async fn create_table(&self) -> Result<Pubkey, ArbError>;
}

pub struct RpcLookupTableManager {
    rpc: Arc<SolanaRpcClient>,
    payer: Arc<Keypair>,
}

impl RpcLookupTableManager {
    pub fn new(rpc: Arc<SolanaRpcClient>, payer: Arc<Keypair>) -> Self {
        Self { rpc, payer }
    }

    async fn send(&self, instruction: solana_sdk::instruction::Instruction) -> Result<(), ArbError> {
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let transaction = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&self.payer.pubkey()),
            &[self.payer.as_ref()],
            blockhash,
        );
        let signature = self.rpc.send_and_confirm_transaction(&transaction).await?;
        debug!("Lookup table transaction confirmed: {}", signature);
        Ok(())
    }
}

#[async_trait]
impl LookupTableManager for RpcLookupTableManager {
    async fn extend_table(&self, table: &Pubkey, addresses: &[Pubkey]) -> Result<(), ArbError> {
        let payer = self.payer.pubkey();
        for chunk in addresses.chunks(EXTEND_CHUNK_SIZE) {
            let instruction = extend_lookup_table(*table, payer, Some(payer), chunk.to_vec());
            self.send(instruction).await?;
        }
        info!("Extended lookup table {} with {} addresses", table, addresses.len());
        Ok(())
    }

    async fn create_table(&self) -> Result<Pubkey, ArbError> {
        let payer = self.payer.pubkey();
        let slot = self.rpc.get_slot().await?;
        let (instruction, table) =
            create_lookup_table(payer, payer, slot.saturating_sub(CREATE_SLOT_OFFSET));
        self.send(instruction).await?;
        info!("Created lookup table {}", table);
        Ok(table)
    }
}
