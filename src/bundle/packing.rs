// src/bundle/packing.rs
//! Greedy lookup-table selection that keeps a v0 transaction under the
//! packet size limit.

use itertools::Itertools;
use log::{debug, info};
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    address_lookup_table::AddressLookupTableAccount,
    message::{v0, VersionedMessage},
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::bundle::lookup_tables::{LookupTableEntry, LookupTableProvider};
use crate::error::ArbError;

/// A table has to cover at least this many uncovered keys to be worth its own 32 bytes.
pub const MIN_ADDRESSES_TO_INCLUDE_TABLE: usize = 2;
/// Tables the packer may add on top of the ones the swap legs require.
pub const MAX_EXTRA_TABLES: usize = 25;

#[derive(Debug, Clone)]
pub struct PackingOutcome {
    pub selected: Vec<Arc<LookupTableEntry>>,
    /// `None` when the message could not be compiled at all.
    pub serialized_size: Option<usize>,
    /// Keys not found in any selected table.
    pub uncovered: Vec<Pubkey>,
    pub fits: bool,
}

impl PackingOutcome {
    pub fn table_accounts(&self) -> Vec<AddressLookupTableAccount> {
        self.selected.iter().map(|t| t.to_account()).collect()
    }
}

pub fn compile_message(
    payer: &Pubkey,
    instructions: &[Instruction],
    tables: &[AddressLookupTableAccount],
    blockhash: Hash,
) -> Result<v0::Message, ArbError> {
    Ok(v0::Message::try_compile(payer, instructions, tables, blockhash)?)
}

/// Wire size of the transaction with every required signature present.
pub fn serialized_size(
    payer: &Pubkey,
    instructions: &[Instruction],
    tables: &[AddressLookupTableAccount],
    blockhash: Hash,
) -> Result<usize, ArbError> {
    let message = compile_message(payer, instructions, tables, blockhash)?;
    let transaction = VersionedTransaction {
        signatures: vec![Signature::default(); usize::from(message.header.num_required_signatures)],
        message: VersionedMessage::V0(message),
    };
    Ok(bincode::serialized_size(&transaction)? as usize)
}

/// Account keys that can live in a lookup table: non-signers that are not
/// invoked programs, in first-seen order.
pub fn lookup_candidate_keys(payer: &Pubkey, instructions: &[Instruction]) -> Vec<Pubkey> {
    let programs: HashSet<Pubkey> = instructions.iter().map(|ix| ix.program_id).collect();
    instructions
        .iter()
        .flat_map(|ix| ix.accounts.iter())
        .filter(|meta| !meta.is_signer && meta.pubkey != *payer && !programs.contains(&meta.pubkey))
        .map(|meta| meta.pubkey)
        .unique()
        .collect()
}

fn measure(
    payer: &Pubkey,
    instructions: &[Instruction],
    selected: &[Arc<LookupTableEntry>],
    blockhash: Hash,
) -> Option<usize> {
    let tables: Vec<AddressLookupTableAccount> = selected.iter().map(|t| t.to_account()).collect();
    match serialized_size(payer, instructions, &tables, blockhash) {
        Ok(size) => Some(size),
        Err(e) => {
            debug!("Could not compile candidate transaction: {}", e);
            None
        }
    }
}

fn fits(size: Option<usize>) -> bool {
    size.map_or(false, |s| s <= PACKET_DATA_SIZE)
}

/// Starts from `preselected` and greedily adds the known tables covering the
/// most still-uncovered keys, re-measuring after each pick and stopping as
/// soon as the transaction fits.
pub fn pack(
    payer: &Pubkey,
    instructions: &[Instruction],
    preselected: &[Arc<LookupTableEntry>],
    provider: &LookupTableProvider,
    blockhash: Hash,
) -> PackingOutcome {
    let start = Instant::now();
    let keys = lookup_candidate_keys(payer, instructions);

    let mut selected: Vec<Arc<LookupTableEntry>> = preselected
        .iter()
        .unique_by(|t| t.key)
        .cloned()
        .collect();
    let max_tables = MAX_EXTRA_TABLES + selected.len();

    let covered_by = |tables: &[Arc<LookupTableEntry>], key: &Pubkey| {
        tables.iter().any(|t| t.addresses.contains(key))
    };

    let mut remaining: HashSet<Pubkey> = HashSet::new();
    let mut intersections: std::collections::HashMap<Pubkey, usize> = std::collections::HashMap::new();
    for key in &keys {
        if covered_by(&selected, key) {
            continue;
        }
        let tables = provider.tables_for_address(key);
        if tables.is_empty() {
            continue;
        }
        remaining.insert(*key);
        for table in tables {
            *intersections.entry(table).or_default() += 1;
        }
    }

    let candidates: Vec<(Pubkey, usize)> = intersections
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .collect();

    let mut size = measure(payer, instructions, &selected, blockhash);
    let candidate_count = candidates.len();

    if !fits(size) {
        for (table_key, intersection) in candidates {
            if intersection < MIN_ADDRESSES_TO_INCLUDE_TABLE
                || selected.len() >= max_tables
                || remaining.len() <= 1
            {
                break;
            }
            let Some(table) = provider.get_cached(&table_key) else {
                continue;
            };
            if selected.iter().any(|t| t.key == table_key) {
                continue;
            }

            let matches: Vec<Pubkey> = table
                .addresses
                .iter()
                .filter(|a| remaining.contains(a))
                .copied()
                .collect();
            if matches.len() < MIN_ADDRESSES_TO_INCLUDE_TABLE {
                continue;
            }

            for address in &matches {
                remaining.remove(address);
            }
            selected.push(table);
            size = measure(payer, instructions, &selected, blockhash);
            if fits(size) {
                break;
            }
        }
    }

    let uncovered: Vec<Pubkey> = keys
        .iter()
        .filter(|key| !covered_by(&selected, key))
        .copied()
        .collect();

    info!(
        "Reduced {} different addresses to {} lookup tables from {} ({}) candidates, with {} missing addresses in {}ms",
        keys.len(),
        selected.len(),
        candidate_count,
        provider.len(),
        uncovered.len(),
        start.elapsed().as_millis()
    );

    PackingOutcome {
        fits: fits(size),
        selected,
        serialized_size: size,
        uncovered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArbError;
    use crate::solana::AccountSource;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use solana_sdk::instruction::AccountMeta;

    struct NoAccounts;

    #[async_trait]
    impl AccountSource for NoAccounts {
        async fn get_account(&self, _pubkey: &Pubkey) -> Result<Option<Vec<u8>>, ArbError> {
            Ok(None)
        }

        async fn get_multiple_accounts(
            &self,
            pubkeys: &[Pubkey],
        ) -> Result<Vec<Option<Vec<u8>>>, ArbError> {
            Ok(vec![None; pubkeys.len()])
        }
    }

    fn instruction(program: Pubkey, keys: &[Pubkey], data_len: usize) -> Instruction {
        Instruction {
            program_id: program,
            accounts: keys.iter().map(|k| AccountMeta::new(*k, false)).collect(),
            data: vec![7u8; data_len],
        }
    }

    #[test]
    fn test_candidate_keys_skip_signers_and_programs() {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let (a, b) = (Pubkey::new_unique(), Pubkey::new_unique());
        let ix = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::new(payer, true),
                AccountMeta::new(a, false),
                AccountMeta::new_readonly(program, false),
                AccountMeta::new(b, false),
                AccountMeta::new(a, false),
            ],
            data: vec![],
        };
        assert_eq!(lookup_candidate_keys(&payer, &[ix]), vec![a, b]);
    }

    #[test]
    fn test_three_disjoint_tables_cover_everything() {
        let payer = Pubkey::new_unique();
        let provider = LookupTableProvider::new(Arc::new(NoAccounts));
        let keys: Vec<Pubkey> = (0..36).map(|_| Pubkey::new_unique()).collect();
        let tables: Vec<Pubkey> = keys
            .chunks(12)
            .map(|chunk| {
                provider
                    .insert(LookupTableEntry {
                        key: Pubkey::new_unique(),
                        addresses: chunk.to_vec(),
                        authority: None,
                        active: true,
                    })
                    .key
            })
            .collect();
        // an unrelated table must never be picked
        provider.insert(LookupTableEntry {
            key: Pubkey::new_unique(),
            addresses: vec![Pubkey::new_unique(), Pubkey::new_unique()],
            authority: None,
            active: true,
        });

        let ixs = vec![instruction(Pubkey::new_unique(), &keys, 800)];
        let blockhash = Hash::new_unique();
        let unpacked = serialized_size(&payer, &ixs, &[], blockhash).unwrap();
        assert!(unpacked > PACKET_DATA_SIZE);

        let outcome = pack(&payer, &ixs, &[], &provider, blockhash);
        assert!(outcome.fits);
        assert!(outcome.uncovered.is_empty());
        assert!(outcome.selected.len() <= 3);
        assert!(outcome.selected.iter().all(|t| tables.contains(&t.key)));
        assert!(outcome.serialized_size.unwrap() < unpacked);
    }

    #[test]
    fn test_packing_stops_once_it_fits() {
        let payer = Pubkey::new_unique();
        let provider = LookupTableProvider::new(Arc::new(NoAccounts));
        let keys: Vec<Pubkey> = (0..30).map(|_| Pubkey::new_unique()).collect();
        let big = provider.insert(LookupTableEntry {
            key: Pubkey::new_unique(),
            addresses: keys[..20].to_vec(),
            authority: None,
            active: true,
        });
        provider.insert(LookupTableEntry {
            key: Pubkey::new_unique(),
            addresses: keys[20..].to_vec(),
            authority: None,
            active: true,
        });

        // 30 static keys plus 400 bytes of data is just over the limit
        let ixs = vec![instruction(Pubkey::new_unique(), &keys, 400)];
        let outcome = pack(&payer, &ixs, &[], &provider, Hash::new_unique());
        assert!(outcome.fits);
        assert_eq!(outcome.selected.len(), 1);
        assert_eq!(outcome.selected[0].key, big.key);
        assert_eq!(outcome.uncovered, keys[20..].to_vec());
    }

    #[test]
    fn test_keys_without_tables_stay_uncovered() {
        let payer = Pubkey::new_unique();
        let provider = LookupTableProvider::new(Arc::new(NoAccounts));
        let keys: Vec<Pubkey> = (0..40).map(|_| Pubkey::new_unique()).collect();
        let ixs = vec![instruction(Pubkey::new_unique(), &keys, 100)];

        let outcome = pack(&payer, &ixs, &[], &provider, Hash::new_unique());
        assert!(!outcome.fits);
        assert!(outcome.selected.is_empty());
        assert_eq!(outcome.uncovered.len(), 40);
    }
}
