// src/dex/market.rs
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DexLabel {
    Raydium,
    Orca,
    OrcaWhirlpool,
    Meteora,
    Unknown,
}

impl DexLabel {
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "raydium" => DexLabel::Raydium,
            "orca" => DexLabel::Orca,
            "orca_whirlpool" | "whirlpool" | "orca-whirlpool" => DexLabel::OrcaWhirlpool,
            "meteora" => DexLabel::Meteora,
            _ => DexLabel::Unknown,
        }
    }
}

impl fmt::Display for DexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DexLabel::Raydium => "Raydium",
            DexLabel::Orca => "Orca",
            DexLabel::OrcaWhirlpool => "Orca (Whirlpools)",
            DexLabel::Meteora => "Meteora",
            DexLabel::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// A tradable pool. Immutable once registered; its liquidity lives in the
/// two vault token accounts and reaches the workers as account updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub dex_label: DexLabel,
    pub fee_bps: u16,
}

impl Market {
    pub fn touches(&self, mint: &Pubkey) -> bool {
        self.mint_a == *mint || self.mint_b == *mint
    }

    /// The other side of the pair, if `mint` is one of its sides.
    pub fn other_mint(&self, mint: &Pubkey) -> Option<Pubkey> {
        if self.mint_a == *mint {
            Some(self.mint_b)
        } else if self.mint_b == *mint {
            Some(self.mint_a)
        } else {
            None
        }
    }

    pub fn vaults(&self) -> [Pubkey; 2] {
        [self.vault_a, self.vault_b]
    }
}

/// Vault and id lookups for every registered market.
#[derive(Debug, Default)]
pub struct MarketRegistry {
    by_vault: HashMap<Pubkey, Arc<Market>>,
    by_id: HashMap<Pubkey, Arc<Market>>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a market with the same id is already registered.
    pub fn insert(&mut self, market: Arc<Market>) -> bool {
        if self.by_id.contains_key(&market.id) {
            return false;
        }
        self.by_vault.insert(market.vault_a, market.clone());
        self.by_vault.insert(market.vault_b, market.clone());
        self.by_id.insert(market.id, market);
        true
    }

    pub fn is_token_account_of_interest(&self, account: &Pubkey) -> bool {
        self.by_vault.contains_key(account)
    }

    pub fn market_for_vault(&self, vault: &Pubkey) -> Option<&Arc<Market>> {
        self.by_vault.get(vault)
    }

    pub fn market(&self, id: &Pubkey) -> Option<&Arc<Market>> {
        self.by_id.get(id)
    }

    pub fn markets(&self) -> impl Iterator<Item = &Arc<Market>> {
        self.by_id.values()
    }

    pub fn accounts_of_interest(&self) -> Vec<Pubkey> {
        self.by_vault.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
