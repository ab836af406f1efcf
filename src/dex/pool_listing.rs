//! Static pool listing loaded once at startup (Raydium `liquidity/mainnet.json` shape).

use crate::dex::market::{DexLabel, Market};
use crate::error::ArbError;
use log::{info, warn};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

/// Raydium AMM v4 trade fee.
pub const DEFAULT_FEE_BPS: u16 = 25;

#[derive(Debug, Deserialize)]
struct PoolListingFile {
    #[serde(default)]
    official: Vec<PoolListingRow>,
    #[serde(rename = "unOfficial", default)]
    un_official: Vec<PoolListingRow>,
}

#[derive(Debug, Deserialize)]
struct PoolListingRow {
    id: String,
    #[serde(rename = "baseMint")]
    base_mint: String,
    #[serde(rename = "quoteMint")]
    quote_mint: String,
    #[serde(rename = "baseVault")]
    base_vault: String,
    #[serde(rename = "quoteVault")]
    quote_vault: String,
    #[serde(rename = "feeBps")]
    fee_bps: Option<u16>,
    #[serde(rename = "dexLabel")]
    dex_label: Option<String>,
}

impl PoolListingRow {
    fn into_market(self) -> Result<Market, ArbError> {
        let key = |raw: &str| {
            Pubkey::from_str(raw)
                .map_err(|e| ArbError::ParseError(format!("pool {}: bad pubkey {}: {}", self.id, raw, e)))
        };
        Ok(Market {
            id: key(&self.id)?,
            mint_a: key(&self.base_mint)?,
            mint_b: key(&self.quote_mint)?,
            vault_a: key(&self.base_vault)?,
            vault_b: key(&self.quote_vault)?,
            dex_label: self
                .dex_label
                .as_deref()
                .map(DexLabel::from_label)
                .unwrap_or(DexLabel::Raydium),
            fee_bps: self.fee_bps.unwrap_or(DEFAULT_FEE_BPS),
        })
    }
}

/// Parses a listing and keeps the pools where at least one side is a base mint.
pub fn parse_pool_listing(json: &str, base_mints: &HashSet<Pubkey>) -> Result<Vec<Market>, ArbError> {
    let file: PoolListingFile = serde_json::from_str(json)?;
    let total = file.official.len() + file.un_official.len();
    let mut seen = HashSet::new();
    let mut markets = Vec::new();

    for row in file.official.into_iter().chain(file.un_official) {
        let market = match row.into_market() {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping pool listing row: {}", e);
                continue;
            }
        };
        if market.mint_a == market.mint_b {
            continue;
        }
        if !base_mints.contains(&market.mint_a) && !base_mints.contains(&market.mint_b) {
            continue;
        }
        if seen.insert(market.id) {
            markets.push(market);
        }
    }

    info!("Kept {} of {} listed pools", markets.len(), total);
    Ok(markets)
}

pub fn load_pool_listing(path: &Path, base_mints: &HashSet<Pubkey>) -> Result<Vec<Market>, ArbError> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        ArbError::ConfigError(format!("failed to read pool listing {}: {}", path.display(), e))
    })?;
    parse_pool_listing(&json, base_mints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: Pubkey, base: Pubkey, quote: Pubkey) -> serde_json::Value {
        serde_json::json!({
            "id": id.to_string(),
            "baseMint": base.to_string(),
            "quoteMint": quote.to_string(),
            "lpMint": Pubkey::new_unique().to_string(),
            "baseVault": Pubkey::new_unique().to_string(),
            "quoteVault": Pubkey::new_unique().to_string(),
        })
    }

    #[test]
    fn test_listing_keeps_only_base_pairs() {
        let sol = Pubkey::new_unique();
        let bonk = Pubkey::new_unique();
        let wif = Pubkey::new_unique();
        let kept = Pubkey::new_unique();
        let dropped = Pubkey::new_unique();
        let json = serde_json::json!({
            "official": [row(kept, bonk, sol)],
            "unOfficial": [row(dropped, bonk, wif), row(kept, bonk, sol)],
        });
        let base: HashSet<Pubkey> = [sol].into_iter().collect();

        let markets = parse_pool_listing(&json.to_string(), &base).unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].id, kept);
        assert_eq!(markets[0].fee_bps, DEFAULT_FEE_BPS);
        assert_eq!(markets[0].dex_label, DexLabel::Raydium);
    }

    #[test]
    fn test_invalid_pubkeys_are_skipped() {
        let sol = Pubkey::new_unique();
        let mut bad = row(Pubkey::new_unique(), sol, Pubkey::new_unique());
        bad["baseVault"] = serde_json::json!("not-base58!");
        let json = serde_json::json!({ "official": [bad] });
        let base: HashSet<Pubkey> = [sol].into_iter().collect();
        assert!(parse_pool_listing(&json.to_string(), &base).unwrap().is_empty());
    }
}
