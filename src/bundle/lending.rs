//! Flash-loan and capital instructions for the marginfi lending program.
//!
//! Instructions are built directly from the program's anchor interface: an
//! 8 byte `sha256("global:<name>")` discriminator followed by the
//! little-endian arguments.

use log::info;
use serde::Deserialize;
use solana_sdk::{
    hash::hashv,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    sysvar,
};
use spl_associated_token_account::get_associated_token_address;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::ArbError;

/// Instruction factory for a lending protocol.
pub trait LendingProvider: Send + Sync {
    /// `end_index` is the position of the matching end instruction in the transaction.
    fn begin_flash_loan(&self, end_index: u64) -> Result<Instruction, ArbError>;

    /// `active_mints` are the banks with an open balance; they are health checked.
    fn end_flash_loan(&self, active_mints: &[Pubkey]) -> Result<Instruction, ArbError>;

    fn deposit(&self, mint: &Pubkey, amount: u64) -> Result<Instruction, ArbError>;

    fn borrow(&self, mint: &Pubkey, amount: u64) -> Result<Instruction, ArbError>;

    fn repay(&self, mint: &Pubkey, amount: u64, repay_all: bool) -> Result<Instruction, ArbError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarginfiBank {
    pub mint: Pubkey,
    pub bank: Pubkey,
    pub liquidity_vault: Pubkey,
    pub liquidity_vault_authority: Pubkey,
    pub oracle: Pubkey,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginfiBankRow {
    mint: String,
    bank: String,
    liquidity_vault: String,
    liquidity_vault_authority: String,
    oracle: String,
}

impl MarginfiBankRow {
    fn into_bank(self) -> Result<MarginfiBank, ArbError> {
        let key = |raw: &str| {
            Pubkey::from_str(raw).map_err(|e| ArbError::ConfigError(format!("bad bank pubkey {}: {}", raw, e)))
        };
        Ok(MarginfiBank {
            mint: key(&self.mint)?,
            bank: key(&self.bank)?,
            liquidity_vault: key(&self.liquidity_vault)?,
            liquidity_vault_authority: key(&self.liquidity_vault_authority)?,
            oracle: key(&self.oracle)?,
        })
    }
}

pub fn parse_banks(json: &str) -> Result<Vec<MarginfiBank>, ArbError> {
    let rows: Vec<MarginfiBankRow> = serde_json::from_str(json)?;
    rows.into_iter().map(MarginfiBankRow::into_bank).collect()
}

pub fn load_banks(path: &Path) -> Result<Vec<MarginfiBank>, ArbError> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        ArbError::ConfigError(format!("failed to read marginfi banks {}: {}", path.display(), e))
    })?;
    parse_banks(&json)
}

fn discriminator(name: &str) -> [u8; 8] {
    let hash = hashv(&[b"global:", name.as_bytes()]);
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash.to_bytes()[..8]);
    out
}

fn instruction_data(name: &str, args: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + args.len());
    data.extend_from_slice(&discriminator(name));
    data.extend_from_slice(args);
    data
}

pub struct MarginfiLendingProvider {
    program_id: Pubkey,
    group: Pubkey,
    account: Pubkey,
    authority: Pubkey,
    banks: HashMap<Pubkey, MarginfiBank>,
}

impl MarginfiLendingProvider {
    pub fn new(
        program_id: Pubkey,
        group: Pubkey,
        account: Pubkey,
        authority: Pubkey,
        banks: Vec<MarginfiBank>,
    ) -> Self {
        info!("marginfi account {} with {} banks", account, banks.len());
        Self {
            program_id,
            group,
            account,
            authority,
            banks: banks.into_iter().map(|b| (b.mint, b)).collect(),
        }
    }

    fn bank(&self, mint: &Pubkey) -> Result<&MarginfiBank, ArbError> {
        self.banks
            .get(mint)
            .ok_or_else(|| ArbError::InstructionError(format!("no marginfi bank for mint {}", mint)))
    }

    fn health_accounts(&self, active_mints: &[Pubkey]) -> Result<Vec<AccountMeta>, ArbError> {
        let mut metas = Vec::with_capacity(active_mints.len() * 2);
        for mint in active_mints {
            let bank = self.bank(mint)?;
            metas.push(AccountMeta::new_readonly(bank.bank, false));
            metas.push(AccountMeta::new_readonly(bank.oracle, false));
        }
        Ok(metas)
    }

    fn token_instruction(
        &self,
        name: &str,
        args: &[u8],
        mint: &Pubkey,
        with_vault_authority: bool,
    ) -> Result<Instruction, ArbError> {
        let bank = self.bank(mint)?;
        let user_token_account = get_associated_token_address(&self.authority, mint);
        let mut accounts = vec![
            AccountMeta::new_readonly(self.group, false),
            AccountMeta::new(self.account, false),
            AccountMeta::new_readonly(self.authority, true),
            AccountMeta::new(bank.bank, false),
            AccountMeta::new(user_token_account, false),
        ];
        if with_vault_authority {
            accounts.push(AccountMeta::new(bank.liquidity_vault_authority, false));
        }
        accounts.push(AccountMeta::new(bank.liquidity_vault, false));
        accounts.push(AccountMeta::new_readonly(spl_token::id(), false));

        Ok(Instruction {
            program_id: self.program_id,
            accounts,
            data: instruction_data(name, args),
        })
    }
}

impl LendingProvider for MarginfiLendingProvider {
    fn begin_flash_loan(&self, end_index: u64) -> Result<Instruction, ArbError> {
        Ok(Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.account, false),
                AccountMeta::new_readonly(self.authority, true),
                AccountMeta::new_readonly(sysvar::instructions::id(), false),
            ],
            data: instruction_data("lending_account_start_flashloan", &end_index.to_le_bytes()),
        })
    }

    fn end_flash_loan(&self, active_mints: &[Pubkey]) -> Result<Instruction, ArbError> {
        let mut accounts = vec![
            AccountMeta::new(self.account, false),
            AccountMeta::new_readonly(self.authority, true),
        ];
        accounts.extend(self.health_accounts(active_mints)?);
        Ok(Instruction {
            program_id: self.program_id,
            accounts,
            data: instruction_data("lending_account_end_flashloan", &[]),
        })
    }

    fn deposit(&self, mint: &Pubkey, amount: u64) -> Result<Instruction, ArbError> {
        self.token_instruction("lending_account_deposit", &amount.to_le_bytes(), mint, false)
    }

    fn borrow(&self, mint: &Pubkey, amount: u64) -> Result<Instruction, ArbError> {
        let mut ix =
            self.token_instruction("lending_account_borrow", &amount.to_le_bytes(), mint, true)?;
        ix.accounts.extend(self.health_accounts(&[*mint])?);
        Ok(ix)
    }

    fn repay(&self, mint: &Pubkey, amount: u64, repay_all: bool) -> Result<Instruction, ArbError> {
        let mut args = amount.to_le_bytes().to_vec();
        // Option<bool>: always Some
        args.extend_from_slice(&[1, u8::from(repay_all)]);
        self.token_instruction("lending_account_repay", &args, mint, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provider() -> (MarginfiLendingProvider, MarginfiBank) {
        let bank = MarginfiBank {
            mint: Pubkey::new_unique(),
            bank: Pubkey::new_unique(),
            liquidity_vault: Pubkey::new_unique(),
            liquidity_vault_authority: Pubkey::new_unique(),
            oracle: Pubkey::new_unique(),
        };
        let provider = MarginfiLendingProvider::new(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            vec![bank.clone()],
        );
        (provider, bank)
    }

    #[test]
    fn test_begin_flash_loan_encodes_end_index() {
        let (provider, _) = provider();
        let ix = provider.begin_flash_loan(5).unwrap();
        assert_eq!(&ix.data[..8], &discriminator("lending_account_start_flashloan"));
        assert_eq!(&ix.data[8..], &5u64.to_le_bytes());
        assert_eq!(ix.accounts[2].pubkey, sysvar::instructions::id());
        assert!(ix.accounts[1].is_signer);
    }

    #[test]
    fn test_borrow_and_repay_target_the_bank() {
        let (provider, bank) = provider();
        let borrow = provider.borrow(&bank.mint, 1_000).unwrap();
        assert!(borrow.accounts.iter().any(|a| a.pubkey == bank.liquidity_vault_authority));
        // health check accounts trail the fixed ones
        let tail: Vec<Pubkey> = borrow.accounts.iter().rev().take(2).map(|a| a.pubkey).collect();
        assert_eq!(tail, vec![bank.oracle, bank.bank]);

        let repay = provider.repay(&bank.mint, 1_000, true).unwrap();
        assert_eq!(&repay.data[8..16], &1_000u64.to_le_bytes());
        assert_eq!(&repay.data[16..], &[1, 1]);

        let deposit = provider.deposit(&bank.mint, 7).unwrap();
        assert_eq!(deposit.accounts.len(), 7);
    }

    #[test]
    fn test_unknown_mint_is_an_instruction_error() {
        let (provider, _) = provider();
        let result = provider.borrow(&Pubkey::new_unique(), 1);
        assert!(matches!(result, Err(ArbError::InstructionError(_))));
    }

    #[test]
    fn test_bank_file_parsing() {
        let (_, bank) = provider();
        let json = serde_json::json!([{
            "mint": bank.mint.to_string(),
            "bank": bank.bank.to_string(),
            "liquidityVault": bank.liquidity_vault.to_string(),
            "liquidityVaultAuthority": bank.liquidity_vault_authority.to_string(),
            "oracle": bank.oracle.to_string(),
        }]);
        assert_eq!(parse_banks(&json.to_string()).unwrap(), vec![bank]);
    }
}
