// src/dex/quote.rs

use crate::error::ArbError;
use async_trait::async_trait;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

/// Parameters for an exact-in quote from the swap-quoting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub source_mint: Pubkey,
    pub destination_mint: Pubkey,
    pub amount: u64,
    pub slippage_bps: u16,
    pub max_accounts: u16,
}

/// A quote as returned by the swap-quoting service. `raw` is the untouched
/// response body; it has to be handed back verbatim to build the swap.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub in_amount: u64,
    pub out_amount: u64,
    pub raw: serde_json::Value,
}

/// An executable swap leg plus the lookup tables its accounts live in.
#[derive(Debug, Clone)]
pub struct SwapInstructions {
    pub swap_instruction: Instruction,
    pub lookup_table_addresses: Vec<Pubkey>,
}

/// External swap-quoting collaborator.
#[async_trait]
pub trait SwapQuoter: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, ArbError>;

    async fn swap_instructions(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
    ) -> Result<SwapInstructions, ArbError>;
}
