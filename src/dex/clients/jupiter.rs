//! HTTP client for a Jupiter v6 compatible swap API (`/quote` and
//! `/swap-instructions`), usually a self-hosted instance next to the bot.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::str::FromStr;
use std::time::Duration;

use crate::{
    dex::quote::{QuoteRequest, SwapInstructions, SwapQuote, SwapQuoter},
    error::ArbError,
};

const JUPITER_QUOTE_ENDPOINT: &str = "quote";
const JUPITER_SWAP_INSTRUCTIONS_ENDPOINT: &str = "swap-instructions";
const JUPITER_REQUEST_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Serialize)]
struct JupiterQuoteRequest {
    #[serde(rename = "inputMint")]
    input_mint: String,
    #[serde(rename = "outputMint")]
    output_mint: String,
    amount: u64,
    #[serde(rename = "slippageBps")]
    slippage_bps: u16,
    #[serde(rename = "swapMode")]
    swap_mode: &'static str,
    #[serde(rename = "maxAccounts")]
    max_accounts: u16,
    #[serde(rename = "asLegacyTransaction")]
    as_legacy_transaction: bool,
}

/// The subset of the quote response we read; the full body is kept as JSON.
#[derive(Debug, Deserialize)]
struct JupiterQuoteAmounts {
    #[serde(rename = "inAmount")]
    in_amount: String,
    #[serde(rename = "outAmount")]
    out_amount: String,
}

#[derive(Debug, Serialize)]
struct JupiterSwapInstructionsRequest<'a> {
    #[serde(rename = "quoteResponse")]
    quote_response: &'a serde_json::Value,
    #[serde(rename = "userPublicKey")]
    user_public_key: String,
    #[serde(rename = "skipUserAccountsRpcCalls")]
    skip_user_accounts_rpc_calls: bool,
    #[serde(rename = "restrictIntermediateTokens")]
    restrict_intermediate_tokens: bool,
    #[serde(rename = "asLegacyTransaction")]
    as_legacy_transaction: bool,
    #[serde(rename = "useSharedAccounts")]
    use_shared_accounts: bool,
    #[serde(rename = "wrapAndUnwrapSol")]
    wrap_and_unwrap_sol: bool,
}

#[derive(Debug, Deserialize)]
struct JupiterAccountMeta {
    pubkey: String,
    #[serde(rename = "isSigner")]
    is_signer: bool,
    #[serde(rename = "isWritable")]
    is_writable: bool,
}

#[derive(Debug, Deserialize)]
struct JupiterInstruction {
    #[serde(rename = "programId")]
    program_id: String,
    accounts: Vec<JupiterAccountMeta>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct JupiterSwapInstructionsResponse {
    #[serde(rename = "swapInstruction")]
    swap_instruction: JupiterInstruction,
    #[serde(rename = "addressLookupTableAddresses", default)]
    address_lookup_table_addresses: Vec<String>,
}

fn parse_pubkey(raw: &str) -> Result<Pubkey, ArbError> {
    Pubkey::from_str(raw).map_err(|e| ArbError::ParseError(format!("invalid pubkey {}: {}", raw, e)))
}

impl JupiterInstruction {
    fn into_instruction(self) -> Result<Instruction, ArbError> {
        let accounts = self
            .accounts
            .into_iter()
            .map(|meta| {
                Ok(AccountMeta {
                    pubkey: parse_pubkey(&meta.pubkey)?,
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                })
            })
            .collect::<Result<Vec<_>, ArbError>>()?;
        let data = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| ArbError::ParseError(format!("invalid instruction data: {}", e)))?;
        Ok(Instruction {
            program_id: parse_pubkey(&self.program_id)?,
            accounts,
            data,
        })
    }
}

pub struct JupiterClient {
    client: Client,
    base_url: String,
}

impl JupiterClient {
    pub fn new(base_url: &str) -> Result<Self, ArbError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(JUPITER_REQUEST_TIMEOUT_MS))
            .build()
            .map_err(|e| ArbError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl SwapQuoter for JupiterClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, ArbError> {
        let query = JupiterQuoteRequest {
            input_mint: request.source_mint.to_string(),
            output_mint: request.destination_mint.to_string(),
            amount: request.amount,
            slippage_bps: request.slippage_bps,
            swap_mode: "ExactIn",
            max_accounts: request.max_accounts,
            as_legacy_transaction: false,
        };

        let response = self
            .client
            .get(self.endpoint(JUPITER_QUOTE_ENDPOINT))
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ArbError::QuoteError(format!("quote API error {}: {}", status, text)));
        }

        let raw: serde_json::Value = response.json().await?;
        let amounts: JupiterQuoteAmounts = serde_json::from_value(raw.clone())?;
        let in_amount = amounts
            .in_amount
            .parse::<u64>()
            .map_err(|e| ArbError::ParseError(format!("inAmount: {}", e)))?;
        let out_amount = amounts
            .out_amount
            .parse::<u64>()
            .map_err(|e| ArbError::ParseError(format!("outAmount: {}", e)))?;

        debug!(
            "quote {} {} -> {} {}",
            in_amount, request.source_mint, out_amount, request.destination_mint
        );

        Ok(SwapQuote {
            in_amount,
            out_amount,
            raw,
        })
    }

    async fn swap_instructions(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
    ) -> Result<SwapInstructions, ArbError> {
        let body = JupiterSwapInstructionsRequest {
            quote_response: &quote.raw,
            user_public_key: user.to_string(),
            skip_user_accounts_rpc_calls: false,
            restrict_intermediate_tokens: false,
            as_legacy_transaction: false,
            use_shared_accounts: false,
            wrap_and_unwrap_sol: false,
        };

        let response = self
            .client
            .post(self.endpoint(JUPITER_SWAP_INSTRUCTIONS_ENDPOINT))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ArbError::InstructionError(format!(
                "swap-instructions API error {}: {}",
                status, text
            )));
        }

        let parsed: JupiterSwapInstructionsResponse = response.json().await?;
        let lookup_table_addresses = parsed
            .address_lookup_table_addresses
            .iter()
            .map(|s| parse_pubkey(s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SwapInstructions {
            swap_instruction: parsed.swap_instruction.into_instruction()?,
            lookup_table_addresses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_instruction_response_parsing() {
        let program = Pubkey::new_unique();
        let account = Pubkey::new_unique();
        let table = Pubkey::new_unique();
        let body = serde_json::json!({
            "swapInstruction": {
                "programId": program.to_string(),
                "accounts": [
                    { "pubkey": account.to_string(), "isSigner": false, "isWritable": true }
                ],
                "data": BASE64.encode([1u8, 2, 3]),
            },
            "addressLookupTableAddresses": [table.to_string()],
        });

        let parsed: JupiterSwapInstructionsResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.address_lookup_table_addresses, vec![table.to_string()]);
        let ix = parsed.swap_instruction.into_instruction().unwrap();
        assert_eq!(ix.program_id, program);
        assert_eq!(ix.accounts, vec![AccountMeta::new(account, false)]);
        assert_eq!(ix.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_quote_amounts_are_read_from_strings() {
        let raw = serde_json::json!({ "inAmount": "1000", "outAmount": "2000", "routePlan": [] });
        let amounts: JupiterQuoteAmounts = serde_json::from_value(raw).unwrap();
        assert_eq!(amounts.in_amount, "1000");
        assert_eq!(amounts.out_amount, "2000");
    }
}
