use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const MARGINFI_PROGRAM_ID: &str = "MFv2hWf31Z9kbCa1snEPYctwafyhdvnV7FZnsebVacA";
pub const MARGINFI_GROUP: &str = "4qp6Fx6tnZkY5Wropq9wUYgtFxXKwE6viZxFHg3rdAG8";

/// How the arb transaction sources its input capital.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapitalStrategy {
    /// Swap straight out of the payer's token accounts.
    OwnFunds,
    /// Borrow the input inside a marginfi flash loan and repay before it ends.
    FlashLoan,
}

impl FromStr for CapitalStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "own_funds" | "own-funds" | "ownfunds" => Ok(CapitalStrategy::OwnFunds),
            "flash_loan" | "flash-loan" | "flashloan" => Ok(CapitalStrategy::FlashLoan),
            other => Err(format!("unknown capital strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub rpc_url_backup: Option<Vec<String>>,
    pub rpc_max_retries: Option<usize>,
    pub rpc_retry_delay_ms: Option<u64>,
    pub simulation_rpc_url: Option<String>,
    pub block_engine_url: String,
    pub swap_quote_url: String,
    pub payer_keypair_path: String,
    pub pool_listing_path: String,
    pub base_mints: Vec<Pubkey>,
    pub num_worker_threads: usize,
    pub arb_calculation_num_steps: u64,
    pub max_arb_calculation_time_ms: u64,
    pub max_hops: usize,
    pub max_trade_size_by_mint: Option<HashMap<Pubkey, u64>>,
    pub max_trade_age_ms: u64,
    pub max_simulation_age_ms: u64,
    pub max_post_sim_age_ms: u64,
    pub max_build_age_ms: u64,
    pub max_send_age_ms: u64,
    pub max_pending_simulations: usize,
    pub pre_sim_high_water_mark: usize,
    pub sim_high_water_mark: usize,
    pub post_sim_high_water_mark: usize,
    pub arb_high_water_mark: usize,
    pub build_high_water_mark: usize,
    pub send_high_water_mark: usize,
    pub worker_quote_slippage_bps: u16,
    pub worker_quote_max_accounts: u16,
    pub swap_slippage_bps: u16,
    pub swap_max_accounts: u16,
    pub min_profit_lamports: u64,
    pub max_tip_lamports: u64,
    pub capital_strategy: CapitalStrategy,
    pub marginfi_program_id: Pubkey,
    pub marginfi_group: Pubkey,
    pub marginfi_account: Option<Pubkey>,
    pub marginfi_banks_path: Option<String>,
    pub trades_log_path: String,
    pub check_landed_delay_ms: u64,
    pub account_refresh_interval_ms: u64,
    pub skip_tx_addresses: Vec<Pubkey>,
    pub dry_run: bool,
    pub log_level: Option<String>,
}

fn parse_pubkey_list(raw: &str) -> Vec<Pubkey> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match Pubkey::from_str(s) {
            Ok(key) => Some(key),
            Err(e) => {
                log::warn!("Ignoring invalid pubkey '{}': {}", s, e);
                None
            }
        })
        .collect()
}

fn parse_pubkey_or(raw: Option<String>, default: &str) -> Pubkey {
    raw.and_then(|v| Pubkey::from_str(v.trim()).ok())
        .or_else(|| Pubkey::from_str(default).ok())
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            rpc_url: env::var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8899".to_string()),
            rpc_url_backup: env::var("RPC_URL_BACKUP")
                .ok()
                .map(|s| s.split(',').map(|u| u.trim().to_string()).filter(|u| !u.is_empty()).collect()),
            rpc_max_retries: env::var("RPC_MAX_RETRIES").ok().and_then(|v| v.parse().ok()),
            rpc_retry_delay_ms: env::var("RPC_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok()),
            simulation_rpc_url: env::var("SIMULATION_RPC_URL").ok(),
            block_engine_url: env::var("BLOCK_ENGINE_URL").unwrap_or_else(|_| {
                "https://mainnet.block-engine.jito.wtf/api/v1/bundles".to_string()
            }),
            swap_quote_url: env::var("SWAP_QUOTE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            payer_keypair_path: env::var("PAYER_KEYPAIR_PATH")
                .unwrap_or_else(|_| ".config/solana/id.json".to_string()),
            pool_listing_path: env::var("POOL_LISTING_PATH")
                .unwrap_or_else(|_| "pools.json".to_string()),
            base_mints: parse_pubkey_list(
                &env::var("BASE_MINTS").unwrap_or_else(|_| format!("{},{}", WSOL_MINT, USDC_MINT)),
            ),
            num_worker_threads: env::var("NUM_WORKER_THREADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(num_cpus::get),
            arb_calculation_num_steps: env::var("ARB_CALCULATION_NUM_STEPS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            max_arb_calculation_time_ms: env::var("MAX_ARB_CALCULATION_TIME_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
            max_hops: env::var("MAX_HOPS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            max_trade_size_by_mint: env::var("MAX_TRADE_SIZE_BY_MINT").ok().map(|s| {
                s.split(',')
                    .filter_map(|part| {
                        let mut kv = part.split(':');
                        let key = Pubkey::from_str(kv.next()?.trim()).ok()?;
                        let value = kv.next()?.trim().parse::<u64>().ok()?;
                        Some((key, value))
                    })
                    .collect()
            }),
            max_trade_age_ms: env::var("MAX_TRADE_AGE_MS")
                .unwrap_or_else(|_| "222".to_string())
                .parse()
                .unwrap_or(222),
            max_simulation_age_ms: env::var("MAX_SIMULATION_AGE_MS")
                .unwrap_or_else(|_| "222".to_string())
                .parse()
                .unwrap_or(222),
            max_post_sim_age_ms: env::var("MAX_POST_SIM_AGE_MS")
                .unwrap_or_else(|_| "222".to_string())
                .parse()
                .unwrap_or(222),
            // building quotes every hop again, so it gets a full slot
            max_build_age_ms: env::var("MAX_BUILD_AGE_MS")
                .unwrap_or_else(|_| "400".to_string())
                .parse()
                .unwrap_or(400),
            max_send_age_ms: env::var("MAX_SEND_AGE_MS")
                .unwrap_or_else(|_| "800".to_string())
                .parse()
                .unwrap_or(800),
            max_pending_simulations: env::var("MAX_PENDING_SIMULATIONS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
            pre_sim_high_water_mark: env::var("PRE_SIM_HIGH_WATER_MARK")
                .unwrap_or_else(|_| "2500".to_string())
                .parse()
                .unwrap_or(2500),
            sim_high_water_mark: env::var("SIM_HIGH_WATER_MARK")
                .unwrap_or_else(|_| "2500".to_string())
                .parse()
                .unwrap_or(2500),
            post_sim_high_water_mark: env::var("POST_SIM_HIGH_WATER_MARK")
                .unwrap_or_else(|_| "2500".to_string())
                .parse()
                .unwrap_or(2500),
            arb_high_water_mark: env::var("ARB_HIGH_WATER_MARK")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            build_high_water_mark: env::var("BUILD_HIGH_WATER_MARK")
                .unwrap_or_else(|_| "2500".to_string())
                .parse()
                .unwrap_or(2500),
            send_high_water_mark: env::var("SEND_HIGH_WATER_MARK")
                .unwrap_or_else(|_| "2500".to_string())
                .parse()
                .unwrap_or(2500),
            worker_quote_slippage_bps: env::var("WORKER_QUOTE_SLIPPAGE_BPS")
                .unwrap_or_else(|_| "138".to_string())
                .parse()
                .unwrap_or(138),
            worker_quote_max_accounts: env::var("WORKER_QUOTE_MAX_ACCOUNTS")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .unwrap_or(25),
            swap_slippage_bps: env::var("SWAP_SLIPPAGE_BPS")
                .unwrap_or_else(|_| "238".to_string())
                .parse()
                .unwrap_or(238),
            swap_max_accounts: env::var("SWAP_MAX_ACCOUNTS")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .unwrap_or(64),
            min_profit_lamports: env::var("MIN_PROFIT_LAMPORTS")
                .unwrap_or_else(|_| "10000000".to_string())
                .parse()
                .unwrap_or(10_000_000),
            max_tip_lamports: env::var("MAX_TIP_LAMPORTS")
                .unwrap_or_else(|_| "1138000".to_string())
                .parse()
                .unwrap_or(1_138_000),
            capital_strategy: env::var("CAPITAL_STRATEGY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(CapitalStrategy::OwnFunds),
            marginfi_program_id: parse_pubkey_or(env::var("MARGINFI_PROGRAM_ID").ok(), MARGINFI_PROGRAM_ID),
            marginfi_group: parse_pubkey_or(env::var("MARGINFI_GROUP").ok(), MARGINFI_GROUP),
            marginfi_account: env::var("MARGINFI_ACCOUNT")
                .ok()
                .and_then(|v| Pubkey::from_str(v.trim()).ok()),
            marginfi_banks_path: env::var("MARGINFI_BANKS_PATH").ok(),
            trades_log_path: env::var("TRADES_LOG_PATH")
                .unwrap_or_else(|_| "trades.jsonl".to_string()),
            check_landed_delay_ms: env::var("CHECK_LANDED_DELAY_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30_000),
            account_refresh_interval_ms: env::var("ACCOUNT_REFRESH_INTERVAL_MS")
                .unwrap_or_else(|_| "400".to_string())
                .parse()
                .unwrap_or(400),
            // orca whirlpool market maker whose rebalances confuse direction inference
            skip_tx_addresses: parse_pubkey_list(
                &env::var("SKIP_TX_ADDRESSES")
                    .unwrap_or_else(|_| "882DFRCi5akKFyYxT4PP2vZkoQEGvm2Nsind2nPDuGqu".to_string()),
            ),
            dry_run: env::var("DRY_RUN")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            log_level: env::var("LOG_LEVEL").ok(),
        }
    }

    pub fn simulation_url(&self) -> &str {
        self.simulation_rpc_url.as_deref().unwrap_or(&self.rpc_url)
    }

    pub fn validate_and_log(&self) {
        log::info!("Application Configuration Loaded: {:?}", self);
        if self.capital_strategy == CapitalStrategy::OwnFunds && self.marginfi_account.is_some() {
            log::warn!("MARGINFI_ACCOUNT is set but CAPITAL_STRATEGY is own_funds; flash loans stay disabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capital_strategy_parsing() {
        assert_eq!("flash_loan".parse::<CapitalStrategy>(), Ok(CapitalStrategy::FlashLoan));
        assert_eq!("Own-Funds".parse::<CapitalStrategy>(), Ok(CapitalStrategy::OwnFunds));
        assert!("leverage".parse::<CapitalStrategy>().is_err());
    }

    #[test]
    fn test_pubkey_list_skips_garbage() {
        let keys = parse_pubkey_list(&format!("{}, not-a-key ,{}", WSOL_MINT, USDC_MINT));
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].to_string(), WSOL_MINT);
    }
}
