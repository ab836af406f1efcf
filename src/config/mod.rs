pub mod settings;

pub use settings::{CapitalStrategy, Config};

use crate::error::ArbError;
use std::path::Path;
use std::sync::Arc;

/// Loads the application configuration from the environment, optionally
/// reading a specific dotenv file first.
pub fn load_config(env_file: Option<&Path>) -> Result<Arc<settings::Config>, ArbError> {
    match env_file {
        Some(path) => {
            dotenv::from_path(path).map_err(|e| {
                ArbError::ConfigError(format!("failed to read env file {}: {}", path.display(), e))
            })?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let config = settings::Config::from_env();

    if config.rpc_url.is_empty() {
        return Err(ArbError::ConfigError("RPC_URL cannot be empty".to_string()));
    }
    if config.base_mints.is_empty() {
        return Err(ArbError::ConfigError("BASE_MINTS must name at least one mint".to_string()));
    }
    if config.arb_calculation_num_steps == 0 {
        return Err(ArbError::ConfigError(
            "ARB_CALCULATION_NUM_STEPS must be positive".to_string(),
        ));
    }
    if !(2..=3).contains(&config.max_hops) {
        return Err(ArbError::ConfigError(format!(
            "MAX_HOPS must be 2 or 3, got {}",
            config.max_hops
        )));
    }
    if config.num_worker_threads == 0 {
        return Err(ArbError::ConfigError("NUM_WORKER_THREADS must be positive".to_string()));
    }
    if config.capital_strategy == CapitalStrategy::FlashLoan
        && (config.marginfi_account.is_none() || config.marginfi_banks_path.is_none())
    {
        return Err(ArbError::ConfigError(
            "flash_loan strategy needs MARGINFI_ACCOUNT and MARGINFI_BANKS_PATH".to_string(),
        ));
    }

    Ok(Arc::new(config))
}
