// src/utils/mod.rs
use crate::error::ArbError;
use log::{error, info};
use solana_sdk::signature::{read_keypair_file, Keypair};
use std::str::FromStr;

pub mod timing;

pub use timing::{now_ms, Timings};

pub fn setup_logging(level: Option<&str>) -> Result<(), fern::InitError> {
    let level = level
        .and_then(|l| log::LevelFilter::from_str(l).ok())
        .unwrap_or(log::LevelFilter::Info);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("solana_rbpf", log::LevelFilter::Warn)
        .level_for("solana_runtime::message_processor", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .level_for("hyper", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    info!("Logging initialized at {}.", level);
    Ok(())
}

pub fn load_keypair(path: &str) -> Result<Keypair, ArbError> {
    match read_keypair_file(path) {
        Ok(kp) => {
            info!("Successfully loaded keypair from: {}", path);
            Ok(kp)
        }
        Err(e) => {
            let error_msg = format!("Failed to load keypair from path '{}': {}", path, e);
            error!("{}", error_msg);
            Err(ArbError::ConfigError(error_msg))
        }
    }
}

/// Renders a raw token amount with its decimals for log lines.
pub fn to_decimal_string(amount: i128, decimals: u8) -> String {
    let scale = 10i128.pow(decimals as u32);
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.abs();
    if decimals == 0 {
        return format!("{}{}", sign, abs);
    }
    format!(
        "{}{}.{:0width$}",
        sign,
        abs / scale,
        abs % scale,
        width = decimals as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_decimal_string() {
        assert_eq!(to_decimal_string(1_500_000_000, 9), "1.500000000");
        assert_eq!(to_decimal_string(-25, 6), "-0.000025");
        assert_eq!(to_decimal_string(42, 0), "42");
    }
}
