use solana_client::client_error::{ClientError, ClientErrorKind};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ArbError {
    /// Network/connectivity issues
    #[error("Network Error: {0}")]
    NetworkError(String),

    /// RPC/Solana network errors
    #[error("RPC Error: {0}")]
    RpcError(String),

    /// Bundle simulation failed or returned nothing usable
    #[error("Simulation Failed: {0}")]
    SimulationFailed(String),

    /// Swap quoting collaborator errors
    #[error("Quote Error: {0}")]
    QuoteError(String),

    /// Instruction building errors (swap legs, lending, tips)
    #[error("Instruction Error: {0}")]
    InstructionError(String),

    /// Address lookup table fetch/extend/create errors
    #[error("Lookup Table Error: {0}")]
    LookupTableError(String),

    /// Serialized transaction does not fit the packet ceiling
    #[error("Transaction too large: {size} bytes (limit {limit})")]
    TransactionTooLarge { size: usize, limit: usize },

    /// Transaction compile/sign errors
    #[error("Transaction Error: {0}")]
    TransactionError(String),

    /// Bundle submission errors
    #[error("Bundle Error: {0}")]
    BundleError(String),

    /// Item outlived its stage's age limit and was dropped
    #[error("Stale: {0}")]
    Stale(String),

    /// Expected profit does not clear the configured floor
    #[error("Insufficient Profit: {0}")]
    InsufficientProfit(String),

    /// Parsing errors for pool, account or wire data
    #[error("Parse Error: {0}")]
    ParseError(String),

    /// Worker pool dispatch errors
    #[error("Worker Pool Error: {0}")]
    WorkerPoolError(String),

    #[error("Timeout Error: {0}")]
    TimeoutError(String),

    /// Configuration errors
    #[error("Config Error: {0}")]
    ConfigError(String),

    #[error("Unknown Error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for ArbError {
    fn from(err: serde_json::Error) -> Self {
        ArbError::ParseError(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<anyhow::Error> for ArbError {
    fn from(err: anyhow::Error) -> Self {
        ArbError::Unknown(format!("{:#}", err))
    }
}

impl From<&ClientError> for ArbError {
    fn from(err: &ClientError) -> Self {
        match err.kind() {
            ClientErrorKind::Io(e) => ArbError::NetworkError(e.to_string()),
            ClientErrorKind::Reqwest(e) if e.is_timeout() => ArbError::TimeoutError(e.to_string()),
            ClientErrorKind::Reqwest(e) => ArbError::NetworkError(e.to_string()),
            ClientErrorKind::SerdeJson(e) => ArbError::ParseError(format!("RPC response: {}", e)),
            ClientErrorKind::SigningError(e) => ArbError::TransactionError(format!("signing error: {}", e)),
            ClientErrorKind::TransactionError(e) => ArbError::TransactionError(e.to_string()),
            _ => ArbError::RpcError(format!("Solana client error: {}", err)),
        }
    }
}

impl From<ClientError> for ArbError {
    fn from(err: ClientError) -> Self {
        ArbError::from(&err)
    }
}

impl From<reqwest::Error> for ArbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ArbError::TimeoutError(err.to_string())
        } else {
            ArbError::NetworkError(err.to_string())
        }
    }
}

impl From<bincode::Error> for ArbError {
    fn from(err: bincode::Error) -> Self {
        ArbError::ParseError(format!("bincode error: {}", err))
    }
}

impl From<solana_sdk::message::CompileError> for ArbError {
    fn from(err: solana_sdk::message::CompileError) -> Self {
        ArbError::TransactionError(format!("message compile error: {}", err))
    }
}

impl From<solana_sdk::signer::SignerError> for ArbError {
    fn from(err: solana_sdk::signer::SignerError) -> Self {
        ArbError::TransactionError(format!("signing error: {}", err))
    }
}

impl ArbError {
    /// Whether retrying the same call could succeed. Opportunities themselves
    /// are single-shot; this only drives RPC and setup retries.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ArbError::NetworkError(_) => true,
            ArbError::RpcError(_) => true,
            ArbError::SimulationFailed(_) => true,
            ArbError::QuoteError(_) => true,
            ArbError::TimeoutError(_) => true,
            ArbError::LookupTableError(_) => true,
            ArbError::BundleError(msg) => {
                msg.contains("timeout") || msg.contains("rate") || msg.contains("network")
            }
            ArbError::InstructionError(_) => false,
            ArbError::TransactionTooLarge { .. } => false,
            ArbError::TransactionError(_) => false,
            ArbError::InsufficientProfit(_) => false,
            ArbError::Stale(_) => false,
            ArbError::ParseError(_) => false,
            ArbError::WorkerPoolError(_) => false,
            ArbError::ConfigError(_) => false,
            ArbError::Unknown(_) => true,
        }
    }

    /// Categorizes error for log lines
    pub fn categorize(&self) -> ErrorCategory {
        match self {
            ArbError::NetworkError(_) | ArbError::RpcError(_) | ArbError::TimeoutError(_) => {
                ErrorCategory::Network
            }
            ArbError::SimulationFailed(_) => ErrorCategory::Simulation,
            ArbError::QuoteError(_) | ArbError::InsufficientProfit(_) | ArbError::Stale(_) => {
                ErrorCategory::Trading
            }
            ArbError::InstructionError(_)
            | ArbError::LookupTableError(_)
            | ArbError::TransactionTooLarge { .. }
            | ArbError::TransactionError(_) => ErrorCategory::Building,
            ArbError::BundleError(_) => ErrorCategory::Submission,
            ArbError::ParseError(_) => ErrorCategory::Data,
            ArbError::WorkerPoolError(_) => ErrorCategory::Infrastructure,
            ArbError::ConfigError(_) => ErrorCategory::Configuration,
            ArbError::Unknown(_) => ErrorCategory::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Simulation,
    Trading,
    Building,
    Submission,
    Data,
    Infrastructure,
    Configuration,
    Critical,
}

pub type Result<T> = std::result::Result<T, ArbError>;
