// src/workers/messages.rs
use crate::arbitrage::types::{Quote, Route};
use crate::dex::market::Market;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum WorkerTaskKind {
    /// Register a pool in the replica. Broadcast.
    AddPool { market: Arc<Market> },
    /// New raw data for a tracked account; `None` if the account is gone. Broadcast.
    AccountUpdate {
        address: Pubkey,
        data: Option<Arc<Vec<u8>>>,
    },
    /// Chained quote along a whole route starting with `amount`.
    CalculateRoute { route: Route, amount: u64 },
}

impl WorkerTaskKind {
    /// Mutations must reach every replica; queries go to one worker.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            WorkerTaskKind::AddPool { .. } | WorkerTaskKind::AccountUpdate { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkerTaskKind::AddPool { .. } => "addPool",
            WorkerTaskKind::AccountUpdate { .. } => "accountUpdate",
            WorkerTaskKind::CalculateRoute { .. } => "calculateRoute",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub correlation_id: u64,
    pub kind: WorkerTaskKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResult {
    AddPool {
        pool_id: Pubkey,
        accounts_for_update: Vec<Pubkey>,
    },
    AccountUpdate {
        address: Pubkey,
        /// A dependent pool could not decode the new data.
        error: bool,
    },
    Route(Quote),
}
