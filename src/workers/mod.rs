// src/workers/mod.rs
//! Quote workers: replicated pool state behind a dispatching pool.

pub mod messages;
pub mod pool;
pub mod replica;
pub mod state_sync;

pub use messages::{WorkerResult, WorkerTask, WorkerTaskKind};
pub use pool::QuoteWorkerPool;
pub use replica::{FallbackQuoter, PoolReplica, WorkerState};
pub use state_sync::{register_pools, seed_accounts, spawn_account_refresh};
