pub mod rpc;

pub use rpc::{AccountSource, SolanaRpcClient};
