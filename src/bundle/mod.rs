//! Bundle assembly: lookup tables, packing, lending instructions and submission.

pub mod builder;
pub mod lending;
pub mod lookup_tables;
pub mod packing;
pub mod sender;

pub use builder::{BuilderSettings, BuiltBundle, BundleBuilder};
pub use lending::{LendingProvider, MarginfiBank, MarginfiLendingProvider};
pub use lookup_tables::{LookupTableEntry, LookupTableManager, LookupTableProvider, RpcLookupTableManager};
pub use packing::{pack, PackingOutcome};
pub use sender::{BundleSender, BundleStatus, BundleSubmitter, TradeLog, TradeRecord};
