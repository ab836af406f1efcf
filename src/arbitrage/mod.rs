//! Opportunity detection: the pipeline stages from mempool transaction to
//! a sized backrun route.

pub mod calculator;
pub mod pipeline;
pub mod post_simulation;
pub mod pre_simulation;
pub mod routing;
pub mod scheduler;
pub mod simulation;
pub mod types;

mod calculator_tests;

pub use calculator::{RouteQuoter, RouteSearchEngine, SearchSettings};
pub use pipeline::{BackrunPipeline, PipelineSettings};
pub use post_simulation::PostSimulationFilter;
pub use pre_simulation::{FilteredTransaction, MempoolUpdate, PreSimulationFilter};
pub use routing::{MarketGraph, TwoHopRoute};
pub use scheduler::{prioritize, PriorityScheduler};
pub use simulation::{BundleSimulator, JitoRpcSimulator, SimulationResult, SimulationStage};
pub use types::{ArbOpportunity, BackrunnableTrade, Hop, Quote, Route, TradeDirection, TradeOutputOverride};
