// src/arbitrage/pipeline.rs
//! Wires the stages together, one task per stage:
//!
//! mempool -> pre-sim filter -> simulation -> post-sim filter -> route search
//! -> bundle builder -> bundle sender

use log::info;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::arbitrage::calculator::RouteSearchEngine;
use crate::arbitrage::post_simulation::PostSimulationFilter;
use crate::arbitrage::pre_simulation::{MempoolUpdate, PreSimulationFilter};
use crate::arbitrage::simulation::SimulationStage;
use crate::bundle::{BuiltBundle, BundleBuilder, BundleSender};
use crate::config::Config;

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub pre_sim_high_water_mark: usize,
    pub sim_high_water_mark: usize,
    pub post_sim_high_water_mark: usize,
    pub arb_high_water_mark: usize,
    pub build_high_water_mark: usize,
    pub send_high_water_mark: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pre_sim_high_water_mark: config.pre_sim_high_water_mark,
            sim_high_water_mark: config.sim_high_water_mark,
            post_sim_high_water_mark: config.post_sim_high_water_mark,
            arb_high_water_mark: config.arb_high_water_mark,
            build_high_water_mark: config.build_high_water_mark,
            send_high_water_mark: config.send_high_water_mark,
        }
    }
}

pub struct BackrunPipeline {
    pub pre_simulation: Arc<PreSimulationFilter>,
    pub simulation: Arc<SimulationStage>,
    pub post_simulation: Arc<PostSimulationFilter>,
    pub search: Arc<RouteSearchEngine>,
    pub builder: Arc<BundleBuilder>,
    pub settings: PipelineSettings,
}

impl BackrunPipeline {
    /// Starts every stage up to the builder and returns the built bundles.
    pub fn bundles(&self, mempool: mpsc::UnboundedReceiver<MempoolUpdate>) -> mpsc::UnboundedReceiver<BuiltBundle> {
        let filtered = Arc::clone(&self.pre_simulation).spawn(mempool, self.settings.pre_sim_high_water_mark);
        let simulated = Arc::clone(&self.simulation).spawn(filtered, self.settings.sim_high_water_mark);
        let trades = Arc::clone(&self.post_simulation).spawn(simulated, self.settings.post_sim_high_water_mark);
        let opportunities = Arc::clone(&self.search).spawn(trades, self.settings.arb_high_water_mark);
        Arc::clone(&self.builder).spawn(opportunities, self.settings.build_high_water_mark)
    }

    /// Runs the whole pipeline; the handle completes once the mempool source closes
    /// and every stage has drained.
    pub fn start(self, mempool: mpsc::UnboundedReceiver<MempoolUpdate>, sender: Arc<BundleSender>) -> JoinHandle<()> {
        info!(
            "Starting pipeline (high water marks: pre-sim {}, sim {}, post-sim {}, arb {}, build {}, send {})",
            self.settings.pre_sim_high_water_mark,
            self.settings.sim_high_water_mark,
            self.settings.post_sim_high_water_mark,
            self.settings.arb_high_water_mark,
            self.settings.build_high_water_mark,
            self.settings.send_high_water_mark
        );
        let send_high_water_mark = self.settings.send_high_water_mark;
        let bundles = self.bundles(mempool);
        sender.spawn(bundles, send_high_water_mark)
    }
}
