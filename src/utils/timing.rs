//! Stage timestamps carried through an opportunity's lifecycle.
//!
//! Every pipeline stage stamps the moment it hands an item downstream. The
//! stamps are wall-clock milliseconds so that they line up with the mempool
//! receive time and can be written straight into trade telemetry.

use log::info;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A zero field means the stage has not been reached yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub mempool_end: u64,
    pub pre_sim_end: u64,
    pub sim_end: u64,
    pub post_sim_end: u64,
    pub calc_arb_end: u64,
    pub build_bundle_end: u64,
    pub bundle_sent: u64,
}

impl Timings {
    pub fn received_at(mempool_end: u64) -> Self {
        Self {
            mempool_end,
            ..Default::default()
        }
    }

    /// Age relative to the mempool receive time.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.mempool_end)
    }

    pub fn is_older_than(&self, max_age_ms: u64, now: u64) -> bool {
        self.age_ms(now) > max_age_ms
    }

    pub fn with_pre_sim_end(mut self, at: u64) -> Self {
        self.pre_sim_end = at;
        self
    }

    pub fn with_sim_end(mut self, at: u64) -> Self {
        self.sim_end = at;
        self
    }

    pub fn with_post_sim_end(mut self, at: u64) -> Self {
        self.post_sim_end = at;
        self
    }

    pub fn with_calc_arb_end(mut self, at: u64) -> Self {
        self.calc_arb_end = at;
        self
    }

    pub fn with_build_bundle_end(mut self, at: u64) -> Self {
        self.build_bundle_end = at;
        self
    }

    /// Per-stage latency breakdown, logged whenever a bundle leaves the process.
    pub fn log_chain_timings(&self) {
        info!(
            "chain timings: pre sim: {}ms, sim: {}ms, post sim: {}ms, arb calc: {}ms, build bundle: {}ms, send bundle: {}ms ::: total {}ms",
            self.pre_sim_end.saturating_sub(self.mempool_end),
            self.sim_end.saturating_sub(self.pre_sim_end),
            self.post_sim_end.saturating_sub(self.sim_end),
            self.calc_arb_end.saturating_sub(self.post_sim_end),
            self.build_bundle_end.saturating_sub(self.calc_arb_end),
            self.bundle_sent.saturating_sub(self.build_bundle_end),
            self.bundle_sent.saturating_sub(self.mempool_end),
        );
    }
}
