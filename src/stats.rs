//! Run statistics, accumulated by the driver and reported at the end of a
//! session or on a timeout.
//!
//! Grounded in `dump_stats`/`dump_input` in `symbolic_explore.cpp`: unique
//! paths found, time spent inside the solver, the packet-sequence depth
//! reached, and the count of distinct host errors discovered along the
//! way.

use std::time::Duration;

use tracing::info;

use crate::hooks::CoverageFeedback;

#[derive(Default)]
pub struct Stats {
    pub paths_found: u64,
    pub solver_time: Duration,
    pub max_pkt_seq_len: u32,
    pub errors_found: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_path(&mut self) {
        self.paths_found += 1;
    }

    pub fn record_solver_time(&mut self, elapsed: Duration) {
        self.solver_time += elapsed;
    }

    pub fn record_error(&mut self) {
        self.errors_found += 1;
    }

    pub fn report(&self, coverage: &impl CoverageFeedback) {
        info!(
            paths_found = self.paths_found,
            solver_time_secs = self.solver_time.as_secs_f64(),
            max_pkt_seq_len = self.max_pkt_seq_len,
            errors_found = self.errors_found,
            coverage_unique_hits = coverage.unique_hits(),
            "exploration finished"
        );
    }
}
