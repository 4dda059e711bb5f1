//! The packet-sequence bounded exploration driver.
//!
//! Grounded in `explore_paths`/`explore_path`/`is_stuck`/`setup_timeout` in
//! `symbolic_explore.cpp` and `prepare_packet_sequence`/`processed_packet`/
//! `early_exit`/`random_partial` in `symbolic_context.cpp`. The outer loop
//! grows the packet-sequence bound `k`; the inner loop repeatedly negates
//! branches in the execution tree until it gets stuck (no new branch
//! coverage for `STUCK_THRESHOLD` consecutive runs) or the tree is
//! exhausted at the current `k`, then advances `k` and replays any runs
//! that were cut short at the new bound before resuming.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::context::{ConcreteStore, ExecutionContext};
use crate::error::Result;
use crate::hooks::{CoverageFeedback, HostEvent, SimulatedProgram};
use crate::solver::Solver;
use crate::stats::Stats;
use crate::testcase;
use crate::trace::Trace;

/// Number of consecutive runs without new branch coverage before the
/// driver gives up on the current `k` and advances. Named as in the
/// original rather than left a bare literal; making it configurable is
/// tracked as an open follow-up there too.
const STUCK_THRESHOLD: u32 = 50;

pub struct Driver<P: SimulatedProgram, C: CoverageFeedback> {
    program: P,
    coverage: C,
    solver: Solver,
    trace: Trace,
    ctx: ExecutionContext,
    stats: Stats,
    maxpktseq: u32,
    errexit: bool,
    deadline: Option<Instant>,
    /// Runs that exited early at a given `k`, available to replay once `k`
    /// grows to that value. Keyed strictly by the `k` active when the run
    /// was cut short.
    partially_explored: HashMap<u32, Vec<ConcreteStore>>,
    /// Directory discovered host errors are written to as replayable test
    /// cases.
    testcase_dir: PathBuf,
}

pub enum StopReason {
    Deadline,
    MaxPktSeqReached,
    TreeExhausted,
    ErrExit,
}

impl<P: SimulatedProgram, C: CoverageFeedback> Driver<P, C> {
    pub fn new(program: P, coverage: C, maxpktseq: u32, errexit: bool) -> Self {
        Driver {
            program,
            coverage,
            solver: Solver::new(),
            trace: Trace::new(),
            ctx: ExecutionContext::new(),
            stats: Stats::new(),
            maxpktseq,
            errexit,
            deadline: None,
            partially_explored: HashMap::new(),
            testcase_dir: PathBuf::from("clover-testcases"),
        }
    }

    pub fn set_timebudget(&mut self, budget: Duration) {
        self.deadline = Some(Instant::now() + budget);
    }

    pub fn set_solver_timeout(&mut self, timeout: Duration) {
        self.solver.set_timeout(timeout);
    }

    pub fn set_testcase_dir(&mut self, dir: PathBuf) {
        self.testcase_dir = dir;
    }

    fn past_deadline(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Run the simulated program once end to end, recording the outcome
    /// into stats/coverage. Returns whether this run hit branch coverage
    /// the `CoverageFeedback` collaborator had not already seen.
    fn explore_path(&mut self, pktseqlen: u32) -> Result<(HostEvent, bool)> {
        self.trace.reset();
        self.program.reset();
        self.program.prepare_packet_sequence(pktseqlen);
        self.stats.max_pkt_seq_len = self.stats.max_pkt_seq_len.max(pktseqlen);

        let hits_before = self.coverage.unique_hits();
        let event = self.program.run(&mut self.ctx, &mut self.trace)?;
        for addr in self.trace.visited() {
            self.coverage.record(*addr as u64);
        }
        let grew = self.coverage.unique_hits() != hits_before;

        match &event {
            HostEvent::Exited => {
                self.stats.record_path();
            }
            HostEvent::EarlyExit => {
                let store = self.ctx.get_prev_store();
                if !store.is_empty() {
                    self.partially_explored.entry(pktseqlen).or_default().push(store);
                }
            }
            HostEvent::Error(msg) => {
                self.stats.record_error();
                warn!(%msg, "simulated program reported a host error");
                self.save_error_testcase()?;
                if self.errexit {
                    return Ok((event, grew));
                }
            }
            HostEvent::AssumeRaised => {}
        }

        Ok((event, grew))
    }

    /// Persist the store that produced the last host error as a replayable
    /// test case under `testcase_dir`.
    fn save_error_testcase(&self) -> Result<()> {
        let store = self.ctx.get_prev_store();
        std::fs::create_dir_all(&self.testcase_dir)?;
        let path = self
            .testcase_dir
            .join(format!("error-{}.txt", self.stats.errors_found));
        testcase::to_path(&store, &path)
    }

    /// `is_stuck`/`is_stuck_reset` from the original: counts consecutive
    /// runs since the last one that grew the tree.
    fn run_until_stuck_or_exhausted(&mut self, pktseqlen: u32) -> Result<StopReason> {
        let mut stuck_count = 0u32;
        loop {
            if self.past_deadline() {
                return Ok(StopReason::Deadline);
            }

            let start = Instant::now();
            let (event, grew) = self.explore_path(pktseqlen)?;
            self.stats.record_solver_time(start.elapsed());

            if matches!(event, HostEvent::Error(_)) && self.errexit {
                return Ok(StopReason::ErrExit);
            }
            if matches!(event, HostEvent::AssumeRaised) {
                self.reseed_from_assume()?;
                stuck_count = 0;
                continue;
            }

            stuck_count = if grew { 0 } else { stuck_count + 1 };
            if stuck_count >= STUCK_THRESHOLD {
                debug!(pktseqlen, "stuck: no new branch coverage, advancing k");
                return Ok(StopReason::TreeExhausted);
            }

            let mut rng = rand::thread_rng();
            let found = self
                .ctx
                .setup_new_values_from_trace(pktseqlen, &mut self.trace, &self.solver, &mut rng)?;
            if !found {
                return Ok(StopReason::TreeExhausted);
            }
        }
    }

    fn reseed_from_assume(&mut self) -> Result<()> {
        if let Some(assign) = self.trace.from_assume(&self.solver)? {
            self.ctx.setup_new_values(self.trace.get_store(&assign));
        }
        Ok(())
    }

    /// Replay every run that was cut short at `pktseqlen` now that the
    /// bound has grown to cover it.
    fn replay_partial(&mut self, pktseqlen: u32) -> Result<()> {
        let mut rng = rand::thread_rng();
        loop {
            let store = match self.partially_explored.get_mut(&pktseqlen) {
                Some(stores) if !stores.is_empty() => {
                    let idx = rng.gen_range(0..stores.len());
                    stores.swap_remove(idx)
                }
                _ => break,
            };

            if self.past_deadline() {
                break;
            }

            self.ctx.setup_new_values(store);
            let (_event, grew) = self.explore_path(pktseqlen)?;
            if !grew {
                // Stuck on this replay too; per the original, drop the
                // remaining partial-replay backlog for this k rather than
                // burn the whole budget on an unproductive seed set.
                self.partially_explored.remove(&pktseqlen);
                break;
            }
        }
        Ok(())
    }

    /// Outer/inner exploration loop: grow `k` from 1 upward, exhausting the
    /// tree (or getting stuck) at each bound before advancing.
    pub fn explore(&mut self) -> Result<StopReason> {
        let mut pktseqlen = 1u32;
        loop {
            match self.run_until_stuck_or_exhausted(pktseqlen)? {
                StopReason::Deadline => return Ok(StopReason::Deadline),
                StopReason::ErrExit => return Ok(StopReason::ErrExit),
                StopReason::TreeExhausted | StopReason::MaxPktSeqReached => {}
            }

            pktseqlen += 1;
            if self.maxpktseq != 0 && pktseqlen > self.maxpktseq {
                info!(pktseqlen, "reached configured maximum packet-sequence length");
                return Ok(StopReason::MaxPktSeqReached);
            }

            self.replay_partial(pktseqlen)?;
        }
    }

    /// Replay a single recorded test case exactly once, for `--testcase`
    /// mode.
    pub fn run_test(&mut self, store: ConcreteStore) -> Result<HostEvent> {
        self.ctx.setup_new_values(store);
        self.trace.reset();
        self.program.reset();
        self.program.prepare_packet_sequence(u32::MAX);
        self.program.run(&mut self.ctx, &mut self.trace)
    }

    pub fn coverage(&self) -> &C {
        &self.coverage
    }

    pub fn coverage_mut(&mut self) -> &mut C {
        &mut self.coverage
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hooks::testing::{ScriptedBranch, ScriptedProgram, SetCoverage};

    fn program() -> ScriptedProgram {
        ScriptedProgram::new(vec![ScriptedBranch {
            name: "p0".to_string(),
            width: 8,
            addr: 0x1000,
            needs_packet: 1,
        }])
    }

    #[test]
    fn explore_terminates_with_no_max_bound_when_tree_exhausts() {
        let mut driver = Driver::new(program(), SetCoverage::default(), 2, false);
        let reason = driver.explore().unwrap();
        assert!(matches!(
            reason,
            StopReason::MaxPktSeqReached | StopReason::TreeExhausted
        ));
        assert!(driver.stats().paths_found >= 1);
    }

    #[test]
    fn run_test_replays_a_fixed_store() {
        let mut driver = Driver::new(program(), SetCoverage::default(), 1, false);
        let mut store = ConcreteStore::new();
        store.insert("p0".to_string(), vec![1]);
        let event = driver.run_test(store).unwrap();
        assert_eq!(event, HostEvent::Exited);
    }
}
