//! Trait boundary toward the simulated program and its coverage
//! instrumentation.
//!
//! Both the instruction-set simulator and its coverage tracking are
//! explicitly out of scope for this crate; `SimulatedProgram` and
//! `CoverageFeedback` are the seam a real simulator implementation plugs
//! into. `hooks::testing` holds an in-memory double used by this crate's
//! own tests and by callers exercising the driver without a real machine.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::trace::Trace;

/// The outcome of a single run of the simulated program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    /// The run completed on its own.
    Exited,
    /// The run consumed all packets configured for this packet-sequence
    /// length without exiting, i.e. it was cut short by the bound rather
    /// than by the program.
    EarlyExit,
    /// The simulated program reported a host-side error (e.g. a crash or
    /// an assertion failure) that should be preserved as a test case.
    Error(String),
    /// A new assumption was registered mid-run; the caller must discard
    /// this run and restart from `Trace::from_assume`.
    AssumeRaised,
}

/// A program driven one packet sequence at a time, recording branches into
/// a `Trace` and pulling symbolic values from an `ExecutionContext` as it
/// runs.
pub trait SimulatedProgram {
    /// Reset any internal state so the next call to `run` starts fresh.
    fn reset(&mut self);

    /// Tell the program how many packets this run is allowed to consume
    /// before it must stop and report `HostEvent::EarlyExit`.
    fn prepare_packet_sequence(&mut self, packet_sequence_len: u32);

    /// Run the program to completion (or until the packet bound is hit),
    /// recording branch conditions into `trace` and consuming/producing
    /// symbolic values via `ctx`.
    fn run(&mut self, ctx: &mut ExecutionContext, trace: &mut Trace) -> Result<HostEvent>;
}

/// Branch/line coverage accumulated across runs, reported at the end of a
/// driver session.
pub trait CoverageFeedback {
    /// Record that `id` (an opaque coverage site identifier) was hit.
    fn record(&mut self, id: u64);

    /// Total number of distinct sites ever recorded.
    fn unique_hits(&self) -> usize;

    /// Fraction of instrumented sites hit so far, in `[0, 1]`, if the
    /// implementation knows the denominator.
    fn ratio(&self) -> Option<f64>;
}

pub mod testing {
    use super::*;
    use std::collections::HashSet;

    /// A coverage double that just counts distinct site ids.
    #[derive(Default)]
    pub struct SetCoverage {
        seen: HashSet<u64>,
    }

    impl CoverageFeedback for SetCoverage {
        fn record(&mut self, id: u64) {
            self.seen.insert(id);
        }
        fn unique_hits(&self) -> usize {
            self.seen.len()
        }
        fn ratio(&self) -> Option<f64> {
            None
        }
    }

    /// A scripted program: a fixed sequence of branch decisions to record,
    /// each guarded by how many packets must have been "consumed" first.
    /// Lets driver/trace tests exercise the outer loop without a real
    /// simulator.
    pub struct ScriptedProgram {
        pub branches: Vec<ScriptedBranch>,
        /// When set, report a `HostEvent::Error` instead of `Exited` once
        /// every branch has run, for exercising error test-case persistence.
        pub fail_at_end: bool,
        packet_sequence_len: u32,
        packets_consumed: u32,
    }

    pub struct ScriptedBranch {
        pub name: String,
        pub width: u32,
        pub addr: u32,
        /// Which packet (1-indexed) this branch depends on being available.
        pub needs_packet: u32,
    }

    impl ScriptedProgram {
        pub fn new(branches: Vec<ScriptedBranch>) -> Self {
            ScriptedProgram {
                branches,
                fail_at_end: false,
                packet_sequence_len: 0,
                packets_consumed: 0,
            }
        }

        pub fn failing(branches: Vec<ScriptedBranch>) -> Self {
            ScriptedProgram {
                fail_at_end: true,
                ..Self::new(branches)
            }
        }
    }

    impl SimulatedProgram for ScriptedProgram {
        fn reset(&mut self) {
            self.packets_consumed = 0;
        }

        fn prepare_packet_sequence(&mut self, packet_sequence_len: u32) {
            self.packet_sequence_len = packet_sequence_len;
            self.packets_consumed = 0;
        }

        fn run(&mut self, ctx: &mut ExecutionContext, trace: &mut Trace) -> Result<HostEvent> {
            let mut rng = rand::thread_rng();
            for branch in &self.branches {
                if branch.needs_packet > self.packet_sequence_len {
                    return Ok(HostEvent::EarlyExit);
                }
                self.packets_consumed = self.packets_consumed.max(branch.needs_packet);

                let value = ctx.get_symbolic_bytes(&branch.name, (branch.width / 8) as usize, &mut rng);
                let cond = value.concrete.kind();
                let taken = !matches!(cond, crate::expr::ExprKind::Const(0));
                trace.add(taken, &value.sym_or_concrete(), branch.addr, self.packet_sequence_len);
            }
            if self.fail_at_end {
                Ok(HostEvent::Error("scripted failure".to_string()))
            } else {
                Ok(HostEvent::Exited)
            }
        }
    }
}
