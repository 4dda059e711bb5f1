use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clover::config::Config;
use clover::context::ConcreteStore;
use clover::driver::{Driver, StopReason};
use clover::hooks::testing::{ScriptedBranch, ScriptedProgram, SetCoverage};
use clover::{logger, testcase};

static TIMED_OUT: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigalrm(_: std::os::raw::c_int) {
    TIMED_OUT.store(true, Ordering::SeqCst);
}

/// Arm a wall-clock deadline via `SIGALRM`, matching `setup_timeout` in the
/// engine this crate generalizes: the driver itself also tracks the
/// deadline and exits its loop promptly, but the signal is a backstop in
/// case a single simulated run hangs inside the program/solver.
fn setup_timeout(budget: Duration) -> anyhow::Result<()> {
    use nix::sys::signal::{self, SigHandler, Signal};

    unsafe {
        signal::signal(Signal::SIGALRM, SigHandler::Handler(on_sigalrm))
            .context("installing SIGALRM handler")?;
    }
    nix::unistd::alarm::set(budget.as_secs() as u32);
    Ok(())
}

/// Placeholder program standing in for a real instruction-set simulator,
/// which is intentionally out of scope for this crate. A real deployment
/// links a `SimulatedProgram` implementation against the actual machine in
/// its place.
fn demo_program() -> ScriptedProgram {
    ScriptedProgram::new(vec![
        ScriptedBranch {
            name: "pkt0_len".to_string(),
            width: 8,
            addr: 0x1000,
            needs_packet: 1,
        },
        ScriptedBranch {
            name: "pkt1_flag".to_string(),
            width: 8,
            addr: 0x1040,
            needs_packet: 2,
        },
    ])
}

fn main() -> anyhow::Result<()> {
    logger::init();

    let config = Config::from_args();

    let mut driver = Driver::new(demo_program(), SetCoverage::default(), config.maxpktseq, config.errexit);
    driver.set_testcase_dir(config.testcase_dir.clone());
    if let Some(timeout) = config.solver_timeout {
        driver.set_solver_timeout(timeout);
    }
    if let Some(budget) = config.timebudget {
        driver.set_timebudget(budget);
        setup_timeout(budget)?;
    }

    if let Some(path) = &config.testcase {
        let store: ConcreteStore =
            testcase::from_path(path).with_context(|| format!("reading test case {}", path.display()))?;
        let event = driver.run_test(store)?;
        tracing::info!(?event, "replay finished");
        return Ok(());
    }

    std::fs::create_dir_all(&config.testcase_dir)
        .with_context(|| format!("creating test case directory {}", config.testcase_dir.display()))?;

    let reason = driver.explore()?;
    match reason {
        StopReason::Deadline => tracing::warn!("stopped: time budget exhausted"),
        StopReason::MaxPktSeqReached => tracing::info!("stopped: reached configured maximum packet-sequence length"),
        StopReason::TreeExhausted => tracing::info!("stopped: execution tree fully explored"),
        StopReason::ErrExit => tracing::warn!("stopped: host error with --errexit set"),
    }
    driver.stats().report(driver.coverage());

    Ok(())
}
