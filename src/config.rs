//! Run configuration, merged from CLI flags and the environment variables
//! the original engine reads (`SYMEX_TESTCASE`, `SYMEX_TIMEBUDGET`,
//! `SYMEX_ERREXIT`, `SYMEX_MAXPKTSEQ`, `SYMEX_TIMEOUT`). `clap`'s `env`
//! attribute reads the variable itself; an explicit CLI flag always wins
//! when both are given.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "clover",
    about = "Concolic execution engine for a simulated instruction-set processor"
)]
pub struct Cli {
    /// Replay a single recorded test case instead of exploring.
    #[arg(long, env = "SYMEX_TESTCASE")]
    pub testcase: Option<PathBuf>,

    /// Wall-clock budget in seconds before the run is cut short.
    #[arg(long, env = "SYMEX_TIMEBUDGET")]
    pub timebudget: Option<u64>,

    /// Exit immediately on the first host error instead of continuing to
    /// explore.
    #[arg(long, env = "SYMEX_ERREXIT")]
    pub errexit: bool,

    /// Maximum packet-sequence length to explore; 0 means unbounded.
    #[arg(long, env = "SYMEX_MAXPKTSEQ", default_value_t = 0)]
    pub maxpktseq: u32,

    /// Per-query solver timeout in milliseconds.
    #[arg(long, env = "SYMEX_TIMEOUT")]
    pub timeout_ms: Option<u64>,

    /// Directory test cases for discovered host errors are written to.
    #[arg(long, default_value = "clover-testcases")]
    pub testcase_dir: PathBuf,
}

/// The fully resolved configuration the driver actually runs with.
pub struct Config {
    pub testcase: Option<PathBuf>,
    pub timebudget: Option<Duration>,
    pub errexit: bool,
    pub maxpktseq: u32,
    pub solver_timeout: Option<Duration>,
    pub testcase_dir: PathBuf,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            testcase: cli.testcase,
            timebudget: cli.timebudget.map(Duration::from_secs),
            errexit: cli.errexit,
            maxpktseq: cli.maxpktseq,
            solver_timeout: cli.timeout_ms.map(Duration::from_millis),
            testcase_dir: cli.testcase_dir,
        }
    }
}

impl Config {
    pub fn from_args() -> Self {
        Cli::parse().into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_unbounded_exploration() {
        let cli = Cli::parse_from(["clover"]);
        let cfg: Config = cli.into();
        assert_eq!(cfg.maxpktseq, 0);
        assert!(cfg.testcase.is_none());
        assert!(!cfg.errexit);
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from(["clover", "--maxpktseq", "5", "--errexit"]);
        let cfg: Config = cli.into();
        assert_eq!(cfg.maxpktseq, 5);
        assert!(cfg.errexit);
    }
}
