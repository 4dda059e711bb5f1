//! Crate-wide error type.
//!
//! Internal call chains return `Result<T, EngineError>`; `main` wraps the
//! top-level call with `anyhow::Context` to attach run-level narration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed symbolic input descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("solver error: {0}")]
    Solver(String),

    #[error("simulated program reported a host error: {0}")]
    HostError(String),

    #[error("a new assumption was added; the current run must be discarded and replayed")]
    AssumptionAdded,
}

pub type Result<T> = std::result::Result<T, EngineError>;
