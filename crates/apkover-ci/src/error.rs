//! Error taxonomy of a coverage run

use crate::classifier::ExtractError;
use crate::process::ProcessError;
use apkover_core::{ConfigError, StrategyError};
use thiserror::Error;

/// Errors that abort a coverage run.
///
/// A coverage value below the requested minimum is not an error; see
/// [`crate::gate::GateVerdict`].
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// `make` failed to start or exited unsuccessfully.
    #[error("error running make {target}")]
    Invocation {
        target: String,
        #[source]
        source: ProcessError,
    },

    /// The last coverage report line of an invocation was malformed.
    #[error("error parsing Melange output of make {target}")]
    OutputParsing {
        target: String,
        #[source]
        source: ExtractError,
    },

    /// The classifier task panicked or was cancelled.
    #[error("output classifier of make {target} stopped unexpectedly")]
    Classifier {
        target: String,
        #[source]
        source: tokio::task::JoinError,
    },

    /// Build and test completed but no coverage report line was printed.
    #[error("coverage not found in the test output of {package}")]
    CoverageNotFound { package: String },
}

/// Result type for coverage runs.
pub type Result<T> = std::result::Result<T, RunError>;
