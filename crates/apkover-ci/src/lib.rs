//! APKover CI - coverage runs of Melange packages
//!
//! Provides the execution side of a coverage run:
//! - Streams the output of a child process line by line (`process`)
//! - Classifies Melange logs and extracts the coverage value (`classifier`)
//! - Builds and tests the package through `make` (`runner`)
//! - Orchestrates the whole run and gates on a minimum (`pipeline`, `gate`)

pub mod classifier;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod process;
pub mod runner;

// Re-export key types
pub use classifier::{extract_coverage, DrainOutcome, ExtractError, LineCounts, LogClassifier};
pub use error::RunError;
pub use gate::{CoverageGate, GateVerdict};
pub use pipeline::{CoverageRun, RunOptions, RunOutcome};
pub use process::{ProcessError, ProcessStream, StreamKind};
pub use runner::{BuildTool, InvocationReport, MelangeRunner, DEFAULT_MAKE, DEFAULT_RUNNER};
