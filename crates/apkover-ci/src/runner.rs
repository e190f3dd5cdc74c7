//! Melange invocation through the distro `make` targets.

use crate::classifier::{LineCounts, LogClassifier};
use crate::error::{Result, RunError};
use crate::process::{ProcessError, ProcessStream};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// Melange runner passed through `MELANGE_EXTRA_OPTS`.
pub const DEFAULT_RUNNER: &str = "bubblewrap";

/// Program providing the `package/<name>` and `test/<name>` targets.
pub const DEFAULT_MAKE: &str = "make";

/// Result of one build or test invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationReport {
    /// Make target, e.g. `test/hello`.
    pub target: String,

    /// Lines seen per class.
    pub counts: LineCounts,

    /// Coverage fraction reported by the invocation, if any.
    pub coverage: Option<f64>,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Something that can build and test a Melange package.
#[async_trait]
pub trait BuildTool: Send + Sync {
    /// Build the package.
    async fn build(&self, package: &str) -> Result<InvocationReport>;

    /// Run the package tests.
    async fn test(&self, package: &str) -> Result<InvocationReport>;
}

/// Runs Melange via `make -C <dir> package/<name>` and `test/<name>`.
#[derive(Debug, Clone)]
pub struct MelangeRunner {
    program: String,
    runner: String,
    dir: PathBuf,
}

impl MelangeRunner {
    /// A runner for the Makefile in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            program: DEFAULT_MAKE.to_string(),
            runner: DEFAULT_RUNNER.to_string(),
            dir: dir.into(),
        }
    }

    /// Use a different `make` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Use a different Melange runner (`bubblewrap`, `docker`, `qemu`).
    pub fn with_runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = runner.into();
        self
    }

    /// Arguments passed to `make` for `target`.
    pub fn args(&self, target: &str) -> Vec<String> {
        vec![
            "-e".to_string(),
            format!("MELANGE_EXTRA_OPTS=--runner={}", self.runner),
            "-C".to_string(),
            self.dir.display().to_string(),
            target.to_string(),
        ]
    }

    /// Run `make <target>`, classifying its output while it runs.
    ///
    /// Returns only once the process has exited and both of its output
    /// streams have been drained. A failed process takes precedence over a
    /// malformed coverage line.
    pub async fn invoke(&self, target: &str) -> Result<InvocationReport> {
        let start = Instant::now();
        let args = self.args(target);
        debug!(program = %self.program, args = ?args, "Invoking Melange");

        let ProcessStream {
            stdout,
            stderr,
            completion,
        } = ProcessStream::spawn(&self.program, &args);
        let drain = tokio::spawn(LogClassifier::new().drain(stdout, stderr));

        let exit = completion.await.unwrap_or_else(|_| {
            Err(ProcessError::Abandoned {
                program: self.program.clone(),
            })
        });
        let drained = drain.await;

        exit.map_err(|source| RunError::Invocation {
            target: target.to_string(),
            source,
        })?;
        let outcome = drained.map_err(|source| RunError::Classifier {
            target: target.to_string(),
            source,
        })?;
        if let Some(source) = outcome.error {
            return Err(RunError::OutputParsing {
                target: target.to_string(),
                source,
            });
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            make_target = %target,
            duration_ms,
            stderr_lines = outcome.counts.stderr,
            error_lines = outcome.counts.errors,
            "Melange invocation completed"
        );

        Ok(InvocationReport {
            target: target.to_string(),
            counts: outcome.counts,
            coverage: outcome.coverage,
            duration_ms,
        })
    }
}

#[async_trait]
impl BuildTool for MelangeRunner {
    async fn build(&self, package: &str) -> Result<InvocationReport> {
        self.invoke(&format!("package/{package}")).await
    }

    async fn test(&self, package: &str) -> Result<InvocationReport> {
        self.invoke(&format!("test/{package}")).await
    }
}
