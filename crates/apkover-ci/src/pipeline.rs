//! Coverage run orchestration.

use crate::error::{Result, RunError};
use crate::gate::{CoverageGate, GateVerdict};
use crate::runner::{BuildTool, InvocationReport, MelangeRunner, DEFAULT_MAKE, DEFAULT_RUNNER};
use apkover_core::{Configuration, CoverageReport, StrategyRegistry, DEFAULT_STRATEGY};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Inputs of a coverage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Path to the Melange package config, rewritten in place.
    pub config_path: PathBuf,

    /// Main language of the package, selecting the coverage strategy.
    pub language: String,

    /// Minimum accepted coverage, in percent.
    pub min_coverage: u8,

    /// Melange runner.
    pub runner: String,

    /// `make` executable.
    pub make_program: String,

    /// Skip the package build and only run the tests.
    pub skip_build: bool,
}

impl RunOptions {
    /// Options with defaults for everything but the config path.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            language: DEFAULT_STRATEGY.to_string(),
            min_coverage: 0,
            runner: DEFAULT_RUNNER.to_string(),
            make_program: DEFAULT_MAKE.to_string(),
            skip_build: false,
        }
    }

    /// Directory holding the Makefile, i.e. the directory of the config.
    pub fn package_dir(&self) -> &Path {
        match self.config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    /// The Melange runner these options describe.
    pub fn melange_runner(&self) -> MelangeRunner {
        MelangeRunner::new(self.package_dir())
            .with_program(self.make_program.clone())
            .with_runner(self.runner.clone())
    }
}

/// Result of a completed coverage run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Identifier of this run, attached to its log lines.
    pub run_id: String,

    /// Coverage report for the package.
    pub report: CoverageReport,

    /// Threshold verdict. A failed verdict is still a completed run.
    pub verdict: GateVerdict,

    /// Build and test invocations, in execution order.
    pub invocations: Vec<InvocationReport>,

    /// Digest of the persisted package config.
    pub config_digest: String,
}

/// Coverage run orchestrator.
pub struct CoverageRun;

impl CoverageRun {
    /// Instrument, build and test the package with Melange via `make`.
    pub async fn execute(registry: &StrategyRegistry, options: &RunOptions) -> Result<RunOutcome> {
        let tool = options.melange_runner();
        Self::execute_with(registry, options, &tool).await
    }

    /// Run the coverage pipeline against any [`BuildTool`].
    ///
    /// Steps, each fatal on error: load config, instrument build, instrument
    /// test, persist config, build, test. The build and the test never
    /// overlap since the test consumes the built package.
    pub async fn execute_with(
        registry: &StrategyRegistry,
        options: &RunOptions,
        tool: &dyn BuildTool,
    ) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4().to_string();

        let mut config = Configuration::load(&options.config_path)?;
        let package = config.name().to_string();
        let strategy = registry.resolve(&options.language)?;

        info!(run_id = %run_id, package = %package, language = strategy.name(), "Updating the build pipeline to instrument the package");
        strategy.mutate_build(&mut config)?;

        info!(run_id = %run_id, package = %package, "Updating the test pipeline to generate coverage data");
        strategy.mutate_test(config.test_mut())?;

        info!(run_id = %run_id, package = %package, path = %options.config_path.display(), "Writing the package config to disk");
        let config_digest = config.persist(&options.config_path)?;

        let mut invocations = Vec::with_capacity(2);

        if options.skip_build {
            info!(run_id = %run_id, package = %package, "Skipping the package build");
        } else {
            info!(run_id = %run_id, package = %package, steps = config.pipeline.len(), "Re-building the package instrumented");
            invocations.push(tool.build(&package).await?);
        }

        let test_steps = config.test.as_ref().map_or(0, |test| test.pipeline.len());
        info!(run_id = %run_id, package = %package, steps = test_steps, "Running tests and writing coverage data");
        invocations.push(tool.test(&package).await?);

        let coverage = invocations
            .iter()
            .rev()
            .find_map(|invocation| invocation.coverage)
            .ok_or_else(|| RunError::CoverageNotFound {
                package: package.clone(),
            })?;

        let report = CoverageReport::for_package(&config, coverage);
        let verdict = CoverageGate::evaluate(coverage, options.min_coverage);
        info!(
            run_id = %run_id,
            package = %package,
            coverage_percent = verdict.coverage_percent,
            minimum = verdict.minimum,
            passed = verdict.passed,
            "Coverage measured"
        );

        Ok(RunOutcome {
            run_id,
            report,
            verdict,
            invocations,
            config_digest,
        })
    }
}
