//! APKover - integration test coverage for Melange packages
//!
//! The `apkover` command re-builds a Melange package instrumented for
//! coverage, runs its tests and reports the measured coverage, optionally
//! failing when it is under a minimum.

mod output;

use anyhow::{bail, Context, Result};
use apkover_ci::{CoverageRun, RunOptions, DEFAULT_MAKE, DEFAULT_RUNNER};
use apkover_core::{init_tracing, StrategyRegistry, DEFAULT_STRATEGY};
use clap::Parser;
use output::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, Level};

#[derive(Parser, Debug)]
#[command(name = "apkover")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Measure the integration test coverage of a Melange package", long_about = None)]
struct Cli {
    /// Path to the package config file
    #[arg(short, long, env = "APKOVER_CONFIG")]
    config: PathBuf,

    /// Main language of the package
    #[arg(long, env = "APKOVER_LANGUAGE", default_value = DEFAULT_STRATEGY)]
    language: String,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json_logs: bool,

    /// Minimum accepted coverage, in percent (e.g. 80). Fail if under it
    #[arg(long, env = "APKOVER_FAIL_UNDER", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    fail_under: u8,

    /// Output format of the report
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Melange runner
    #[arg(long, env = "APKOVER_RUNNER", default_value = DEFAULT_RUNNER)]
    runner: String,

    /// `make` executable providing the package and test targets
    #[arg(long, env = "APKOVER_MAKE", default_value = DEFAULT_MAKE)]
    make: String,

    /// Only run the tests of an already instrumented build
    #[arg(long)]
    skip_build: bool,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            config_path: self.config.clone(),
            language: self.language.clone(),
            min_coverage: self.fail_under,
            runner: self.runner.clone(),
            make_program: self.make.clone(),
            skip_build: self.skip_build,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs, cli.log_level);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::pretty_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let registry = StrategyRegistry::with_builtin();
    let options = cli.run_options();
    debug!(?options, strategies = ?registry.names(), "Starting coverage run");

    let outcome = CoverageRun::execute(&registry, &options)
        .await
        .with_context(|| format!("coverage run failed for {}", cli.config.display()))?;

    println!(
        "{}",
        output::render(&outcome.report, &outcome.verdict, cli.output)?
    );

    if !outcome.verdict.passed {
        bail!(outcome.verdict.message);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["apkover", "-c", "os/hello.yaml"]).unwrap();
        let options = cli.run_options();

        assert_eq!(options, RunOptions::new("os/hello.yaml"));
        assert_eq!(cli.log_level, Level::INFO);
        assert_eq!(cli.output, OutputFormat::Text);
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_cli_all_flags() {
        let cli = Cli::try_parse_from([
            "apkover",
            "--config",
            "hello.yaml",
            "--language",
            "rust",
            "--log-level",
            "debug",
            "--json-logs",
            "--fail-under",
            "80",
            "-o",
            "json",
            "--runner",
            "docker",
            "--make",
            "gmake",
            "--skip-build",
        ])
        .unwrap();
        let options = cli.run_options();

        assert_eq!(options.language, "rust");
        assert_eq!(options.min_coverage, 80);
        assert_eq!(options.runner, "docker");
        assert_eq!(options.make_program, "gmake");
        assert!(options.skip_build);
        assert_eq!(cli.log_level, Level::DEBUG);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.json_logs);
    }

    #[test]
    fn test_cli_rejects_out_of_range_minimum() {
        assert!(Cli::try_parse_from(["apkover", "-c", "a.yaml", "--fail-under", "101"]).is_err());
        assert!(Cli::try_parse_from(["apkover", "-c", "a.yaml", "--fail-under", "-1"]).is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_output() {
        assert!(Cli::try_parse_from(["apkover", "-c", "a.yaml", "-o", "xml"]).is_err());
    }

    #[tokio::test]
    async fn test_run_reports_missing_config() {
        let dir = std::env::temp_dir().join("apkover-cli-missing");
        let cli = Cli::try_parse_from([
            "apkover".to_string(),
            "-c".to_string(),
            dir.join("nope.yaml").display().to_string(),
        ])
        .unwrap();

        let err = run(&cli).await.unwrap_err();
        let shown = format!("{err:#}");
        assert!(shown.contains("coverage run failed for"));
        assert!(shown.contains("nope.yaml"));
    }
}
