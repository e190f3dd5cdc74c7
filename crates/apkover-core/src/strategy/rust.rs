//! Rust coverage via LLVM source-based instrumentation.

use super::{
    ensure_flag, ensure_leading_step, ensure_packages, ensure_trailing_step, CoverageStrategy,
    COVER_DIR,
};
use crate::config::{Configuration, TestPhase};
use crate::error::StrategyError;
use crate::report::REPORT_PREFIX;
use tracing::debug;

const BUILD_ACTION: &str = "cargo/build";
const BUILD_COMMANDS: &[&str] = &["cargo build", "cargo auditable build"];
const ENV_RUST_FLAGS: &str = "RUSTFLAGS";
const RUST_FLAGS: &str = "-C instrument-coverage";
const ENV_PROFILE_FILE: &str = "LLVM_PROFILE_FILE";
const TEST_DEPS: &[&str] = &["clang", "rust"];

/// Instruments Rust binaries through `RUSTFLAGS`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustStrategy;

impl RustStrategy {
    /// Shell step that merges the raw profiles and prints the total line
    /// coverage of the first binary shipped by the package.
    pub fn report_command() -> String {
        format!(
            r#"llvm-profdata merge \
  --sparse {COVER_DIR}/default_*.profraw \
  --output {COVER_DIR}/default.profdata 2>/dev/null
echo -n "{REPORT_PREFIX} "
llvm-cov report \
  --ignore-filename-regex='/.cargo/registry' \
  --instr-profile={COVER_DIR}/default.profdata \
  --object "/$(apk info -L ${{{{package.name}}}} 2>/dev/null | grep 'bin\/' | head -1)" \
  --summary-only 2>/dev/null \
  | tail -1 | awk '{{print $10}}'"#
        )
    }

    fn mkdir_command() -> String {
        format!("mkdir -p {COVER_DIR}")
    }

    fn profile_file() -> String {
        format!("{COVER_DIR}/default_%p_%m.profraw")
    }
}

impl CoverageStrategy for RustStrategy {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn mutate_build(&self, config: &mut Configuration) -> Result<(), StrategyError> {
        let found = config.pipeline.iter().any(|step| {
            step.is_action(BUILD_ACTION)
                || BUILD_COMMANDS
                    .iter()
                    .any(|command| step.script().contains(command))
        });
        if !found {
            return Err(StrategyError::BuildPipelineNotRecognized {
                ecosystem: self.name().to_string(),
            });
        }

        // The flag applies to the whole build phase, so every cargo
        // invocation is covered.
        ensure_flag(&mut config.environment, ENV_RUST_FLAGS, RUST_FLAGS);

        debug!(rustflags = %config.environment.environment[ENV_RUST_FLAGS], "Instrumented cargo build");
        Ok(())
    }

    fn mutate_test(&self, test: &mut TestPhase) -> Result<(), StrategyError> {
        test.environment
            .environment
            .insert(ENV_PROFILE_FILE.to_string(), Self::profile_file());

        ensure_leading_step(&mut test.pipeline, &Self::mkdir_command());
        ensure_packages(&mut test.environment, TEST_DEPS);
        ensure_trailing_step(&mut test.pipeline, &Self::report_command());

        Ok(())
    }
}
