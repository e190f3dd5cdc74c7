//! Go coverage via `go build -cover` and `go tool covdata`.

use super::{ensure_leading_step, ensure_packages, ensure_trailing_step, CoverageStrategy, COVER_DIR};
use crate::config::{Configuration, TestPhase};
use crate::error::StrategyError;
use crate::report::REPORT_PREFIX;
use tracing::debug;

const BUILD_ACTION: &str = "go/build";
const BUILD_COMMAND: &str = "go build";
const COVER_FLAG: &str = "-cover";
const EXTRA_ARGS: &str = "extra-args";
const ENV_COVER_DIR: &str = "GOCOVERDIR";
const TEST_DEPS: &[&str] = &["go"];

/// Instruments Go binaries with the `-cover` build flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoStrategy;

impl GoStrategy {
    /// Shell step that prints the total statement coverage.
    pub fn report_command() -> String {
        format!(
            "echo \"{REPORT_PREFIX} $(go tool covdata func -i {COVER_DIR} | tail -1 | awk '{{print $NF}}')\""
        )
    }

    fn mkdir_command() -> String {
        format!("mkdir -p {COVER_DIR}")
    }
}

impl CoverageStrategy for GoStrategy {
    fn name(&self) -> &'static str {
        "go"
    }

    fn mutate_build(&self, config: &mut Configuration) -> Result<(), StrategyError> {
        let mut found = false;

        for step in config.pipeline.iter_mut() {
            // Built-in go/build action.
            if step.is_action(BUILD_ACTION) {
                found = true;
                let args = step.with.entry(EXTRA_ARGS.to_string()).or_default();
                if args.trim().is_empty() {
                    *args = COVER_FLAG.to_string();
                } else if !args.split_whitespace().any(|arg| arg == COVER_FLAG) {
                    args.push(' ');
                    args.push_str(COVER_FLAG);
                }
            }

            // go build from a shell step.
            if let Some(runs) = step.runs.as_mut() {
                if let Some(instrumented) = instrument_shell(runs) {
                    found = true;
                    *runs = instrumented;
                }
            }
        }

        if !found {
            return Err(StrategyError::BuildPipelineNotRecognized {
                ecosystem: self.name().to_string(),
            });
        }

        debug!(steps = config.pipeline.len(), "Instrumented go build steps");
        Ok(())
    }

    fn mutate_test(&self, test: &mut TestPhase) -> Result<(), StrategyError> {
        test.environment
            .environment
            .insert(ENV_COVER_DIR.to_string(), COVER_DIR.to_string());

        ensure_leading_step(&mut test.pipeline, &Self::mkdir_command());
        ensure_packages(&mut test.environment, TEST_DEPS);
        ensure_trailing_step(&mut test.pipeline, &Self::report_command());

        Ok(())
    }
}

/// Add `-cover` to every `go build` invocation of a shell script that
/// lacks it. `None` when the script never runs `go build`.
fn instrument_shell(script: &str) -> Option<String> {
    let calls = build_calls(script);
    if calls.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(script.len() + calls.len() * (COVER_FLAG.len() + 1));
    let mut copied = 0;
    for end in calls {
        out.push_str(&script[copied..end]);
        if !has_cover_flag(&script[end..]) {
            out.push(' ');
            out.push_str(COVER_FLAG);
        }
        copied = end;
    }
    out.push_str(&script[copied..]);
    Some(out)
}

/// Byte offsets just past each `go build` used as a command.
fn build_calls(script: &str) -> Vec<usize> {
    script
        .match_indices(BUILD_COMMAND)
        .filter(|(start, _)| {
            // `cargo build` or `gogo build` are not go invocations.
            let before = script[..*start].chars().next_back();
            let after = script[start + BUILD_COMMAND.len()..].chars().next();
            !before.is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
                && after.map_or(true, |c| c.is_whitespace() || is_separator(c))
        })
        .map(|(start, _)| start + BUILD_COMMAND.len())
        .collect()
}

fn is_separator(c: char) -> bool {
    matches!(c, ';' | '&' | '|' | ')' | '`')
}

/// Whether the arguments of one `go build` call, up to the end of the
/// command, include the cover flag.
fn has_cover_flag(args: &str) -> bool {
    let mut end = args.len();
    let mut prev = None;
    for (i, c) in args.char_indices() {
        if is_separator(c) || (c == '\n' && prev != Some('\\')) {
            end = i;
            break;
        }
        prev = Some(c);
    }

    args[..end]
        .split_whitespace()
        .any(|arg| arg == COVER_FLAG || arg == "-cover=true")
}
