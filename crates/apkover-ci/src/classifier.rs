//! Melange log classification and coverage extraction.
//!
//! Melange writes its own progress, and the output of every pipeline step,
//! to stderr. The instrumented test pipeline prints a single line such as
//! `INFO apkoverage: 87.50%`, which is where the coverage value comes from.
//! Stdout carries nothing of interest and is only logged.

use apkover_core::REPORT_PREFIX;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Level marker Melange puts in front of informational lines.
pub const INFO_MARKER: &str = "INFO";

/// Level marker Melange puts in front of error lines.
pub const ERROR_MARKER: &str = "ERRO";

/// Failure to read a coverage value from a report line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The prefix is there but no `<digits>.<digits>%` follows it.
    #[error("cannot extract coverage from log: {line}")]
    NotFound { line: String },

    /// The matched number could not be parsed.
    #[error("invalid coverage value {value}")]
    InvalidNumber { value: String },

    /// The percentage is above 100.
    #[error("coverage value {value}% is out of range")]
    OutOfRange { value: String },
}

fn coverage_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"{} (\d+\.\d+)%", regex::escape(REPORT_PREFIX)))
            .expect("coverage pattern is valid")
    })
}

/// Extract the coverage percentage from a report line.
///
/// Returns the percentage as printed, e.g. `87.5` for `apkoverage: 87.50%`.
/// Values above 100 are rejected.
pub fn extract_coverage(line: &str) -> Result<f64, ExtractError> {
    let value = coverage_pattern()
        .captures(line)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| ExtractError::NotFound {
            line: line.to_string(),
        })?
        .as_str();

    let percent = value
        .parse::<f64>()
        .map_err(|_| ExtractError::InvalidNumber {
            value: value.to_string(),
        })?;
    if !percent.is_finite() || percent > 100.0 {
        return Err(ExtractError::OutOfRange {
            value: value.to_string(),
        });
    }
    Ok(percent)
}

/// What a stderr line means to the run.
#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    /// Progress or step output.
    Info,
    /// Something went wrong inside Melange or a step.
    Error,
    /// The coverage report line, with the extracted percentage.
    Coverage(Result<f64, ExtractError>),
}

/// Classify one stderr line.
pub fn classify_stderr(line: &str) -> LineClass {
    if is_coverage_line(line) {
        return LineClass::Coverage(extract_coverage(line));
    }

    if line.contains(ERROR_MARKER) || line.to_lowercase().contains("error") {
        LineClass::Error
    } else {
        LineClass::Info
    }
}

fn is_coverage_line(line: &str) -> bool {
    line.contains(&format!("{INFO_MARKER} {REPORT_PREFIX}"))
}

/// Number of lines seen per class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineCounts {
    pub stdout: usize,
    pub stderr: usize,
    pub errors: usize,
    pub coverage: usize,
}

/// Result of draining both output streams of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainOutcome {
    pub counts: LineCounts,

    /// Last successfully extracted coverage fraction (0.0 to 1.0).
    pub coverage: Option<f64>,

    /// Set when the last coverage line seen was malformed.
    pub error: Option<ExtractError>,
}

/// Serial consumer of the stdout and stderr lines of one invocation.
#[derive(Debug, Clone, Default)]
pub struct LogClassifier {
    counts: LineCounts,
    coverage: Option<f64>,
    pending: Option<ExtractError>,
}

impl LogClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stdout lines are logged and otherwise ignored.
    pub fn observe_stdout(&mut self, line: &str) {
        self.counts.stdout += 1;
        debug!(stream = "stdout", "{line}");
    }

    pub fn observe_stderr(&mut self, line: &str) {
        self.counts.stderr += 1;

        match classify_stderr(line) {
            LineClass::Coverage(Ok(percent)) => {
                self.counts.coverage += 1;
                debug!(percent, "Extracted coverage from logs");
                self.coverage = Some(percent / 100.0);
                self.pending = None;
            }
            LineClass::Coverage(Err(err)) => {
                self.counts.coverage += 1;
                warn!(error = %err, "Cannot extract coverage percentage from log");
                self.pending = Some(err);
            }
            LineClass::Error => {
                self.counts.errors += 1;
                error!(stream = "stderr", "{line}");
            }
            LineClass::Info => {
                debug!(stream = "stderr", "{line}");
            }
        }
    }

    /// Coverage fraction extracted so far.
    pub fn coverage(&self) -> Option<f64> {
        self.coverage
    }

    pub fn counts(&self) -> LineCounts {
        self.counts
    }

    /// Consume lines from both receivers, in whatever order they arrive,
    /// until both have closed.
    pub async fn drain(
        mut self,
        mut stdout: mpsc::Receiver<String>,
        mut stderr: mpsc::Receiver<String>,
    ) -> DrainOutcome {
        let mut stdout_open = true;
        let mut stderr_open = true;

        loop {
            tokio::select! {
                line = stdout.recv(), if stdout_open => match line {
                    Some(line) => self.observe_stdout(&line),
                    None => stdout_open = false,
                },
                line = stderr.recv(), if stderr_open => match line {
                    Some(line) => self.observe_stderr(&line),
                    None => stderr_open = false,
                },
                else => break,
            }
        }

        self.finish()
    }

    /// Close the classifier and report what it saw.
    pub fn finish(self) -> DrainOutcome {
        DrainOutcome {
            counts: self.counts,
            coverage: self.coverage,
            error: self.pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_coverage() {
        assert_eq!(extract_coverage("INFO apkoverage: 87.50%").unwrap(), 87.5);
        assert_eq!(
            extract_coverage("2024/01/01 12:00:00 INFO apkoverage: 0.0%").unwrap(),
            0.0
        );
        assert_eq!(extract_coverage("apkoverage: 100.00%").unwrap(), 100.0);
    }

    #[test]
    fn test_extract_coverage_malformed() {
        for line in [
            "INFO apkoverage: 87.50",
            "INFO apkoverage: 87%",
            "INFO apkoverage: abc%",
            "INFO apkoverage: ",
            "INFO apkoverage:87.50%",
        ] {
            assert!(
                matches!(extract_coverage(line), Err(ExtractError::NotFound { .. })),
                "{line}"
            );
        }
    }

    #[test]
    fn test_extract_coverage_out_of_range() {
        assert_eq!(
            extract_coverage("INFO apkoverage: 250.00%"),
            Err(ExtractError::OutOfRange {
                value: "250.00".to_string()
            })
        );
        assert!(matches!(
            extract_coverage(&format!("INFO apkoverage: {}.0%", "9".repeat(400))),
            Err(ExtractError::OutOfRange { .. })
        ));
        assert_eq!(extract_coverage("INFO apkoverage: 100.00%").unwrap(), 100.0);
    }

    #[test]
    fn test_out_of_range_keeps_previous_coverage() {
        let mut classifier = LogClassifier::new();
        classifier.observe_stderr("INFO apkoverage: 42.00%");
        classifier.observe_stderr("INFO apkoverage: 250.00%");

        let outcome = classifier.finish();
        assert_eq!(outcome.coverage, Some(0.42));
        assert!(matches!(outcome.error, Some(ExtractError::OutOfRange { .. })));
    }

    #[test]
    fn test_classify_stderr() {
        assert_eq!(
            classify_stderr("INFO apkoverage: 87.50%"),
            LineClass::Coverage(Ok(87.5))
        );
        assert!(matches!(
            classify_stderr("INFO apkoverage: n/a"),
            LineClass::Coverage(Err(_))
        ));
        assert_eq!(classify_stderr("ERRO failed to build"), LineClass::Error);
        assert_eq!(classify_stderr("INFO Error: step failed"), LineClass::Error);
        assert_eq!(classify_stderr("INFO running step"), LineClass::Info);
        // The prefix alone, without the info marker, is not a report line.
        assert_eq!(classify_stderr("apkoverage: 50.00%"), LineClass::Info);
    }

    #[test]
    fn test_coverage_fraction_and_recovery() {
        let mut classifier = LogClassifier::new();
        classifier.observe_stderr("INFO apkoverage: 87.50%");
        assert_eq!(classifier.coverage(), Some(0.875));

        classifier.observe_stderr("INFO apkoverage: broken");
        let outcome = classifier.clone().finish();
        assert_eq!(outcome.coverage, Some(0.875));
        assert!(outcome.error.is_some());

        classifier.observe_stderr("INFO apkoverage: 90.00%");
        let outcome = classifier.finish();
        assert_eq!(outcome.coverage, Some(0.9));
        assert!(outcome.error.is_none());
        assert_eq!(outcome.counts.coverage, 3);
    }

    #[test]
    fn test_no_coverage_line() {
        let mut classifier = LogClassifier::new();
        classifier.observe_stdout("building");
        classifier.observe_stderr("INFO step done");

        let outcome = classifier.finish();
        assert_eq!(outcome.coverage, None);
        assert_eq!(outcome.error, None);
        assert_eq!(
            outcome.counts,
            LineCounts {
                stdout: 1,
                stderr: 1,
                errors: 0,
                coverage: 0
            }
        );
    }

    #[tokio::test]
    async fn test_drain_waits_for_both_streams() {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);

        let drain = tokio::spawn(LogClassifier::new().drain(out_rx, err_rx));

        // Close stdout first; stderr keeps producing afterwards.
        out_tx.send("a".to_string()).await.unwrap();
        drop(out_tx);
        tokio::task::yield_now().await;
        assert!(!drain.is_finished());

        err_tx.send("ERRO boom".to_string()).await.unwrap();
        err_tx
            .send("INFO apkoverage: 42.25%".to_string())
            .await
            .unwrap();
        drop(err_tx);

        let outcome = drain.await.unwrap();
        assert_eq!(outcome.counts.stdout, 1);
        assert_eq!(outcome.counts.stderr, 2);
        assert_eq!(outcome.counts.errors, 1);
        assert_eq!(outcome.coverage, Some(42.25 / 100.0));
    }

    #[tokio::test]
    async fn test_drain_with_closed_streams() {
        let (out_tx, out_rx) = mpsc::channel::<String>(1);
        let (err_tx, err_rx) = mpsc::channel::<String>(1);
        drop(out_tx);
        drop(err_tx);

        let outcome = LogClassifier::new().drain(out_rx, err_rx).await;
        assert_eq!(outcome, DrainOutcome::default());
    }

    fn arb_stderr_line() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("INFO running step".to_string()),
            Just("ERRO failed".to_string()),
            Just("INFO apkoverage: bogus".to_string()),
            (0u32..100, 0u32..100).prop_map(|(i, f)| format!("INFO apkoverage: {i}.{f:02}%")),
        ]
    }

    proptest! {
        #[test]
        fn prop_well_formed_lines_extract_exactly(int in 0u32..100, frac in "[0-9]{1,4}") {
            let line = format!("INFO apkoverage: {int}.{frac}%");
            let expected: f64 = format!("{int}.{frac}").parse().unwrap();

            let mut classifier = LogClassifier::new();
            classifier.observe_stderr(&line);
            prop_assert_eq!(classifier.coverage(), Some(expected / 100.0));
        }

        #[test]
        fn prop_interleaving_does_not_change_outcome(
            stdout in prop::collection::vec("[a-z]{0,8}", 0..8),
            stderr in prop::collection::vec(arb_stderr_line(), 0..8),
            order in prop::collection::vec(any::<bool>(), 0..16),
        ) {
            let mut sequential = LogClassifier::new();
            stdout.iter().for_each(|line| sequential.observe_stdout(line));
            stderr.iter().for_each(|line| sequential.observe_stderr(line));
            let expected = sequential.finish();

            let mut interleaved = LogClassifier::new();
            let (mut out, mut err) = (stdout.iter(), stderr.iter());
            for pick_stdout in order {
                if pick_stdout {
                    if let Some(line) = out.next() {
                        interleaved.observe_stdout(line);
                    }
                } else if let Some(line) = err.next() {
                    interleaved.observe_stderr(line);
                }
            }
            out.for_each(|line| interleaved.observe_stdout(line));
            err.for_each(|line| interleaved.observe_stderr(line));

            prop_assert_eq!(expected, interleaved.finish());
        }
    }
}
