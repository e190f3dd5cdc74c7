//! Rendering of coverage reports and errors for the terminal.

use anyhow::{Context, Result};
use apkover_ci::GateVerdict;
use apkover_core::CoverageReport;
use clap::ValueEnum;

const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

/// Width of the coverage bar, in cells.
pub const BAR_WIDTH: usize = 70;

const FILLED: char = '█';
const EMPTY: char = '░';

/// Report output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// Render the report in the requested format.
pub fn render(report: &CoverageReport, verdict: &GateVerdict, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_bar("Test Coverage", report.percent(), verdict)),
        OutputFormat::Json => {
            serde_json::to_string(report).context("error marshaling report to JSON")
        }
        OutputFormat::Yaml => serde_yaml::to_string(report)
            .map(|yaml| yaml.trim_end().to_string())
            .context("error marshaling report to YAML"),
    }
}

/// A labelled progress bar, green when the gate passed, red when it did
/// not, and uncoloured when there is no minimum.
///
/// The colour follows the verdict rather than `percent`, which is rounded
/// up for display.
pub fn render_bar(label: &str, percent: u32, verdict: &GateVerdict) -> String {
    let percent = percent.min(100);
    let filled = percent as usize * BAR_WIDTH / 100;

    let color = match (verdict.minimum, verdict.passed) {
        (0, _) => "",
        (_, true) => ANSI_GREEN,
        (_, false) => ANSI_RED,
    };

    let bar: String = std::iter::repeat(FILLED)
        .take(filled)
        .chain(std::iter::repeat(EMPTY).take(BAR_WIDTH - filled))
        .collect();

    format!("\n {ANSI_BOLD}{color}{label}:{bar}{percent}%{ANSI_RESET}\n")
}

/// Format an error, with its causes, the way it is shown to users.
pub fn format_error(err: &anyhow::Error) -> String {
    format!("{ANSI_RED}❌ {err:#}{ANSI_RESET}")
}

/// Print an error to stderr.
pub fn pretty_error(err: &anyhow::Error) {
    eprintln!("{}", format_error(err));
}
