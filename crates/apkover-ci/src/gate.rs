//! Minimum coverage gate.

use serde::Serialize;

/// Gate evaluation verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateVerdict {
    /// Whether the measured coverage meets the minimum.
    pub passed: bool,

    /// Measured coverage, in percent.
    pub coverage_percent: f64,

    /// Required coverage, in percent.
    pub minimum: u8,

    /// Summary message.
    pub message: String,
}

/// Coverage threshold rule.
pub struct CoverageGate;

impl CoverageGate {
    /// Compare a coverage fraction against a minimum integer percentage.
    ///
    /// The gate fails only when coverage is strictly below the minimum; a
    /// minimum of zero always passes.
    pub fn evaluate(coverage: f64, minimum: u8) -> GateVerdict {
        // Snap to hundredths of a percent, the precision of the report line.
        let coverage_percent = (coverage * 10_000.0).round() / 100.0;
        let passed = coverage_percent >= f64::from(minimum);

        let message = if passed {
            format!(
                "test coverage {:.2}% meets the minimum of {}%",
                coverage_percent, minimum
            )
        } else {
            format!(
                "test coverage is below the minimum required: {:.2}% < {}%",
                coverage_percent, minimum
            )
        };

        GateVerdict {
            passed,
            coverage_percent,
            minimum,
            message,
        }
    }
}
