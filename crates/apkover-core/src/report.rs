//! Coverage report produced at the end of a run.

use crate::config::Configuration;
use serde::{Deserialize, Serialize};

/// Prefix of the line the instrumented test pipeline prints its result with.
pub const REPORT_PREFIX: &str = "apkoverage:";

/// Coverage measured for one package build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Package name.
    #[serde(rename = "name")]
    pub package_name: String,

    /// Package version.
    #[serde(rename = "version")]
    pub package_version: String,

    /// Package epoch.
    #[serde(rename = "epoch")]
    pub package_epoch: u64,

    /// Covered fraction, between 0.0 and 1.0.
    pub coverage: f64,
}

impl CoverageReport {
    /// Create a new report.
    pub fn new(
        package_name: impl Into<String>,
        package_version: impl Into<String>,
        package_epoch: u64,
        coverage: f64,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            package_version: package_version.into(),
            package_epoch,
            coverage,
        }
    }

    /// Report for the package described by `config`.
    pub fn for_package(config: &Configuration, coverage: f64) -> Self {
        Self::new(
            config.package.name.clone(),
            config.package.version.clone(),
            config.package.epoch,
            coverage,
        )
    }

    /// Coverage as an integer percentage, rounded up.
    ///
    /// The fraction is first snapped to hundredths of a percent so that
    /// binary noise such as `0.07 * 100 = 7.000000000000001` does not
    /// round up to the next integer.
    pub fn percent(&self) -> u32 {
        let hundredths = (self.coverage * 10_000.0).round() / 100.0;
        hundredths.ceil().clamp(0.0, 100.0) as u32
    }
}
