//! APKover Core
//!
//! Typed model of a Melange package configuration and the per-ecosystem
//! strategies that rewrite it to build coverage-instrumented packages:
//! - `config`: load, mutate and persist the package YAML
//! - `strategy`: `go` and `rust` instrumentation plus the name-keyed registry
//! - `report`: the coverage report and its marker prefix

pub mod config;
pub mod error;
pub mod report;
pub mod strategy;
pub mod telemetry;

pub use config::{Configuration, Contents, Environment, Package, Step, TestPhase};
pub use error::{ConfigError, StrategyError};
pub use report::{CoverageReport, REPORT_PREFIX};
pub use strategy::{
    CoverageStrategy, GoStrategy, RustStrategy, StrategyRegistry, COVER_DIR, DEFAULT_STRATEGY,
};
pub use telemetry::init_tracing;
