//! Per-ecosystem coverage instrumentation strategies
//!
//! A [`CoverageStrategy`] knows how to rewrite a Melange build pipeline so
//! that the produced artifacts record coverage data at runtime, and how to
//! extend the test pipeline so that the recorded data is aggregated into a
//! single `apkoverage:` report line.
//!
//! Strategies are looked up by ecosystem name in a [`StrategyRegistry`]
//! that the binary builds once at startup with
//! [`StrategyRegistry::with_builtin`].

mod go;
mod rust;

pub use go::GoStrategy;
pub use rust::RustStrategy;

use crate::config::{Configuration, Environment, Step, TestPhase};
use crate::error::StrategyError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Ecosystem used when the requested one has no registered strategy.
pub const DEFAULT_STRATEGY: &str = "go";

/// Directory the instrumented binaries write raw coverage data into.
pub const COVER_DIR: &str = "/tmp/cover";

/// Instrumentation edits for one target ecosystem.
///
/// Both operations are idempotent: applying them to an already mutated
/// configuration leaves it unchanged.
pub trait CoverageStrategy: Send + Sync + fmt::Debug {
    /// Ecosystem name, e.g. `go`.
    fn name(&self) -> &'static str;

    /// Enable coverage instrumentation in the build pipeline.
    ///
    /// Fails with [`StrategyError::BuildPipelineNotRecognized`] when no
    /// compile step is found, since an uninstrumented build would report
    /// a meaningless coverage value.
    fn mutate_build(&self, config: &mut Configuration) -> Result<(), StrategyError>;

    /// Make the test pipeline collect coverage data and emit the report line.
    fn mutate_test(&self, test: &mut TestPhase) -> Result<(), StrategyError>;
}

/// Name-keyed table of coverage strategies.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn CoverageStrategy>>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `go` and `rust` strategies.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(GoStrategy.name(), Arc::new(GoStrategy));
        registry.register(RustStrategy.name(), Arc::new(RustStrategy));
        registry
    }

    /// Register a strategy under `name`. The last registration for a name wins.
    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn CoverageStrategy>) {
        self.strategies.insert(name.into(), strategy);
    }

    /// The strategy registered under `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn CoverageStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// The strategy for `name`, falling back to [`DEFAULT_STRATEGY`].
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CoverageStrategy>, StrategyError> {
        if let Some(strategy) = self.lookup(name) {
            return Ok(strategy);
        }

        match self.lookup(DEFAULT_STRATEGY) {
            Some(strategy) => {
                warn!(
                    language = %name,
                    fallback = DEFAULT_STRATEGY,
                    "No coverage strategy for language, using default"
                );
                Ok(strategy)
            }
            None => Err(StrategyError::NoStrategy {
                requested: name.to_string(),
                default: DEFAULT_STRATEGY.to_string(),
            }),
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Prepend `script` unless the first step already runs it.
pub(crate) fn ensure_leading_step(steps: &mut Vec<Step>, script: &str) {
    let present = steps
        .first()
        .map(|step| step.script().contains(script))
        .unwrap_or(false);
    if !present {
        steps.insert(0, Step::shell(script));
    }
}

/// Append `script` unless the last step already runs it.
pub(crate) fn ensure_trailing_step(steps: &mut Vec<Step>, script: &str) {
    let present = steps
        .last()
        .map(|step| step.script().contains(script))
        .unwrap_or(false);
    if !present {
        steps.push(Step::shell(script));
    }
}

/// Add each package to the environment contents once.
pub(crate) fn ensure_packages(env: &mut Environment, packages: &[&str]) {
    for package in packages {
        if !env.contents.packages.iter().any(|p| p == package) {
            env.contents.packages.push((*package).to_string());
        }
    }
}

/// Make sure the space separated `flag` is part of the variable's value.
pub(crate) fn ensure_flag(env: &mut Environment, var: &str, flag: &str) {
    let value = env.environment.entry(var.to_string()).or_default();
    if value.trim().is_empty() {
        *value = flag.to_string();
    } else if !value.contains(flag) {
        value.push(' ');
        value.push_str(flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NoopStrategy;

    impl CoverageStrategy for NoopStrategy {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn mutate_build(&self, _config: &mut Configuration) -> Result<(), StrategyError> {
            Ok(())
        }

        fn mutate_test(&self, _test: &mut TestPhase) -> Result<(), StrategyError> {
            Ok(())
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = StrategyRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["go", "rust"]);
        assert_eq!(registry.lookup("rust").unwrap().name(), "rust");
        assert!(registry.lookup("cobol").is_none());
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_go() {
        let registry = StrategyRegistry::with_builtin();
        let strategy = registry.resolve("cobol").unwrap();
        assert_eq!(strategy.name(), DEFAULT_STRATEGY);
    }

    #[test]
    fn test_resolve_without_default_fails() {
        let mut registry = StrategyRegistry::new();
        registry.register("noop", Arc::new(NoopStrategy));

        assert_eq!(registry.resolve("noop").unwrap().name(), "noop");
        let err = registry.resolve("cobol").unwrap_err();
        assert!(matches!(err, StrategyError::NoStrategy { .. }));
    }

    #[test]
    fn test_register_last_write_wins() {
        let mut registry = StrategyRegistry::with_builtin();
        registry.register("go", Arc::new(NoopStrategy));

        assert_eq!(registry.lookup("go").unwrap().name(), "noop");
        assert_eq!(registry.names().len(), 2);
    }

    #[test]
    fn test_ensure_leading_step_on_empty() {
        let mut steps = Vec::new();
        ensure_leading_step(&mut steps, "mkdir -p /tmp/cover");
        ensure_leading_step(&mut steps, "mkdir -p /tmp/cover");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].script(), "mkdir -p /tmp/cover");
    }

    #[test]
    fn test_ensure_trailing_step_only_checks_last() {
        let mut steps = vec![Step::shell("report"), Step::shell("other")];
        ensure_trailing_step(&mut steps, "report");
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].script(), "report");
    }

    #[test]
    fn test_ensure_packages_dedup() {
        let mut env = Environment::default();
        env.contents.packages.push("go".to_string());
        ensure_packages(&mut env, &["go", "clang", "clang"]);
        assert_eq!(env.contents.packages, vec!["go", "clang"]);
    }

    #[test]
    fn test_ensure_flag_appends() {
        let mut env = Environment::default();
        env.environment
            .insert("RUSTFLAGS".to_string(), "-C opt-level=2".to_string());
        ensure_flag(&mut env, "RUSTFLAGS", "-C instrument-coverage");
        ensure_flag(&mut env, "RUSTFLAGS", "-C instrument-coverage");
        assert_eq!(
            env.environment["RUSTFLAGS"],
            "-C opt-level=2 -C instrument-coverage"
        );
    }
}
