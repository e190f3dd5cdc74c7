//! Error types for configuration handling and pipeline instrumentation

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or persisting a Melange configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read or written
    #[error("error accessing package config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not a valid Melange document
    #[error("error parsing package config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The in-memory configuration could not be serialised
    #[error("error serialising package config")]
    Serialize(#[source] serde_yaml::Error),
}

/// Errors raised by coverage instrumentation strategies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// No compile step the strategy knows how to instrument was found
    #[error("build pipeline not recognized for the {ecosystem} ecosystem")]
    BuildPipelineNotRecognized { ecosystem: String },

    /// Neither the requested nor the default strategy is registered
    #[error("no coverage strategy registered for {requested} and no default {default} strategy")]
    NoStrategy { requested: String, default: String },
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
