//! Error types for pack
//!
//! Configuration problems (`ConfigError`, `EnvError`) are always raised
//! before any external collaborator runs. Build, test and scaffold failures
//! are reported after the collaborator finished. Every variant maps to exit
//! code 1 in `main`.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving options
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but does not contain a JSON object
    #[error("invalid json in {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// The config file contains keys that are not registered options
    #[error("Invalid file options provided: {}", keys.join(", "))]
    InvalidOptions { keys: Vec<String> },

    /// An option has a value of the wrong type
    #[error("Invalid option value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Errors raised when querying the option schema
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("option '{0}' is not registered")]
    Unregistered(String),
}

/// Errors raised while loading a user environment file
#[derive(Debug, Error)]
pub enum EnvError {
    /// `--env` was given but no candidate file exists
    #[error("env file {name} not found")]
    NotFound { name: String },

    /// The env file exists but could not be parsed
    #[error("{reason} in {}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// Errors reported by the build executor
#[derive(Debug, Error)]
pub enum BuildError {
    /// The executor could not start or crashed
    #[error("build executor failed: {0}")]
    Executor(String),

    /// The executor compiled with errors
    #[error("compiled with {} error(s)", errors.len())]
    Compilation { errors: Vec<String> },
}

/// A test run reported failures
#[derive(Debug, Error)]
#[error("{count} tests failed")]
pub struct TestFailure {
    pub count: usize,
}

/// The scaffold target directory already contains files
#[derive(Debug, Error)]
#[error("project root must be empty: {}", root.display())]
pub struct ScaffoldConflict {
    pub root: PathBuf,
}
