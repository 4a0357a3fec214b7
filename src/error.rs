use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::deployer::Phase;

/// Deployment error types
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config{}: {message}", config_location(.path))]
    ConfigParse {
        /// `None` when parsed from text rather than a file
        path: Option<PathBuf>,
        message: String,
    },

    #[error("'{name}' is not a valid environment. Valid environments: {}", .valid.join(","))]
    UnknownEnvironment { name: String, valid: Vec<String> },

    #[error("Environment '{env}' is missing required field '{field}'")]
    MissingField { env: String, field: &'static str },

    #[error("Environment '{env}' has invalid '{field}': {reason}")]
    InvalidField {
        env: String,
        field: &'static str,
        reason: String,
    },

    #[error("Environment '{env}' is malformed: {message}")]
    InvalidEnvironment { env: String, message: String },

    #[error("Failed to start '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for '{program}'")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} timed out after {}s", .after.as_secs())]
    Timeout { phase: Phase, after: Duration },

    #[error("{phase} failed {}", exit_detail(.code))]
    PhaseFailed { phase: Phase, code: Option<i32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn config_location(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" file {}", path.display()),
        None => String::new(),
    }
}

fn exit_detail(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("with exit code {code}"),
        None => "(terminated by signal)".to_string(),
    }
}

impl DeployError {
    /// Process exit code for this error.
    ///
    /// Phase failures (`1`) happen after a subprocess actually ran; every
    /// other error aborts the invocation before or while starting one (`2`).
    pub fn exit_code(&self) -> u8 {
        match self {
            DeployError::Timeout { .. } | DeployError::PhaseFailed { .. } => 1,
            _ => 2,
        }
    }

    /// True for errors raised while resolving configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DeployError::ConfigRead { .. }
                | DeployError::ConfigParse { .. }
                | DeployError::UnknownEnvironment { .. }
                | DeployError::MissingField { .. }
                | DeployError::InvalidField { .. }
                | DeployError::InvalidEnvironment { .. }
        )
    }
}
