// src/error.rs
//! Error types for the query backends and the exporter process.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single hardware query against one device.
///
/// These never abort a poll cycle; the poller marks the device stale and moves on.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unparseable output: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Process-level errors. Anything surfacing from startup ends the process non-zero.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to load config file {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },

    #[error("health query backend unavailable: {0}")]
    ToolUnavailable(#[source] QueryError),

    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to publish {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = ExporterError> = std::result::Result<T, E>;
