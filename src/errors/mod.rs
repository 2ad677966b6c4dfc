// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Error types
//!
//! Errors are split by the phase that produces them. Construction and
//! configuration problems are reported synchronously while a pipeline is
//! being built; launch errors and stage failures are folded into the
//! pipeline result; only a monitor failure aborts a `wait` outright.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

use crate::process::Status;

/// Result type for pipesh operations
pub type PipeshResult<T> = Result<T, PipeshError>;

/// Invalid [`ArgumentSpec`](crate::args::ArgumentSpec) configuration
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Join repeat policy requires a non-empty separator")]
    #[diagnostic(
        code(pipesh::config::empty_join_separator),
        help("Use RepeatPolicy::Join(\",\".into()) or switch to Repeat / Trailing")
    )]
    EmptyJoinSeparator,

    #[error("The {which} option prefix must not be empty")]
    #[diagnostic(code(pipesh::config::empty_prefix))]
    EmptyPrefix { which: &'static str },

    #[error("The positional arguments separator must not be empty")]
    #[diagnostic(
        code(pipesh::config::empty_args_separator),
        help("Leave args_separator unset to disable it")
    )]
    EmptyArgsSeparator,

    #[error("Value separator must not be empty")]
    #[diagnostic(
        code(pipesh::config::empty_value_separator),
        help("Leave value_separator unset to emit values as separate tokens")
    )]
    EmptyValueSeparator,
}

/// Structurally invalid pipeline expression
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("Cannot connect the output of {node}: its stdout is already redirected")]
    #[diagnostic(
        code(pipesh::construction::stdout_redirected),
        help("Pipe first, then redirect the output of the whole pipeline")
    )]
    StdoutAlreadyRedirected { node: String },

    #[error("Cannot connect the error stream of {node}: its stderr is already redirected")]
    #[diagnostic(code(pipesh::construction::stderr_redirected))]
    StderrAlreadyRedirected { node: String },

    #[error("Cannot feed {node}: its stdin is already connected")]
    #[diagnostic(
        code(pipesh::construction::stdin_connected),
        help("A stage reads from exactly one source: a pipe, a file or the inherited stdin")
    )]
    StdinAlreadyConnected { node: String },

    #[error("Invalid pipeline definition: {reason}")]
    #[diagnostic(code(pipesh::construction::invalid_definition))]
    InvalidDefinition {
        reason: String,
        #[help]
        help: Option<String>,
    },
}

/// A stage that could not be started
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Program '{program}' not found (stage {stage})")]
    #[diagnostic(code(pipesh::launch::not_found), help("{suggestion}"))]
    NotFound {
        stage: usize,
        program: String,
        suggestion: String,
    },

    #[error("Permission denied executing '{program}' (stage {stage})")]
    #[diagnostic(
        code(pipesh::launch::permission_denied),
        help("Check that the file is executable: chmod +x {program}")
    )]
    PermissionDenied { stage: usize, program: String },

    #[error("Failed to open '{path}' for stage {stage}: {error}")]
    #[diagnostic(code(pipesh::launch::redirect_failed))]
    Redirect {
        stage: usize,
        path: PathBuf,
        error: String,
    },

    #[error("Failed to start '{program}' (stage {stage}): {error}")]
    #[diagnostic(code(pipesh::launch::spawn_failed))]
    Spawn {
        stage: usize,
        program: String,
        error: String,
    },
}

impl LaunchError {
    /// Classify a spawn failure by its io error kind
    pub fn from_spawn(stage: usize, program: &str, error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                stage,
                program: program.to_string(),
                suggestion: not_found_suggestion(program),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                stage,
                program: program.to_string(),
            },
            _ => Self::Spawn {
                stage,
                program: program.to_string(),
                error: error.to_string(),
            },
        }
    }

    /// Index of the stage that failed to launch
    pub fn stage(&self) -> usize {
        match self {
            Self::NotFound { stage, .. }
            | Self::PermissionDenied { stage, .. }
            | Self::Redirect { stage, .. }
            | Self::Spawn { stage, .. } => *stage,
        }
    }

    /// Status reported for a stage that never ran, following shell convention
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound { .. } => Status::Exited(127),
            _ => Status::Exited(126),
        }
    }
}

fn not_found_suggestion(program: &str) -> String {
    if program.contains('/') {
        format!("Check that '{}' exists", program)
    } else {
        format!("Install {} and ensure it's in your PATH", program)
    }
}

/// Failure of the completion monitor itself
#[derive(Error, Debug, Diagnostic)]
pub enum MonitorError {
    #[error("Failed to register the child liveness descriptor: {error}")]
    #[diagnostic(code(pipesh::monitor::register))]
    Register { error: String },

    #[error("Readiness poll failed: {error}")]
    #[diagnostic(
        code(pipesh::monitor::poll),
        help("The process may have run out of file descriptors")
    )]
    Poll { error: String },

    #[error("Failed to query status of stage {stage} (pid {pid}): {error}")]
    #[diagnostic(code(pipesh::monitor::wait))]
    Wait { stage: usize, pid: u32, error: String },

    #[error("Monitor task failed: {error}")]
    #[diagnostic(code(pipesh::monitor::join))]
    Join { error: String },
}

/// Main error type for pipesh
#[derive(Error, Debug, Diagnostic)]
pub enum PipeshError {
    // ─────────────────────────────────────────────────────────────────────────
    // Build-time Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Construction(#[from] ConstructionError),

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Monitor(#[from] MonitorError),

    #[error("Stage {stage} ('{program}') failed with {status}")]
    #[diagnostic(code(pipesh::stage_failed))]
    StageFailed {
        stage: usize,
        program: String,
        status: Status,
    },

    #[error("Pipeline failed with {status}")]
    #[diagnostic(code(pipesh::pipeline_failed))]
    PipelineFailed {
        /// Status of the last stage
        status: Status,
        /// Indices of the stages that failed
        failed_stages: Vec<usize>,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(pipesh::definition_not_found),
        help("Pass the path of a YAML pipeline definition")
    )]
    DefinitionNotFound { path: PathBuf },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(pipesh::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(pipesh::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(pipesh::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(pipesh::json_error))]
    Json { message: String },
}

impl From<std::io::Error> for PipeshError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for PipeshError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for PipeshError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl PipeshError {
    /// Create a pipeline failure with a hint naming the failing stages
    pub fn pipeline_failed(status: Status, failed_stages: Vec<usize>) -> Self {
        let help = match failed_stages.as_slice() {
            [] => None,
            [only] => Some(format!("Stage {} reported a failing status", only)),
            many => Some(format!(
                "Stages {} reported failing statuses",
                many.iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        };

        Self::PipelineFailed {
            status,
            failed_stages,
            help,
        }
    }

    /// Whether this error reports a failing stage rather than an engine fault
    pub fn is_stage_failure(&self) -> bool {
        matches!(self, Self::StageFailed { .. } | Self::PipelineFailed { .. })
    }
}
