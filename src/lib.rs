// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! # pipesh - Composable Process Pipelines
//!
//! `pipesh` builds shell-style pipelines as immutable values and runs them
//! as real OS processes connected by pipes.
//!
//! ## Features
//!
//! - **Structured arguments** - options and positional values are encoded
//!   per program through an [`ArgumentSpec`]
//! - **Checked composition** - `pipe`, `error_pipe` and redirects refuse to
//!   connect a stream twice
//! - **Shell semantics** - EOF and broken pipes propagate between stages,
//!   the pipeline reports the last stage's status
//! - **Failure policy** - per-stage caught statuses and `suppress`
//!
//! ## Quick Start
//!
//! ```no_run
//! use pipesh::{InvokeOptions, Stage};
//!
//! # fn main() -> pipesh::PipeshResult<()> {
//! let count = Stage::new("ls")
//!     .flag("l")
//!     .pipe(Stage::new("wc").flag("l"))?
//!     .text()?;
//!
//! let handle = Stage::new("grep")
//!     .arg("needle")
//!     .catch([1])
//!     .invoke(&InvokeOptions::new().input("hay\nneedle\n").capture_stdout(true))?;
//! let result = handle.wait()?;
//! assert!(result.success());
//! # Ok(())
//! # }
//! ```
//!
//! Process plumbing relies on POSIX pipes, `poll(2)` and signals; the
//! crate targets Unix platforms.

pub mod args;
pub mod cli;
pub mod env;
pub mod errors;
pub mod pipeline;
pub mod process;
pub mod utils;

// Re-export commonly used types
pub use args::{ArgGroup, ArgValue, ArgumentSpec, RepeatPolicy};
pub use env::Environment;
pub use errors::{ConfigError, ConstructionError, LaunchError, MonitorError, PipeshError, PipeshResult};
pub use pipeline::{invoke, InvokeOptions, PipelineDefinition, PipelineHandle, PipelineNode, RedirectTarget, Stage};
pub use process::{PipelineResult, Status, StatusSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stage for `program` with the default argument spec
pub fn command(program: impl Into<String>) -> Stage {
    Stage::new(program)
}
