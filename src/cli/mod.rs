// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for pipesh.

pub mod check;
pub mod plan;
pub mod run;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::pipeline::PipelineDefinition;

/// Composable process pipelines
///
/// Run pipelines described in YAML definition files.
#[derive(Parser, Debug)]
#[clap(
    name = "pipesh",
    version,
    about = "Run shell-style process pipelines from YAML definitions",
    long_about = None,
    after_help = "Examples:\n\
        pipesh run pipeline.yaml              Run a pipeline\n\
        pipesh run pipeline.yaml --json       Run and print the result as JSON\n\
        pipesh plan pipeline.yaml             Show how stages are wired\n\
        pipesh check pipeline.yaml            Check that every program is installed\n\n\
        See 'pipesh <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline
    Run {
        /// Pipeline definition file
        #[clap(default_value = "pipeline.yaml")]
        definition: PathBuf,

        /// Capture the pipeline's stdout and print it after the summary
        #[clap(long)]
        capture: bool,

        /// Print the result as JSON (implies --capture)
        #[clap(long)]
        json: bool,

        /// Kill the pipeline after this many milliseconds
        #[clap(long, value_name = "MS")]
        timeout: Option<u64>,
    },

    /// Show the execution plan of a pipeline
    Plan {
        /// Pipeline definition file
        #[clap(default_value = "pipeline.yaml")]
        definition: PathBuf,
    },

    /// Check a pipeline definition and the programs it uses
    Check {
        /// Pipeline definition file
        #[clap(default_value = "pipeline.yaml")]
        definition: PathBuf,
    },
}

/// Load a definition, reporting errors as diagnostics
pub(crate) fn load_definition(path: &std::path::Path) -> miette::Result<PipelineDefinition> {
    PipelineDefinition::from_file(path).map_err(miette::Report::new)
}
