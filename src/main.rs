// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! pipesh - shell-style process pipelines
//!
//! Run pipelines of external programs described in YAML definitions.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipesh::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipesh=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if !pipesh::utils::should_use_colors() {
        colored::control::set_override(false);
    }

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            definition,
            capture,
            json,
            timeout,
        } => {
            let code = pipesh::cli::run::run(definition, capture, json, timeout, cli.verbose).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Plan { definition } => pipesh::cli::plan::run(definition, cli.verbose).await,
        Commands::Check { definition } => pipesh::cli::check::run(definition, cli.verbose).await,
    }
}
