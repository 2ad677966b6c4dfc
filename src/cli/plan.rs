// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Plan command - show how a pipeline's stages are wired

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::pipeline::plan;

/// Run the plan command
pub async fn run(definition_path: PathBuf, verbose: bool) -> Result<()> {
    let definition = super::load_definition(&definition_path)?;
    let node = definition.to_node().map_err(miette::Report::new)?;
    let options = definition.invoke_options();

    let mut execution = plan(&node)
        .map_err(miette::Report::new)?
        .with_capture(options.capture_stdout, options.capture_stderr);
    if options.input.is_some() {
        execution = execution.with_input();
    }

    println!("{} {}", "Pipeline:".bold(), definition.name);
    println!("{} {}", "Expression:".bold(), node);
    println!();
    print!("{}", execution);

    if verbose {
        println!();
        println!(
            "{} stage(s), {} pipe(s)",
            execution.len(),
            execution.pipe_count()
        );
        if let Some(timeout) = options.timeout {
            println!("Timeout: {}ms", timeout.as_millis());
        }
    }

    Ok(())
}
