// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Check command - validate a definition and the programs it uses

use colored::Colorize;
use miette::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Run the check command
pub async fn run(definition_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Checking pipeline...".bold());
    println!();

    let definition = super::load_definition(&definition_path)?;
    println!("  {} Definition file is valid YAML", "✓".green());

    // Building the node runs the redirect and pipe checks
    let node = match definition.to_node() {
        Ok(node) => node,
        Err(e) => {
            println!("  {} Pipeline is not well-formed", "✗".red());
            return Err(miette::Report::new(e));
        }
    };
    println!(
        "  {} Pipeline is well-formed ({} stages)",
        "✓".green(),
        node.stage_count()
    );

    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for program in definition.programs() {
        if !seen.insert(program) {
            continue;
        }
        match locate(program) {
            Some(path) => {
                if verbose {
                    println!("  {} {} ({})", "✓".green(), program, path.display());
                } else {
                    println!("  {} {}", "✓".green(), program);
                }
            }
            None => {
                println!("  {} {} not found", "✗".red(), program);
                missing.push(program.to_string());
            }
        }
    }

    println!();
    if !missing.is_empty() {
        return Err(miette::miette!(
            help = "Install the missing programs or fix their names in the definition",
            "{} program(s) not found: {}",
            missing.len(),
            missing.join(", ")
        ));
    }

    println!("{}", "Pipeline is ready to run".green().bold());
    Ok(())
}

/// Resolve a program the way the launcher will
///
/// Names containing a slash are paths; anything else is looked up on `PATH`.
fn locate(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        path.exists().then(|| path.to_path_buf())
    } else {
        which::which(program).ok()
    }
}
