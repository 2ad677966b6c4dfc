// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Run command - execute a pipeline definition

use colored::Colorize;
use miette::Result;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::invoke;
use crate::process::PipelineResult;
use crate::utils::{print_error, print_header, print_info, print_warning, status};

/// Run the pipeline; returns the exit code for the process
pub async fn run(
    definition_path: PathBuf,
    capture: bool,
    json_output: bool,
    timeout_ms: Option<u64>,
    verbose: bool,
) -> Result<i32> {
    let definition = super::load_definition(&definition_path)?;
    let node = definition.to_node().map_err(miette::Report::new)?;

    let mut options = definition.invoke_options();
    if capture || json_output {
        options.capture_stdout = true;
    }
    if json_output {
        options.capture_stderr = true;
    }
    if let Some(ms) = timeout_ms {
        options.timeout = Some(Duration::from_millis(ms));
    }

    if !json_output {
        print_header(&format!("Running pipeline: {}", definition.name));
        if let Some(description) = &definition.description {
            eprintln!("{}", description.dimmed());
        }
        if verbose {
            print_info(&node.to_string());
        }
        eprintln!();
    }

    let handle = invoke(&node, &options).map_err(miette::Report::new)?;
    if verbose && !json_output {
        for pid in handle.pids() {
            print_info(&format!("started pid {}", pid));
        }
    }

    // ctrl-c cancels the whole pipeline
    let token = handle.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    let result = handle.wait_async().await;
    interrupt.abort();
    let result = result.map_err(miette::Report::new)?;

    if json_output {
        println!("{}", to_json(&definition.name, &result)?);
    } else {
        print_summary(&result);
        if capture {
            std::io::stdout()
                .write_all(&result.stdout)
                .map_err(|e| miette::miette!("Failed to write output: {}", e))?;
        }
    }

    Ok(if result.success() { 0 } else { exit_code(&result) })
}

/// Exit code reported for a failed pipeline
///
/// The last stage's code, like a shell; 1 when that stage itself succeeded.
fn exit_code(result: &PipelineResult) -> i32 {
    match result.status.shell_code() {
        0 => 1,
        code => code,
    }
}

fn print_summary(result: &PipelineResult) {
    for stage in &result.stages {
        let marker = if stage.failed { "✗".red() } else { "✓".green() };
        eprintln!(
            "  {} {} {}",
            marker,
            format!("[{}]", stage.index).dimmed(),
            stage.program.bold()
        );
        eprintln!("      {}", status(&stage.status, stage.failed));
        if let Some(error) = &stage.launch_error {
            eprintln!("      {}", error.to_string().dimmed());
        }
    }

    eprintln!();
    if result.cancelled {
        print_warning("Pipeline was cancelled");
    }
    if result.success() {
        eprintln!(
            "{} ({:.2}s)",
            "Pipeline completed successfully".green().bold(),
            result.duration.as_secs_f64()
        );
    } else {
        print_error(&format!(
            "Pipeline failed with {} (failing stages: {})",
            result.status,
            result
                .failed_stages()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
}

fn to_json(name: &str, result: &PipelineResult) -> Result<String> {
    let stages: Vec<_> = result
        .stages
        .iter()
        .map(|stage| {
            json!({
                "index": stage.index,
                "program": stage.program,
                "status": stage.status,
                "failed": stage.failed,
                "launch_error": stage.launch_error.as_ref().map(ToString::to_string),
            })
        })
        .collect();

    let value = json!({
        "name": name,
        "status": result.status,
        "success": result.success(),
        "cancelled": result.cancelled,
        "duration_ms": result.duration.as_millis() as u64,
        "stages": stages,
        "stdout": result.stdout_text(),
        "stderr": result.stderr_text(),
    });

    serde_json::to_string_pretty(&value).map_err(|e| miette::miette!("Failed to serialize result: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{aggregate, StageOutcome, Status, StatusSet};

    fn result_with(statuses: &[Status]) -> PipelineResult {
        aggregate(
            statuses
                .iter()
                .enumerate()
                .map(|(index, status)| StageOutcome {
                    index,
                    program: "prog".into(),
                    status: *status,
                    ok_statuses: StatusSet::codes([0]),
                    launch_error: None,
                })
                .collect(),
        )
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(&result_with(&[Status::Exited(3)])), 3);
        assert_eq!(exit_code(&result_with(&[Status::Signaled(9)])), 137);
        // failure upstream, last stage fine
        assert_eq!(exit_code(&result_with(&[Status::Exited(1), Status::Exited(0)])), 1);
    }

    #[test]
    fn test_json_shape() {
        let json = to_json("demo", &result_with(&[Status::Exited(0)])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "demo");
        assert_eq!(value["success"], true);
        assert_eq!(value["status"]["exited"], 0);
        assert_eq!(value["stages"][0]["program"], "prog");
    }
}
