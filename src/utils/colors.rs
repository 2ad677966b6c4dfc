// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Terminal color utilities
//!
//! Provides consistent styling across the CLI. Everything goes to stderr so
//! that stdout carries only pipeline output.

use colored::Colorize;

use crate::process::Status;

/// Check if colors should be disabled
pub fn should_use_colors() -> bool {
    // Respect NO_COLOR environment variable
    std::env::var_os("NO_COLOR").is_none()
}

/// Style a stage status: green on success, red when it failed the stage,
/// yellow for a non-zero status the stage tolerates
pub fn status(status: &Status, failed: bool) -> colored::ColoredString {
    let text = status.to_string();
    if status.success() {
        text.green()
    } else if failed {
        text.red()
    } else {
        text.yellow()
    }
}

/// Print a styled header
pub fn print_header(title: &str) {
    eprintln!("{}", title.bold());
    eprintln!("{}", "═".repeat(title.chars().count().max(40)));
}

/// Print an error cross
pub fn print_error(msg: &str) {
    eprintln!("  {} {}", "✗".red(), msg);
}

/// Print a warning
pub fn print_warning(msg: &str) {
    eprintln!("  {} {}", "⚠".yellow(), msg);
}

/// Print an info item
pub fn print_info(msg: &str) {
    eprintln!("  {} {}", "→".blue(), msg);
}
