// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Utility modules
//!
//! Common utilities for the pipesh CLI.

pub mod colors;

pub use colors::*;
