// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Stage: one program and its accumulated arguments
//!
//! A stage is immutable. Every builder method returns a new stage that
//! shares the argument spec with the one it was derived from, so a base
//! command can be reused as a template:
//!
//! ```
//! use pipesh::Stage;
//!
//! let git = Stage::new("git");
//! let log = git.arg("log").opt("max_count", 5);
//! let status = git.arg("status").flag("short");
//!
//! assert_eq!(log.argv(), vec!["log", "--max-count", "5"]);
//! assert_eq!(status.argv(), vec!["status", "--short"]);
//! assert!(git.argv().is_empty());
//! ```

use std::fmt;
use std::sync::Arc;

use crate::args::{encode_groups, tokenize, ArgGroup, ArgValue, ArgumentSpec};
use crate::errors::ConstructionError;
use crate::pipeline::node::{PipelineNode, RedirectTarget};
use crate::process::{Status, StatusSet};

/// A program plus the arguments accumulated for it
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    program: String,
    spec: Arc<ArgumentSpec>,
    groups: Vec<ArgGroup>,
    catch: StatusSet,
}

impl Stage {
    /// Stage for `program` with the default argument spec
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_spec(program, ArgumentSpec::default())
    }

    pub fn with_spec(program: impl Into<String>, spec: ArgumentSpec) -> Self {
        Self::with_shared_spec(program, Arc::new(spec))
    }

    pub fn with_shared_spec(program: impl Into<String>, spec: Arc<ArgumentSpec>) -> Self {
        Self {
            program: program.into(),
            spec,
            groups: Vec::new(),
            catch: StatusSet::default(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn spec(&self) -> &Arc<ArgumentSpec> {
        &self.spec
    }

    pub fn groups(&self) -> &[ArgGroup] {
        &self.groups
    }

    /// Append a whole group of arguments
    pub fn call(&self, group: ArgGroup) -> Stage {
        let mut next = self.clone();
        next.groups.push(group);
        next
    }

    /// Append a positional argument
    pub fn arg(&self, value: impl Into<ArgValue>) -> Stage {
        self.call(ArgGroup::new().arg(value))
    }

    /// Append several positional arguments as one group
    pub fn args<I, T>(&self, values: I) -> Stage
    where
        I: IntoIterator<Item = T>,
        T: Into<ArgValue>,
    {
        self.call(ArgGroup::new().args(values))
    }

    /// Append a named option
    pub fn opt(&self, name: impl Into<String>, value: impl Into<ArgValue>) -> Stage {
        self.call(ArgGroup::new().opt(name, value))
    }

    /// Append a boolean option: `stage.flag("l")` is `stage.opt("l", true)`
    pub fn flag(&self, name: impl Into<String>) -> Stage {
        self.opt(name, true)
    }

    /// Append literal argument text, split on unescaped whitespace
    ///
    /// Each token becomes its own positional argument, so no option
    /// interpretation or separator insertion crosses token boundaries.
    pub fn literal(&self, text: &str) -> Stage {
        let mut next = self.clone();
        next.groups
            .extend(tokenize(text).into_iter().map(|token| ArgGroup::new().arg(token)));
        next
    }

    /// Treat the given exit codes as success
    ///
    /// An empty list catches every exit code (0 to 255) but no signal;
    /// use [`Stage::catch_all`] for that.
    pub fn catch(&self, codes: impl IntoIterator<Item = i32>) -> Stage {
        let mut codes = StatusSet::codes(codes);
        if matches!(&codes, StatusSet::Only(set) if set.is_empty()) {
            codes = StatusSet::codes(0..=255);
        }
        let mut next = self.clone();
        next.catch = next.catch.union(&codes);
        next
    }

    /// Treat every status as success
    pub fn catch_all(&self) -> Stage {
        let mut next = self.clone();
        next.catch = StatusSet::All;
        next
    }

    /// Treat termination by the given signal as success
    pub fn catch_signal(&self, signal: i32) -> Stage {
        let mut next = self.clone();
        next.catch.insert(Status::Signaled(signal));
        next
    }

    /// Statuses caught with [`Stage::catch`] and friends
    pub fn caught(&self) -> &StatusSet {
        &self.catch
    }

    /// Statuses that don't mark this stage as failed
    pub fn ok_statuses(&self) -> StatusSet {
        StatusSet::codes(self.spec.default_ok_statuses().iter().copied()).union(&self.catch)
    }

    /// Argument tokens passed to the program
    pub fn argv(&self) -> Vec<String> {
        encode_groups(&self.spec, &self.groups)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Composition
    // ─────────────────────────────────────────────────────────────────────────

    pub fn pipe(&self, rhs: impl Into<PipelineNode>) -> Result<PipelineNode, ConstructionError> {
        PipelineNode::from(self).pipe(rhs)
    }

    pub fn error_pipe(&self, rhs: impl Into<PipelineNode>) -> Result<PipelineNode, ConstructionError> {
        PipelineNode::from(self).error_pipe(rhs)
    }

    pub fn redirect(
        &self,
        target: impl Into<RedirectTarget>,
        append: bool,
    ) -> Result<PipelineNode, ConstructionError> {
        PipelineNode::from(self).redirect(target, append)
    }

    pub fn redirect_stderr(
        &self,
        target: impl Into<RedirectTarget>,
        append: bool,
    ) -> Result<PipelineNode, ConstructionError> {
        PipelineNode::from(self).redirect_stderr(target, append)
    }

    pub fn redirect_stdin(&self, source: impl Into<RedirectTarget>) -> Result<PipelineNode, ConstructionError> {
        PipelineNode::from(self).redirect_stdin(source)
    }

    pub fn suppress(&self) -> PipelineNode {
        PipelineNode::from(self).suppress()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}", quote(&self.program))?;
        for token in self.argv() {
            write!(f, " {}", quote(&token))?;
        }
        write!(f, "`")
    }
}

fn quote(token: &str) -> String {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        format!("'{}'", token)
    } else {
        token.to_string()
    }
}
