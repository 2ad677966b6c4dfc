// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Pipeline expression tree
//!
//! Nodes are immutable and share their children, so an expression can be
//! reused as a sub-expression of several pipelines. Combinators check the
//! stream bindings of their operands and refuse to build expressions in
//! which a stream would be connected twice.
//!
//! A composite node is never a redirect target; only paths, open files and
//! the null device are:
//!
//! ```compile_fail
//! use pipesh::Stage;
//!
//! let sink = Stage::new("cat").pipe(Stage::new("wc")).unwrap();
//! let _ = Stage::new("ls").redirect(sink, false);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::ConstructionError;
use crate::pipeline::stage::Stage;

/// Which standard stream a redirection applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdin,
    #[default]
    Stdout,
    Stderr,
}

/// Where a redirected stream goes (or, for stdin, comes from)
#[derive(Debug, Clone)]
pub enum RedirectTarget {
    /// Opened at launch time
    Path(PathBuf),
    /// An already open file, duplicated for the child
    Handle(Arc<File>),
    /// The null device
    Null,
}

impl PartialEq for RedirectTarget {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Path(a), Self::Path(b)) => a == b,
            (Self::Handle(a), Self::Handle(b)) => Arc::ptr_eq(a, b),
            (Self::Null, Self::Null) => true,
            _ => false,
        }
    }
}

impl From<&str> for RedirectTarget {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<String> for RedirectTarget {
    fn from(path: String) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<&Path> for RedirectTarget {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for RedirectTarget {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<File> for RedirectTarget {
    fn from(file: File) -> Self {
        Self::Handle(Arc::new(file))
    }
}

impl From<Arc<File>> for RedirectTarget {
    fn from(file: Arc<File>) -> Self {
        Self::Handle(file)
    }
}

impl fmt::Display for RedirectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Handle(_) => write!(f, "<handle>"),
            Self::Null => write!(f, "/dev/null"),
        }
    }
}

/// A stream redirection attached to a node
#[derive(Debug, Clone, PartialEq)]
pub struct Redirection {
    pub stream: StreamKind,
    pub target: RedirectTarget,
    /// Append instead of truncating (output streams only)
    pub append: bool,
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match (self.stream, self.append) {
            (StreamKind::Stdin, _) => "<",
            (StreamKind::Stdout, false) => ">",
            (StreamKind::Stdout, true) => ">>",
            (StreamKind::Stderr, false) => "2>",
            (StreamKind::Stderr, true) => "2>>",
        };
        write!(f, "{} {}", op, self.target)
    }
}

/// A pipeline expression
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineNode {
    Stage(Stage),
    /// stdout of the left side feeds stdin of the right side
    Pipe(Arc<PipelineNode>, Arc<PipelineNode>),
    /// stderr of the left side feeds stdin of the right side
    ErrorPipe(Arc<PipelineNode>, Arc<PipelineNode>),
    Redirect(Arc<PipelineNode>, Redirection),
    /// Every stage below reports success whatever its status
    Suppress(Arc<PipelineNode>),
}

impl From<Stage> for PipelineNode {
    fn from(stage: Stage) -> Self {
        Self::Stage(stage)
    }
}

impl From<&Stage> for PipelineNode {
    fn from(stage: &Stage) -> Self {
        Self::Stage(stage.clone())
    }
}

impl From<&PipelineNode> for PipelineNode {
    fn from(node: &PipelineNode) -> Self {
        node.clone()
    }
}

impl PipelineNode {
    /// `self | rhs`
    pub fn pipe(self, rhs: impl Into<PipelineNode>) -> Result<PipelineNode, ConstructionError> {
        let rhs = rhs.into();
        if self.stdout_bound() {
            return Err(ConstructionError::StdoutAlreadyRedirected {
                node: self.to_string(),
            });
        }
        if rhs.stdin_bound() {
            return Err(ConstructionError::StdinAlreadyConnected { node: rhs.to_string() });
        }
        Ok(Self::Pipe(Arc::new(self), Arc::new(rhs)))
    }

    /// stderr of the tail stage of `self` feeds `rhs`; its stdout is untouched
    pub fn error_pipe(self, rhs: impl Into<PipelineNode>) -> Result<PipelineNode, ConstructionError> {
        let rhs = rhs.into();
        if self.tail_stderr_bound() {
            return Err(ConstructionError::StderrAlreadyRedirected {
                node: self.to_string(),
            });
        }
        if rhs.stdin_bound() {
            return Err(ConstructionError::StdinAlreadyConnected { node: rhs.to_string() });
        }
        Ok(Self::ErrorPipe(Arc::new(self), Arc::new(rhs)))
    }

    /// `self > target` (or `>>` when appending)
    pub fn redirect(
        self,
        target: impl Into<RedirectTarget>,
        append: bool,
    ) -> Result<PipelineNode, ConstructionError> {
        if self.stdout_bound() {
            return Err(ConstructionError::StdoutAlreadyRedirected {
                node: self.to_string(),
            });
        }
        Ok(self.redirected(StreamKind::Stdout, target.into(), append))
    }

    /// `self 2> target` (or `2>>` when appending)
    ///
    /// Applies to every stage of `self` whose stderr is not bound yet.
    pub fn redirect_stderr(
        self,
        target: impl Into<RedirectTarget>,
        append: bool,
    ) -> Result<PipelineNode, ConstructionError> {
        if self.stderr_bound() {
            return Err(ConstructionError::StderrAlreadyRedirected {
                node: self.to_string(),
            });
        }
        Ok(self.redirected(StreamKind::Stderr, target.into(), append))
    }

    /// `self < source`
    pub fn redirect_stdin(self, source: impl Into<RedirectTarget>) -> Result<PipelineNode, ConstructionError> {
        if self.stdin_bound() {
            return Err(ConstructionError::StdinAlreadyConnected { node: self.to_string() });
        }
        Ok(self.redirected(StreamKind::Stdin, source.into(), false))
    }

    /// Discard stdout: `self > /dev/null`
    pub fn discard(self) -> Result<PipelineNode, ConstructionError> {
        self.redirect(RedirectTarget::Null, false)
    }

    /// Toggle suppression: suppressing a suppressed node unwraps it
    pub fn suppress(self) -> PipelineNode {
        match self {
            Self::Suppress(inner) => Arc::unwrap_or_clone(inner),
            node => Self::Suppress(Arc::new(node)),
        }
    }

    fn redirected(self, stream: StreamKind, target: RedirectTarget, append: bool) -> PipelineNode {
        Self::Redirect(
            Arc::new(self),
            Redirection {
                stream,
                target,
                append,
            },
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stream bindings
    // ─────────────────────────────────────────────────────────────────────────

    /// First stage: the one reading the expression's stdin
    pub fn head(&self) -> &Stage {
        match self {
            Self::Stage(stage) => stage,
            Self::Pipe(lhs, _) | Self::ErrorPipe(lhs, _) => lhs.head(),
            Self::Redirect(inner, _) | Self::Suppress(inner) => inner.head(),
        }
    }

    /// Last stage: the one writing the expression's stdout
    pub fn tail(&self) -> &Stage {
        match self {
            Self::Stage(stage) => stage,
            Self::Pipe(_, rhs) | Self::ErrorPipe(_, rhs) => rhs.tail(),
            Self::Redirect(inner, _) | Self::Suppress(inner) => inner.tail(),
        }
    }

    /// Whether the head stage's stdin is already connected
    pub fn stdin_bound(&self) -> bool {
        match self {
            Self::Stage(_) => false,
            Self::Pipe(lhs, _) | Self::ErrorPipe(lhs, _) => lhs.stdin_bound(),
            Self::Redirect(inner, redirection) => {
                redirection.stream == StreamKind::Stdin || inner.stdin_bound()
            }
            Self::Suppress(inner) => inner.stdin_bound(),
        }
    }

    /// Whether the tail stage's stdout is already redirected
    pub fn stdout_bound(&self) -> bool {
        match self {
            Self::Stage(_) => false,
            Self::Pipe(_, rhs) | Self::ErrorPipe(_, rhs) => rhs.stdout_bound(),
            Self::Redirect(inner, redirection) => {
                redirection.stream == StreamKind::Stdout || inner.stdout_bound()
            }
            Self::Suppress(inner) => inner.stdout_bound(),
        }
    }

    /// Whether the stderr of every stage in the expression is already bound
    pub fn stderr_bound(&self) -> bool {
        self.stderr_bindings().into_iter().all(|bound| bound)
    }

    /// Whether the tail stage's stderr is already bound
    pub fn tail_stderr_bound(&self) -> bool {
        self.stderr_bindings().last().copied().unwrap_or(false)
    }

    /// Per stage, in launch order: is its stderr redirected or piped
    fn stderr_bindings(&self) -> Vec<bool> {
        match self {
            Self::Stage(_) => vec![false],
            Self::Pipe(lhs, rhs) => {
                let mut bindings = lhs.stderr_bindings();
                bindings.extend(rhs.stderr_bindings());
                bindings
            }
            Self::ErrorPipe(lhs, rhs) => {
                let mut bindings = lhs.stderr_bindings();
                if let Some(producer) = bindings.last_mut() {
                    *producer = true;
                }
                bindings.extend(rhs.stderr_bindings());
                bindings
            }
            Self::Redirect(inner, redirection) if redirection.stream == StreamKind::Stderr => {
                vec![true; inner.stage_count()]
            }
            Self::Redirect(inner, _) | Self::Suppress(inner) => inner.stderr_bindings(),
        }
    }

    /// Number of stages in the expression
    pub fn stage_count(&self) -> usize {
        match self {
            Self::Stage(_) => 1,
            Self::Pipe(lhs, rhs) | Self::ErrorPipe(lhs, rhs) => lhs.stage_count() + rhs.stage_count(),
            Self::Redirect(inner, _) | Self::Suppress(inner) => inner.stage_count(),
        }
    }

    /// Stages in launch order
    pub fn stages(&self) -> Vec<&Stage> {
        let mut stages = Vec::with_capacity(self.stage_count());
        self.collect_stages(&mut stages);
        stages
    }

    fn collect_stages<'a>(&'a self, out: &mut Vec<&'a Stage>) {
        match self {
            Self::Stage(stage) => out.push(stage),
            Self::Pipe(lhs, rhs) | Self::ErrorPipe(lhs, rhs) => {
                lhs.collect_stages(out);
                rhs.collect_stages(out);
            }
            Self::Redirect(inner, _) | Self::Suppress(inner) => inner.collect_stages(out),
        }
    }
}

impl fmt::Display for PipelineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(stage) => write!(f, "{}", stage),
            Self::Pipe(lhs, rhs) => write!(f, "({} | {})", lhs, rhs),
            Self::ErrorPipe(lhs, rhs) => write!(f, "({} ^ {})", lhs, rhs),
            Self::Redirect(inner, redirection) => write!(f, "({} {})", inner, redirection),
            Self::Suppress(inner) => write!(f, "~{}", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(program: &str) -> Stage {
        Stage::new(program)
    }

    #[test]
    fn test_pipe_display() {
        let node = stage("ls").flag("l").pipe(stage("wc").flag("l")).unwrap();
        assert_eq!(node.to_string(), "(`ls -l` | `wc -l`)");
        assert_eq!(node.stage_count(), 2);
    }

    #[test]
    fn test_head_and_tail() {
        let node = stage("a")
            .pipe(stage("b"))
            .unwrap()
            .pipe(stage("c"))
            .unwrap()
            .redirect("out.txt", false)
            .unwrap();
        assert_eq!(node.head().program(), "a");
        assert_eq!(node.tail().program(), "c");
        let programs: Vec<_> = node.stages().iter().map(|s| s.program()).collect();
        assert_eq!(programs, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_pipe_from_redirected_stdout_rejected() {
        let redirected = stage("ls").redirect("out.txt", false).unwrap();
        let err = redirected.pipe(stage("wc")).unwrap_err();
        assert!(matches!(err, ConstructionError::StdoutAlreadyRedirected { .. }));
    }

    #[test]
    fn test_pipe_into_connected_stdin_rejected() {
        let fed = stage("wc").redirect_stdin("in.txt").unwrap();
        let err = stage("ls").pipe(fed).unwrap_err();
        assert!(matches!(err, ConstructionError::StdinAlreadyConnected { .. }));
    }

    #[test]
    fn test_redirect_stdin_of_pipe_feeds_head() {
        use crate::pipeline::plan::{plan, Source};

        // (a | b) < in.txt
        let piped = stage("a").pipe(stage("b")).unwrap();
        let node = piped.redirect_stdin("in.txt").unwrap();
        let plan = plan(&node).unwrap();
        assert_eq!(plan.stages()[0].stdin, Source::File("in.txt".into()));
        assert_eq!(plan.stages()[1].stdin, Source::Pipe(0));

        assert!(matches!(
            node.redirect_stdin("other.txt"),
            Err(ConstructionError::StdinAlreadyConnected { .. })
        ));
    }

    #[test]
    fn test_pipe_into_piped_consumer_allowed() {
        // a | (b | c): b's stdin is still free
        let rhs = stage("b").pipe(stage("c")).unwrap();
        assert!(stage("a").pipe(rhs).is_ok());
    }

    #[test]
    fn test_redirect_twice_rejected() {
        let node = stage("ls").redirect("a.txt", false).unwrap();
        assert!(matches!(
            node.redirect("b.txt", true),
            Err(ConstructionError::StdoutAlreadyRedirected { .. })
        ));

        let node = stage("ls").redirect_stderr(RedirectTarget::Null, false).unwrap();
        assert!(matches!(
            node.clone().redirect_stderr("err.txt", false),
            Err(ConstructionError::StderrAlreadyRedirected { .. })
        ));
        assert!(node.redirect("out.txt", false).is_ok());
    }

    #[test]
    fn test_error_pipe_binds_producer_stderr() {
        let node = stage("a").redirect_stderr("err.txt", false).unwrap();
        assert!(matches!(
            node.error_pipe(stage("b")),
            Err(ConstructionError::StderrAlreadyRedirected { .. })
        ));

        // stdout of the producer stays free after an error pipe
        let node = stage("a").error_pipe(stage("b")).unwrap();
        assert!(!node.stdout_bound());
        assert!(!node.stderr_bound());
        assert!(!node.tail_stderr_bound());
        assert_eq!(node.to_string(), "(`a` ^ `b`)");
    }

    #[test]
    fn test_stderr_redirect_of_composite() {
        let node = stage("a")
            .pipe(stage("b").redirect_stderr("b.err", false).unwrap())
            .unwrap();
        assert!(node.tail_stderr_bound());
        assert!(!node.stderr_bound());

        // `a` still has a free stderr
        let node = node.redirect_stderr("all.err", false).unwrap();
        assert!(node.stderr_bound());
        assert!(node.redirect_stderr("again.err", false).is_err());
    }

    #[test]
    fn test_suppress_toggles() {
        let node = stage("false").suppress();
        assert!(matches!(node, PipelineNode::Suppress(_)));
        assert_eq!(node.to_string(), "~`false`");

        let unwrapped = node.suppress();
        assert_eq!(unwrapped, PipelineNode::Stage(stage("false")));
    }

    #[test]
    fn test_redirect_display() {
        let node = stage("ls")
            .redirect("out.txt", true)
            .unwrap()
            .redirect_stderr(RedirectTarget::Null, false)
            .unwrap();
        assert_eq!(node.to_string(), "((`ls` >> out.txt) 2> /dev/null)");
    }

    #[test]
    fn test_nodes_are_reusable() {
        let shared = stage("sort").pipe(stage("uniq")).unwrap();
        let a = stage("cat").pipe(&shared).unwrap();
        let b = stage("ls").pipe(&shared).unwrap();
        assert_eq!(a.tail().program(), "uniq");
        assert_eq!(b.head().program(), "ls");
    }

    #[test]
    fn test_handle_targets_compare_by_identity() {
        let file = Arc::new(tempfile::tempfile().unwrap());
        let a = RedirectTarget::Handle(file.clone());
        let b = RedirectTarget::Handle(file);
        let c = RedirectTarget::from(tempfile::tempfile().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
