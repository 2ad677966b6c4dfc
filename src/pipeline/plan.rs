// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Execution planning
//!
//! Flattens a [`PipelineNode`] into stages in launch order, each with the
//! source of its stdin and the sinks of its stdout and stderr. Planning is
//! pure: no descriptor is created until the plan is launched.

use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::ConstructionError;
use crate::pipeline::node::{PipelineNode, RedirectTarget, Redirection, StreamKind};
use crate::pipeline::stage::Stage;
use crate::process::StatusSet;

/// Identifier of a pipe connecting two stages
pub type PipeId = usize;

/// Where a stage reads its stdin from
#[derive(Debug, Clone)]
pub enum Source {
    Inherited,
    Pipe(PipeId),
    File(PathBuf),
    Handle(Arc<File>),
    Discarded,
    /// Bytes supplied with the invocation, written by the monitor
    Feed,
}

/// Where a stage writes one of its output streams
#[derive(Debug, Clone)]
pub enum Sink {
    Inherited,
    Pipe(PipeId),
    File { path: PathBuf, append: bool },
    Handle(Arc<File>),
    Discarded,
    /// Collected by the monitor into the pipeline result
    Captured,
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Inherited, Self::Inherited)
            | (Self::Discarded, Self::Discarded)
            | (Self::Feed, Self::Feed) => true,
            (Self::Pipe(a), Self::Pipe(b)) => a == b,
            (Self::File(a), Self::File(b)) => a == b,
            (Self::Handle(a), Self::Handle(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Sink {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Inherited, Self::Inherited)
            | (Self::Discarded, Self::Discarded)
            | (Self::Captured, Self::Captured) => true,
            (Self::Pipe(a), Self::Pipe(b)) => a == b,
            (
                Self::File { path: a, append: x },
                Self::File { path: b, append: y },
            ) => a == b && x == y,
            (Self::Handle(a), Self::Handle(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherited => write!(f, "inherit"),
            Self::Pipe(id) => write!(f, "pipe#{}", id),
            Self::File(path) => write!(f, "< {}", path.display()),
            Self::Handle(_) => write!(f, "< <handle>"),
            Self::Discarded => write!(f, "null"),
            Self::Feed => write!(f, "feed"),
        }
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherited => write!(f, "inherit"),
            Self::Pipe(id) => write!(f, "pipe#{}", id),
            Self::File { path, append: false } => write!(f, "> {}", path.display()),
            Self::File { path, append: true } => write!(f, ">> {}", path.display()),
            Self::Handle(_) => write!(f, "> <handle>"),
            Self::Discarded => write!(f, "null"),
            Self::Captured => write!(f, "capture"),
        }
    }
}

impl From<&RedirectTarget> for Source {
    fn from(target: &RedirectTarget) -> Self {
        match target {
            RedirectTarget::Path(path) => Self::File(path.clone()),
            RedirectTarget::Handle(file) => Self::Handle(file.clone()),
            RedirectTarget::Null => Self::Discarded,
        }
    }
}

impl Sink {
    fn from_redirection(redirection: &Redirection) -> Self {
        match &redirection.target {
            RedirectTarget::Path(path) => Self::File {
                path: path.clone(),
                append: redirection.append,
            },
            RedirectTarget::Handle(file) => Self::Handle(file.clone()),
            RedirectTarget::Null => Self::Discarded,
        }
    }
}

/// A stage with its descriptor wiring
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStage {
    pub index: usize,
    pub stage: Stage,
    pub stdin: Source,
    pub stdout: Sink,
    pub stderr: Sink,
    /// Inside a `Suppress` node
    pub suppressed: bool,
}

impl PlannedStage {
    fn new(index: usize, stage: Stage, suppressed: bool) -> Self {
        Self {
            index,
            stage,
            stdin: Source::Inherited,
            stdout: Sink::Inherited,
            stderr: Sink::Inherited,
            suppressed,
        }
    }

    /// Statuses that don't mark this stage as failed
    pub fn ok_statuses(&self) -> StatusSet {
        if self.suppressed {
            StatusSet::All
        } else {
            self.stage.ok_statuses()
        }
    }
}

/// Stages of one invocation in launch order
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    stages: Vec<PlannedStage>,
    pipe_count: usize,
}

/// Plan the execution of a pipeline expression
///
/// Nodes built through the combinators always plan. A tree assembled from
/// the enum variants directly is checked here, so a stream is never bound
/// twice.
pub fn plan(node: &PipelineNode) -> Result<ExecutionPlan, ConstructionError> {
    let mut planner = Planner::default();
    planner.walk(node, false)?;
    Ok(ExecutionPlan {
        stages: planner.stages,
        pipe_count: planner.pipe_count,
    })
}

/// Range of stage indices covered by a sub-expression
#[derive(Debug, Clone, Copy)]
struct Span {
    head: usize,
    tail: usize,
}

#[derive(Default)]
struct Planner {
    stages: Vec<PlannedStage>,
    pipe_count: usize,
}

impl Planner {
    fn walk(&mut self, node: &PipelineNode, suppressed: bool) -> Result<Span, ConstructionError> {
        match node {
            PipelineNode::Stage(stage) => {
                let index = self.stages.len();
                self.stages.push(PlannedStage::new(index, stage.clone(), suppressed));
                Ok(Span {
                    head: index,
                    tail: index,
                })
            }
            PipelineNode::Pipe(lhs, rhs) => {
                let left = self.walk(lhs, suppressed)?;
                let right = self.walk(rhs, suppressed)?;
                if self.stages[left.tail].stdout != Sink::Inherited {
                    return Err(ConstructionError::StdoutAlreadyRedirected { node: lhs.to_string() });
                }
                self.check_stdin_free(right.head, rhs)?;
                let pipe = self.next_pipe();
                self.stages[left.tail].stdout = Sink::Pipe(pipe);
                self.stages[right.head].stdin = Source::Pipe(pipe);
                Ok(Span {
                    head: left.head,
                    tail: right.tail,
                })
            }
            PipelineNode::ErrorPipe(lhs, rhs) => {
                let left = self.walk(lhs, suppressed)?;
                let right = self.walk(rhs, suppressed)?;
                if self.stages[left.tail].stderr != Sink::Inherited {
                    return Err(ConstructionError::StderrAlreadyRedirected { node: lhs.to_string() });
                }
                self.check_stdin_free(right.head, rhs)?;
                let pipe = self.next_pipe();
                self.stages[left.tail].stderr = Sink::Pipe(pipe);
                self.stages[right.head].stdin = Source::Pipe(pipe);
                Ok(Span {
                    head: left.head,
                    tail: right.tail,
                })
            }
            PipelineNode::Redirect(inner, redirection) => {
                let span = self.walk(inner, suppressed)?;
                self.apply(span, inner, redirection)?;
                Ok(span)
            }
            PipelineNode::Suppress(inner) => self.walk(inner, true),
        }
    }

    fn check_stdin_free(&self, index: usize, node: &PipelineNode) -> Result<(), ConstructionError> {
        if self.stages[index].stdin == Source::Inherited {
            Ok(())
        } else {
            Err(ConstructionError::StdinAlreadyConnected { node: node.to_string() })
        }
    }

    fn apply(&mut self, span: Span, inner: &PipelineNode, redirection: &Redirection) -> Result<(), ConstructionError> {
        match redirection.stream {
            StreamKind::Stdin => {
                self.check_stdin_free(span.head, inner)?;
                self.stages[span.head].stdin = Source::from(&redirection.target);
            }
            StreamKind::Stdout => {
                if self.stages[span.tail].stdout != Sink::Inherited {
                    return Err(ConstructionError::StdoutAlreadyRedirected { node: inner.to_string() });
                }
                self.stages[span.tail].stdout = Sink::from_redirection(redirection);
            }
            StreamKind::Stderr => {
                let mut applied = false;
                for planned in &mut self.stages[span.head..=span.tail] {
                    if planned.stderr == Sink::Inherited {
                        planned.stderr = Sink::from_redirection(redirection);
                        applied = true;
                    }
                }
                if !applied {
                    return Err(ConstructionError::StderrAlreadyRedirected { node: inner.to_string() });
                }
            }
        }
        Ok(())
    }

    fn next_pipe(&mut self) -> PipeId {
        let id = self.pipe_count;
        self.pipe_count += 1;
        id
    }
}

impl ExecutionPlan {
    pub fn stages(&self) -> &[PlannedStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Number of pipes connecting stages
    pub fn pipe_count(&self) -> usize {
        self.pipe_count
    }

    /// Capture the last stage's stdout and/or every stage's stderr
    ///
    /// Only streams still inherited are captured; redirected and piped
    /// streams keep their destination.
    pub fn with_capture(mut self, stdout: bool, stderr: bool) -> Self {
        if stdout {
            if let Some(last) = self.stages.last_mut() {
                if last.stdout == Sink::Inherited {
                    last.stdout = Sink::Captured;
                }
            }
        }
        if stderr {
            for planned in &mut self.stages {
                if planned.stderr == Sink::Inherited {
                    planned.stderr = Sink::Captured;
                }
            }
        }
        self
    }

    /// Feed the first stage's stdin from bytes supplied at invocation
    pub fn with_input(mut self) -> Self {
        if let Some(first) = self.stages.first_mut() {
            if first.stdin == Source::Inherited {
                first.stdin = Source::Feed;
            }
        }
        self
    }

    pub fn captures_stdout(&self) -> bool {
        self.stages.iter().any(|s| s.stdout == Sink::Captured)
    }

    pub fn captures_stderr(&self) -> bool {
        self.stages.iter().any(|s| s.stderr == Sink::Captured)
    }

    pub fn feeds_stdin(&self) -> bool {
        self.stages.iter().any(|s| s.stdin == Source::Feed)
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<4} {:<24} {:<16} {:<16} {:<16}",
            "#", "program", "stdin", "stdout", "stderr"
        )?;
        for planned in &self.stages {
            let program = if planned.suppressed {
                format!("~{}", planned.stage.program())
            } else {
                planned.stage.program().to_string()
            };
            writeln!(
                f,
                "{:<4} {:<24} {:<16} {:<16} {:<16}",
                planned.index,
                program,
                planned.stdin.to_string(),
                planned.stdout.to_string(),
                planned.stderr.to_string()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stage(program: &str) -> Stage {
        Stage::new(program)
    }

    /// Every pipe id must appear exactly once as a sink and once as a source
    fn assert_pipes_one_to_one(plan: &ExecutionPlan) {
        let mut sinks: HashMap<PipeId, usize> = HashMap::new();
        let mut sources: HashMap<PipeId, usize> = HashMap::new();
        for planned in plan.stages() {
            if let Source::Pipe(id) = planned.stdin {
                *sources.entry(id).or_default() += 1;
            }
            for sink in [&planned.stdout, &planned.stderr] {
                if let Sink::Pipe(id) = sink {
                    *sinks.entry(*id).or_default() += 1;
                }
            }
        }
        for id in 0..plan.pipe_count() {
            assert_eq!(sinks.get(&id), Some(&1), "pipe {} sinks", id);
            assert_eq!(sources.get(&id), Some(&1), "pipe {} sources", id);
        }
    }

    #[test]
    fn test_single_stage() {
        let plan = plan(&stage("ls").into()).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.pipe_count(), 0);
        let only = &plan.stages()[0];
        assert_eq!(only.stdin, Source::Inherited);
        assert_eq!(only.stdout, Sink::Inherited);
        assert_eq!(only.stderr, Sink::Inherited);
    }

    #[test]
    fn test_three_stage_pipe() {
        let node = stage("a")
            .pipe(stage("b"))
            .unwrap()
            .pipe(stage("c"))
            .unwrap();
        let plan = plan(&node).unwrap();
        let s = plan.stages();

        assert_eq!(plan.pipe_count(), 2);
        assert_eq!(s[0].stdin, Source::Inherited);
        assert_eq!(s[0].stdout, Sink::Pipe(0));
        assert_eq!(s[1].stdin, Source::Pipe(0));
        assert_eq!(s[1].stdout, Sink::Pipe(1));
        assert_eq!(s[2].stdin, Source::Pipe(1));
        assert_eq!(s[2].stdout, Sink::Inherited);
        assert_pipes_one_to_one(&plan);
    }

    #[test]
    fn test_right_nested_pipe() {
        let node = stage("a")
            .pipe(stage("b").pipe(stage("c")).unwrap())
            .unwrap();
        let plan = plan(&node).unwrap();
        let programs: Vec<_> = plan.stages().iter().map(|s| s.stage.program()).collect();
        assert_eq!(programs, vec!["a", "b", "c"]);
        assert_eq!(plan.stages()[0].stdout, plan_sink_of(&plan, 1));
        assert_pipes_one_to_one(&plan);
    }

    fn plan_sink_of(plan: &ExecutionPlan, consumer: usize) -> Sink {
        match plan.stages()[consumer].stdin {
            Source::Pipe(id) => Sink::Pipe(id),
            _ => Sink::Inherited,
        }
    }

    #[test]
    fn test_error_pipe_wiring() {
        let node = stage("a").error_pipe(stage("b")).unwrap();
        let plan = plan(&node).unwrap();
        let s = plan.stages();

        assert_eq!(s[0].stdout, Sink::Inherited);
        assert_eq!(s[0].stderr, Sink::Pipe(0));
        assert_eq!(s[1].stdin, Source::Pipe(0));
        assert_eq!(s[1].stdout, Sink::Inherited);
        assert_pipes_one_to_one(&plan);
    }

    #[test]
    fn test_redirect_applies_to_tail() {
        let node = stage("a")
            .pipe(stage("b"))
            .unwrap()
            .redirect("out.txt", true)
            .unwrap();
        let plan = plan(&node).unwrap();
        assert_eq!(plan.stages()[0].stdout, Sink::Pipe(0));
        assert_eq!(
            plan.stages()[1].stdout,
            Sink::File {
                path: PathBuf::from("out.txt"),
                append: true
            }
        );
    }

    #[test]
    fn test_stdin_redirect_applies_to_head() {
        let node = stage("a")
            .redirect_stdin("in.txt")
            .unwrap()
            .pipe(stage("b"))
            .unwrap();
        let plan = plan(&node).unwrap();
        assert_eq!(plan.stages()[0].stdin, Source::File(PathBuf::from("in.txt")));
        assert_eq!(plan.stages()[1].stdin, Source::Pipe(0));
    }

    #[test]
    fn test_stderr_redirect_keeps_inner_bindings() {
        let node = stage("a")
            .error_pipe(stage("b"))
            .unwrap()
            .redirect_stderr(RedirectTarget::Null, false)
            .unwrap();
        let plan = plan(&node).unwrap();
        assert_eq!(plan.stages()[0].stderr, Sink::Pipe(0));
        assert_eq!(plan.stages()[1].stderr, Sink::Discarded);
    }

    #[test]
    fn test_suppress_propagates() {
        let node = stage("false")
            .suppress()
            .pipe(stage("cat"))
            .unwrap();
        let plan = plan(&node).unwrap();
        assert!(plan.stages()[0].suppressed);
        assert!(plan.stages()[0].ok_statuses().is_all());
        assert!(!plan.stages()[1].suppressed);
    }

    #[test]
    fn test_at_most_one_inherited_stdout_for_plain_pipes() {
        let node = stage("a")
            .pipe(stage("b"))
            .unwrap()
            .pipe(stage("c"))
            .unwrap();
        let plan = plan(&node).unwrap();
        let inherited = plan
            .stages()
            .iter()
            .filter(|s| s.stdout == Sink::Inherited)
            .count();
        assert_eq!(inherited, 1);
        let inherited_stdin = plan
            .stages()
            .iter()
            .filter(|s| s.stdin == Source::Inherited)
            .count();
        assert_eq!(inherited_stdin, 1);
    }

    #[test]
    fn test_with_capture_and_input() {
        let node = stage("a")
            .pipe(stage("b"))
            .unwrap();
        let plan = plan(&node).unwrap().with_capture(true, true).with_input();
        let s = plan.stages();
        assert_eq!(s[0].stdin, Source::Feed);
        assert_eq!(s[0].stdout, Sink::Pipe(0));
        assert_eq!(s[1].stdout, Sink::Captured);
        assert_eq!(s[0].stderr, Sink::Captured);
        assert_eq!(s[1].stderr, Sink::Captured);
        assert!(plan.captures_stdout());
        assert!(plan.feeds_stdin());
    }

    #[test]
    fn test_capture_leaves_redirects_alone() {
        let node = stage("a").redirect("out.txt", false).unwrap();
        let plan = plan(&node).unwrap().with_capture(true, false);
        assert!(!plan.captures_stdout());
    }

    #[test]
    fn test_hand_built_conflicts_rejected() {
        let redirected = Arc::new(stage("ls").redirect("out.txt", false).unwrap());
        let wc = Arc::new(PipelineNode::from(stage("wc")));

        let node = PipelineNode::Pipe(redirected.clone(), wc.clone());
        assert!(matches!(
            plan(&node),
            Err(ConstructionError::StdoutAlreadyRedirected { .. })
        ));

        let fed = Arc::new(stage("wc").redirect_stdin("in.txt").unwrap());
        let node = PipelineNode::Pipe(Arc::new(stage("ls").into()), fed);
        assert!(matches!(
            plan(&node),
            Err(ConstructionError::StdinAlreadyConnected { .. })
        ));

        let node = PipelineNode::Redirect(
            redirected,
            Redirection {
                stream: StreamKind::Stdout,
                target: RedirectTarget::Null,
                append: false,
            },
        );
        assert!(matches!(
            plan(&node),
            Err(ConstructionError::StdoutAlreadyRedirected { .. })
        ));

        let quiet = Arc::new(stage("make").redirect_stderr(RedirectTarget::Null, false).unwrap());
        let node = PipelineNode::ErrorPipe(quiet, wc);
        assert!(matches!(
            plan(&node),
            Err(ConstructionError::StderrAlreadyRedirected { .. })
        ));
    }

    #[test]
    fn test_display_table() {
        let node = stage("ls").pipe(stage("wc")).unwrap();
        let table = plan(&node).unwrap().to_string();
        assert!(table.contains("pipe#0"));
        assert!(table.lines().count() == 3);
    }
}
