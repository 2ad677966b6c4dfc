// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Pipeline invocation
//!
//! [`invoke`] plans and launches a pipeline without waiting for it and
//! returns a [`PipelineHandle`]. Waiting runs the completion monitor, either
//! on the calling thread or, with [`PipelineHandle::wait_async`], on the
//! tokio blocking pool.

use std::collections::HashMap;
use std::io::{PipeReader, PipeWriter};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::env::Environment;
use crate::errors::{LaunchError, MonitorError, PipeshError, PipeshResult};
use crate::pipeline::node::PipelineNode;
use crate::pipeline::plan::{plan, Sink, Source};
use crate::pipeline::stage::Stage;
use crate::process::{
    aggregate, launch, LaunchOptions, Monitor, PipelineResult, RunningProcess, StageOutcome, Status, StatusSet,
};

/// Pipeline invocation options
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Run the stages in their own process group
    pub share_signal_group: bool,
    /// Upper bound on one monitor wait
    pub poll_interval: Duration,
    /// Kill the stages still running after this long
    pub timeout: Option<Duration>,
    /// Collect the last stage's stdout instead of inheriting it
    pub capture_stdout: bool,
    /// Collect the stderr of every stage that would inherit it
    pub capture_stderr: bool,
    pub working_dir: Option<PathBuf>,
    pub env: Environment,
    /// Bytes written to the first stage's stdin
    pub input: Option<Vec<u8>>,
    /// Cancels the invocation from another thread or task
    pub cancel: Option<CancellationToken>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            share_signal_group: false,
            poll_interval: Duration::from_millis(50),
            timeout: None,
            capture_stdout: false,
            capture_stderr: false,
            working_dir: None,
            env: Environment::new(),
            input: None,
            cancel: None,
        }
    }
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn share_signal_group(mut self, share: bool) -> Self {
        self.share_signal_group = share;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn capture_stdout(mut self, capture: bool) -> Self {
        self.capture_stdout = capture;
        self
    }

    pub fn capture_stderr(mut self, capture: bool) -> Self {
        self.capture_stderr = capture;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
struct StageMeta {
    index: usize,
    program: String,
    ok_statuses: StatusSet,
}

/// A launched pipeline
///
/// The stages run as soon as the handle exists. Call [`wait`](Self::wait)
/// or [`wait_async`](Self::wait_async) to reap them and get the result.
#[derive(Debug)]
pub struct PipelineHandle {
    stages: Vec<StageMeta>,
    processes: Vec<RunningProcess>,
    failures: Vec<LaunchError>,
    feed: Option<(usize, PipeWriter, Vec<u8>)>,
    stdout_capture: Option<(Option<usize>, PipeReader)>,
    stderr_capture: Option<PipeReader>,
    process_group: Option<u32>,
    cancel: CancellationToken,
    poll_interval: Duration,
    timeout: Option<Duration>,
    started: Instant,
}

/// Plan and launch a pipeline
pub fn invoke(node: &PipelineNode, options: &InvokeOptions) -> PipeshResult<PipelineHandle> {
    let started = Instant::now();

    let mut plan = plan(node)?.with_capture(options.capture_stdout, options.capture_stderr);
    if options.input.is_some() {
        plan = plan.with_input();
        if !plan.feeds_stdin() {
            warn!("input ignored: the first stage already reads from a redirect");
        }
    }

    info!(pipeline = %node, stages = plan.len(), "invoking pipeline");

    let env = options.env.resolve();
    let launched = launch(
        &plan,
        &LaunchOptions {
            env: &env,
            working_dir: options.working_dir.as_deref(),
            share_signal_group: options.share_signal_group,
        },
    )?;

    let feed_owner = plan
        .stages()
        .iter()
        .find(|p| p.stdin == Source::Feed)
        .map(|p| p.index);
    let stdout_owner = plan
        .stages()
        .iter()
        .find(|p| p.stdout == Sink::Captured)
        .map(|p| p.index);

    let feed = match (launched.stdin_feed, feed_owner, &options.input) {
        (Some(writer), Some(owner), Some(input)) => Some((owner, writer, input.clone())),
        _ => None,
    };

    Ok(PipelineHandle {
        stages: plan
            .stages()
            .iter()
            .map(|p| StageMeta {
                index: p.index,
                program: p.stage.program().to_string(),
                ok_statuses: p.ok_statuses(),
            })
            .collect(),
        processes: launched.processes,
        failures: launched.failures,
        feed,
        stdout_capture: launched.stdout_capture.map(|reader| (stdout_owner, reader)),
        stderr_capture: launched.stderr_capture,
        process_group: launched.process_group,
        cancel: options.cancel.clone().unwrap_or_default(),
        poll_interval: options.poll_interval,
        timeout: options.timeout,
        started,
    })
}

impl PipelineHandle {
    /// Process ids of the stages that were started
    pub fn pids(&self) -> Vec<u32> {
        self.processes.iter().map(RunningProcess::pid).collect()
    }

    /// Process group of the pipeline, when it has its own
    pub fn process_group(&self) -> Option<u32> {
        self.process_group
    }

    /// Stages that could not be started
    pub fn launch_errors(&self) -> &[LaunchError] {
        &self.failures
    }

    /// Token that cancels this invocation: running stages get SIGKILL
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Send `signal` to the pipeline
    ///
    /// Goes to the process group when the pipeline has one, to every
    /// started stage otherwise.
    pub fn signal(&self, signal: Signal) -> PipeshResult<()> {
        let result = match self.process_group {
            Some(pgid) => killpg(Pid::from_raw(pgid as i32), signal),
            None => self
                .processes
                .iter()
                .try_for_each(|p| kill(Pid::from_raw(p.pid() as i32), signal)),
        };
        result.map_err(|e| PipeshError::Io {
            message: format!("failed to send {}: {}", signal, e),
        })
    }

    /// Block until every stage has terminated
    pub fn wait(self) -> PipeshResult<PipelineResult> {
        let Self {
            stages,
            processes,
            failures,
            feed,
            stdout_capture,
            stderr_capture,
            cancel,
            poll_interval,
            timeout,
            started,
            ..
        } = self;

        let mut monitor = Monitor::new(processes, cancel)
            .poll_interval(poll_interval)
            .timeout(timeout);
        if let Some((owner, writer, data)) = feed {
            monitor = monitor.feed(owner, writer, data)?;
        }
        if let Some((owner, reader)) = stdout_capture {
            monitor = monitor.capture_stdout(owner, reader);
        }
        if let Some(reader) = stderr_capture {
            monitor = monitor.capture_stderr(reader);
        }

        let outcome = monitor.run()?;
        let statuses: HashMap<usize, Status> = outcome.statuses.into_iter().collect();

        let outcomes = stages
            .into_iter()
            .filter_map(|meta| {
                let launch_error = failures.iter().find(|f| f.stage() == meta.index).cloned();
                let status = match (statuses.get(&meta.index), &launch_error) {
                    (Some(status), _) => *status,
                    (None, Some(error)) => error.status(),
                    (None, None) => return None,
                };
                Some(StageOutcome {
                    index: meta.index,
                    program: meta.program,
                    status,
                    ok_statuses: meta.ok_statuses,
                    launch_error,
                })
            })
            .collect();

        let mut result = aggregate(outcomes);
        result.stdout = outcome.stdout;
        result.stderr = outcome.stderr;
        result.cancelled = outcome.cancelled;
        result.duration = started.elapsed();

        if result.failed {
            debug!(status = %result.status, failed = ?result.failed_stages(), "pipeline failed");
        }
        info!(
            status = %result.status,
            success = result.success(),
            duration_ms = result.duration.as_millis() as u64,
            "pipeline finished"
        );

        Ok(result)
    }

    /// [`wait`](Self::wait) on the tokio blocking pool
    pub async fn wait_async(self) -> PipeshResult<PipelineResult> {
        match tokio::task::spawn_blocking(move || self.wait()).await {
            Ok(result) => result,
            Err(e) => Err(MonitorError::Join { error: e.to_string() }.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conveniences
// ─────────────────────────────────────────────────────────────────────────────

impl PipelineNode {
    pub fn invoke(&self, options: &InvokeOptions) -> PipeshResult<PipelineHandle> {
        invoke(self, options)
    }

    /// Run with inherited streams; fails if any stage fails
    pub fn run(&self) -> PipeshResult<PipelineResult> {
        invoke(self, &InvokeOptions::default())?.wait()?.check()
    }

    /// Run with inherited streams and return the pipeline status
    pub fn status(&self) -> PipeshResult<Status> {
        Ok(invoke(self, &InvokeOptions::default())?.wait()?.status)
    }

    /// Run and return the captured stdout; fails if any stage fails
    pub fn output(&self) -> PipeshResult<Vec<u8>> {
        let options = InvokeOptions::new().capture_stdout(true);
        Ok(invoke(self, &options)?.wait()?.check()?.stdout)
    }

    /// [`output`](Self::output) decoded as UTF-8 (lossily)
    pub fn text(&self) -> PipeshResult<String> {
        Ok(String::from_utf8_lossy(&self.output()?).into_owned())
    }
}

impl Stage {
    pub fn invoke(&self, options: &InvokeOptions) -> PipeshResult<PipelineHandle> {
        PipelineNode::from(self).invoke(options)
    }

    pub fn run(&self) -> PipeshResult<PipelineResult> {
        PipelineNode::from(self).run()
    }

    pub fn status(&self) -> PipeshResult<Status> {
        PipelineNode::from(self).status()
    }

    pub fn output(&self) -> PipeshResult<Vec<u8>> {
        PipelineNode::from(self).output()
    }

    pub fn text(&self) -> PipeshResult<String> {
        PipelineNode::from(self).text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = InvokeOptions::default();
        assert!(!options.share_signal_group);
        assert_eq!(options.poll_interval, Duration::from_millis(50));
        assert!(options.timeout.is_none());
        assert!(!options.capture_stdout);
    }

    #[test]
    fn test_text() {
        let text = Stage::new("printf").arg("hello").text().unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn test_status_of_failing_pipeline() {
        let node = Stage::new("true").pipe(Stage::new("false")).unwrap();
        assert_eq!(node.status().unwrap(), Status::Exited(1));
        assert!(node.run().unwrap_err().is_stage_failure());
    }

    #[test]
    fn test_input_feed() {
        let options = InvokeOptions::new().capture_stdout(true).input("b\na\n");
        let result = Stage::new("sort").invoke(&options).unwrap().wait().unwrap();
        assert_eq!(result.stdout_text(), "a\nb\n");
    }

    #[test]
    fn test_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environment::new();
        env.set("PIPESH_TEST_VALUE", "42");
        let options = InvokeOptions::new()
            .capture_stdout(true)
            .working_dir(dir.path())
            .env(env);
        let result = Stage::new("sh")
            .arg("-c")
            .arg("echo $PIPESH_TEST_VALUE; pwd")
            .invoke(&options)
            .unwrap()
            .wait()
            .unwrap();
        let text = result.stdout_text();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("42"));
        let reported = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_signal_process_group() {
        let options = InvokeOptions::new().share_signal_group(true);
        let handle = Stage::new("sleep")
            .arg(30)
            .pipe(Stage::new("sleep").arg(30))
            .unwrap()
            .invoke(&options)
            .unwrap();
        assert_eq!(handle.pids().len(), 2);
        handle.signal(Signal::SIGTERM).unwrap();
        let result = handle.wait().unwrap();
        assert_eq!(
            result.statuses(),
            vec![(0, Status::Signaled(15)), (1, Status::Signaled(15))]
        );
    }

    #[tokio::test]
    async fn test_wait_async_with_cancel() {
        let handle = Stage::new("sleep").arg(30).invoke(&InvokeOptions::default()).unwrap();
        let token = handle.cancel_token();
        token.cancel();
        let result = handle.wait_async().await.unwrap();
        assert!(result.cancelled);
        assert_eq!(result.status, Status::Signaled(9));
    }
}
