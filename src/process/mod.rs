// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Process execution
//!
//! Launching the stages of an [`ExecutionPlan`](crate::pipeline::ExecutionPlan),
//! watching them until every one has terminated, and folding their statuses
//! into a [`PipelineResult`].

mod aggregate;
mod launcher;
mod monitor;
mod status;

pub use aggregate::{aggregate, PipelineResult, StageOutcome, StageReport};
pub use launcher::{launch, Launch, LaunchOptions};
pub use monitor::{Monitor, MonitorOutcome, MonitorState};
pub use status::{Status, StatusSet};

use std::io;
use std::process::Child;

/// A launched stage
#[derive(Debug)]
pub struct RunningProcess {
    index: usize,
    program: String,
    child: Child,
    status: Option<Status>,
}

impl RunningProcess {
    pub(crate) fn new(index: usize, program: impl Into<String>, child: Child) -> Self {
        Self {
            index,
            program: program.into(),
            child,
            status: None,
        }
    }

    /// Index of the stage in its plan
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Final status, once the process has been reaped
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status.is_none()
    }

    /// Reap the process if it has terminated. The status is recorded once.
    pub(crate) fn try_reap(&mut self) -> io::Result<Option<Status>> {
        if self.status.is_some() {
            return Ok(self.status);
        }
        if let Some(exit) = self.child.try_wait()? {
            self.status = Some(Status::from(exit));
        }
        Ok(self.status)
    }

    /// Send SIGKILL to a process that has not been reaped yet
    pub(crate) fn kill(&mut self) -> io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        self.child.kill()
    }

    /// Kill the process unless it already terminated, then wait for it
    ///
    /// A process that can no longer be waited for is not signalled: its pid
    /// may belong to someone else by now.
    pub(crate) fn terminate(&mut self) -> io::Result<Status> {
        if let Some(status) = self.try_reap()? {
            return Ok(status);
        }
        self.child.kill()?;
        let status = Status::from(self.child.wait()?);
        self.status = Some(status);
        Ok(status)
    }
}
