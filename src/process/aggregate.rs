// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Result aggregation

use std::time::Duration;

use crate::errors::{LaunchError, PipeshError, PipeshResult};
use crate::process::{Status, StatusSet};

/// Final state of one stage, as handed to [`aggregate`]
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub index: usize,
    pub program: String,
    pub status: Status,
    /// Statuses that don't count as a failure of this stage
    pub ok_statuses: StatusSet,
    /// Set when the stage never ran
    pub launch_error: Option<LaunchError>,
}

/// Per-stage line of a [`PipelineResult`]
#[derive(Debug, Clone)]
pub struct StageReport {
    pub index: usize,
    pub program: String,
    pub status: Status,
    pub failed: bool,
    pub launch_error: Option<LaunchError>,
}

/// Outcome of one invocation
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Status of the last stage
    pub status: Status,
    /// Some stage reported a status outside its ok set
    pub failed: bool,
    pub stages: Vec<StageReport>,
    /// Captured stdout of the last stage
    pub stdout: Vec<u8>,
    /// Captured stderr of every stage
    pub stderr: Vec<u8>,
    /// Stages were killed because the invocation was cancelled or timed out
    pub cancelled: bool,
    pub duration: Duration,
}

/// Fold per-stage statuses into a pipeline result
///
/// The pipeline reports the status of its last stage and fails when any
/// stage fails, so `false | true` is a failure with status `Exited(0)`.
pub fn aggregate(mut outcomes: Vec<StageOutcome>) -> PipelineResult {
    outcomes.sort_by_key(|o| o.index);

    let status = outcomes.last().map_or(Status::Exited(0), |o| o.status);
    let stages: Vec<StageReport> = outcomes
        .into_iter()
        .map(|o| StageReport {
            failed: !o.status.success() && !o.ok_statuses.contains(&o.status),
            index: o.index,
            program: o.program,
            status: o.status,
            launch_error: o.launch_error,
        })
        .collect();

    PipelineResult {
        status,
        failed: stages.iter().any(|s| s.failed),
        stages,
        stdout: Vec::new(),
        stderr: Vec::new(),
        cancelled: false,
        duration: Duration::ZERO,
    }
}

impl PipelineResult {
    pub fn success(&self) -> bool {
        !self.failed
    }

    /// `(stage index, status)` for every stage
    pub fn statuses(&self) -> Vec<(usize, Status)> {
        self.stages.iter().map(|s| (s.index, s.status)).collect()
    }

    pub fn failed_stages(&self) -> Vec<usize> {
        self.stages.iter().filter(|s| s.failed).map(|s| s.index).collect()
    }

    pub fn launch_errors(&self) -> impl Iterator<Item = &LaunchError> {
        self.stages.iter().filter_map(|s| s.launch_error.as_ref())
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn a failed result into [`PipeshError::PipelineFailed`]
    pub fn check(self) -> PipeshResult<Self> {
        if self.failed {
            return Err(PipeshError::pipeline_failed(self.status, self.failed_stages()));
        }
        Ok(self)
    }

    /// Like [`check`](Self::check), but names the first failing stage
    ///
    /// A stage that never ran reports its launch error.
    pub fn check_strict(self) -> PipeshResult<Self> {
        match self.stages.iter().find(|s| s.failed) {
            Some(stage) => match &stage.launch_error {
                Some(error) => Err(error.clone().into()),
                None => Err(PipeshError::StageFailed {
                    stage: stage.index,
                    program: stage.program.clone(),
                    status: stage.status,
                }),
            },
            None => Ok(self),
        }
    }
}
