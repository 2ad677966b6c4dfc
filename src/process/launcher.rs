// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Process launcher
//!
//! Creates the pipes of a plan, opens redirect targets and spawns one
//! process per stage. The parent keeps no pipe end it doesn't need: each
//! end is moved into the command of the stage that uses it and released as
//! soon as that stage is spawned (or fails to spawn), so EOF and broken
//! pipes propagate between stages exactly as in a shell.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, PipeReader, PipeWriter};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use crate::errors::LaunchError;
use crate::pipeline::{ExecutionPlan, PlannedStage, Sink, Source};
use crate::process::RunningProcess;

/// Parameters shared by every stage of an invocation
#[derive(Debug, Clone, Copy)]
pub struct LaunchOptions<'a> {
    /// Resolved environment overrides; `None` removes the variable
    pub env: &'a BTreeMap<String, Option<String>>,
    pub working_dir: Option<&'a Path>,
    /// Put every stage in a fresh process group led by the first stage
    pub share_signal_group: bool,
}

/// Outcome of launching a plan
#[derive(Debug)]
pub struct Launch {
    pub processes: Vec<RunningProcess>,
    /// Stages that could not be started
    pub failures: Vec<LaunchError>,
    /// Parent end of the first stage's stdin, when input is fed
    pub stdin_feed: Option<PipeWriter>,
    /// Parent end of the captured stdout
    pub stdout_capture: Option<PipeReader>,
    /// Parent end of the captured stderr
    pub stderr_capture: Option<PipeReader>,
    /// Process group of the pipeline when it got its own
    pub process_group: Option<u32>,
}

/// Spawn every stage of the plan
///
/// Errors only when the pipes themselves cannot be created. A stage that
/// fails to start is recorded in [`Launch::failures`] and the remaining
/// stages are still launched.
pub fn launch(plan: &ExecutionPlan, options: &LaunchOptions<'_>) -> io::Result<Launch> {
    let mut wiring = Wiring::new(plan, options.working_dir)?;
    let mut processes = Vec::with_capacity(plan.len());
    let mut failures = Vec::new();
    let mut process_group: Option<u32> = None;

    for planned in plan.stages() {
        let index = planned.index;
        let program = planned.stage.program();

        // all three are resolved so that a failure still releases every
        // pipe end reserved for this stage
        let stdin = wiring.source(index, &planned.stdin);
        let stdout = wiring.sink(index, &planned.stdout, Stream::Stdout);
        let stderr = wiring.sink(index, &planned.stderr, Stream::Stderr);

        let spawned = match (stdin, stdout, stderr) {
            (Ok(stdin), Ok(stdout), Ok(stderr)) => {
                let mut command = command_for(planned, options, process_group);
                command.stdin(stdin).stdout(stdout).stderr(stderr);
                let result = command
                    .spawn()
                    .map_err(|e| LaunchError::from_spawn(index, program, &e));
                // releases the parent's copies of this stage's descriptors
                drop(command);
                result
            }
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Err(e),
        };

        match spawned {
            Ok(child) => {
                debug!(stage = index, program = %program, pid = child.id(), "stage started");
                if options.share_signal_group && process_group.is_none() {
                    process_group = Some(child.id());
                }
                processes.push(RunningProcess::new(index, program, child));
            }
            Err(e) => {
                warn!(stage = index, program = %program, error = %e, "stage failed to launch");
                failures.push(e);
            }
        }
    }

    let Wiring {
        stdin_feed,
        stdout_capture,
        stderr_capture,
        ..
    } = wiring;

    Ok(Launch {
        processes,
        failures,
        stdin_feed,
        stdout_capture,
        stderr_capture,
        process_group,
    })
}

fn command_for(planned: &PlannedStage, options: &LaunchOptions<'_>, group: Option<u32>) -> Command {
    let mut command = Command::new(planned.stage.program());
    command.args(planned.stage.argv());

    if let Some(dir) = options.working_dir {
        command.current_dir(dir);
    }

    for (key, value) in options.env {
        match value {
            Some(value) => command.env(key, value),
            None => command.env_remove(key),
        };
    }

    if options.share_signal_group {
        // 0 makes the first stage the leader of a new group
        command.process_group(group.map_or(0, |pgid| pgid as i32));
    }

    command
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Descriptors created for a launch, handed out to stages one by one
///
/// Whatever is left when the launch ends is closed on drop, except the
/// parent ends of the feed and capture pipes which move into [`Launch`].
struct Wiring {
    readers: Vec<Option<PipeReader>>,
    writers: Vec<Option<PipeWriter>>,
    feed_reader: Option<PipeReader>,
    stdin_feed: Option<PipeWriter>,
    stdout_writer: Option<PipeWriter>,
    stdout_capture: Option<PipeReader>,
    stderr_writer: Option<PipeWriter>,
    stderr_capture: Option<PipeReader>,
    working_dir: Option<PathBuf>,
}

impl Wiring {
    fn new(plan: &ExecutionPlan, working_dir: Option<&Path>) -> io::Result<Self> {
        let mut readers = Vec::with_capacity(plan.pipe_count());
        let mut writers = Vec::with_capacity(plan.pipe_count());
        for _ in 0..plan.pipe_count() {
            let (reader, writer) = io::pipe()?;
            readers.push(Some(reader));
            writers.push(Some(writer));
        }

        let (feed_reader, stdin_feed) = optional_pipe(plan.feeds_stdin())?;
        let (stdout_capture, stdout_writer) = optional_pipe(plan.captures_stdout())?;
        let (stderr_capture, stderr_writer) = optional_pipe(plan.captures_stderr())?;

        Ok(Self {
            readers,
            writers,
            feed_reader,
            stdin_feed,
            stdout_writer,
            stdout_capture,
            stderr_writer,
            stderr_capture,
            working_dir: working_dir.map(Path::to_path_buf),
        })
    }

    fn source(&mut self, stage: usize, source: &Source) -> Result<Stdio, LaunchError> {
        match source {
            Source::Inherited => Ok(Stdio::inherit()),
            Source::Discarded => Ok(Stdio::null()),
            Source::Pipe(id) => Ok(self
                .readers
                .get_mut(*id)
                .and_then(Option::take)
                .map_or_else(Stdio::null, Stdio::from)),
            Source::Feed => Ok(self.feed_reader.take().map_or_else(Stdio::null, Stdio::from)),
            Source::File(path) => {
                let path = self.resolve(path);
                File::open(&path)
                    .map(Stdio::from)
                    .map_err(|e| redirect_error(stage, path, e))
            }
            Source::Handle(file) => file
                .try_clone()
                .map(Stdio::from)
                .map_err(|e| redirect_error(stage, PathBuf::from("<handle>"), e)),
        }
    }

    fn sink(&mut self, stage: usize, sink: &Sink, stream: Stream) -> Result<Stdio, LaunchError> {
        match sink {
            Sink::Inherited => Ok(Stdio::inherit()),
            Sink::Discarded => Ok(Stdio::null()),
            Sink::Pipe(id) => Ok(self
                .writers
                .get_mut(*id)
                .and_then(Option::take)
                .map_or_else(Stdio::null, Stdio::from)),
            Sink::Captured => {
                let writer = match stream {
                    Stream::Stdout => &self.stdout_writer,
                    Stream::Stderr => &self.stderr_writer,
                };
                match writer {
                    // several stages may share the stderr capture
                    Some(writer) => writer
                        .try_clone()
                        .map(Stdio::from)
                        .map_err(|e| redirect_error(stage, PathBuf::from("<capture>"), e)),
                    None => Ok(Stdio::null()),
                }
            }
            Sink::File { path, append } => {
                let path = self.resolve(path);
                open_output(&path, *append)
                    .map(Stdio::from)
                    .map_err(|e| redirect_error(stage, path, e))
            }
            Sink::Handle(file) => file
                .try_clone()
                .map(Stdio::from)
                .map_err(|e| redirect_error(stage, PathBuf::from("<handle>"), e)),
        }
    }

    /// Relative redirect paths are relative to the stages' working directory
    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }
}

fn optional_pipe(wanted: bool) -> io::Result<(Option<PipeReader>, Option<PipeWriter>)> {
    if !wanted {
        return Ok((None, None));
    }
    let (reader, writer) = io::pipe()?;
    Ok((Some(reader), Some(writer)))
}

fn open_output(path: &Path, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path)
}

fn redirect_error(stage: usize, path: PathBuf, error: io::Error) -> LaunchError {
    LaunchError::Redirect {
        stage,
        path,
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::plan;
    use crate::Stage;
    use std::io::Read;

    fn no_env() -> BTreeMap<String, Option<String>> {
        BTreeMap::new()
    }

    fn wait_all(launch: &mut Launch) {
        for process in &mut launch.processes {
            while process.try_reap().unwrap().is_none() {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        }
    }

    #[test]
    fn test_launch_pipe_and_capture() {
        let node = Stage::new("printf")
            .arg("a\\nb\\n")
            .pipe(Stage::new("wc").flag("l"))
            .unwrap();
        let plan = plan(&node).unwrap().with_capture(true, false);
        let env = no_env();
        let options = LaunchOptions {
            env: &env,
            working_dir: None,
            share_signal_group: false,
        };

        let mut launch = launch(&plan, &options).unwrap();
        assert_eq!(launch.processes.len(), 2);
        assert!(launch.failures.is_empty());

        // every writer of the capture pipe belongs to a child, so this ends
        let mut output = String::new();
        launch
            .stdout_capture
            .take()
            .unwrap()
            .read_to_string(&mut output)
            .unwrap();
        assert_eq!(output.trim(), "2");
        wait_all(&mut launch);
    }

    #[test]
    fn test_missing_program_does_not_block_neighbours() {
        let node = Stage::new("printf")
            .arg("data")
            .pipe(Stage::new("pipesh-no-such-program"))
            .unwrap();
        let plan = plan(&node).unwrap();
        let env = no_env();
        let options = LaunchOptions {
            env: &env,
            working_dir: None,
            share_signal_group: false,
        };

        let mut launch = launch(&plan, &options).unwrap();
        assert_eq!(launch.processes.len(), 1);
        assert_eq!(launch.failures.len(), 1);
        assert!(matches!(launch.failures[0], LaunchError::NotFound { stage: 1, .. }));
        wait_all(&mut launch);
    }

    #[test]
    fn test_missing_input_file_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let node = Stage::new("cat").redirect_stdin("missing.txt").unwrap();
        let plan = plan(&node).unwrap();
        let env = no_env();
        let options = LaunchOptions {
            env: &env,
            working_dir: Some(dir.path()),
            share_signal_group: false,
        };

        let launch = launch(&plan, &options).unwrap();
        assert!(launch.processes.is_empty());
        assert!(matches!(launch.failures[0], LaunchError::Redirect { stage: 0, .. }));
    }

    #[test]
    fn test_process_group_led_by_first_stage() {
        let node = Stage::new("true").pipe(Stage::new("true")).unwrap();
        let plan = plan(&node).unwrap();
        let env = no_env();
        let options = LaunchOptions {
            env: &env,
            working_dir: None,
            share_signal_group: true,
        };

        let mut launch = launch(&plan, &options).unwrap();
        assert_eq!(launch.process_group, Some(launch.processes[0].pid()));
        wait_all(&mut launch);
    }

    #[test]
    fn test_open_output_truncates_or_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "old\n").unwrap();

        drop(open_output(&path, true).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\n");

        drop(open_output(&path, false).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
