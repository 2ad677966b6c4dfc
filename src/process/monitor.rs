// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Completion monitor
//!
//! A single-threaded readiness loop that runs until every launched stage
//! has terminated:
//!
//! ```text
//! Running(n) ──(n == 0)──> Draining ──> Done
//! ```
//!
//! Each iteration waits on one `poll(2)` covering the parent ends of the
//! capture and feed pipes plus a self-pipe written on `SIGCHLD`. The wait is
//! bounded by the poll interval: the self-pipe only shortens it, liveness
//! is always confirmed with a non-blocking reap of every running stage.
//!
//! When a stage terminates, its stdin feed is closed first, then whatever
//! is left of its stdout capture is drained and closed.

use std::io::{self, PipeReader, PipeWriter, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::MonitorError;
use crate::process::{RunningProcess, Status};

const READ_CHUNK: usize = 64 * 1024;

/// Lifecycle of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Number of stages not yet finalized
    Running(usize),
    Draining,
    Done,
}

/// What the monitor collected
#[derive(Debug, Clone, Default)]
pub struct MonitorOutcome {
    /// Status of every launched stage, by stage index
    pub statuses: Vec<(usize, Status)>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Stages were killed by cancellation or timeout
    pub cancelled: bool,
}

/// Watches the processes of one invocation
#[derive(Debug)]
pub struct Monitor {
    processes: Vec<RunningProcess>,
    feed: Option<Feed>,
    stdout: Option<Capture>,
    stderr: Option<Capture>,
    poll_interval: Duration,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    cancelled: bool,
    state: MonitorState,
}

impl Monitor {
    pub fn new(processes: Vec<RunningProcess>, cancel: CancellationToken) -> Self {
        let running = processes.len();
        Self {
            processes,
            feed: None,
            stdout: None,
            stderr: None,
            poll_interval: Duration::from_millis(50),
            deadline: None,
            cancel,
            cancelled: false,
            state: MonitorState::Running(running),
        }
    }

    /// Upper bound on one readiness wait
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Kill the remaining stages once `timeout` has elapsed
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deadline = timeout.map(|t| Instant::now() + t);
        self
    }

    /// Write `data` to the stdin of stage `owner`, then close it
    pub fn feed(mut self, owner: usize, writer: PipeWriter, data: Vec<u8>) -> io::Result<Self> {
        set_nonblocking(writer.as_raw_fd())?;
        self.feed = Some(Feed {
            owner,
            writer: Some(writer),
            data,
            offset: 0,
        });
        Ok(self)
    }

    /// Collect the stdout written by stage `owner`
    pub fn capture_stdout(mut self, owner: Option<usize>, reader: PipeReader) -> Self {
        self.stdout = Some(Capture::new("stdout", owner, reader));
        self
    }

    /// Collect the stderr of every stage sharing the capture
    pub fn capture_stderr(mut self, reader: PipeReader) -> Self {
        self.stderr = Some(Capture::new("stderr", None, reader));
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Run until every stage has terminated
    pub fn run(mut self) -> Result<MonitorOutcome, MonitorError> {
        let mut wake = ChildWake::register().map_err(|e| MonitorError::Register {
            error: e.to_string(),
        })?;

        self.state = MonitorState::Running(self.running());
        loop {
            self.state = match self.state {
                MonitorState::Running(0) => MonitorState::Draining,
                MonitorState::Running(_) => {
                    self.check_cancel();
                    self.reap()?;
                    let running = self.running();
                    if running > 0 {
                        self.wait_for_events(&mut wake)?;
                    }
                    MonitorState::Running(running)
                }
                MonitorState::Draining => {
                    for capture in [&mut self.stdout, &mut self.stderr].into_iter().flatten() {
                        capture.drain();
                    }
                    if let Some(feed) = &mut self.feed {
                        feed.close();
                    }
                    MonitorState::Done
                }
                MonitorState::Done => break,
            };
            trace!(state = ?self.state, "monitor state");
        }

        Ok(self.take_outcome())
    }

    fn running(&self) -> usize {
        self.processes.iter().filter(|p| p.is_running()).count()
    }

    fn check_cancel(&mut self) {
        if self.cancelled {
            return;
        }
        let timed_out = self.deadline.is_some_and(|deadline| Instant::now() >= deadline);
        if !timed_out && !self.cancel.is_cancelled() {
            return;
        }

        warn!(timed_out, "cancelling pipeline");
        self.cancelled = true;
        if let Some(feed) = &mut self.feed {
            feed.close();
        }
        for process in self.processes.iter_mut().filter(|p| p.is_running()) {
            if let Err(e) = process.kill() {
                debug!(stage = process.index(), error = %e, "kill failed");
            }
        }
    }

    /// Reap every stage that has terminated and finalize it
    fn reap(&mut self) -> Result<(), MonitorError> {
        let mut finished = Vec::new();
        for process in self.processes.iter_mut().filter(|p| p.is_running()) {
            match process.try_reap() {
                Ok(Some(status)) => {
                    debug!(
                        stage = process.index(),
                        program = %process.program(),
                        pid = process.pid(),
                        status = %status,
                        "stage finished"
                    );
                    finished.push(process.index());
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(MonitorError::Wait {
                        stage: process.index(),
                        pid: process.pid(),
                        error: e.to_string(),
                    })
                }
            }
        }

        for stage in finished {
            self.finalize(stage);
        }
        Ok(())
    }

    fn finalize(&mut self, stage: usize) {
        if let Some(feed) = self.feed.as_mut().filter(|f| f.owner == stage) {
            feed.close();
        }
        if let Some(capture) = self.stdout.as_mut().filter(|c| c.owner == Some(stage)) {
            capture.drain();
        }
    }

    fn wait_for_events(&mut self, wake: &mut ChildWake) -> Result<(), MonitorError> {
        let mut fds = Vec::with_capacity(4);
        let mut slots = Vec::with_capacity(4);

        fds.push(pollfd(wake.as_raw_fd(), libc::POLLIN));
        slots.push(Slot::Wake);
        if let Some(fd) = self.stdout.as_ref().and_then(Capture::raw_fd) {
            fds.push(pollfd(fd, libc::POLLIN));
            slots.push(Slot::Stdout);
        }
        if let Some(fd) = self.stderr.as_ref().and_then(Capture::raw_fd) {
            fds.push(pollfd(fd, libc::POLLIN));
            slots.push(Slot::Stderr);
        }
        if let Some(fd) = self.feed.as_ref().and_then(Feed::raw_fd) {
            fds.push(pollfd(fd, libc::POLLOUT));
            slots.push(Slot::Feed);
        }

        let ready = poll_fds(&mut fds, self.next_timeout()).map_err(|e| MonitorError::Poll {
            error: e.to_string(),
        })?;
        if ready == 0 {
            return Ok(());
        }

        for (fd, slot) in fds.iter().zip(slots) {
            if fd.revents == 0 {
                continue;
            }
            match slot {
                Slot::Wake => wake.drain(),
                Slot::Stdout => {
                    if let Some(capture) = &mut self.stdout {
                        capture.read_ready();
                    }
                }
                Slot::Stderr => {
                    if let Some(capture) = &mut self.stderr {
                        capture.read_ready();
                    }
                }
                Slot::Feed => {
                    if let Some(feed) = &mut self.feed {
                        feed.write_ready();
                    }
                }
            }
        }
        Ok(())
    }

    fn next_timeout(&self) -> Duration {
        match self.deadline {
            Some(deadline) if !self.cancelled => self
                .poll_interval
                .min(deadline.saturating_duration_since(Instant::now())),
            _ => self.poll_interval,
        }
    }

    fn take_outcome(&mut self) -> MonitorOutcome {
        MonitorOutcome {
            statuses: self
                .processes
                .iter()
                .filter_map(|p| p.status().map(|status| (p.index(), status)))
                .collect(),
            stdout: self.stdout.take().map(|c| c.data).unwrap_or_default(),
            stderr: self.stderr.take().map(|c| c.data).unwrap_or_default(),
            cancelled: self.cancelled,
        }
    }
}

// A run that stopped early (failed wait or poll) leaves live children
impl Drop for Monitor {
    fn drop(&mut self) {
        for process in self.processes.iter_mut().filter(|p| p.is_running()) {
            warn!(stage = process.index(), pid = process.pid(), "killing stage left running");
            if let Err(e) = process.terminate() {
                debug!(stage = process.index(), error = %e, "could not reap stage");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Wake,
    Stdout,
    Stderr,
    Feed,
}

/// Parent end of a capture pipe and what has been read from it
#[derive(Debug)]
struct Capture {
    name: &'static str,
    owner: Option<usize>,
    reader: Option<PipeReader>,
    data: Vec<u8>,
}

impl Capture {
    fn new(name: &'static str, owner: Option<usize>, reader: PipeReader) -> Self {
        Self {
            name,
            owner,
            reader: Some(reader),
            data: Vec::new(),
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.reader.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// One read; only called when poll reported the descriptor ready
    fn read_ready(&mut self) {
        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        let mut buf = vec![0u8; READ_CHUNK];
        match reader.read(&mut buf) {
            Ok(0) => self.close(),
            Ok(n) => self.data.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(stream = self.name, error = %e, "capture read failed");
                self.close();
            }
        }
    }

    /// Read whatever is immediately available, then close
    fn drain(&mut self) {
        while let Some(fd) = self.raw_fd() {
            let mut fds = [pollfd(fd, libc::POLLIN)];
            match poll_fds(&mut fds, Duration::ZERO) {
                Ok(ready) if ready > 0 => self.read_ready(),
                _ => break,
            }
        }
        self.close();
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            trace!(stream = self.name, bytes = self.data.len(), "capture closed");
        }
    }
}

/// Parent end of the first stage's stdin and the bytes still to write
#[derive(Debug)]
struct Feed {
    owner: usize,
    writer: Option<PipeWriter>,
    data: Vec<u8>,
    offset: usize,
}

impl Feed {
    fn raw_fd(&self) -> Option<RawFd> {
        self.writer.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn write_ready(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if self.offset >= self.data.len() {
            self.close();
            return;
        }
        match writer.write(&self.data[self.offset..]) {
            Ok(n) => {
                self.offset += n;
                if self.offset >= self.data.len() {
                    self.close();
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(written = self.offset, "stdin reader went away");
                self.close();
            }
            Err(e) => {
                warn!(error = %e, "stdin feed write failed");
                self.close();
            }
        }
    }

    fn close(&mut self) {
        if self.writer.take().is_some() {
            trace!(written = self.offset, total = self.data.len(), "stdin feed closed");
        }
    }
}

/// Self-pipe written by the `SIGCHLD` handler
struct ChildWake {
    reader: UnixStream,
    id: signal_hook::SigId,
}

impl ChildWake {
    fn register() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        let id = signal_hook::low_level::pipe::register(signal_hook::consts::SIGCHLD, writer)?;
        Ok(Self { reader, id })
    }

    fn drain(&mut self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = self.reader.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

impl AsRawFd for ChildWake {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

impl Drop for ChildWake {
    fn drop(&mut self) {
        signal_hook::low_level::unregister(self.id);
    }
}

fn pollfd(fd: RawFd, events: libc::c_short) -> libc::pollfd {
    libc::pollfd {
        fd,
        events,
        revents: 0,
    }
}

/// `poll(2)`; an interrupted wait counts as a wake with nothing ready
fn poll_fds(fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(ret as usize)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn(index: usize, program: &str, args: &[&str]) -> RunningProcess {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        RunningProcess::new(index, program, child)
    }

    #[test]
    fn test_no_processes_goes_straight_to_done() {
        let outcome = Monitor::new(Vec::new(), CancellationToken::new()).run().unwrap();
        assert!(outcome.statuses.is_empty());
        assert!(!outcome.cancelled);
    }

    #[test]
    fn test_failed_run_kills_and_reaps_remaining_stages() {
        use nix::errno::Errno;
        use nix::sys::wait::waitpid;
        use nix::unistd::Pid;

        let sleeper = spawn(0, "sleep", &["30"]);
        let sleeper_pid = Pid::from_raw(sleeper.pid() as i32);
        let quick = spawn(1, "true", &[]);
        // reaped elsewhere, so the monitor's own wait on it fails
        waitpid(Pid::from_raw(quick.pid() as i32), None).unwrap();

        let err = Monitor::new(vec![sleeper, quick], CancellationToken::new())
            .run()
            .unwrap_err();
        assert!(matches!(err, MonitorError::Wait { stage: 1, .. }));
        assert_eq!(nix::sys::signal::kill(sleeper_pid, None::<nix::sys::signal::Signal>), Err(Errno::ESRCH));
    }

    #[test]
    fn test_dropped_monitor_reaps_stages() {
        use nix::errno::Errno;
        use nix::unistd::Pid;

        let sleeper = spawn(0, "sleep", &["30"]);
        let pid = Pid::from_raw(sleeper.pid() as i32);
        drop(Monitor::new(vec![sleeper], CancellationToken::new()));
        assert_eq!(nix::sys::signal::kill(pid, None::<nix::sys::signal::Signal>), Err(Errno::ESRCH));
    }

    #[test]
    fn test_collects_statuses() {
        let processes = vec![spawn(0, "true", &[]), spawn(1, "false", &[])];
        let outcome = Monitor::new(processes, CancellationToken::new()).run().unwrap();
        assert_eq!(
            outcome.statuses,
            vec![(0, Status::Exited(0)), (1, Status::Exited(1))]
        );
    }

    #[test]
    fn test_signaled_stage() {
        let processes = vec![spawn(0, "sh", &["-c", "kill -9 $$"])];
        let outcome = Monitor::new(processes, CancellationToken::new()).run().unwrap();
        assert_eq!(outcome.statuses, vec![(0, Status::Signaled(9))]);
    }

    #[test]
    fn test_capture_larger_than_pipe_buffer() {
        let (reader, writer) = io::pipe().unwrap();
        let child = Command::new("head")
            .args(["-c", "200000", "/dev/zero"])
            .stdout(Stdio::from(writer))
            .spawn()
            .unwrap();
        let processes = vec![RunningProcess::new(0, "head", child)];

        let outcome = Monitor::new(processes, CancellationToken::new())
            .capture_stdout(Some(0), reader)
            .run()
            .unwrap();
        assert_eq!(outcome.stdout.len(), 200_000);
        assert_eq!(outcome.statuses, vec![(0, Status::Exited(0))]);
    }

    #[test]
    fn test_feed_reaches_stage() {
        let (feed_reader, feed_writer) = io::pipe().unwrap();
        let (out_reader, out_writer) = io::pipe().unwrap();
        let child = Command::new("cat")
            .stdin(Stdio::from(feed_reader))
            .stdout(Stdio::from(out_writer))
            .spawn()
            .unwrap();
        let processes = vec![RunningProcess::new(0, "cat", child)];

        let outcome = Monitor::new(processes, CancellationToken::new())
            .feed(0, feed_writer, b"hello\n".to_vec())
            .unwrap()
            .capture_stdout(Some(0), out_reader)
            .run()
            .unwrap();
        assert_eq!(outcome.stdout, b"hello\n");
    }

    #[test]
    fn test_timeout_kills_stages() {
        let processes = vec![spawn(0, "sleep", &["30"])];
        let started = Instant::now();
        let outcome = Monitor::new(processes, CancellationToken::new())
            .timeout(Some(Duration::from_millis(100)))
            .run()
            .unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.statuses, vec![(0, Status::Signaled(9))]);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancel_token() {
        let processes = vec![spawn(0, "sleep", &["30"])];
        let token = CancellationToken::new();
        token.cancel();
        let outcome = Monitor::new(processes, token).run().unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.statuses[0].1, Status::Signaled(9));
    }

    #[test]
    fn test_poll_fds_timeout() {
        let (reader, _writer) = io::pipe().unwrap();
        let mut fds = [pollfd(reader.as_raw_fd(), libc::POLLIN)];
        assert_eq!(poll_fds(&mut fds, Duration::from_millis(10)).unwrap(), 0);
    }
}
