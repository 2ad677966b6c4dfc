// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Termination status of a stage

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// How a stage terminated
///
/// Signals are a separate variant rather than a sign-encoded exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Exited(i32),
    Signaled(i32),
}

impl Status {
    /// `Exited(0)`
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            Self::Signaled(_) => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            Self::Exited(_) => None,
            Self::Signaled(signal) => Some(*signal),
        }
    }

    /// The `$?` a POSIX shell would report for this status
    pub fn shell_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(signal) => 128 + signal,
        }
    }
}

impl From<ExitStatus> for Status {
    fn from(status: ExitStatus) -> Self {
        if let Some(signal) = status.signal() {
            return Self::Signaled(signal);
        }
        match status.code() {
            Some(code) => Self::Exited(code),
            // stopped/continued are never requested from waitpid
            None => Self::Exited(status.into_raw()),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {}", code),
            Self::Signaled(signal) => match nix::sys::signal::Signal::try_from(*signal) {
                Ok(name) => write!(f, "signal {} ({})", signal, name.as_str()),
                Err(_) => write!(f, "signal {}", signal),
            },
        }
    }
}

/// Statuses a stage may report without counting as failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSet {
    All,
    Only(BTreeSet<Status>),
}

impl Default for StatusSet {
    fn default() -> Self {
        Self::Only(BTreeSet::new())
    }
}

impl StatusSet {
    /// Set of exit codes
    pub fn codes(codes: impl IntoIterator<Item = i32>) -> Self {
        Self::Only(codes.into_iter().map(Status::Exited).collect())
    }

    pub fn contains(&self, status: &Status) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(status),
        }
    }

    pub fn insert(&mut self, status: Status) {
        if let Self::Only(set) = self {
            set.insert(status);
        }
    }

    pub fn union(&self, other: &StatusSet) -> StatusSet {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Only(a), Self::Only(b)) => Self::Only(a.union(b).copied().collect()),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_never_a_negative_code() {
        // raw wait status for SIGKILL is the signal number in the low bits
        let status = Status::from(ExitStatus::from_raw(9));
        assert_eq!(status, Status::Signaled(9));
        assert_eq!(status.code(), None);
    }

    #[test]
    fn test_exit_code_from_raw() {
        let status = Status::from(ExitStatus::from_raw(1 << 8));
        assert_eq!(status, Status::Exited(1));
        assert!(!status.success());
        assert!(Status::from(ExitStatus::from_raw(0)).success());
    }

    #[test]
    fn test_shell_code() {
        assert_eq!(Status::Exited(3).shell_code(), 3);
        assert_eq!(Status::Signaled(9).shell_code(), 137);
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::Exited(2).to_string(), "exit code 2");
        assert_eq!(Status::Signaled(9).to_string(), "signal 9 (SIGKILL)");
    }

    #[test]
    fn test_status_set_union() {
        let a = StatusSet::codes([0]);
        let b = StatusSet::codes([1]);
        let both = a.union(&b);
        assert!(both.contains(&Status::Exited(0)));
        assert!(both.contains(&Status::Exited(1)));
        assert!(!both.contains(&Status::Exited(2)));
        assert!(!both.contains(&Status::Signaled(1)));
        assert!(a.union(&StatusSet::All).is_all());
    }
}
