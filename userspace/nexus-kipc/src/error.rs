// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy surfaced at every IPC entry point.

use core::fmt;

use thiserror::Error;

/// Result alias for IPC operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Slot table a handle or allocation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Message queue table.
    Queue,
    /// Shared-memory segment table.
    Segment,
    /// Semaphore table.
    Semaphore,
    /// Pipe end table.
    Pipe,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queue => "queue",
            Self::Segment => "segment",
            Self::Semaphore => "semaphore",
            Self::Pipe => "pipe",
        })
    }
}

/// Errors returned by the IPC subsystem.
///
/// Every variant is returned to the immediate caller; the subsystem never retries
/// internally and never terminates the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// No free slot in the table. Recoverable: retry later or fail the higher-level request.
    #[error("{0} table exhausted")]
    ResourceExhausted(ResourceKind),
    /// Handle out of range, slot empty, or resource already torn down.
    #[error("invalid {0} handle")]
    InvalidHandle(ResourceKind),
    /// Requested segment, message or buffer size is outside the configured bounds.
    #[error("size outside configured bounds")]
    InvalidSize,
    /// Non-blocking receive found no matching message.
    #[error("no matching message")]
    NoMessage,
    /// A bounded wait expired.
    #[error("operation timed out")]
    TimedOut,
    /// The deadlock-risk heuristic refused to block this waiter.
    ///
    /// Advisory: it has false positives and false negatives. Callers retry, abort or
    /// escalate.
    #[error("wait refused by deadlock-risk heuristic")]
    WouldDeadlock,
    /// The queue holds its maximum number of messages.
    #[error("queue full")]
    QueueFull,
    /// A non-blocking semaphore or pipe operation could not make progress.
    #[error("operation would block")]
    WouldBlock,
    /// A semaphore operation would push the count past its maximum.
    #[error("semaphore maximum exceeded")]
    Overflow,
    /// Detach without a matching attach.
    #[error("segment not attached")]
    NotAttached,
    /// Argument rejected at the boundary.
    #[error("invalid argument")]
    InvalidArgument,
    /// Write to a pipe whose read end is closed.
    #[error("broken pipe")]
    BrokenPipe,
    /// Syscall number not present in the dispatch table.
    #[error("invalid syscall")]
    InvalidSyscall,
    /// The host rejected a notification primitive; carries the raw errno.
    #[error("os error {0}")]
    Os(i32),
}

impl Error {
    /// Maps the error onto the POSIX errno returned by the syscall layer.
    pub const fn errno(self) -> i32 {
        match self {
            Self::ResourceExhausted(_) => 28, // ENOSPC
            Self::InvalidHandle(_) => 43,     // EIDRM
            Self::InvalidSize => 7,           // E2BIG
            Self::NoMessage => 42,            // ENOMSG
            Self::TimedOut => 110,            // ETIMEDOUT
            Self::WouldDeadlock => 35,        // EDEADLK
            Self::QueueFull | Self::WouldBlock => 11, // EAGAIN
            Self::Overflow => 34,             // ERANGE
            Self::NotAttached | Self::InvalidArgument => 22, // EINVAL
            Self::BrokenPipe => 32,           // EPIPE
            Self::InvalidSyscall => 38,       // ENOSYS
            Self::Os(code) => code,
        }
    }

    /// Returns `true` for conditions a caller is expected to hit during normal operation.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted(_)
                | Self::NoMessage
                | Self::TimedOut
                | Self::WouldDeadlock
                | Self::QueueFull
                | Self::WouldBlock
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Os(err.raw_os_error().unwrap_or(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_nomessage_are_distinct() {
        assert_ne!(Error::TimedOut, Error::NoMessage);
        assert_ne!(Error::TimedOut.errno(), Error::NoMessage.errno());
    }

    #[test]
    fn display_names_the_table() {
        let err = Error::ResourceExhausted(ResourceKind::Semaphore);
        assert_eq!(err.to_string(), "semaphore table exhausted");
    }

    #[test]
    fn caller_bugs_are_not_transient() {
        assert!(!Error::InvalidHandle(ResourceKind::Queue).is_transient());
        assert!(!Error::InvalidSize.is_transient());
        assert!(Error::WouldDeadlock.is_transient());
    }
}
