// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel IPC registry (message queues, shared memory, semaphores, pipes)
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + integration tests under `tests/`
//!
//! PUBLIC API:
//!   - Registry: fixed-capacity slot tables and all IPC entry points
//!   - IpcConfig: table capacities, size ceilings, timeouts and heuristic thresholds
//!   - Caller / CallerState: identity of the task issuing a request
//!   - Wait / IpcFlags: blocking behaviour of receive, wait and pipe I/O
//!   - RiskScorer: pluggable deadlock-risk heuristic for semaphore waits
//!   - syscall: numeric dispatch table with errno mapping
//!
//! INVARIANTS:
//!   - A handle is valid iff its slot is occupied
//!   - The registry lock is never held while waiting on a per-resource condition
//!   - Queue delivery is priority-major, insertion-minor
//!   - Segment memory is released only after destroy AND the last detach
//!   - Semaphore counts never exceed their configured maximum
//!
//! The priority, access-prediction and deadlock-risk scores are arithmetic on counters and
//! timestamps. They reorder delivery or refuse a wait early; they never decide memory
//! validity and never prove anything about deadlock.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use core::time::Duration;
use std::time::Instant;

use bitflags::bitflags;

/// Saturated wait bound, roughly a century.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Declares a typed slot handle.
macro_rules! slot_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw slot index.
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            /// Returns the raw slot index.
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub mod caller;
pub mod cli;
pub mod config;
pub mod deadlock;
mod error;
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub mod notify;
pub mod pipe;
pub mod priority;
pub mod queue;
mod registry;
pub mod sem;
pub mod shm;
pub mod syscall;
mod table;

pub use caller::{Caller, CallerState, Pid};
pub use config::{ConfigError, IpcConfig};
pub use deadlock::{DefaultRiskScorer, RiskScorer, SemaphoreState};
pub use error::{Error, ResourceKind, Result};
pub use pipe::{PipeEnd, PipeHandle, PipePair, PipeStat};
pub use queue::{Message, QueueHandle, QueueStat, Received};
pub use registry::{Registry, StatsSnapshot};
pub use sem::{SemHandle, SemStat};
pub use shm::{CacheHint, ShmHandle, ShmMapping, ShmStat};

bitflags! {
    /// Flags accepted by the syscall-style receive and wait entry points.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IpcFlags: u32 {
        /// Fail immediately instead of blocking.
        const NOWAIT = 1 << 0;
    }
}

/// Behaviour of a call that may block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block up to the registry's configured default timeout.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Builds a wait mode from syscall-style arguments.
    ///
    /// `NOWAIT` wins over any timeout; a zero `timeout_ms` selects the default bound.
    pub fn from_flags(flags: IpcFlags, timeout_ms: u32) -> Self {
        if flags.contains(IpcFlags::NOWAIT) {
            Self::NonBlocking
        } else if timeout_ms == 0 {
            Self::Blocking
        } else {
            Self::Timeout(Duration::from_millis(u64::from(timeout_ms)))
        }
    }

    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Resolves the absolute deadline for this wait, starting now.
    ///
    /// Timeouts past the clock's range saturate to a deadline far enough out to never fire.
    pub(crate) fn deadline(self, default: Duration) -> Instant {
        let now = Instant::now();
        let limit = match self {
            Self::NonBlocking => return now,
            Self::Blocking => default,
            Self::Timeout(limit) => limit,
        };
        now.checked_add(limit)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }
}
