// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Identity of the task issuing an IPC request.

/// Process identifier of a caller.
pub type Pid = u32;

/// Scheduling state of the caller at the time of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallerState {
    /// Normal execution.
    #[default]
    Running,
    /// A signal is pending delivery.
    SignalPending,
    /// The task is tearing down.
    Exiting,
}

/// Caller attributes consulted by the priority and deadlock heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// Process id, recorded as message sender and waiter owner.
    pub pid: Pid,
    /// Privileged callers receive a priority bonus on send.
    pub privileged: bool,
    /// Current scheduling state.
    pub state: CallerState,
}

impl Caller {
    /// Unprivileged running caller.
    pub const fn user(pid: Pid) -> Self {
        Self { pid, privileged: false, state: CallerState::Running }
    }

    /// Privileged running caller.
    pub const fn privileged(pid: Pid) -> Self {
        Self { pid, privileged: true, state: CallerState::Running }
    }

    /// Returns a copy with `state` replaced.
    pub const fn with_state(self, state: CallerState) -> Self {
        Self { state, ..self }
    }
}
