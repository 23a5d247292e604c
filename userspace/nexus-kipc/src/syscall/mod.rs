// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Numeric syscall surface over the IPC registry
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: SyscallTable, Args, Handler, MappingTable, SYS_IPC_* IDs
//! DEPENDS_ON: Registry, syscall::api
//! INVARIANTS: Stable syscall IDs; decode/check/execute discipline; failures return -errno

pub mod api;

use std::collections::BTreeMap;

use log::trace;

use crate::{Caller, Error, Registry, Result, ShmMapping};

pub use api::{install_handlers, Context};

/// Maximum number of syscalls the table can hold.
const MAX_SYSCALL: usize = 16;

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T>;

/// Syscall arguments passed in registers a0-a5.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Args {
    regs: [usize; 6],
}

impl Args {
    /// Creates a new argument pack from the provided registers.
    pub const fn new(regs: [usize; 6]) -> Self {
        Self { regs }
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }
}

/// Public syscall numbers.
pub const SYS_IPC_QUEUE_CREATE: usize = 0;
pub const SYS_IPC_QUEUE_SEND: usize = 1;
pub const SYS_IPC_QUEUE_RECEIVE: usize = 2;
pub const SYS_IPC_QUEUE_DELETE: usize = 3;
pub const SYS_IPC_SHM_CREATE: usize = 4;
pub const SYS_IPC_SHM_ATTACH: usize = 5;
pub const SYS_IPC_SHM_DETACH: usize = 6;
pub const SYS_IPC_SHM_DESTROY: usize = 7;
pub const SYS_IPC_SEM_CREATE: usize = 8;
pub const SYS_IPC_SEM_OP: usize = 9;
pub const SYS_IPC_SEM_DELETE: usize = 10;
/// Returns `read | write << 16`.
pub const SYS_IPC_PIPE_CREATE: usize = 11;
pub const SYS_IPC_PIPE_READ: usize = 12;
pub const SYS_IPC_PIPE_WRITE: usize = 13;
pub const SYS_IPC_PIPE_CLOSE: usize = 14;

/// Register value meaning "no priority hint" for `SYS_IPC_QUEUE_SEND`.
pub const HINT_NONE: usize = usize::MAX;

/// Type alias for a syscall handler.
pub type Handler = fn(&mut Context<'_>, &Args) -> SysResult<usize>;

/// Dispatch table storing handlers by syscall number.
pub struct SyscallTable {
    handlers: [Option<Handler>; MAX_SYSCALL],
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SyscallTable {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; MAX_SYSCALL] }
    }

    /// Creates a table with every IPC handler installed.
    pub fn with_ipc_handlers() -> Self {
        let mut table = Self::new();
        install_handlers(&mut table);
        table
    }

    /// Registers a handler. Numbers outside the table are ignored.
    pub fn register(&mut self, number: usize, handler: Handler) {
        if number < MAX_SYSCALL {
            self.handlers[number] = Some(handler);
        }
    }

    /// Executes the handler referenced by `number`.
    #[must_use]
    pub fn dispatch(&self, number: usize, ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
        self.handlers
            .get(number)
            .and_then(|entry| *entry)
            .ok_or(Error::InvalidSyscall)
            .and_then(|handler| handler(ctx, args))
    }

    /// Executes the handler and folds the result into a register value: the return value
    /// on success, `-errno` on failure.
    #[must_use]
    pub fn dispatch_raw(&self, number: usize, ctx: &mut Context<'_>, args: &Args) -> isize {
        match self.dispatch(number, ctx, args) {
            Ok(value) => isize::try_from(value).unwrap_or(isize::MAX),
            Err(err) => {
                trace!("kipc: syscall {number} pid {} -> {err}", ctx.caller.pid);
                -(err.errno() as isize)
            }
        }
    }
}

/// First synthetic address handed out by a [`MappingTable`].
pub const MAPPING_BASE: usize = 0x4000_0000;
/// Mapping granularity; every mapping is followed by one unmapped guard page.
pub const MAPPING_PAGE: usize = 0x1000;

/// Per-caller table of shared-memory mappings keyed by synthetic address.
#[derive(Debug)]
pub struct MappingTable {
    next: usize,
    mappings: BTreeMap<usize, ShmMapping>,
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self { next: MAPPING_BASE, mappings: BTreeMap::new() }
    }

    /// Places `mapping` at the next free address and returns that address.
    ///
    /// Hands the mapping back when the synthetic address space is exhausted.
    pub(crate) fn insert(&mut self, mapping: ShmMapping) -> core::result::Result<usize, ShmMapping> {
        let addr = self.next;
        let span = (mapping.len().div_ceil(MAPPING_PAGE) + 1).checked_mul(MAPPING_PAGE);
        match span.and_then(|span| addr.checked_add(span)) {
            Some(next) => {
                self.next = next;
                self.mappings.insert(addr, mapping);
                Ok(addr)
            }
            None => Err(mapping),
        }
    }

    pub(crate) fn remove(&mut self, addr: usize) -> Option<ShmMapping> {
        self.mappings.remove(&addr)
    }

    /// Returns the mapping placed at `addr`.
    pub fn get(&self, addr: usize) -> Option<&ShmMapping> {
        self.mappings.get(&addr)
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns `true` when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Detaches every mapping, as on task exit. Returns how many detached cleanly.
    pub fn detach_all(&mut self, registry: &Registry, caller: &Caller) -> usize {
        let mappings = core::mem::take(&mut self.mappings);
        mappings
            .into_values()
            .map(|mapping| registry.shm_detach(caller, mapping))
            .filter(|outcome| outcome.is_ok())
            .count()
    }
}
