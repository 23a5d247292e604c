// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: install_handlers(table), Context
//! DEPENDS_ON: Registry, MappingTable
//! INVARIANTS: Decode→Check→Execute; no handler blocks while holding the registry lock
//!
//! Register conventions (a0..a5):
//!   - queue_send:    a0 handle, a1 type, a2 priority hint (`HINT_NONE` for none); payload = input
//!   - queue_receive: a0 handle, a1 type filter, a2 timeout_ms, a3 flags; payload -> output
//!   - sem_op:        a0 handle, a1 delta (two's complement), a2 timeout_ms, a3 flags
//!   - pipe_read:     a0 handle, a1 timeout_ms, a2 flags; bytes -> output
//!   - pipe_write:    a0 handle, a1 timeout_ms, a2 flags; bytes = input

use super::{
    Args, MappingTable, SysResult, SyscallTable, HINT_NONE, SYS_IPC_PIPE_CLOSE,
    SYS_IPC_PIPE_CREATE, SYS_IPC_PIPE_READ, SYS_IPC_PIPE_WRITE, SYS_IPC_QUEUE_CREATE,
    SYS_IPC_QUEUE_DELETE, SYS_IPC_QUEUE_RECEIVE, SYS_IPC_QUEUE_SEND, SYS_IPC_SEM_CREATE,
    SYS_IPC_SEM_DELETE, SYS_IPC_SEM_OP, SYS_IPC_SHM_ATTACH, SYS_IPC_SHM_CREATE,
    SYS_IPC_SHM_DESTROY, SYS_IPC_SHM_DETACH,
};
use crate::{
    Caller, Error, IpcFlags, PipeHandle, QueueHandle, Registry, ResourceKind, SemHandle,
    ShmHandle, Wait,
};

/// Per-invocation state handed to every handler.
pub struct Context<'a> {
    /// Registry the call operates on.
    pub registry: &'a Registry,
    /// Task issuing the call.
    pub caller: Caller,
    /// Bytes copied in from the caller (send payloads, pipe writes).
    pub input: &'a [u8],
    /// Buffer copied out to the caller (received payloads, pipe reads).
    pub output: &'a mut [u8],
    /// The caller's shared-memory mappings.
    pub mappings: &'a mut MappingTable,
}

impl<'a> Context<'a> {
    /// Bundles the pieces of one syscall invocation.
    pub fn new(
        registry: &'a Registry,
        caller: Caller,
        input: &'a [u8],
        output: &'a mut [u8],
        mappings: &'a mut MappingTable,
    ) -> Self {
        Self { registry, caller, input, output, mappings }
    }
}

// Typed decoders for Decode→Check→Execute

fn handle_arg(raw: usize, kind: ResourceKind) -> SysResult<u32> {
    u32::try_from(raw).map_err(|_| Error::InvalidHandle(kind))
}

fn wait_arg(timeout_raw: usize, flags_raw: usize) -> SysResult<Wait> {
    let timeout_ms = u32::try_from(timeout_raw).map_err(|_| Error::InvalidArgument)?;
    let flags = u32::try_from(flags_raw)
        .ok()
        .and_then(IpcFlags::from_bits)
        .ok_or(Error::InvalidArgument)?;
    Ok(Wait::from_flags(flags, timeout_ms))
}

#[derive(Copy, Clone)]
struct QueueSendArgsTyped {
    handle: QueueHandle,
    mtype: i64,
    hint: Option<u8>,
}

impl QueueSendArgsTyped {
    #[inline]
    fn decode(args: &Args) -> SysResult<Self> {
        let hint = match args.get(2) {
            HINT_NONE => None,
            raw => Some(u8::try_from(raw).map_err(|_| Error::InvalidArgument)?),
        };
        Ok(Self {
            handle: QueueHandle::from_raw(handle_arg(args.get(0), ResourceKind::Queue)?),
            mtype: args.get(1) as isize as i64,
            hint,
        })
    }

    #[inline]
    fn check(&self, ctx: &Context<'_>) -> SysResult<()> {
        if ctx.input.len() > ctx.registry.config().max_message_size {
            return Err(Error::InvalidSize);
        }
        Ok(())
    }
}

#[derive(Copy, Clone)]
struct QueueReceiveArgsTyped {
    handle: QueueHandle,
    type_filter: i64,
    wait: Wait,
}

impl QueueReceiveArgsTyped {
    #[inline]
    fn decode(args: &Args) -> SysResult<Self> {
        Ok(Self {
            handle: QueueHandle::from_raw(handle_arg(args.get(0), ResourceKind::Queue)?),
            type_filter: args.get(1) as isize as i64,
            wait: wait_arg(args.get(2), args.get(3))?,
        })
    }
}

#[derive(Copy, Clone)]
struct SemOpArgsTyped {
    handle: SemHandle,
    delta: i32,
    wait: Wait,
}

impl SemOpArgsTyped {
    #[inline]
    fn decode(args: &Args) -> SysResult<Self> {
        Ok(Self {
            handle: SemHandle::from_raw(handle_arg(args.get(0), ResourceKind::Semaphore)?),
            delta: i32::try_from(args.get(1) as isize).map_err(|_| Error::InvalidArgument)?,
            wait: wait_arg(args.get(2), args.get(3))?,
        })
    }

    #[inline]
    fn check(&self) -> SysResult<()> {
        if self.delta == i32::MIN {
            return Err(Error::Overflow);
        }
        Ok(())
    }
}

#[derive(Copy, Clone)]
struct PipeIoArgsTyped {
    handle: PipeHandle,
    wait: Wait,
}

impl PipeIoArgsTyped {
    #[inline]
    fn decode(args: &Args) -> SysResult<Self> {
        Ok(Self {
            handle: PipeHandle::from_raw(handle_arg(args.get(0), ResourceKind::Pipe)?),
            wait: wait_arg(args.get(1), args.get(2))?,
        })
    }
}

fn sys_queue_create(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    let handle = ctx.registry.queue_create(&ctx.caller)?;
    Ok(handle.raw() as usize)
}

fn sys_queue_send(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = QueueSendArgsTyped::decode(args)?;
    typed.check(ctx)?;
    let priority =
        ctx.registry.queue_send(&ctx.caller, typed.handle, typed.mtype, ctx.input, typed.hint)?;
    Ok(usize::from(priority))
}

fn sys_queue_receive(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = QueueReceiveArgsTyped::decode(args)?;
    let received = ctx.registry.queue_receive_into(
        &ctx.caller,
        typed.handle,
        typed.type_filter,
        ctx.output,
        typed.wait,
    )?;
    Ok(received.len)
}

fn sys_queue_delete(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let handle = QueueHandle::from_raw(handle_arg(args.get(0), ResourceKind::Queue)?);
    ctx.registry.queue_delete(&ctx.caller, handle)
}

fn sys_shm_create(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let handle = ctx.registry.shm_create(&ctx.caller, args.get(0))?;
    Ok(handle.raw() as usize)
}

fn sys_shm_attach(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let handle = ShmHandle::from_raw(handle_arg(args.get(0), ResourceKind::Segment)?);
    let mapping = ctx.registry.shm_attach(&ctx.caller, handle)?;
    match ctx.mappings.insert(mapping) {
        Ok(addr) => Ok(addr),
        Err(mapping) => {
            ctx.registry.shm_detach(&ctx.caller, mapping)?;
            Err(Error::InvalidArgument)
        }
    }
}

fn sys_shm_detach(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let mapping = ctx.mappings.remove(args.get(0)).ok_or(Error::NotAttached)?;
    ctx.registry.shm_detach(&ctx.caller, mapping)?;
    Ok(0)
}

fn sys_shm_destroy(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let handle = ShmHandle::from_raw(handle_arg(args.get(0), ResourceKind::Segment)?);
    ctx.registry.shm_destroy(&ctx.caller, handle)?;
    Ok(0)
}

fn sys_sem_create(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let initial = u32::try_from(args.get(0)).map_err(|_| Error::InvalidArgument)?;
    let handle = ctx.registry.sem_create(&ctx.caller, initial)?;
    Ok(handle.raw() as usize)
}

fn sys_sem_op(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = SemOpArgsTyped::decode(args)?;
    typed.check()?;
    ctx.registry.sem_op_wait(&ctx.caller, typed.handle, typed.delta, typed.wait)?;
    Ok(0)
}

fn sys_sem_delete(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let handle = SemHandle::from_raw(handle_arg(args.get(0), ResourceKind::Semaphore)?);
    ctx.registry.sem_delete(&ctx.caller, handle)?;
    Ok(0)
}

fn sys_pipe_create(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let pair = ctx.registry.pipe_create_sized(&ctx.caller, args.get(0))?;
    Ok((pair.read.raw() as usize) | ((pair.write.raw() as usize) << 16))
}

fn sys_pipe_read(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = PipeIoArgsTyped::decode(args)?;
    ctx.registry.pipe_read(&ctx.caller, typed.handle, ctx.output, typed.wait)
}

fn sys_pipe_write(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = PipeIoArgsTyped::decode(args)?;
    ctx.registry.pipe_write(&ctx.caller, typed.handle, ctx.input, typed.wait)
}

fn sys_pipe_close(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let handle = PipeHandle::from_raw(handle_arg(args.get(0), ResourceKind::Pipe)?);
    ctx.registry.pipe_close(&ctx.caller, handle)?;
    Ok(0)
}

/// Installs every IPC handler into `table`.
pub fn install_handlers(table: &mut SyscallTable) {
    table.register(SYS_IPC_QUEUE_CREATE, sys_queue_create);
    table.register(SYS_IPC_QUEUE_SEND, sys_queue_send);
    table.register(SYS_IPC_QUEUE_RECEIVE, sys_queue_receive);
    table.register(SYS_IPC_QUEUE_DELETE, sys_queue_delete);
    table.register(SYS_IPC_SHM_CREATE, sys_shm_create);
    table.register(SYS_IPC_SHM_ATTACH, sys_shm_attach);
    table.register(SYS_IPC_SHM_DETACH, sys_shm_detach);
    table.register(SYS_IPC_SHM_DESTROY, sys_shm_destroy);
    table.register(SYS_IPC_SEM_CREATE, sys_sem_create);
    table.register(SYS_IPC_SEM_OP, sys_sem_op);
    table.register(SYS_IPC_SEM_DELETE, sys_sem_delete);
    table.register(SYS_IPC_PIPE_CREATE, sys_pipe_create);
    table.register(SYS_IPC_PIPE_READ, sys_pipe_read);
    table.register(SYS_IPC_PIPE_WRITE, sys_pipe_write);
    table.register(SYS_IPC_PIPE_CLOSE, sys_pipe_close);
}
