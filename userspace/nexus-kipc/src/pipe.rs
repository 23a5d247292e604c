// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Byte pipes with working-set sized buffers
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: PipeHandle, PipeEnd, PipePair, PipeStat, Registry::pipe_*
//! INVARIANTS:
//!   - Each end occupies its own slot; both are allocated under one registry lock or neither is
//!   - Buffered bytes never exceed capacity
//!   - Readers see EOF only after the write end closes and the buffer drains
//!   - Writers get `BrokenPipe` once the read end closes

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::registry::Stats;
use crate::{Caller, Error, IpcConfig, Registry, ResourceKind, Result, Wait};

slot_handle!(
    /// Handle of one pipe end.
    PipeHandle
);

/// Which side of a pipe a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    /// Consumer side.
    Read,
    /// Producer side.
    Write,
}

/// Both ends of a freshly created pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipePair {
    /// Read end.
    pub read: PipeHandle,
    /// Write end.
    pub write: PipeHandle,
}

/// Diagnostic view of a pipe, taken through either end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeStat {
    /// End the stat was taken through.
    pub end: PipeEnd,
    /// Buffer capacity in bytes.
    pub capacity: usize,
    /// Bytes currently buffered.
    pub buffered: usize,
    /// Total bytes accepted from writers.
    pub bytes_written: u64,
    /// Total bytes handed to readers.
    pub bytes_read: u64,
    /// Capacity changes since creation.
    pub resize_count: u32,
    /// Whether the read end is still open.
    pub reader_open: bool,
    /// Whether the write end is still open.
    pub writer_open: bool,
}

/// Buffer capacity for an expected working set of `hint` bytes.
///
/// A quarter of the working set, rounded up to a power of two and clamped to the configured
/// bounds. A zero hint selects the default capacity.
pub fn pipe_capacity_for(config: &IpcConfig, hint: usize) -> usize {
    if hint == 0 {
        return config.pipe_default_capacity;
    }
    (hint / 4)
        .checked_next_power_of_two()
        .unwrap_or(config.pipe_max_capacity)
        .clamp(config.pipe_min_capacity, config.pipe_max_capacity)
}

struct PipeState {
    buf: VecDeque<u8>,
    capacity: usize,
    bytes_written: u64,
    bytes_read: u64,
    resize_count: u32,
    reader_open: bool,
    writer_open: bool,
}

struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
    writable: Condvar,
}

impl Pipe {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PipeState {
                buf: VecDeque::new(),
                capacity,
                bytes_written: 0,
                bytes_read: 0,
                resize_count: 0,
                reader_open: true,
                writer_open: true,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    fn read(&self, buf: &mut [u8], wait: Wait, default_timeout: Duration) -> Result<usize> {
        let deadline = wait.deadline(default_timeout);
        let mut state = self.state.lock();
        loop {
            if !state.reader_open {
                return Err(Error::InvalidHandle(ResourceKind::Pipe));
            }
            if !state.buf.is_empty() {
                let n = state.buf.len().min(buf.len());
                for (slot, byte) in buf.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                state.bytes_read += n as u64;
                drop(state);
                self.writable.notify_all();
                return Ok(n);
            }
            if !state.writer_open {
                return Ok(0);
            }
            if wait.is_non_blocking() {
                return Err(Error::WouldBlock);
            }
            if Instant::now() >= deadline {
                return Err(Error::TimedOut);
            }
            self.readable.wait_until(&mut state, deadline);
        }
    }

    fn write(&self, data: &[u8], wait: Wait, default_timeout: Duration) -> Result<usize> {
        let deadline = wait.deadline(default_timeout);
        let mut state = self.state.lock();
        loop {
            if !state.writer_open {
                return Err(Error::InvalidHandle(ResourceKind::Pipe));
            }
            if !state.reader_open {
                return Err(Error::BrokenPipe);
            }
            let space = state.capacity.saturating_sub(state.buf.len());
            if space > 0 {
                let n = space.min(data.len());
                state.buf.extend(&data[..n]);
                state.bytes_written += n as u64;
                drop(state);
                self.readable.notify_all();
                return Ok(n);
            }
            if wait.is_non_blocking() {
                return Err(Error::WouldBlock);
            }
            if Instant::now() >= deadline {
                return Err(Error::TimedOut);
            }
            self.writable.wait_until(&mut state, deadline);
        }
    }
}

/// One slot's view of a pipe.
pub(crate) struct PipeEndpoint {
    pipe: Arc<Pipe>,
    end: PipeEnd,
}

impl PipeEndpoint {
    /// Closes this end and wakes both sides so they observe EOF or `BrokenPipe`.
    pub(crate) fn close(&self) {
        {
            let mut state = self.pipe.state.lock();
            match self.end {
                PipeEnd::Read => state.reader_open = false,
                PipeEnd::Write => state.writer_open = false,
            }
        }
        self.pipe.readable.notify_all();
        self.pipe.writable.notify_all();
    }

    fn expect_end(&self, end: PipeEnd) -> Result<&Pipe> {
        if self.end == end {
            Ok(&*self.pipe)
        } else {
            Err(Error::InvalidArgument)
        }
    }
}

impl Registry {
    fn pipe_end(&self, handle: PipeHandle) -> Result<Arc<PipeEndpoint>> {
        self.resolve(|tables| &tables.pipes, handle.raw())
    }

    /// Creates a pipe with the default capacity.
    pub fn pipe_create(&self, caller: &Caller) -> Result<PipePair> {
        self.pipe_create_sized(caller, 0)
    }

    /// Creates a pipe sized for a working set of `working_set_hint` bytes.
    ///
    /// Needs two free slots; on exhaustion neither end is allocated.
    pub fn pipe_create_sized(&self, caller: &Caller, working_set_hint: usize) -> Result<PipePair> {
        self.op();
        let capacity = pipe_capacity_for(&self.config, working_set_hint);
        let result = {
            let mut tables = self.tables.lock();
            if tables.pipes.free() < 2 {
                Err(Error::ResourceExhausted(ResourceKind::Pipe))
            } else {
                let pipe = Arc::new(Pipe::new(capacity));
                let reader = Arc::clone(&pipe);
                let (read, _) =
                    tables.pipes.allocate_with(|_| PipeEndpoint { pipe: reader, end: PipeEnd::Read })?;
                let (write, _) =
                    tables.pipes.allocate_with(|_| PipeEndpoint { pipe, end: PipeEnd::Write })?;
                Ok(PipePair { read: PipeHandle(read), write: PipeHandle(write) })
            }
        };
        self.note_allocation(&result);
        let pair = result?;
        Stats::bump(&self.stats.slot_allocations);
        debug!(
            "kipc: pipe {}/{} created capacity={capacity} by pid {}",
            pair.read, pair.write, caller.pid
        );
        Ok(pair)
    }

    /// Reads up to `buf.len()` bytes. Returns 0 at EOF.
    pub fn pipe_read(&self, caller: &Caller, handle: PipeHandle, buf: &mut [u8], wait: Wait) -> Result<usize> {
        self.op();
        let endpoint = self.pipe_end(handle)?;
        let pipe = endpoint.expect_end(PipeEnd::Read)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let n = pipe.read(buf, wait, self.config.default_timeout())?;
        trace!("kipc: pipe {handle} read {n} bytes for pid {}", caller.pid);
        Ok(n)
    }

    /// Writes as much of `data` as fits and returns the count accepted.
    ///
    /// Blocks only while the buffer is completely full.
    pub fn pipe_write(&self, caller: &Caller, handle: PipeHandle, data: &[u8], wait: Wait) -> Result<usize> {
        self.op();
        let endpoint = self.pipe_end(handle)?;
        let pipe = endpoint.expect_end(PipeEnd::Write)?;
        if data.is_empty() {
            return Ok(0);
        }
        let n = pipe.write(data, wait, self.config.default_timeout())?;
        trace!("kipc: pipe {handle} wrote {n}/{} bytes for pid {}", data.len(), caller.pid);
        Ok(n)
    }

    /// Closes one end and frees its slot.
    pub fn pipe_close(&self, caller: &Caller, handle: PipeHandle) -> Result<()> {
        self.op();
        let endpoint = self.release(|tables| &mut tables.pipes, handle.raw())?;
        endpoint.close();
        debug!("kipc: pipe end {handle} ({:?}) closed by pid {}", endpoint.end, caller.pid);
        Ok(())
    }

    /// Sets the buffer capacity, rounded up to a power of two and at least the minimum.
    ///
    /// Fails with `InvalidSize` above the maximum or below the bytes already buffered.
    pub fn pipe_set_capacity(&self, caller: &Caller, handle: PipeHandle, bytes: usize) -> Result<usize> {
        self.op();
        if bytes == 0 || bytes > self.config.pipe_max_capacity {
            return Err(Error::InvalidSize);
        }
        let capacity = bytes
            .checked_next_power_of_two()
            .ok_or(Error::InvalidSize)?
            .clamp(self.config.pipe_min_capacity, self.config.pipe_max_capacity);
        let endpoint = self.pipe_end(handle)?;
        {
            let mut state = endpoint.pipe.state.lock();
            if capacity < state.buf.len() {
                return Err(Error::InvalidSize);
            }
            if capacity == state.capacity {
                return Ok(capacity);
            }
            state.capacity = capacity;
            state.resize_count += 1;
        }
        endpoint.pipe.writable.notify_all();
        debug!("kipc: pipe end {handle} resized to {capacity} by pid {}", caller.pid);
        Ok(capacity)
    }

    /// Returns counters and buffer occupancy.
    pub fn pipe_stat(&self, handle: PipeHandle) -> Result<PipeStat> {
        self.op();
        let endpoint = self.pipe_end(handle)?;
        let state = endpoint.pipe.state.lock();
        Ok(PipeStat {
            end: endpoint.end,
            capacity: state.capacity,
            buffered: state.buf.len(),
            bytes_written: state.bytes_written,
            bytes_read: state.bytes_read,
            resize_count: state.resize_count,
            reader_open: state.reader_open,
            writer_open: state.writer_open,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const CALLER: Caller = Caller::user(11);

    #[test]
    fn capacity_follows_working_set() {
        let config = IpcConfig::default();
        assert_eq!(pipe_capacity_for(&config, 0), 64 * 1024);
        assert_eq!(pipe_capacity_for(&config, 100), 4096);
        assert_eq!(pipe_capacity_for(&config, 100_000), 32 * 1024);
        assert_eq!(pipe_capacity_for(&config, 1 << 20), 256 * 1024);
        assert_eq!(pipe_capacity_for(&config, usize::MAX), 1 << 20);
    }

    #[test]
    fn bytes_flow_in_order() {
        let registry = Registry::new();
        let pair = registry.pipe_create(&CALLER).unwrap();
        assert_eq!(registry.pipe_write(&CALLER, pair.write, b"hello ", Wait::NonBlocking).unwrap(), 6);
        assert_eq!(registry.pipe_write(&CALLER, pair.write, b"world", Wait::NonBlocking).unwrap(), 5);
        let mut buf = [0u8; 4];
        assert_eq!(registry.pipe_read(&CALLER, pair.read, &mut buf, Wait::NonBlocking).unwrap(), 4);
        assert_eq!(&buf, b"hell");
        let mut rest = [0u8; 32];
        let n = registry.pipe_read(&CALLER, pair.read, &mut rest, Wait::NonBlocking).unwrap();
        assert_eq!(&rest[..n], b"o world");
        let stat = registry.pipe_stat(pair.read).unwrap();
        assert_eq!((stat.bytes_written, stat.bytes_read, stat.buffered), (11, 11, 0));
    }

    #[test]
    fn full_buffer_accepts_partial_write() {
        let registry = Registry::new();
        let pair = registry.pipe_create_sized(&CALLER, 1).unwrap();
        let data = vec![7u8; 5000];
        assert_eq!(registry.pipe_write(&CALLER, pair.write, &data, Wait::NonBlocking).unwrap(), 4096);
        assert_eq!(
            registry.pipe_write(&CALLER, pair.write, &data, Wait::NonBlocking).unwrap_err(),
            Error::WouldBlock
        );
        assert_eq!(
            registry
                .pipe_write(&CALLER, pair.write, &data, Wait::Timeout(Duration::from_millis(20)))
                .unwrap_err(),
            Error::TimedOut
        );
    }

    #[test]
    fn wrong_end_rejected() {
        let registry = Registry::new();
        let pair = registry.pipe_create(&CALLER).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(
            registry.pipe_read(&CALLER, pair.write, &mut buf, Wait::NonBlocking).unwrap_err(),
            Error::InvalidArgument
        );
        assert_eq!(
            registry.pipe_write(&CALLER, pair.read, b"x", Wait::NonBlocking).unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn eof_after_writer_closes_and_buffer_drains() {
        let registry = Registry::new();
        let pair = registry.pipe_create(&CALLER).unwrap();
        registry.pipe_write(&CALLER, pair.write, b"tail", Wait::NonBlocking).unwrap();
        registry.pipe_close(&CALLER, pair.write).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(registry.pipe_read(&CALLER, pair.read, &mut buf, Wait::NonBlocking).unwrap(), 4);
        assert_eq!(registry.pipe_read(&CALLER, pair.read, &mut buf, Wait::NonBlocking).unwrap(), 0);
        assert!(!registry.pipe_stat(pair.read).unwrap().writer_open);
    }

    #[test]
    fn closed_reader_breaks_pipe() {
        let registry = Registry::new();
        let pair = registry.pipe_create(&CALLER).unwrap();
        registry.pipe_close(&CALLER, pair.read).unwrap();
        assert_eq!(
            registry.pipe_write(&CALLER, pair.write, b"x", Wait::NonBlocking).unwrap_err(),
            Error::BrokenPipe
        );
        assert_eq!(
            registry.pipe_close(&CALLER, pair.read).unwrap_err(),
            Error::InvalidHandle(ResourceKind::Pipe)
        );
    }

    #[test]
    fn blocked_reader_wakes_on_write() {
        let registry = Arc::new(Registry::new());
        let pair = registry.pipe_create(&CALLER).unwrap();
        let reader = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut buf = [0u8; 16];
                let n = registry
                    .pipe_read(&CALLER, pair.read, &mut buf, Wait::Timeout(Duration::from_secs(5)))
                    .unwrap();
                buf[..n].to_vec()
            })
        };
        thread::sleep(Duration::from_millis(20));
        registry.pipe_write(&CALLER, pair.write, b"ping", Wait::NonBlocking).unwrap();
        assert_eq!(reader.join().unwrap(), b"ping");
    }

    #[test]
    fn resize_counts_changes_only() {
        let registry = Registry::new();
        let pair = registry.pipe_create(&CALLER).unwrap();
        assert_eq!(registry.pipe_set_capacity(&CALLER, pair.write, 5000).unwrap(), 8192);
        assert_eq!(registry.pipe_set_capacity(&CALLER, pair.read, 8192).unwrap(), 8192);
        assert_eq!(registry.pipe_set_capacity(&CALLER, pair.read, 1).unwrap(), 4096);
        assert_eq!(registry.pipe_stat(pair.write).unwrap().resize_count, 2);
        assert_eq!(
            registry.pipe_set_capacity(&CALLER, pair.read, 2 << 20).unwrap_err(),
            Error::InvalidSize
        );
    }

    #[test]
    fn shrink_below_buffered_refused() {
        let registry = Registry::new();
        let pair = registry.pipe_create(&CALLER).unwrap();
        registry.pipe_write(&CALLER, pair.write, &[1u8; 10_000], Wait::NonBlocking).unwrap();
        assert_eq!(
            registry.pipe_set_capacity(&CALLER, pair.write, 4096).unwrap_err(),
            Error::InvalidSize
        );
    }

    #[test]
    fn pair_allocation_is_all_or_nothing() {
        let config = IpcConfig { max_pipes: 3, ..IpcConfig::default() };
        let registry = Registry::with_config(config).unwrap();
        registry.pipe_create(&CALLER).unwrap();
        assert_eq!(
            registry.pipe_create(&CALLER).unwrap_err(),
            Error::ResourceExhausted(ResourceKind::Pipe)
        );
        let stats = registry.stats();
        assert_eq!(stats.live_pipe_ends, 2);
        assert_eq!(stats.slot_allocations, 2);
        assert_eq!(stats.exhaustions, 1);
    }
}
