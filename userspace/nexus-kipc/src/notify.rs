// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host notification primitives (eventfd, timerfd, signalfd)
//! OWNERS: @kernel-ipc-team
//! INVARIANTS:
//!   - Every descriptor is owned by exactly one wrapper and closed on drop
//!   - Host failures surface as `Error::Os(errno)` and are never retried
//!
//! Thin pass-throughs: the registry only counts creations. Signals delivered through a
//! [`SignalFd`] must be blocked by the caller (`pthread_sigmask`) to be queued on it.

use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use log::debug;

use crate::registry::Stats;
use crate::{Caller, Error, IpcFlags, Registry, Result};

fn cvt(ret: libc::c_int) -> Result<RawFd> {
    if ret < 0 {
        Err(io::Error::last_os_error().into())
    } else {
        Ok(ret)
    }
}

fn own(fd: RawFd) -> OwnedFd {
    // SAFETY: `fd` was just returned by the kernel and is not shared with anything else.
    unsafe { OwnedFd::from_raw_fd(fd) }
}

fn read_exact<T>(fd: BorrowedFd<'_>, out: &mut T) -> Result<()> {
    let len = mem::size_of::<T>();
    // SAFETY: `out` is a valid, exclusively borrowed buffer of `len` bytes.
    let n = unsafe { libc::read(fd.as_raw_fd(), (out as *mut T).cast(), len) };
    if n < 0 {
        return Err(io::Error::last_os_error().into());
    }
    if n as usize != len {
        return Err(Error::Os(libc::EIO));
    }
    Ok(())
}

/// Counter-based wakeup object.
#[derive(Debug)]
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    fn new(initial: u32, flags: IpcFlags) -> Result<Self> {
        let mut raw = libc::EFD_CLOEXEC;
        if flags.contains(IpcFlags::NOWAIT) {
            raw |= libc::EFD_NONBLOCK;
        }
        // SAFETY: plain syscall with scalar arguments.
        let fd = cvt(unsafe { libc::eventfd(initial, raw) })?;
        Ok(Self { fd: own(fd) })
    }

    /// Adds `value` to the counter, waking one reader.
    pub fn signal(&self, value: u64) -> Result<()> {
        let bytes = value.to_ne_bytes();
        // SAFETY: `bytes` is an 8-byte buffer that outlives the call.
        let n = unsafe { libc::write(self.fd.as_raw_fd(), bytes.as_ptr().cast(), bytes.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Returns and resets the counter. Blocks while it is zero unless created with `NOWAIT`.
    pub fn wait(&self) -> Result<u64> {
        let mut value = 0u64;
        read_exact(self.fd.as_fd(), &mut value)?;
        Ok(value)
    }
}

impl AsFd for EventFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Monotonic-clock timer.
#[derive(Debug)]
pub struct TimerFd {
    fd: OwnedFd,
}

fn timespec(duration: Duration) -> libc::timespec {
    // SAFETY: `timespec` is plain data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    ts.tv_sec = libc::time_t::try_from(duration.as_secs()).unwrap_or(libc::time_t::MAX);
    ts.tv_nsec = duration.subsec_nanos() as _;
    ts
}

impl TimerFd {
    fn new(flags: IpcFlags) -> Result<Self> {
        let mut raw = libc::TFD_CLOEXEC;
        if flags.contains(IpcFlags::NOWAIT) {
            raw |= libc::TFD_NONBLOCK;
        }
        // SAFETY: plain syscall with scalar arguments.
        let fd = cvt(unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, raw) })?;
        Ok(Self { fd: own(fd) })
    }

    /// Arms the timer to fire after `first`, then every `interval` (zero for one-shot).
    ///
    /// A zero `first` disarms the timer.
    pub fn arm(&self, first: Duration, interval: Duration) -> Result<()> {
        // SAFETY: `itimerspec` is plain data; all-zero is a valid value.
        let mut spec: libc::itimerspec = unsafe { mem::zeroed() };
        spec.it_value = timespec(first);
        spec.it_interval = timespec(interval);
        // SAFETY: `spec` is valid for the call; the old value is not requested.
        cvt(unsafe { libc::timerfd_settime(self.fd.as_raw_fd(), 0, &spec, std::ptr::null_mut()) })?;
        Ok(())
    }

    /// Stops the timer.
    pub fn disarm(&self) -> Result<()> {
        self.arm(Duration::ZERO, Duration::ZERO)
    }

    /// Returns the number of expirations since the last call.
    pub fn wait(&self) -> Result<u64> {
        let mut expirations = 0u64;
        read_exact(self.fd.as_fd(), &mut expirations)?;
        Ok(expirations)
    }
}

impl AsFd for TimerFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Descriptor that queues a fixed set of signals.
#[derive(Debug)]
pub struct SignalFd {
    fd: OwnedFd,
}

impl SignalFd {
    fn new(signals: &[i32], flags: IpcFlags) -> Result<Self> {
        // SAFETY: `sigset_t` is plain data; it is initialised by `sigemptyset` below.
        let mut mask: libc::sigset_t = unsafe { mem::zeroed() };
        // SAFETY: `mask` is a valid, exclusively borrowed sigset.
        cvt(unsafe { libc::sigemptyset(&mut mask) })?;
        for &signo in signals {
            // SAFETY: as above; invalid numbers are rejected with EINVAL.
            cvt(unsafe { libc::sigaddset(&mut mask, signo) })?;
        }
        let mut raw = libc::SFD_CLOEXEC;
        if flags.contains(IpcFlags::NOWAIT) {
            raw |= libc::SFD_NONBLOCK;
        }
        // SAFETY: `mask` is initialised; -1 requests a new descriptor.
        let fd = cvt(unsafe { libc::signalfd(-1, &mask, raw) })?;
        Ok(Self { fd: own(fd) })
    }

    /// Dequeues one pending signal and returns its number.
    pub fn next_signal(&self) -> Result<u32> {
        // SAFETY: `signalfd_siginfo` is plain data; all-zero is a valid value.
        let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };
        read_exact(self.fd.as_fd(), &mut info)?;
        Ok(info.ssi_signo)
    }
}

impl AsFd for SignalFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Registry {
    fn note_notify<T: AsFd>(&self, kind: &str, caller: &Caller, created: &Result<T>) {
        match created {
            Ok(primitive) => {
                Stats::bump(&self.stats.notify_ops);
                debug!(
                    "kipc: {kind} fd {} created by pid {}",
                    primitive.as_fd().as_raw_fd(),
                    caller.pid
                );
            }
            Err(err) => debug!("kipc: {kind} creation failed for pid {}: {err}", caller.pid),
        }
    }

    /// Creates an eventfd with the given initial counter.
    pub fn event_create(&self, caller: &Caller, initial: u32, flags: IpcFlags) -> Result<EventFd> {
        self.op();
        let created = EventFd::new(initial, flags);
        self.note_notify("eventfd", caller, &created);
        created
    }

    /// Creates a disarmed monotonic timerfd.
    pub fn timer_create(&self, caller: &Caller, flags: IpcFlags) -> Result<TimerFd> {
        self.op();
        let created = TimerFd::new(flags);
        self.note_notify("timerfd", caller, &created);
        created
    }

    /// Creates a signalfd for `signals`.
    pub fn signal_create(&self, caller: &Caller, signals: &[i32], flags: IpcFlags) -> Result<SignalFd> {
        self.op();
        let created = SignalFd::new(signals, flags);
        self.note_notify("signalfd", caller, &created);
        created
    }
}
