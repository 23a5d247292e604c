// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Counting semaphores with an advisory deadlock-risk valve
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: SemHandle, SemStat, Registry::sem_*
//! INVARIANTS:
//!   - 0 <= count <= max; a release past max fails with `Overflow` and leaves count unchanged
//!   - A waiter refused by the risk scorer is never enqueued
//!   - The waiter list feeds the risk scorer only; wake order is whatever the condvar gives
//!
//! TEST_SCENARIOS:
//!   - double_release_on_binary_semaphore_overflows()
//!   - inflated_waiter_queue_refuses_next_wait()
//!   - fresh_semaphore_never_refuses()

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::deadlock::{RiskScorer, SemaphoreState};
use crate::registry::Stats;
use crate::{Caller, Error, Pid, Registry, ResourceKind, Result, Wait};

slot_handle!(
    /// Handle of a semaphore slot.
    SemHandle
);

/// Diagnostic view of a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemStat {
    /// Current count.
    pub count: u32,
    /// Configured maximum.
    pub max: u32,
    /// Callers currently blocked.
    pub waiters: usize,
    /// Completed waits.
    pub waits: u64,
    /// Completed releases.
    pub releases: u64,
    /// Waits refused by the risk scorer.
    pub refusals: u64,
    /// Waits that hit their deadline.
    pub timeouts: u64,
    /// Last 32 operations, one bit each: 1 = release, 0 = wait. Newest in bit 0.
    pub pattern: u32,
    /// Score computed for the most recent would-block wait.
    pub last_risk: u8,
    /// Pid that created the semaphore.
    pub creator: Pid,
}

struct Waiter {
    ticket: u64,
    since: Instant,
}

struct SemCore {
    count: u32,
    waiters: Vec<Waiter>,
    next_ticket: u64,
    last_release: Instant,
    waits: u64,
    releases: u64,
    refusals: u64,
    timeouts: u64,
    pattern: u32,
    last_risk: u8,
    closed: bool,
}

impl SemCore {
    fn take(&mut self, n: u32) {
        self.count -= n;
        self.waits += 1;
        self.pattern <<= 1;
    }

    fn snapshot(&self, max: u32, caller: &Caller) -> SemaphoreState {
        SemaphoreState {
            count: self.count,
            max,
            waiters: self.waiters.len(),
            since_last_release: self.last_release.elapsed(),
            oldest_wait: self
                .waiters
                .iter()
                .map(|waiter| waiter.since.elapsed())
                .max()
                .unwrap_or(Duration::ZERO),
            caller: caller.state,
        }
    }
}

pub(crate) struct Semaphore {
    handle: u32,
    creator: Pid,
    max: u32,
    core: Mutex<SemCore>,
    available: Condvar,
}

impl Semaphore {
    fn new(handle: u32, creator: Pid, initial: u32, max: u32) -> Self {
        Self {
            handle,
            creator,
            max,
            core: Mutex::new(SemCore {
                count: initial,
                waiters: Vec::new(),
                next_ticket: 0,
                last_release: Instant::now(),
                waits: 0,
                releases: 0,
                refusals: 0,
                timeouts: 0,
                pattern: 0,
                last_risk: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn release(&self, n: u32) -> Result<()> {
        {
            let mut core = self.core.lock();
            if core.closed {
                return Err(Error::InvalidHandle(ResourceKind::Semaphore));
            }
            let next = core
                .count
                .checked_add(n)
                .filter(|next| *next <= self.max)
                .ok_or(Error::Overflow)?;
            core.count = next;
            core.last_release = Instant::now();
            core.releases += 1;
            core.pattern = (core.pattern << 1) | 1;
        }
        self.available.notify_all();
        Ok(())
    }

    fn acquire(
        &self,
        caller: &Caller,
        n: u32,
        wait: Wait,
        default_timeout: Duration,
        threshold: u8,
        scorer: &dyn RiskScorer,
    ) -> Result<()> {
        if n > self.max {
            return Err(Error::Overflow);
        }
        let deadline = wait.deadline(default_timeout);
        let mut core = self.core.lock();
        if core.closed {
            return Err(Error::InvalidHandle(ResourceKind::Semaphore));
        }
        if core.count >= n {
            core.take(n);
            return Ok(());
        }
        if wait.is_non_blocking() {
            return Err(Error::WouldBlock);
        }
        let risk = scorer.risk_score(&core.snapshot(self.max, caller));
        core.last_risk = risk;
        if risk > threshold {
            core.refusals += 1;
            return Err(Error::WouldDeadlock);
        }

        let ticket = core.next_ticket;
        core.next_ticket += 1;
        core.waiters.push(Waiter { ticket, since: Instant::now() });
        let outcome = loop {
            if core.closed {
                break Err(Error::InvalidHandle(ResourceKind::Semaphore));
            }
            if core.count >= n {
                core.take(n);
                break Ok(());
            }
            if Instant::now() >= deadline {
                core.timeouts += 1;
                break Err(Error::TimedOut);
            }
            self.available.wait_until(&mut core, deadline);
        };
        core.waiters.retain(|waiter| waiter.ticket != ticket);
        outcome
    }

    /// Marks the semaphore dead and wakes every waiter.
    pub(crate) fn close(&self) {
        self.core.lock().closed = true;
        self.available.notify_all();
    }

    fn stat(&self) -> SemStat {
        let core = self.core.lock();
        SemStat {
            count: core.count,
            max: self.max,
            waiters: core.waiters.len(),
            waits: core.waits,
            releases: core.releases,
            refusals: core.refusals,
            timeouts: core.timeouts,
            pattern: core.pattern,
            last_risk: core.last_risk,
            creator: self.creator,
        }
    }
}

impl Registry {
    fn semaphore(&self, handle: SemHandle) -> Result<Arc<Semaphore>> {
        self.resolve(|tables| &tables.semaphores, handle.raw())
    }

    /// Creates a semaphore with the configured default maximum.
    pub fn sem_create(&self, caller: &Caller, initial: u32) -> Result<SemHandle> {
        self.sem_create_bounded(caller, initial, self.config.sem_max_value)
    }

    /// Creates a semaphore with an explicit maximum (`max = 1` for a binary semaphore).
    pub fn sem_create_bounded(&self, caller: &Caller, initial: u32, max: u32) -> Result<SemHandle> {
        self.op();
        if max == 0 || initial > max {
            return Err(Error::InvalidArgument);
        }
        let (handle, _) = self.allocate(
            |tables| &mut tables.semaphores,
            |handle| Semaphore::new(handle, caller.pid, initial, max),
        )?;
        debug!("kipc: semaphore {handle} created initial={initial} max={max}");
        Ok(SemHandle(handle))
    }

    /// Applies `delta`, waiting up to the default timeout when decrementing.
    pub fn sem_op(&self, caller: &Caller, handle: SemHandle, delta: i32) -> Result<()> {
        self.sem_op_wait(caller, handle, delta, Wait::Blocking)
    }

    /// Applies `delta`: negative waits and decrements, positive releases, zero is a no-op.
    ///
    /// Before blocking, the registry's [`RiskScorer`] rates the wait; a score above
    /// `deadlock_threshold` fails with `WouldDeadlock` instead of blocking.
    pub fn sem_op_wait(&self, caller: &Caller, handle: SemHandle, delta: i32, wait: Wait) -> Result<()> {
        self.op();
        let sem = self.semaphore(handle)?;
        match delta {
            0 => Ok(()),
            d if d > 0 => sem.release(d.unsigned_abs()),
            d => {
                let outcome = sem.acquire(
                    caller,
                    d.unsigned_abs(),
                    wait,
                    self.config.default_timeout(),
                    self.config.deadlock_threshold,
                    self.scorer.as_ref(),
                );
                if outcome == Err(Error::WouldDeadlock) {
                    Stats::bump(&self.stats.deadlock_refusals);
                    warn!(
                        "kipc: semaphore {} wait by pid {} refused by deadlock heuristic",
                        sem.handle, caller.pid
                    );
                }
                outcome
            }
        }
    }

    /// Frees the semaphore. Blocked callers get `InvalidHandle`.
    pub fn sem_delete(&self, caller: &Caller, handle: SemHandle) -> Result<()> {
        self.op();
        let sem = self.release(|tables| &mut tables.semaphores, handle.raw())?;
        sem.close();
        debug!("kipc: semaphore {handle} deleted by pid {}", caller.pid);
        Ok(())
    }

    /// Returns count, waiters and diagnostic counters.
    pub fn sem_stat(&self, handle: SemHandle) -> Result<SemStat> {
        self.op();
        Ok(self.semaphore(handle)?.stat())
    }
}
