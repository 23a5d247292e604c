// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Resource registry (four bounded slot tables behind one coarse lock)
//! OWNERS: @kernel-ipc-team
//!
//! The registry lock is held only to resolve, allocate or release a slot. Callers clone the
//! resource `Arc` out, drop the registry lock, then take the per-resource lock.
//!
//! Resource operations live next to their resource type (`queue`, `shm`, `sem`, `pipe`) as
//! further `impl Registry` blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::{ConfigError, IpcConfig};
use crate::deadlock::{DefaultRiskScorer, RiskScorer};
use crate::pipe::PipeEndpoint;
use crate::queue::MessageQueue;
use crate::sem::Semaphore;
use crate::shm::SharedSegment;
use crate::table::SlotTable;
use crate::{Error, ResourceKind, Result};

pub(crate) struct Tables {
    pub(crate) queues: SlotTable<MessageQueue>,
    pub(crate) segments: SlotTable<SharedSegment>,
    pub(crate) semaphores: SlotTable<Semaphore>,
    pub(crate) pipes: SlotTable<PipeEndpoint>,
}

impl Tables {
    fn new(config: &IpcConfig) -> Self {
        Self {
            queues: SlotTable::with_capacity(ResourceKind::Queue, config.max_queues),
            segments: SlotTable::with_capacity(ResourceKind::Segment, config.max_segments),
            semaphores: SlotTable::with_capacity(ResourceKind::Semaphore, config.max_semaphores),
            pipes: SlotTable::with_capacity(ResourceKind::Pipe, config.max_pipes),
        }
    }
}

#[derive(Default)]
pub(crate) struct Stats {
    pub(crate) total_ipc_ops: AtomicU64,
    pub(crate) slot_allocations: AtomicU64,
    pub(crate) slot_releases: AtomicU64,
    pub(crate) exhaustions: AtomicU64,
    pub(crate) messages_sent: AtomicU64,
    pub(crate) messages_received: AtomicU64,
    pub(crate) deadlock_refusals: AtomicU64,
    pub(crate) notify_ops: AtomicU64,
}

impl Stats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the registry's diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Every entry point invocation, including failed ones.
    pub total_ipc_ops: u64,
    /// Successful slot allocations across all tables.
    pub slot_allocations: u64,
    /// Slot releases across all tables.
    pub slot_releases: u64,
    /// Allocations refused with `ResourceExhausted`.
    pub exhaustions: u64,
    /// Messages accepted by `queue_send`.
    pub messages_sent: u64,
    /// Messages delivered by `queue_receive`.
    pub messages_received: u64,
    /// Semaphore waits refused with `WouldDeadlock`.
    pub deadlock_refusals: u64,
    /// Notification primitives created.
    pub notify_ops: u64,
    /// Live message queues.
    pub live_queues: usize,
    /// Live shared-memory segments.
    pub live_segments: usize,
    /// Live semaphores.
    pub live_semaphores: usize,
    /// Live pipe ends.
    pub live_pipe_ends: usize,
}

/// Fixed-capacity registry of IPC resources.
///
/// One value per embedding runtime; independent instances share nothing. Dropping the
/// registry closes every resource and wakes all blocked callers with `InvalidHandle`.
pub struct Registry {
    pub(crate) config: IpcConfig,
    pub(crate) tables: Mutex<Tables>,
    pub(crate) stats: Stats,
    pub(crate) scorer: Box<dyn RiskScorer>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::build(IpcConfig::default())
    }
}

impl Registry {
    /// Creates a registry with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from a validated configuration.
    pub fn with_config(config: IpcConfig) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: IpcConfig) -> Self {
        debug!(
            "kipc: registry up queues={} segments={} semaphores={} pipes={}",
            config.max_queues, config.max_segments, config.max_semaphores, config.max_pipes
        );
        Self {
            tables: Mutex::new(Tables::new(&config)),
            config,
            stats: Stats::default(),
            scorer: Box::new(DefaultRiskScorer),
        }
    }

    /// Replaces the deadlock-risk heuristic used by semaphore waits.
    pub fn with_risk_scorer(mut self, scorer: Box<dyn RiskScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    /// Monotonic count of entry point invocations.
    pub fn total_ipc_ops(&self) -> u64 {
        self.stats.total_ipc_ops.load(Ordering::Relaxed)
    }

    /// Copies the diagnostic counters and table occupancy.
    pub fn stats(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let tables = self.tables.lock();
        StatsSnapshot {
            total_ipc_ops: load(&self.stats.total_ipc_ops),
            slot_allocations: load(&self.stats.slot_allocations),
            slot_releases: load(&self.stats.slot_releases),
            exhaustions: load(&self.stats.exhaustions),
            messages_sent: load(&self.stats.messages_sent),
            messages_received: load(&self.stats.messages_received),
            deadlock_refusals: load(&self.stats.deadlock_refusals),
            notify_ops: load(&self.stats.notify_ops),
            live_queues: tables.queues.len(),
            live_segments: tables.segments.len(),
            live_semaphores: tables.semaphores.len(),
            live_pipe_ends: tables.pipes.len(),
        }
    }

    /// Counts one entry point invocation.
    pub(crate) fn op(&self) {
        Stats::bump(&self.stats.total_ipc_ops);
    }

    /// Allocates a slot in the table chosen by `pick`.
    pub(crate) fn allocate<T>(
        &self,
        pick: impl FnOnce(&mut Tables) -> &mut SlotTable<T>,
        make: impl FnOnce(u32) -> T,
    ) -> Result<(u32, Arc<T>)> {
        let result = {
            let mut tables = self.tables.lock();
            pick(&mut *tables).allocate_with(make)
        };
        self.note_allocation(&result);
        result
    }

    pub(crate) fn note_allocation<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => Stats::bump(&self.stats.slot_allocations),
            Err(err @ Error::ResourceExhausted(_)) => {
                Stats::bump(&self.stats.exhaustions);
                warn!("kipc: {err}");
            }
            Err(_) => {}
        }
    }

    /// Clones the resource at `handle` out of the table chosen by `pick`.
    pub(crate) fn resolve<T>(
        &self,
        pick: impl FnOnce(&Tables) -> &SlotTable<T>,
        handle: u32,
    ) -> Result<Arc<T>> {
        let tables = self.tables.lock();
        pick(&*tables).get(handle)
    }

    /// Empties the slot at `handle` in the table chosen by `pick`.
    pub(crate) fn release<T>(
        &self,
        pick: impl FnOnce(&mut Tables) -> &mut SlotTable<T>,
        handle: u32,
    ) -> Result<Arc<T>> {
        let released = {
            let mut tables = self.tables.lock();
            pick(&mut *tables).release(handle)
        };
        if released.is_ok() {
            Stats::bump(&self.stats.slot_releases);
        }
        released
    }

    /// Empties the slot only while it still holds `expected`.
    pub(crate) fn release_exact<T>(
        &self,
        pick: impl FnOnce(&mut Tables) -> &mut SlotTable<T>,
        handle: u32,
        expected: &Arc<T>,
    ) -> bool {
        let released = {
            let mut tables = self.tables.lock();
            pick(&mut *tables).release_if(handle, expected)
        };
        if released {
            Stats::bump(&self.stats.slot_releases);
        }
        released
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let (queues, semaphores, pipes, segments) = {
            let tables = self.tables.get_mut();
            (
                tables.queues.drain(),
                tables.semaphores.drain(),
                tables.pipes.drain(),
                tables.segments.drain(),
            )
        };
        let mut discarded = 0usize;
        for queue in &queues {
            discarded += queue.close();
        }
        for sem in &semaphores {
            sem.close();
        }
        for end in &pipes {
            end.close();
        }
        debug!(
            "kipc: registry down queues={} discarded={} semaphores={} pipe_ends={} segments={}",
            queues.len(),
            discarded,
            semaphores.len(),
            pipes.len(),
            segments.len()
        );
    }
}
