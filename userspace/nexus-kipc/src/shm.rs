// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared-memory segments with reference-counted attachments
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: ShmHandle, ShmMapping, ShmStat, CacheHint, Registry::shm_*
//! INVARIANTS:
//!   - ref_count never goes below zero; a detach without an attach is `NotAttached`
//!   - Memory is released only after destroy was requested AND the last mapping detached
//!   - The access histogram feeds `CacheHint` only; it never affects memory validity
//!
//! Segment bookkeeping is serialised by the segment's own lock. Payload bytes are NOT:
//! concurrent writers through different mappings interleave at byte granularity, exactly
//! like System-V shared memory. Callers bring their own synchronisation for contents.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;

use crate::{Caller, Error, Pid, Registry, ResourceKind, Result};

slot_handle!(
    /// Handle of a shared-memory segment slot.
    ShmHandle
);

/// Number of buckets in the per-segment access histogram.
pub const HISTOGRAM_BUCKETS: usize = 16;
/// Average bucket count above which a segment is considered hot.
pub const HOT_THRESHOLD: u32 = 8;

/// Advisory caching hint derived from the access histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheHint {
    /// Frequently attached; worth keeping resident.
    KeepHot,
    /// Rarely attached; a candidate for eviction once no longer referenced.
    #[default]
    Evictable,
}

/// Backing storage for one segment.
///
/// Bytes are individually atomic so unsynchronised concurrent access stays free of data
/// races without imposing any ordering between writers.
struct SegmentMemory {
    bytes: Box<[AtomicU8]>,
}

impl SegmentMemory {
    fn zeroed(size: usize) -> Self {
        Self { bytes: (0..size).map(|_| AtomicU8::new(0)).collect() }
    }

    fn range(&self, offset: usize, len: usize) -> Result<&[AtomicU8]> {
        let end = offset.checked_add(len).ok_or(Error::InvalidArgument)?;
        self.bytes.get(offset..end).ok_or(Error::InvalidArgument)
    }
}

/// Capability to read and write one attachment of a segment.
///
/// Obtained from [`Registry::shm_attach`] and surrendered with [`Registry::shm_detach`]. A
/// mapping keeps the backing memory alive, so it can never dangle.
pub struct ShmMapping {
    handle: ShmHandle,
    token: u64,
    memory: Arc<SegmentMemory>,
}

impl ShmMapping {
    /// Segment this mapping belongs to.
    pub fn handle(&self) -> ShmHandle {
        self.handle
    }

    /// Opaque per-attachment token.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Segment size in bytes.
    pub fn len(&self) -> usize {
        self.memory.bytes.len()
    }

    /// Returns `true` for a zero-length segment (never produced by `shm_create`).
    pub fn is_empty(&self) -> bool {
        self.memory.bytes.is_empty()
    }

    /// Copies `buf.len()` bytes starting at `offset` out of the segment.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let src = self.memory.range(offset, buf.len())?;
        for (dst, byte) in buf.iter_mut().zip(src) {
            *dst = byte.load(Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copies `data` into the segment starting at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let dst = self.memory.range(offset, data.len())?;
        for (byte, value) in dst.iter().zip(data) {
            byte.store(*value, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl core::fmt::Debug for ShmMapping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShmMapping")
            .field("handle", &self.handle)
            .field("token", &format_args!("{:#x}", self.token))
            .field("len", &self.len())
            .finish()
    }
}

/// Diagnostic view of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmStat {
    /// Size in bytes.
    pub size: usize,
    /// Live attachments.
    pub ref_count: u32,
    /// Destroy was requested; memory goes away with the last detach.
    pub destroy_requested: bool,
    /// Attachments since creation.
    pub attaches: u64,
    /// Detaches since creation.
    pub detaches: u64,
    /// Per-bucket attach counts.
    pub histogram: [u32; HISTOGRAM_BUCKETS],
    /// Histogram average at the last prediction.
    pub predicted_access: u32,
    /// Hint derived from `predicted_access`.
    pub hint: CacheHint,
    /// Pid that created the segment.
    pub creator: Pid,
}

struct SegmentBook {
    ref_count: u32,
    destroy_requested: bool,
    attaches: u64,
    detaches: u64,
    histogram: [u32; HISTOGRAM_BUCKETS],
    predicted_access: u32,
    hint: CacheHint,
}

impl SegmentBook {
    fn predict(&mut self) -> CacheHint {
        let total: u64 = self.histogram.iter().map(|&count| u64::from(count)).sum();
        self.predicted_access = (total / HISTOGRAM_BUCKETS as u64) as u32;
        self.hint = if self.predicted_access > HOT_THRESHOLD {
            CacheHint::KeepHot
        } else {
            CacheHint::Evictable
        };
        self.hint
    }
}

/// Coarse hash of who attached and when, folded into a histogram bucket.
fn access_bucket(pid: Pid, since_create: Duration) -> usize {
    let coarse_time = (since_create.as_millis() >> 4) as u64;
    let mixed = (u64::from(pid) ^ coarse_time).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    (mixed >> 60) as usize
}

pub(crate) struct SharedSegment {
    handle: u32,
    creator: Pid,
    created: Instant,
    memory: Arc<SegmentMemory>,
    book: Mutex<SegmentBook>,
}

impl SharedSegment {
    fn new(handle: u32, creator: Pid, size: usize) -> Self {
        Self {
            handle,
            creator,
            created: Instant::now(),
            memory: Arc::new(SegmentMemory::zeroed(size)),
            book: Mutex::new(SegmentBook {
                ref_count: 0,
                destroy_requested: false,
                attaches: 0,
                detaches: 0,
                histogram: [0; HISTOGRAM_BUCKETS],
                predicted_access: 0,
                hint: CacheHint::Evictable,
            }),
        }
    }

    fn stat(&self) -> ShmStat {
        let book = self.book.lock();
        ShmStat {
            size: self.memory.bytes.len(),
            ref_count: book.ref_count,
            destroy_requested: book.destroy_requested,
            attaches: book.attaches,
            detaches: book.detaches,
            histogram: book.histogram,
            predicted_access: book.predicted_access,
            hint: book.hint,
            creator: self.creator,
        }
    }
}

impl Registry {
    fn segment(&self, handle: ShmHandle) -> Result<Arc<SharedSegment>> {
        self.resolve(|tables| &tables.segments, handle.raw())
    }

    /// Allocates a zeroed segment of `size` bytes.
    pub fn shm_create(&self, caller: &Caller, size: usize) -> Result<ShmHandle> {
        self.op();
        if size == 0 || size > self.config.max_segment_size {
            return Err(Error::InvalidSize);
        }
        let (handle, _) = self.allocate(
            |tables| &mut tables.segments,
            |handle| SharedSegment::new(handle, caller.pid, size),
        )?;
        debug!("kipc: segment {handle} created size={size} by pid {}", caller.pid);
        Ok(ShmHandle(handle))
    }

    /// Attaches the segment and returns a mapping capability.
    ///
    /// Refused with `InvalidHandle` once destroy has been requested.
    pub fn shm_attach(&self, caller: &Caller, handle: ShmHandle) -> Result<ShmMapping> {
        self.op();
        let segment = self.segment(handle)?;
        let mut book = segment.book.lock();
        if book.destroy_requested {
            return Err(Error::InvalidHandle(ResourceKind::Segment));
        }
        book.ref_count = book.ref_count.checked_add(1).ok_or(Error::Overflow)?;
        book.attaches += 1;
        let bucket = access_bucket(caller.pid, segment.created.elapsed());
        book.histogram[bucket] = book.histogram[bucket].saturating_add(1);
        book.predict();
        let token = (u64::from(segment.handle) << 32) | (book.attaches & 0xffff_ffff);
        Ok(ShmMapping { handle, token, memory: Arc::clone(&segment.memory) })
    }

    /// Surrenders a mapping. Frees the segment if destroy is pending and this was the last.
    pub fn shm_detach(&self, caller: &Caller, mapping: ShmMapping) -> Result<()> {
        self.op();
        let segment = self.segment(mapping.handle)?;
        if !Arc::ptr_eq(&segment.memory, &mapping.memory) {
            return Err(Error::InvalidHandle(ResourceKind::Segment));
        }
        let free_now = {
            let mut book = segment.book.lock();
            book.ref_count = book.ref_count.checked_sub(1).ok_or(Error::NotAttached)?;
            book.detaches += 1;
            book.ref_count == 0 && book.destroy_requested
        };
        drop(mapping);
        if free_now && self.release_exact(|tables| &mut tables.segments, segment.handle, &segment) {
            debug!("kipc: segment {} freed on last detach by pid {}", segment.handle, caller.pid);
        }
        Ok(())
    }

    /// Requests destruction. Memory is freed now if unattached, else on the last detach.
    pub fn shm_destroy(&self, caller: &Caller, handle: ShmHandle) -> Result<()> {
        self.op();
        let segment = self.segment(handle)?;
        let free_now = {
            let mut book = segment.book.lock();
            if book.destroy_requested {
                return Err(Error::InvalidHandle(ResourceKind::Segment));
            }
            book.destroy_requested = true;
            book.ref_count == 0
        };
        if free_now {
            self.release_exact(|tables| &mut tables.segments, segment.handle, &segment);
            debug!("kipc: segment {handle} destroyed by pid {}", caller.pid);
        } else {
            debug!("kipc: segment {handle} destroy deferred until last detach");
        }
        Ok(())
    }

    /// Recomputes and returns the segment's caching hint. Advisory only.
    pub fn shm_predict_access(&self, handle: ShmHandle) -> Result<CacheHint> {
        self.op();
        let segment = self.segment(handle)?;
        let hint = segment.book.lock().predict();
        Ok(hint)
    }

    /// Returns bookkeeping for the segment.
    pub fn shm_stat(&self, handle: ShmHandle) -> Result<ShmStat> {
        self.op();
        Ok(self.segment(handle)?.stat())
    }
}
