// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity slot table shared by all four resource kinds.

use std::sync::Arc;

use crate::{Error, ResourceKind, Result};

/// Arena of optional resources indexed by a small integer handle.
///
/// Allocation takes the first free slot, so released handles are reused lowest-first.
pub(crate) struct SlotTable<T> {
    kind: ResourceKind,
    slots: Vec<Option<Arc<T>>>,
    live: usize,
}

impl<T> SlotTable<T> {
    /// Creates an empty table sized for `capacity` entries.
    pub(crate) fn with_capacity(kind: ResourceKind, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { kind, slots, live: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn free(&self) -> usize {
        self.slots.len() - self.live
    }

    /// Inserts the value built by `make` into the first free slot and returns its index.
    pub(crate) fn allocate_with(&mut self, make: impl FnOnce(u32) -> T) -> Result<(u32, Arc<T>)> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::ResourceExhausted(self.kind))?;
        let handle = index as u32;
        let value = Arc::new(make(handle));
        self.slots[index] = Some(Arc::clone(&value));
        self.live += 1;
        Ok((handle, value))
    }

    /// Returns a new reference to the resource stored at `handle`.
    pub(crate) fn get(&self, handle: u32) -> Result<Arc<T>> {
        self.slots
            .get(handle as usize)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or(Error::InvalidHandle(self.kind))
    }

    /// Empties the slot at `handle` and returns what it held.
    pub(crate) fn release(&mut self, handle: u32) -> Result<Arc<T>> {
        let entry = self.slots.get_mut(handle as usize).ok_or(Error::InvalidHandle(self.kind))?;
        let value = entry.take().ok_or(Error::InvalidHandle(self.kind))?;
        self.live -= 1;
        Ok(value)
    }

    /// Empties the slot only if it still holds `expected`.
    ///
    /// Guards against freeing a slot that was released and reallocated in between.
    pub(crate) fn release_if(&mut self, handle: u32, expected: &Arc<T>) -> bool {
        match self.slots.get_mut(handle as usize) {
            Some(entry) if entry.as_ref().is_some_and(|held| Arc::ptr_eq(held, expected)) => {
                *entry = None;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Empties every slot, returning the resources that were live.
    pub(crate) fn drain(&mut self) -> Vec<Arc<T>> {
        self.live = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}
