// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Handle table (handle value -> dispatcher) with transfer arbitration
//! OWNERS: @runtime
//! PUBLIC API: HandleTable, HandleTransit
//! DEPENDS_ON: dispatcher::Dispatcher
//! INVARIANTS: Handle 0 is never issued; values are assigned monotonically and skip live
//!             entries after wrap; busy entries reject every operation except transfer
//!             completion/cancellation; pinned entries cannot be taken or transferred but
//!             stay usable; `begin_transit` is all-or-nothing
//!
//! The table has no lock of its own; `Core` serializes access with one table-wide mutex.

use std::collections::HashMap;

use nexus_abi::Handle;

use crate::dispatcher::Dispatcher;
use crate::{Error, Result};

struct Entry {
    dispatcher: Dispatcher,
    busy: bool,
    pins: usize,
}

impl Entry {
    fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher, busy: false, pins: 0 }
    }

    fn movable(&self) -> bool {
        !self.busy && self.pins == 0
    }
}

/// Bookkeeping for one handle taking part in a transfer.
///
/// Records must be handed back to either [`HandleTable::complete_transit`] or
/// [`HandleTable::cancel_transit`].
#[must_use = "transit records must be completed or cancelled"]
pub struct HandleTransit {
    handle: Handle,
    dispatcher: Dispatcher,
}

impl HandleTransit {
    /// Handle being transferred.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Dispatcher being transferred.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl core::fmt::Debug for HandleTransit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandleTransit").field("handle", &self.handle).finish()
    }
}

/// Maps handle values to dispatchers.
pub struct HandleTable {
    entries: HashMap<Handle, Entry>,
    next: u32,
    max: usize,
}

impl HandleTable {
    /// Creates an empty table holding at most `max` entries.
    pub fn new(max: usize) -> Self {
        Self { entries: HashMap::new(), next: 1, max: max.min(u32::MAX as usize - 1) }
    }

    /// Number of live entries, busy ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no handle is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn allocate(&mut self) -> Handle {
        loop {
            let candidate = Handle::from_raw(self.next);
            self.next = self.next.wrapping_add(1);
            if candidate.is_valid() && !self.entries.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Inserts `dispatcher` under a fresh handle.
    pub fn add(&mut self, dispatcher: Dispatcher) -> Result<Handle> {
        if self.entries.len() >= self.max {
            return Err(Error::ResourceExhausted);
        }
        let handle = self.allocate();
        self.entries.insert(handle, Entry::new(dispatcher));
        Ok(handle)
    }

    /// Inserts every dispatcher or none of them.
    pub fn add_batch(&mut self, dispatchers: &[Dispatcher]) -> Result<Vec<Handle>> {
        if self.entries.len().saturating_add(dispatchers.len()) > self.max {
            return Err(Error::ResourceExhausted);
        }
        Ok(dispatchers
            .iter()
            .map(|dispatcher| {
                let handle = self.allocate();
                self.entries.insert(handle, Entry::new(dispatcher.clone()));
                handle
            })
            .collect())
    }

    /// Looks up `handle` without regard to the busy flag.
    pub fn get(&self, handle: Handle) -> Option<&Dispatcher> {
        self.entries.get(&handle).map(|entry| &entry.dispatcher)
    }

    /// Looks up `handle` for an operation: `InvalidArgument` if absent, `Busy` if in transit.
    pub fn get_available(&self, handle: Handle) -> Result<Dispatcher> {
        let entry = self.entries.get(&handle).ok_or(Error::InvalidArgument)?;
        if entry.busy {
            return Err(Error::Busy);
        }
        Ok(entry.dispatcher.clone())
    }

    /// Keeps `handle` from being taken or transferred until the matching [`Self::unpin`].
    ///
    /// Pins nest; lookups through [`Self::get_available`] are unaffected.
    pub fn pin(&mut self, handle: Handle) -> Result<()> {
        let entry = self.entries.get_mut(&handle).ok_or(Error::InvalidArgument)?;
        if entry.busy {
            return Err(Error::Busy);
        }
        entry.pins += 1;
        Ok(())
    }

    /// Releases one pin taken by [`Self::pin`].
    pub fn unpin(&mut self, handle: Handle) {
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.pins = entry.pins.saturating_sub(1);
        }
    }

    /// Removes `handle` and returns its dispatcher.
    pub fn take(&mut self, handle: Handle) -> Result<Dispatcher> {
        match self.entries.get(&handle) {
            None => Err(Error::InvalidArgument),
            Some(entry) if !entry.movable() => Err(Error::Busy),
            Some(_) => self.entries.remove(&handle).map(|entry| entry.dispatcher).ok_or(Error::Internal),
        }
    }

    /// Marks every handle busy and prepares its dispatcher for transfer.
    ///
    /// Fails without side effects if any handle is absent (`InvalidArgument`), busy or
    /// repeated (`Busy`), or refused by its dispatcher.
    pub fn begin_transit(&mut self, handles: &[Handle]) -> Result<Vec<HandleTransit>> {
        for (index, handle) in handles.iter().enumerate() {
            let entry = self.entries.get(handle).ok_or(Error::InvalidArgument)?;
            if !entry.movable() || handles[..index].contains(handle) {
                return Err(Error::Busy);
            }
        }
        let mut prepared: Vec<HandleTransit> = Vec::with_capacity(handles.len());
        for handle in handles {
            let dispatcher = self.entries[handle].dispatcher.clone();
            if let Err(err) = dispatcher.begin_transit() {
                for record in prepared {
                    record.dispatcher.cancel_transit();
                }
                return Err(err);
            }
            prepared.push(HandleTransit { handle: *handle, dispatcher });
        }
        for record in &prepared {
            if let Some(entry) = self.entries.get_mut(&record.handle) {
                entry.busy = true;
            }
        }
        Ok(prepared)
    }

    /// Removes the busy entries and returns the dispatchers that now carry the resources.
    ///
    /// # Panics
    ///
    /// Panics if a record's entry is missing or not busy; that is table corruption.
    pub fn complete_transit(&mut self, transits: Vec<HandleTransit>) -> Vec<Dispatcher> {
        transits
            .into_iter()
            .map(|record| {
                let entry = self.entries.remove(&record.handle);
                assert!(
                    entry.is_some_and(|entry| entry.busy),
                    "transit completed for {} which is not in transit",
                    record.handle
                );
                record.dispatcher.end_transit()
            })
            .collect()
    }

    /// Clears the busy flags and rolls back dispatcher preparation.
    pub fn cancel_transit(&mut self, transits: Vec<HandleTransit>) {
        for record in transits {
            if let Some(entry) = self.entries.get_mut(&record.handle) {
                entry.busy = false;
            }
            record.dispatcher.cancel_transit();
        }
    }

    /// Live handles in ascending order.
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.entries.keys().copied().collect();
        handles.sort_unstable_by_key(|handle| handle.raw());
        handles
    }

    /// Empties the table, returning every entry in ascending handle order.
    pub fn take_all(&mut self) -> Vec<(Handle, Dispatcher)> {
        let mut all: Vec<(Handle, Dispatcher)> =
            self.entries.drain().map(|(handle, entry)| (handle, entry.dispatcher)).collect();
        all.sort_unstable_by_key(|(handle, _)| handle.raw());
        all
    }
}


#[cfg(test)]
mod tests_prop;
