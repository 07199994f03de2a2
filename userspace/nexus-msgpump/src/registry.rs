// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Handler registrations with a deadline index
//! OWNERS: @runtime
//! STATUS: Functional
//! INVARIANTS: At most one registration per handle; every registration with a deadline has
//!             exactly one entry in the deadline index; ids are never reused

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use nexus_abi::Handle;
use nexus_ipc::{Error, Result};
use parking_lot::Mutex;

use crate::handler::{Handler, HandlerId};

pub(crate) type SharedHandler = Arc<Mutex<Box<dyn Handler>>>;

struct Registration {
    id: HandlerId,
    deadline: Option<Instant>,
    handler: SharedHandler,
}

pub(crate) struct Registry {
    by_handle: HashMap<Handle, Registration>,
    deadlines: BTreeSet<(Instant, HandlerId, Handle)>,
    next_id: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self { by_handle: HashMap::new(), deadlines: BTreeSet::new(), next_id: 1 }
    }

    pub(crate) fn insert(
        &mut self,
        handle: Handle,
        deadline: Option<Instant>,
        handler: Box<dyn Handler>,
    ) -> Result<HandlerId> {
        if self.by_handle.contains_key(&handle) {
            return Err(Error::AlreadyExists);
        }
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        if let Some(at) = deadline {
            self.deadlines.insert((at, id, handle));
        }
        let handler = Arc::new(Mutex::new(handler));
        self.by_handle.insert(handle, Registration { id, deadline, handler });
        Ok(id)
    }

    pub(crate) fn contains(&self, handle: Handle) -> bool {
        self.by_handle.contains_key(&handle)
    }

    pub(crate) fn id_of(&self, handle: Handle) -> Option<HandlerId> {
        self.by_handle.get(&handle).map(|registration| registration.id)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Handler of `handle` if it is still registered under `id`.
    pub(crate) fn handler_if(&self, handle: Handle, id: HandlerId) -> Option<SharedHandler> {
        self.by_handle
            .get(&handle)
            .filter(|registration| registration.id == id)
            .map(|registration| registration.handler.clone())
    }

    pub(crate) fn remove(&mut self, handle: Handle) -> Option<SharedHandler> {
        let registration = self.by_handle.remove(&handle)?;
        if let Some(at) = registration.deadline {
            self.deadlines.remove(&(at, registration.id, handle));
        }
        Some(registration.handler)
    }

    /// Removes `handle` only if it is still registered under `id`.
    pub(crate) fn remove_if(&mut self, handle: Handle, id: HandlerId) -> Option<SharedHandler> {
        if self.id_of(handle) != Some(id) {
            return None;
        }
        self.remove(handle)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(at, _, _)| *at)
    }

    /// Removes every registration whose deadline is at or before `now`, earliest first.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<(Handle, SharedHandler)> {
        let mut expired = Vec::new();
        while let Some(&(at, id, handle)) = self.deadlines.first() {
            if at > now {
                break;
            }
            if let Some(handler) = self.remove_if(handle, id) {
                expired.push((handle, handler));
            } else {
                self.deadlines.remove(&(at, id, handle));
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Nop;

    impl Handler for Nop {
        fn on_handle_ready(&mut self, _handle: Handle) {}
        fn on_handle_error(&mut self, _handle: Handle, _error: Error) {}
    }

    fn h(raw: u32) -> Handle {
        Handle::from_raw(raw)
    }

    #[test]
    fn ids_are_fresh_per_registration() {
        let mut registry = Registry::new();
        let first = registry.insert(h(1), None, Box::new(Nop)).unwrap();
        assert_eq!(registry.insert(h(1), None, Box::new(Nop)).err(), Some(Error::AlreadyExists));
        registry.remove(h(1)).unwrap();
        let second = registry.insert(h(1), None, Box::new(Nop)).unwrap();
        assert_ne!(first, second);
        assert!(registry.handler_if(h(1), first).is_none());
        assert!(registry.handler_if(h(1), second).is_some());
        assert!(registry.remove_if(h(1), first).is_none());
        assert!(registry.contains(h(1)));
    }

    #[test]
    fn expired_registrations_leave_in_deadline_order() {
        let mut registry = Registry::new();
        let now = Instant::now();
        registry.insert(h(1), Some(now + Duration::from_millis(5)), Box::new(Nop)).unwrap();
        registry.insert(h(2), Some(now), Box::new(Nop)).unwrap();
        registry.insert(h(3), Some(now + Duration::from_secs(60)), Box::new(Nop)).unwrap();
        registry.insert(h(4), None, Box::new(Nop)).unwrap();
        assert_eq!(registry.next_deadline(), Some(now));

        let expired: Vec<Handle> = registry
            .take_expired(now + Duration::from_millis(10))
            .into_iter()
            .map(|(handle, _)| handle)
            .collect();
        assert_eq!(expired, vec![h(2), h(1)]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.next_deadline(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn removal_clears_deadline() {
        let mut registry = Registry::new();
        let now = Instant::now();
        registry.insert(h(1), Some(now), Box::new(Nop)).unwrap();
        registry.remove(h(1)).unwrap();
        assert!(registry.next_deadline().is_none());
        assert!(registry.take_expired(now).is_empty());
        assert!(registry.is_empty());
    }
}
