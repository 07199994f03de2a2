// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Level-triggered wait multiplexer
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! PUBLIC API:
//!   - WaitSetDispatcher::{add, remove, get_ready}
//!   - ReadyMember: one entry reported by `get_ready`
//!
//! Each membership gets a fresh id. Member dispatchers notify a shared awakable, which pushes
//! the id onto a ready queue. `get_ready` examines a snapshot of the queue, re-checking each
//! member's current state before reporting it, then settles the queue in one hold of its lock:
//! ids whose membership is gone or whose member is no longer ready are dropped unless they were
//! re-queued meanwhile, and members still satisfied move to the tail. A ready member never
//! leaves the queue, so the set stays READABLE for concurrent waiters.
//!
//! INVARIANTS:
//!   - Lock order: members, then the member dispatcher, then the ready queue
//!   - The set itself is READABLE exactly while its ready queue is non-empty
//!   - Members reported as `FailedPrecondition` or `Cancelled` are removed automatically
//!   - Wait sets cannot contain wait sets and cannot be transferred

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use nexus_abi::{Handle, Signals, SignalsState};
use parking_lot::Mutex;

use super::{Dispatcher, DispatcherKind, Lifecycle, Resource, ResourceId};
use crate::awakable::{AddAwakableError, AwakeReason, Awakable, AwakableList};
use crate::{Error, Result};

/// One member reported by [`WaitSetDispatcher::get_ready`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyMember {
    /// Member handle.
    pub handle: Handle,
    /// `Ok`, `Err(Cancelled)` or `Err(FailedPrecondition)`.
    pub result: Result<()>,
    /// Member state when it was examined.
    pub signals_state: SignalsState,
}

struct Member {
    id: u64,
    dispatcher: Dispatcher,
    signals: Signals,
}

#[derive(Default)]
struct Members {
    by_handle: HashMap<Handle, Member>,
    by_id: HashMap<u64, Handle>,
    next_id: u64,
}

#[derive(Clone, Copy)]
struct Queued {
    reason: AwakeReason,
    seq: u64,
}

#[derive(Default)]
struct ReadyQueue {
    order: VecDeque<u64>,
    queued: HashMap<u64, Queued>,
    next_seq: u64,
    awakables: AwakableList,
    closed: bool,
}

impl ReadyQueue {
    fn signals(&self) -> SignalsState {
        if self.closed {
            return SignalsState::never();
        }
        let satisfied = if self.order.is_empty() { Signals::empty() } else { Signals::READABLE };
        SignalsState::new(satisfied, Signals::READABLE)
    }

    /// Queues `id` unless already queued; returns `true` on the empty to non-empty transition.
    fn push(&mut self, id: u64, reason: AwakeReason) -> bool {
        let was_empty = self.order.is_empty();
        self.next_seq += 1;
        let entry = Queued { reason, seq: self.next_seq };
        match self.queued.entry(id) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                self.order.push_back(id);
            }
        }
        was_empty && !self.order.is_empty()
    }

    fn snapshot(&self) -> Vec<(u64, Queued)> {
        self.order.iter().filter_map(|id| self.queued.get(id).map(|entry| (*id, *entry))).collect()
    }

    /// Drops `id`; with `seen`, only if it was not re-queued after that sequence number.
    fn settle(&mut self, id: u64, seen: Option<u64>) {
        let requeued = match (self.queued.get(&id), seen) {
            (None, _) => return,
            (Some(entry), Some(seq)) => entry.seq != seq,
            (Some(_), None) => false,
        };
        if !requeued {
            self.forget(id);
        }
    }

    /// Moves the queued `ids` to the tail, keeping their relative order.
    fn rotate(&mut self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        self.order.retain(|queued| !ids.contains(queued));
        let queued = &self.queued;
        self.order.extend(ids.iter().copied().filter(|id| queued.contains_key(id)));
    }

    fn forget(&mut self, id: u64) {
        if self.queued.remove(&id).is_some() {
            self.order.retain(|queued| *queued != id);
        }
    }
}

struct MemberAwakable {
    ready: Weak<Mutex<ReadyQueue>>,
}

impl Awakable for MemberAwakable {
    fn awake(&self, context: u64, reason: AwakeReason, _state: SignalsState) -> bool {
        let Some(ready) = self.ready.upgrade() else {
            return false;
        };
        let mut queue = ready.lock();
        if queue.closed {
            return false;
        }
        if queue.push(context, reason) {
            let state = queue.signals();
            queue.awakables.awake_for_state_change(state);
        }
        reason == AwakeReason::Satisfied
    }
}

/// Wait set dispatcher.
pub struct WaitSetDispatcher {
    id: ResourceId,
    members: Mutex<Members>,
    ready: Arc<Mutex<ReadyQueue>>,
    observer: Arc<dyn Awakable>,
    lifecycle: Lifecycle,
}

impl WaitSetDispatcher {
    /// Creates an empty wait set.
    pub fn create() -> Arc<Self> {
        let ready = Arc::new(Mutex::new(ReadyQueue::default()));
        let observer: Arc<dyn Awakable> = Arc::new(MemberAwakable { ready: Arc::downgrade(&ready) });
        Arc::new(Self {
            id: ResourceId::next(),
            members: Mutex::new(Members { next_id: 1, ..Members::default() }),
            ready,
            observer,
            lifecycle: Lifecycle::default(),
        })
    }

    /// Adds `dispatcher` (reachable as `handle`) watching `signals`.
    pub fn add(&self, handle: Handle, dispatcher: Dispatcher, signals: Signals) -> Result<()> {
        self.lifecycle.check_open()?;
        if dispatcher.kind() == DispatcherKind::WaitSet {
            return Err(Error::InvalidArgument);
        }
        let mut members = self.members.lock();
        if members.by_handle.contains_key(&handle) {
            return Err(Error::AlreadyExists);
        }
        let id = members.next_id;
        members.next_id += 1;
        let state = dispatcher.watch(self.observer.clone(), signals, id)?;
        if state.satisfies(signals) {
            self.enqueue(id, AwakeReason::Satisfied);
        } else if !state.can_satisfy(signals) {
            self.enqueue(id, AwakeReason::Unsatisfiable);
        }
        members.by_handle.insert(handle, Member { id, dispatcher, signals });
        members.by_id.insert(id, handle);
        log::trace!("wait-set {}: added {handle} as member {id}", self.id.raw());
        Ok(())
    }

    /// Removes `handle`; no notification for it is reported after this returns.
    pub fn remove(&self, handle: Handle) -> Result<()> {
        self.lifecycle.check_open()?;
        let mut members = self.members.lock();
        let member = members.by_handle.remove(&handle).ok_or(Error::NotFound)?;
        members.by_id.remove(&member.id);
        member.dispatcher.remove_awakable(&self.observer, Some(member.id));
        self.ready.lock().forget(member.id);
        Ok(())
    }

    /// Reports up to `max_count` members whose outcome is known.
    ///
    /// Returns `ShouldWait` when nothing is ready.
    pub fn get_ready(&self, max_count: usize) -> Result<Vec<ReadyMember>> {
        self.lifecycle.check_open()?;
        if max_count == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut members = self.members.lock();
        let queued = self.ready.lock().snapshot();
        let mut reported = Vec::new();
        let mut dropped: Vec<(u64, Option<u64>)> = Vec::new();
        let mut still_ready = Vec::new();
        for (id, entry) in queued {
            if reported.len() >= max_count {
                break;
            }
            let Some(&handle) = members.by_id.get(&id) else {
                dropped.push((id, None));
                continue;
            };
            let Some(member) = members.by_handle.get(&handle) else {
                dropped.push((id, None));
                continue;
            };
            let outcome = if entry.reason == AwakeReason::Cancelled {
                Some((Err(Error::Cancelled), SignalsState::never()))
            } else {
                let state = member.dispatcher.signals_state();
                if state.satisfies(member.signals) {
                    still_ready.push(id);
                    Some((Ok(()), state))
                } else if !state.can_satisfy(member.signals) {
                    Some((Err(Error::FailedPrecondition), state))
                } else {
                    dropped.push((id, Some(entry.seq)));
                    None
                }
            };
            let Some((result, signals_state)) = outcome else {
                continue;
            };
            if result.is_err() {
                if let Some(gone) = members.by_handle.remove(&handle) {
                    members.by_id.remove(&gone.id);
                    gone.dispatcher.remove_awakable(&self.observer, Some(gone.id));
                }
                dropped.push((id, None));
            }
            reported.push(ReadyMember { handle, result, signals_state });
        }
        {
            let mut queue = self.ready.lock();
            for (id, seen) in dropped {
                queue.settle(id, seen);
            }
            queue.rotate(&still_ready);
        }
        drop(members);
        if reported.is_empty() {
            Err(Error::ShouldWait)
        } else {
            Ok(reported)
        }
    }

    /// Number of current members.
    pub fn len(&self) -> usize {
        self.members.lock().by_handle.len()
    }

    /// Returns `true` when the set has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enqueue(&self, id: u64, reason: AwakeReason) {
        let mut queue = self.ready.lock();
        if queue.push(id, reason) {
            let state = queue.signals();
            queue.awakables.awake_for_state_change(state);
        }
    }
}

impl Resource for WaitSetDispatcher {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn close(&self) {
        if !self.lifecycle.close() {
            return;
        }
        let drained: Vec<Member> = {
            let mut members = self.members.lock();
            members.by_id.clear();
            members.by_handle.drain().map(|(_, member)| member).collect()
        };
        for member in &drained {
            member.dispatcher.remove_awakable(&self.observer, Some(member.id));
        }
        let mut queue = self.ready.lock();
        queue.closed = true;
        queue.order.clear();
        queue.queued.clear();
        queue.awakables.cancel_all(SignalsState::never());
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn signals_state(&self) -> SignalsState {
        self.ready.lock().signals()
    }

    fn add_awakable(
        &self,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> core::result::Result<(), AddAwakableError> {
        let mut queue = self.ready.lock();
        if queue.closed {
            return Err(AddAwakableError::closed());
        }
        let state = queue.signals();
        queue.awakables.add(state, awakable, signals, context)
    }

    fn watch(
        &self,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> Result<SignalsState> {
        let mut queue = self.ready.lock();
        if queue.closed {
            return Err(Error::InvalidArgument);
        }
        queue.awakables.watch(awakable, signals, context);
        Ok(queue.signals())
    }

    fn remove_awakable(&self, awakable: &Arc<dyn Awakable>, context: Option<u64>) {
        self.ready.lock().awakables.remove(awakable, context);
    }

    fn begin_transit(&self) -> Result<()> {
        Err(Error::InvalidArgument)
    }

    fn end_transit(&self) -> Dispatcher {
        unreachable!("wait sets refuse transit")
    }
}
