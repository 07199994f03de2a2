// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Observer registry that dispatchers notify on signal-state changes
//! OWNERS: @runtime
//! PUBLIC API: Awakable, AwakeReason, AwakableList, AddAwakableError
//! INVARIANTS: Awakables run with the notifying dispatcher's lock held and must never call back
//!             into that dispatcher; an entry returning `false` is dropped from the list

use std::sync::Arc;

use nexus_abi::{Signals, SignalsState};

use crate::{Error, Result};

/// Why an awakable is being notified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AwakeReason {
    /// One of the watched signals is satisfied.
    Satisfied,
    /// None of the watched signals can ever be satisfied.
    Unsatisfiable,
    /// The watched handle was closed or transferred away.
    Cancelled,
}

impl AwakeReason {
    /// Maps the reason onto the status a waiter reports.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Satisfied => Ok(()),
            Self::Unsatisfiable => Err(Error::FailedPrecondition),
            Self::Cancelled => Err(Error::Cancelled),
        }
    }
}

/// Something that wants to hear about a dispatcher's signal changes.
pub trait Awakable: Send + Sync {
    /// Delivers a notification tagged with the `context` given at registration.
    ///
    /// Returns `false` to be removed from the notifying list.
    fn awake(&self, context: u64, reason: AwakeReason, state: SignalsState) -> bool;
}

/// Rejection returned when registering an awakable whose outcome is already decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddAwakableError {
    /// `AlreadyExists` (already satisfied), `FailedPrecondition` (unsatisfiable) or
    /// `InvalidArgument` (closed dispatcher).
    pub error: Error,
    /// Signals at the time of the attempt, absent for closed dispatchers.
    pub signals_state: Option<SignalsState>,
}

impl AddAwakableError {
    /// Rejection for a dispatcher that has already been closed.
    pub const fn closed() -> Self {
        Self { error: Error::InvalidArgument, signals_state: None }
    }
}

struct Entry {
    awakable: Arc<dyn Awakable>,
    signals: Signals,
    context: u64,
}

/// List of awakables attached to one dispatcher.
#[derive(Default)]
pub struct AwakableList {
    entries: Vec<Entry>,
}

fn same(a: &Arc<dyn Awakable>, b: &Arc<dyn Awakable>) -> bool {
    core::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl AwakableList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `awakable` unless the outcome for `signals` is already known from `state`.
    pub fn add(
        &mut self,
        state: SignalsState,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> core::result::Result<(), AddAwakableError> {
        if state.satisfies(signals) {
            return Err(AddAwakableError { error: Error::AlreadyExists, signals_state: Some(state) });
        }
        if !state.can_satisfy(signals) {
            return Err(AddAwakableError {
                error: Error::FailedPrecondition,
                signals_state: Some(state),
            });
        }
        self.entries.push(Entry { awakable, signals, context });
        Ok(())
    }

    /// Registers `awakable` regardless of the current state.
    ///
    /// Used by persistent observers (wait sets) that want every later transition.
    pub fn watch(&mut self, awakable: Arc<dyn Awakable>, signals: Signals, context: u64) {
        self.entries.push(Entry { awakable, signals, context });
    }

    /// Removes every registration of `awakable` with the given context (or any context).
    pub fn remove(&mut self, awakable: &Arc<dyn Awakable>, context: Option<u64>) {
        self.entries.retain(|entry| {
            !(same(&entry.awakable, awakable) && context.map_or(true, |c| c == entry.context))
        });
    }

    /// Notifies entries affected by a transition to `state`.
    pub fn awake_for_state_change(&mut self, state: SignalsState) {
        self.entries.retain(|entry| {
            let reason = if state.satisfies(entry.signals) {
                AwakeReason::Satisfied
            } else if !state.can_satisfy(entry.signals) {
                AwakeReason::Unsatisfiable
            } else {
                return true;
            };
            entry.awakable.awake(entry.context, reason, state)
        });
    }

    /// Cancels and drops every entry.
    pub fn cancel_all(&mut self, state: SignalsState) {
        for entry in self.entries.drain(..) {
            entry.awakable.awake(entry.context, AwakeReason::Cancelled, state);
        }
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
