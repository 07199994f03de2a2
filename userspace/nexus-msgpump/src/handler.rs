// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Callback traits implemented by pump clients
//! OWNERS: @runtime
//! STATUS: Functional

use core::fmt;
use std::time::Instant;

use nexus_abi::Handle;
use nexus_ipc::Error;

/// Identifies one registration; a handle re-registered later gets a different id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(pub(crate) u64);

impl HandlerId {
    /// Raw generation value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerId({})", self.0)
    }
}

/// Receives readiness for one registered handle.
///
/// Both callbacks run on the pump thread with no pump lock held, so they may register or
/// remove handlers, including their own.
pub trait Handler: Send {
    /// The handle satisfied the registered signals.
    fn on_handle_ready(&mut self, handle: Handle);

    /// The registration ended: `DeadlineExceeded`, `FailedPrecondition` (the signals can never
    /// be satisfied) or `Cancelled` (the handle was closed). The registration is already gone.
    fn on_handle_error(&mut self, handle: Handle, error: Error);
}

/// Notified around every handler dispatch.
pub trait PumpObserver: Send + Sync {
    /// Called right before a handler callback.
    fn will_signal_handler(&self);
    /// Called right after a handler callback.
    fn did_signal_handler(&self);
}

/// Work source driven by [`crate::MessagePump::run`].
///
/// Each hook returns `true` when more work is immediately available, which keeps the pump
/// from blocking on the next iteration.
pub trait Delegate {
    /// Runs immediate work.
    fn do_work(&mut self) -> bool;

    /// Runs due delayed work and stores when the next delayed task is due (`None` if none).
    fn do_delayed_work(&mut self, next_delayed_work_time: &mut Option<Instant>) -> bool;

    /// Runs when nothing else is pending.
    fn do_idle_work(&mut self) -> bool;
}
