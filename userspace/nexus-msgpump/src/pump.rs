// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Single-threaded event loop over a wait set
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests + tests/pump_scenarios.rs
//!
//! PUBLIC API:
//!   - MessagePump::{new, add_handler, remove_handler, is_registered, run, quit}
//!   - MessagePump::{schedule_work, schedule_delayed_work, waker, add_observer, remove_observer}
//!   - PumpWaker: cloneable cross-thread wake-up and quit
//!
//! One iteration:
//!   1. next deadline = min(delayed work, nearest registration deadline)
//!   2. block on the wait set (or the condvar when no handle is registered) unless work is
//!      pending
//!   3. dispatch a bounded batch of ready members whose registration id is unchanged
//!   4. fire expired registrations with `DeadlineExceeded`
//!   5. run the delegate's immediate, delayed and idle hooks
//!
//! The loopback pipe that carries wake-ups is a wait-set member but never reaches handlers.
//! When the loopback fails or the pump's own wait set disappears (the core is shutting down)
//! the pump degrades to waiting on its condvar only.
//!
//! INVARIANTS:
//!   - Handler callbacks and observers run with no pump lock held
//!   - Any other unexpected status from the wait set is fatal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, warn};
use nexus_abi::{Deadline, Handle, ReadMessageFlags, Signals, WriteMessageFlags};
use nexus_ipc::{Core, Error, ReadyMember, Result};
use parking_lot::{Condvar, Mutex};

use crate::config::PumpConfig;
use crate::handler::{Delegate, Handler, HandlerId, PumpObserver};
use crate::registry::{Registry, SharedHandler};

#[derive(Default)]
struct Flags {
    wakeup_signaled: bool,
    work_scheduled: bool,
    delayed_work_time: Option<Instant>,
    quit: bool,
}

struct Shared {
    core: Arc<Core>,
    loopback: Option<Handle>,
    degraded: AtomicBool,
    flags: Mutex<Flags>,
    condvar: Condvar,
}

impl Shared {
    fn schedule_wakeup(&self) {
        let mut flags = self.flags.lock();
        if !flags.wakeup_signaled {
            flags.wakeup_signaled = true;
            self.signal_loopback();
        }
        self.condvar.notify_all();
    }

    fn signal_loopback(&self) {
        if self.degraded.load(Ordering::Acquire) {
            return;
        }
        let Some(loopback) = self.loopback else {
            return;
        };
        if let Err(err) = self.core.write_message(loopback, &[], &[], WriteMessageFlags::empty()) {
            self.degrade("wake-up pipe failed", err);
        }
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn degrade(&self, why: &str, err: Error) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!("msgpump: {why} ({err}); falling back to condvar wake-ups");
        }
    }
}

/// Statuses meaning the pump's own wait set was closed under it.
fn wait_set_lost(err: Error) -> bool {
    matches!(err, Error::Cancelled | Error::InvalidArgument)
}

/// Cross-thread handle for waking or stopping a pump.
#[derive(Clone)]
pub struct PumpWaker {
    shared: Arc<Shared>,
}

impl PumpWaker {
    /// Makes a blocked pump run one more iteration.
    pub fn schedule_wakeup(&self) {
        self.shared.schedule_wakeup();
    }

    /// Asks the running pump to return from `run`.
    pub fn quit(&self) {
        self.shared.flags.lock().quit = true;
        self.shared.schedule_wakeup();
    }
}

/// Event loop dispatching handle readiness to registered handlers.
pub struct MessagePump {
    config: PumpConfig,
    wait_set: Handle,
    loopback_reader: Option<Handle>,
    registry: Mutex<Registry>,
    observers: Mutex<Vec<Arc<dyn PumpObserver>>>,
    shared: Arc<Shared>,
    running: AtomicBool,
}

impl MessagePump {
    /// Creates a pump with its own wait set on `core`.
    pub fn new(core: Arc<Core>, config: PumpConfig) -> Result<Self> {
        config.validate().map_err(|_| Error::InvalidArgument)?;
        let wait_set = core.create_wait_set()?;
        let (loopback, loopback_reader) = match core.create_message_pipe() {
            Ok((writer, reader)) => match core.add_to_wait_set(wait_set, reader, Signals::READABLE) {
                Ok(()) => (Some(writer), Some(reader)),
                Err(err) => {
                    warn!("msgpump: cannot watch wake-up pipe ({err})");
                    for handle in [writer, reader] {
                        let _ = core.close(handle);
                    }
                    (None, None)
                }
            },
            Err(err) => {
                warn!("msgpump: cannot create wake-up pipe ({err})");
                (None, None)
            }
        };
        let degraded = AtomicBool::new(loopback.is_none());
        let shared = Arc::new(Shared {
            core,
            loopback,
            degraded,
            flags: Mutex::new(Flags::default()),
            condvar: Condvar::new(),
        });
        debug!("msgpump: created on wait set {wait_set}");
        Ok(Self {
            config,
            wait_set,
            loopback_reader,
            registry: Mutex::new(Registry::new()),
            observers: Mutex::new(Vec::new()),
            shared,
            running: AtomicBool::new(false),
        })
    }

    fn core(&self) -> &Core {
        &self.shared.core
    }

    /// Registers `handler` for `signals` on `handle`, optionally expiring at `deadline`.
    pub fn add_handler(
        &self,
        handle: Handle,
        signals: Signals,
        deadline: Option<Instant>,
        handler: Box<dyn Handler>,
    ) -> Result<HandlerId> {
        if Some(handle) == self.loopback_reader {
            return Err(Error::InvalidArgument);
        }
        let id = {
            let mut registry = self.registry.lock();
            if registry.contains(handle) {
                return Err(Error::AlreadyExists);
            }
            self.core().add_to_wait_set(self.wait_set, handle, signals)?;
            registry.insert(handle, deadline, handler)?
        };
        debug!("msgpump: registered {handle} as {id:?}");
        self.shared.schedule_wakeup();
        Ok(id)
    }

    /// Removes the registration for `handle` without calling its handler.
    pub fn remove_handler(&self, handle: Handle) -> Result<()> {
        let removed = {
            let mut registry = self.registry.lock();
            let removed = registry.remove(handle).ok_or(Error::NotFound)?;
            self.unwatch(handle);
            removed
        };
        drop(removed);
        Ok(())
    }

    /// Returns `true` while `handle` has a registration.
    pub fn is_registered(&self, handle: Handle) -> bool {
        self.registry.lock().contains(handle)
    }

    /// Adds an observer notified around handler callbacks.
    pub fn add_observer(&self, observer: Arc<dyn PumpObserver>) {
        self.observers.lock().push(observer);
    }

    /// Removes a previously added observer.
    pub fn remove_observer(&self, observer: &Arc<dyn PumpObserver>) {
        self.observers.lock().retain(|known| !Arc::ptr_eq(known, observer));
    }

    /// Handle usable from other threads to wake or stop the pump.
    pub fn waker(&self) -> PumpWaker {
        PumpWaker { shared: self.shared.clone() }
    }

    /// Asks `run` to return.
    pub fn quit(&self) {
        self.waker().quit();
    }

    /// Makes the next iteration run immediate work without blocking.
    pub fn schedule_work(&self) {
        self.shared.flags.lock().work_scheduled = true;
        self.shared.schedule_wakeup();
    }

    /// Makes the pump wake no later than `at` to run delayed work.
    pub fn schedule_delayed_work(&self, at: Instant) {
        {
            let mut flags = self.shared.flags.lock();
            flags.delayed_work_time = Some(flags.delayed_work_time.map_or(at, |known| known.min(at)));
        }
        self.shared.schedule_wakeup();
    }

    fn unwatch(&self, handle: Handle) {
        match self.core().remove_from_wait_set(self.wait_set, handle) {
            Ok(()) | Err(Error::NotFound) => {}
            Err(err) => debug!("msgpump: removing {handle} from wait set failed ({err})"),
        }
    }

    fn quit_requested(&self) -> bool {
        self.shared.flags.lock().quit
    }

    /// Runs the loop on the calling thread until [`Self::quit`] is observed.
    ///
    /// Fails with `Busy` if the pump is already running on another thread.
    pub fn run(&self, delegate: &mut dyn Delegate) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::Busy);
        }
        let mut more_work = true;
        let mut delayed_work_time: Option<Instant> = None;
        loop {
            let next_deadline = self.next_deadline(delayed_work_time);
            self.wait_for_work(!more_work, next_deadline);
            if self.quit_requested() {
                break;
            }
            self.dispatch_ready();
            if self.quit_requested() {
                break;
            }
            self.fire_expired();
            if self.quit_requested() {
                break;
            }
            more_work = std::mem::take(&mut self.shared.flags.lock().work_scheduled);
            more_work |= delegate.do_work();
            if self.quit_requested() {
                break;
            }
            delayed_work_time = None;
            more_work |= delegate.do_delayed_work(&mut delayed_work_time);
            if self.quit_requested() {
                break;
            }
            if !more_work {
                more_work = delegate.do_idle_work();
            }
        }
        self.shared.flags.lock().quit = false;
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn next_deadline(&self, delegate_time: Option<Instant>) -> Option<Instant> {
        let scheduled = self.shared.flags.lock().delayed_work_time;
        let registration = self.registry.lock().next_deadline();
        [delegate_time, scheduled, registration].into_iter().flatten().min()
    }

    fn wait_for_work(&self, block: bool, deadline: Option<Instant>) {
        let handles_registered = !self.registry.lock().is_empty();
        if !block {
            if handles_registered && !self.shared.is_degraded() {
                self.wait_on_wait_set(Deadline::IMMEDIATE);
            }
        } else if handles_registered && !self.shared.is_degraded() {
            let timeout = match deadline {
                Some(at) => Deadline::from_duration(at.saturating_duration_since(Instant::now())),
                None => Deadline::INDEFINITE,
            };
            self.wait_on_wait_set(timeout);
        } else {
            self.wait_on_condvar(deadline);
        }
        self.drain_wakeups();
        let mut flags = self.shared.flags.lock();
        if flags.delayed_work_time.is_some_and(|at| at <= Instant::now()) {
            flags.delayed_work_time = None;
        }
    }

    fn wait_on_wait_set(&self, timeout: Deadline) {
        match self.core().wait(self.wait_set, Signals::READABLE, timeout) {
            Ok(_) => {}
            Err(err) if err.error == Error::DeadlineExceeded => {}
            Err(err) if wait_set_lost(err.error) => {
                self.shared.degrade("wait set closed by core shutdown", err.error);
            }
            Err(err) => {
                error!("msgpump: wait on wait set {} failed: {}", self.wait_set, err.error);
                panic!("unexpected wait-set status {}", err.error);
            }
        }
    }

    fn wait_on_condvar(&self, deadline: Option<Instant>) {
        let mut flags = self.shared.flags.lock();
        while !flags.wakeup_signaled {
            match deadline {
                Some(at) => {
                    if self.shared.condvar.wait_until(&mut flags, at).timed_out() {
                        break;
                    }
                }
                None => self.shared.condvar.wait(&mut flags),
            }
        }
    }

    /// Empties the loopback pipe, then clears the signaled flag so the next wake-up writes again.
    fn drain_wakeups(&self) {
        if let Some(reader) = self.loopback_reader.filter(|_| !self.shared.is_degraded()) {
            loop {
                match self.core().read_message(reader, ReadMessageFlags::MAY_DISCARD) {
                    Ok(_) => {}
                    Err(Error::ShouldWait) => break,
                    Err(err) => {
                        self.shared.degrade("wake-up pipe unreadable", err);
                        break;
                    }
                }
            }
        }
        self.shared.flags.lock().wakeup_signaled = false;
    }

    fn dispatch_ready(&self) {
        if self.shared.is_degraded() || self.registry.lock().is_empty() {
            return;
        }
        let ready = match self.core().get_ready_handles(self.wait_set, self.config.max_ready_per_iteration) {
            Ok(ready) => ready,
            Err(Error::ShouldWait) => return,
            Err(err) if wait_set_lost(err) => {
                self.shared.degrade("wait set closed by core shutdown", err);
                return;
            }
            Err(err) => {
                error!("msgpump: reading wait set {} failed: {err}", self.wait_set);
                panic!("unexpected wait-set status {err}");
            }
        };
        let batch: Vec<(ReadyMember, HandlerId)> = {
            let registry = self.registry.lock();
            ready
                .into_iter()
                .filter(|member| Some(member.handle) != self.loopback_reader)
                .filter_map(|member| registry.id_of(member.handle).map(|id| (member, id)))
                .collect()
        };
        for (member, id) in batch {
            if self.quit_requested() {
                break;
            }
            match member.result {
                Ok(()) => {
                    let handler = self.registry.lock().handler_if(member.handle, id);
                    if let Some(handler) = handler {
                        self.signal(&handler, |h| h.on_handle_ready(member.handle));
                    }
                }
                Err(err) => {
                    let handler = self.registry.lock().remove_if(member.handle, id);
                    if let Some(handler) = handler {
                        self.signal(&handler, |h| h.on_handle_error(member.handle, err));
                    }
                }
            }
        }
    }

    fn fire_expired(&self) {
        let expired = self.registry.lock().take_expired(Instant::now());
        for (handle, handler) in expired {
            self.unwatch(handle);
            debug!("msgpump: {handle} deadline exceeded");
            self.signal(&handler, |h| h.on_handle_error(handle, Error::DeadlineExceeded));
        }
    }

    fn signal(&self, handler: &SharedHandler, f: impl FnOnce(&mut dyn Handler)) {
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.will_signal_handler();
        }
        f(handler.lock().as_mut());
        for observer in &observers {
            observer.did_signal_handler();
        }
    }
}

impl Drop for MessagePump {
    fn drop(&mut self) {
        let handles = [Some(self.wait_set), self.shared.loopback, self.loopback_reader];
        for handle in handles.into_iter().flatten() {
            if let Err(err) = self.core().close(handle) {
                debug!("msgpump: closing {handle} on drop failed ({err})");
            }
        }
    }
}
