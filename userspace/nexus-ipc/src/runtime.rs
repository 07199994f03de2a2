// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Core facade owning the handle and mapping tables
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests + tests/ integration suites
//!
//! PUBLIC API:
//!   - Core::new/with_clock/shutdown
//!   - Generic: close, wait, wait_many, get_time_ticks_now
//!   - Message pipe: create_message_pipe, write_message, read_message[_with_limits]
//!   - Data pipe: create_data_pipe, write_data, read_data, discard_data, query_data,
//!     begin/end_write_data, begin/end_read_data
//!   - Shared buffer: create_shared_buffer, duplicate_buffer_handle, get_buffer_info,
//!     map_buffer, unmap_buffer, with_mapping[_mut]
//!   - Wait set: create_wait_set, add_to_wait_set, remove_from_wait_set, get_ready_handles
//!   - Platform handles: wrap_platform_handle, unwrap_platform_handle
//!
//! Every operation resolves its dispatcher under the table lock, releases the lock and only
//! then calls into the dispatcher. The one exception is transfer completion, which retires
//! dispatchers while the table lock is held (table lock before dispatcher lock).

use std::fs::File;
use std::sync::Arc;

use log::{debug, warn};
use nexus_abi::{
    CreateDataPipeOptions, Deadline, DuplicateBufferFlags, Handle, MapBufferFlags,
    ReadDataFlags, ReadMessageFlags, Signals, SignalsState, WriteDataFlags, WriteMessageFlags,
};
use parking_lot::Mutex;

use crate::awakable::{AddAwakableError, AwakeReason, Awakable};
use crate::clock::{self, Clock, HostClock};
use crate::config::Config;
use crate::dispatcher::{
    data_pipe, BufferInfo, DataRegion, Dispatcher, Message, MessagePipeDispatcher,
    PlatformHandleDispatcher, ReadyMember, SharedBufferDispatcher, WaitSetDispatcher,
};
use crate::handle_table::HandleTable;
use crate::mapping_table::{MappingAddress, MappingTable};
use crate::waiter::Waiter;
use crate::{Error, Result};

/// Message returned by [`Core::read_message`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReadMessage {
    /// Payload.
    pub bytes: Vec<u8>,
    /// Handles allocated for the attached resources, in attachment order.
    pub handles: Vec<Handle>,
}

/// Failure of [`Core::wait`] or [`Core::wait_many`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("wait failed: {error}")]
pub struct WaitError {
    /// Why the wait ended.
    pub error: Error,
    /// Index of the handle that decided the outcome, when one did.
    pub index: Option<usize>,
    /// Signal states of the waited handles; empty for `InvalidArgument` and `Cancelled`.
    pub signals_states: Vec<SignalsState>,
}

impl WaitError {
    fn bare(error: Error, index: Option<usize>) -> Self {
        Self { error, index, signals_states: Vec::new() }
    }
}

impl From<WaitError> for Error {
    fn from(err: WaitError) -> Self {
        err.error
    }
}

/// Success of [`Core::wait_many`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitManyReady {
    /// Index of the satisfied handle.
    pub index: usize,
    /// Signal states of every waited handle.
    pub signals_states: Vec<SignalsState>,
}

/// Resources still open when the core was shut down.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Handles that were still live, in ascending order; all have been closed.
    pub leaked_handles: Vec<Handle>,
    /// Mappings that were still live; all have been dropped.
    pub leaked_mappings: usize,
}

impl ShutdownReport {
    /// Returns `true` when nothing leaked.
    pub fn is_clean(&self) -> bool {
        self.leaked_handles.is_empty() && self.leaked_mappings == 0
    }
}

/// The IPC core.
pub struct Core {
    config: Config,
    clock: Box<dyn Clock>,
    handles: Mutex<HandleTable>,
    mappings: Mutex<MappingTable>,
}

impl Core {
    /// Creates a core with the host monotonic clock.
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Box::new(HostClock::new()))
    }

    /// Creates a core with an injected clock.
    pub fn with_clock(config: Config, clock: Box<dyn Clock>) -> Self {
        let handles = Mutex::new(HandleTable::new(config.max_handle_table_size));
        let mappings = Mutex::new(MappingTable::new(config.max_mapping_table_size));
        Self { config, clock, handles, mappings }
    }

    /// Active limits.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Monotonic time in microseconds.
    pub fn get_time_ticks_now(&self) -> u64 {
        self.clock.now_micros()
    }

    /// Number of live handles.
    pub fn handle_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Number of live mappings.
    pub fn mapping_count(&self) -> usize {
        self.mappings.lock().len()
    }

    /// Resolves `handle` for an operation (`InvalidArgument` if unknown, `Busy` in transit).
    pub fn get_dispatcher(&self, handle: Handle) -> Result<Dispatcher> {
        self.handles.lock().get_available(handle)
    }

    fn add_dispatchers(&self, dispatchers: &[Dispatcher]) -> Result<Vec<Handle>> {
        let added = self.handles.lock().add_batch(dispatchers);
        if added.is_err() {
            for dispatcher in dispatchers {
                dispatcher.close();
            }
        }
        added
    }

    fn add_dispatcher(&self, dispatcher: Dispatcher) -> Result<Handle> {
        self.add_dispatchers(core::slice::from_ref(&dispatcher))?
            .into_iter()
            .next()
            .ok_or(Error::Internal)
    }

    fn add_pair(&self, a: Dispatcher, b: Dispatcher) -> Result<(Handle, Handle)> {
        match self.add_dispatchers(&[a, b])?[..] {
            [first, second] => Ok((first, second)),
            _ => Err(Error::Internal),
        }
    }

    /// Closes `handle`.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let dispatcher = self.handles.lock().take(handle)?;
        dispatcher.close();
        Ok(())
    }

    /// Blocks until `handle` satisfies one of `signals`, can never do so, or `deadline` passes.
    pub fn wait(
        &self,
        handle: Handle,
        signals: Signals,
        deadline: Deadline,
    ) -> core::result::Result<SignalsState, WaitError> {
        self.wait_many(&[handle], &[signals], deadline)
            .map(|ready| ready.signals_states.first().copied().unwrap_or_else(SignalsState::never))
            .map_err(|err| WaitError { index: None, ..err })
    }

    /// Blocks until any handle satisfies its signals, one can never do so, or `deadline` passes.
    pub fn wait_many(
        &self,
        handles: &[Handle],
        signals: &[Signals],
        deadline: Deadline,
    ) -> core::result::Result<WaitManyReady, WaitError> {
        if handles.is_empty() || handles.len() != signals.len() {
            return Err(WaitError::bare(Error::InvalidArgument, None));
        }
        if handles.len() > self.config.max_wait_many_num_handles {
            return Err(WaitError::bare(Error::ResourceExhausted, None));
        }
        let dispatchers = {
            let table = self.handles.lock();
            handles
                .iter()
                .enumerate()
                .map(|(index, handle)| {
                    table.get_available(*handle).map_err(|error| WaitError::bare(error, Some(index)))
                })
                .collect::<core::result::Result<Vec<_>, _>>()?
        };
        let states = |dispatchers: &[Dispatcher]| -> Vec<SignalsState> {
            dispatchers.iter().map(Dispatcher::signals_state).collect()
        };

        let waiter = Waiter::new();
        let awakable: Arc<dyn Awakable> = waiter.clone();
        for (index, dispatcher) in dispatchers.iter().enumerate() {
            if let Err(AddAwakableError { error, .. }) =
                dispatcher.add_awakable(awakable.clone(), signals[index], index as u64)
            {
                for registered in &dispatchers[..index] {
                    registered.remove_awakable(&awakable, None);
                }
                return match error {
                    Error::AlreadyExists => {
                        Ok(WaitManyReady { index, signals_states: states(&dispatchers) })
                    }
                    Error::InvalidArgument => Err(WaitError::bare(error, Some(index))),
                    other => Err(WaitError {
                        error: other,
                        index: Some(index),
                        signals_states: states(&dispatchers),
                    }),
                };
            }
        }

        let outcome = waiter.wait(clock::expiry(deadline));
        for dispatcher in &dispatchers {
            dispatcher.remove_awakable(&awakable, None);
        }
        match outcome {
            Ok((context, reason)) => {
                let index = usize::try_from(context).map_err(|_| WaitError::bare(Error::Internal, None))?;
                match reason {
                    AwakeReason::Satisfied => {
                        Ok(WaitManyReady { index, signals_states: states(&dispatchers) })
                    }
                    AwakeReason::Unsatisfiable => Err(WaitError {
                        error: Error::FailedPrecondition,
                        index: Some(index),
                        signals_states: states(&dispatchers),
                    }),
                    AwakeReason::Cancelled => Err(WaitError::bare(Error::Cancelled, Some(index))),
                }
            }
            Err(error) => Err(WaitError { error, index: None, signals_states: states(&dispatchers) }),
        }
    }

    /// Creates a message pipe and returns both endpoint handles.
    pub fn create_message_pipe(&self) -> Result<(Handle, Handle)> {
        let (a, b) = MessagePipeDispatcher::create_pair();
        let pair = self.add_pair(Dispatcher::MessagePipe(a), Dispatcher::MessagePipe(b))?;
        debug!("core: created message pipe ({}, {})", pair.0, pair.1);
        Ok(pair)
    }

    /// Writes `bytes` to the pipe endpoint `handle`, transferring `handles` with it.
    ///
    /// On success the attached handles are no longer valid in this table. On failure they
    /// are all still usable. `handle` is pinned while attachments move, so a concurrent
    /// `close` of it fails with `Busy` instead of discarding them.
    pub fn write_message(
        &self,
        handle: Handle,
        bytes: &[u8],
        handles: &[Handle],
        _flags: WriteMessageFlags,
    ) -> Result<()> {
        let dispatcher = self.get_dispatcher(handle)?;
        let pipe = dispatcher.as_message_pipe()?;
        if handles.contains(&handle) {
            return Err(Error::InvalidArgument);
        }
        if bytes.len() > self.config.max_message_num_bytes
            || handles.len() > self.config.max_message_num_handles
        {
            return Err(Error::ResourceExhausted);
        }
        if handles.is_empty() {
            pipe.check_writable()?;
            return pipe.enqueue(Message::new(bytes.to_vec(), Vec::new()));
        }
        let transits = {
            let mut table = self.handles.lock();
            table.pin(handle)?;
            match table.begin_transit(handles) {
                Ok(transits) => transits,
                Err(err) => {
                    table.unpin(handle);
                    return Err(err);
                }
            }
        };
        if let Err(err) = pipe.check_writable() {
            let mut table = self.handles.lock();
            table.cancel_transit(transits);
            table.unpin(handle);
            return Err(err);
        }
        let attached = self.handles.lock().complete_transit(transits);
        debug!("core: {handle} sent {} bytes with {} handles", bytes.len(), attached.len());
        let written = pipe.enqueue(Message::new(bytes.to_vec(), attached));
        self.handles.lock().unpin(handle);
        written
    }

    /// Reads the next message with no size limits.
    pub fn read_message(&self, handle: Handle, flags: ReadMessageFlags) -> Result<ReadMessage> {
        self.read_message_with_limits(handle, usize::MAX, usize::MAX, flags)
    }

    /// Reads the next message if it fits within the given limits.
    ///
    /// An oversized message fails with `ResourceExhausted` and stays queued unless
    /// [`ReadMessageFlags::MAY_DISCARD`] is set.
    pub fn read_message_with_limits(
        &self,
        handle: Handle,
        max_num_bytes: usize,
        max_num_handles: usize,
        flags: ReadMessageFlags,
    ) -> Result<ReadMessage> {
        let dispatcher = self.get_dispatcher(handle)?;
        let message =
            dispatcher.as_message_pipe()?.read_message(max_num_bytes, max_num_handles, flags)?;
        let (bytes, attached) = message.into_parts();
        let handles = self.add_dispatchers(&attached)?;
        Ok(ReadMessage { bytes, handles })
    }

    /// Creates a data pipe and returns (producer, consumer).
    pub fn create_data_pipe(
        &self,
        options: Option<&CreateDataPipeOptions>,
    ) -> Result<(Handle, Handle)> {
        let options = options.copied().unwrap_or_default();
        let element = options.element_num_bytes as usize;
        if element == 0 {
            return Err(Error::InvalidArgument);
        }
        let capacity = match options.capacity_num_bytes as usize {
            0 => {
                let default = self.config.default_data_pipe_capacity_bytes;
                (default - default % element).max(element)
            }
            requested => requested,
        };
        if capacity % element != 0 {
            return Err(Error::InvalidArgument);
        }
        if capacity > self.config.max_data_pipe_capacity_bytes {
            return Err(Error::ResourceExhausted);
        }
        let (producer, consumer) = data_pipe::create(element, capacity);
        let pair = self.add_pair(
            Dispatcher::DataPipeProducer(producer),
            Dispatcher::DataPipeConsumer(consumer),
        )?;
        debug!("core: created data pipe ({}, {}) capacity={capacity}", pair.0, pair.1);
        Ok(pair)
    }

    /// Writes to a data-pipe producer; returns the number of bytes written.
    pub fn write_data(&self, handle: Handle, bytes: &[u8], flags: WriteDataFlags) -> Result<usize> {
        self.get_dispatcher(handle)?.as_data_pipe_producer()?.write_data(bytes, flags)
    }

    /// Starts a two-phase write.
    pub fn begin_write_data(&self, handle: Handle) -> Result<DataRegion> {
        self.get_dispatcher(handle)?.as_data_pipe_producer()?.begin_write()
    }

    /// Commits `num_bytes` of a two-phase write.
    pub fn end_write_data(&self, handle: Handle, num_bytes: usize) -> Result<()> {
        self.get_dispatcher(handle)?.as_data_pipe_producer()?.end_write(num_bytes)
    }

    /// Reads (or peeks, with [`ReadDataFlags::PEEK`]) into `out`; returns bytes transferred.
    ///
    /// With [`ReadDataFlags::QUERY`] nothing is read and the readable byte count is returned.
    pub fn read_data(&self, handle: Handle, out: &mut [u8], flags: ReadDataFlags) -> Result<usize> {
        let consumer = self.get_dispatcher(handle)?;
        let num_bytes = out.len();
        consumer.as_data_pipe_consumer()?.read_data(Some(out), num_bytes, flags)
    }

    /// Drops up to `num_bytes` without copying; returns the number dropped.
    pub fn discard_data(&self, handle: Handle, num_bytes: usize, flags: ReadDataFlags) -> Result<usize> {
        self.get_dispatcher(handle)?.as_data_pipe_consumer()?.read_data(
            None,
            num_bytes,
            flags | ReadDataFlags::DISCARD,
        )
    }

    /// Number of bytes readable from a consumer.
    pub fn query_data(&self, handle: Handle) -> Result<usize> {
        self.get_dispatcher(handle)?.as_data_pipe_consumer()?.query()
    }

    /// Starts a two-phase read.
    pub fn begin_read_data(&self, handle: Handle) -> Result<DataRegion> {
        self.get_dispatcher(handle)?.as_data_pipe_consumer()?.begin_read()
    }

    /// Consumes `num_bytes` of a two-phase read.
    pub fn end_read_data(&self, handle: Handle, num_bytes: usize) -> Result<()> {
        self.get_dispatcher(handle)?.as_data_pipe_consumer()?.end_read(num_bytes)
    }

    /// Allocates a zero-filled shared buffer.
    pub fn create_shared_buffer(&self, num_bytes: u64) -> Result<Handle> {
        if num_bytes == 0 {
            return Err(Error::InvalidArgument);
        }
        let size = usize::try_from(num_bytes).map_err(|_| Error::ResourceExhausted)?;
        if size > self.config.max_shared_memory_num_bytes {
            return Err(Error::ResourceExhausted);
        }
        let handle = self.add_dispatcher(Dispatcher::SharedBuffer(SharedBufferDispatcher::create(size)))?;
        debug!("core: created shared buffer {handle} ({size} bytes)");
        Ok(handle)
    }

    /// Creates another handle to the same buffer.
    pub fn duplicate_buffer_handle(
        &self,
        handle: Handle,
        flags: DuplicateBufferFlags,
    ) -> Result<Handle> {
        let duplicate = self.get_dispatcher(handle)?.as_shared_buffer()?.duplicate(flags)?;
        self.add_dispatcher(Dispatcher::SharedBuffer(duplicate))
    }

    /// Size and access of a buffer handle.
    pub fn get_buffer_info(&self, handle: Handle) -> Result<BufferInfo> {
        self.get_dispatcher(handle)?.as_shared_buffer()?.info()
    }

    /// Maps part of a buffer and returns the mapping's base address.
    pub fn map_buffer(
        &self,
        handle: Handle,
        offset: u64,
        num_bytes: u64,
        flags: MapBufferFlags,
    ) -> Result<MappingAddress> {
        let mapping = self.get_dispatcher(handle)?.as_shared_buffer()?.map(offset, num_bytes, flags)?;
        self.mappings.lock().add(mapping)
    }

    /// Drops the mapping at `address`.
    pub fn unmap_buffer(&self, address: MappingAddress) -> Result<()> {
        self.mappings.lock().remove(address)
    }

    fn mapping(&self, address: MappingAddress) -> Result<crate::dispatcher::PlatformMapping> {
        self.mappings.lock().get(address).map(|mapping| mapping.share()).ok_or(Error::InvalidArgument)
    }

    /// Runs `f` over the bytes of the mapping at `address`.
    pub fn with_mapping<R>(&self, address: MappingAddress, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        Ok(self.mapping(address)?.with(f))
    }

    /// Runs `f` over the bytes of the mapping at `address` mutably.
    pub fn with_mapping_mut<R>(
        &self,
        address: MappingAddress,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        self.mapping(address)?.with_mut(f)
    }

    /// Creates an empty wait set.
    pub fn create_wait_set(&self) -> Result<Handle> {
        self.add_dispatcher(Dispatcher::WaitSet(WaitSetDispatcher::create()))
    }

    /// Adds `handle` to `wait_set`, watching `signals`.
    pub fn add_to_wait_set(&self, wait_set: Handle, handle: Handle, signals: Signals) -> Result<()> {
        let (set, member) = {
            let table = self.handles.lock();
            (table.get_available(wait_set)?, table.get_available(handle)?)
        };
        set.as_wait_set()?.add(handle, member, signals)
    }

    /// Removes `handle` from `wait_set`.
    pub fn remove_from_wait_set(&self, wait_set: Handle, handle: Handle) -> Result<()> {
        self.get_dispatcher(wait_set)?.as_wait_set()?.remove(handle)
    }

    /// Reports up to `max_count` ready members; `ShouldWait` when none.
    pub fn get_ready_handles(&self, wait_set: Handle, max_count: usize) -> Result<Vec<ReadyMember>> {
        self.get_dispatcher(wait_set)?.as_wait_set()?.get_ready(max_count)
    }

    /// Wraps an OS file in a handle.
    pub fn wrap_platform_handle(&self, file: File) -> Result<Handle> {
        self.add_dispatcher(Dispatcher::PlatformHandle(PlatformHandleDispatcher::wrap(file)))
    }

    /// Consumes a platform handle and returns the wrapped file.
    pub fn unwrap_platform_handle(&self, handle: Handle) -> Result<File> {
        let dispatcher = {
            let mut table = self.handles.lock();
            table.get_available(handle)?.as_platform_handle()?;
            table.take(handle)?
        };
        dispatcher.as_platform_handle()?.unwrap_file()
    }

    /// Closes every remaining handle and drops every remaining mapping, reporting them.
    pub fn shutdown(&self) -> ShutdownReport {
        let leaked = self.handles.lock().take_all();
        let mut report = ShutdownReport::default();
        for (handle, dispatcher) in leaked {
            warn!("core: leaked handle {handle} ({})", dispatcher.kind());
            dispatcher.close();
            report.leaked_handles.push(handle);
        }
        let bases = self.mappings.lock().clear();
        for base in &bases {
            warn!("core: leaked mapping at {base}");
        }
        report.leaked_mappings = bases.len();
        report
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
