// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process-wide core instance and the thunk table handed to loaded modules
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit test (single, serialized on the global)
//!
//! PUBLIC API:
//!   - init(config): install the process core (once)
//!   - core(): the installed core, if any
//!   - shutdown(): uninstall and report leaks
//!   - system_thunks(): SystemThunks bound to the installed core
//!
//! Thunks resolve the core on every call and report `Unavailable` when none is installed, so a
//! table obtained before `init` or kept after `shutdown` stays safe to call.

use std::sync::Arc;

use log::info;
use nexus_abi::{
    CreateDataPipeOptions, Deadline, DuplicateBufferFlags, Handle, MapBufferFlags, ReadDataFlags,
    ReadMessageFlags, ReadyHandle, Signals, SignalsState, Status, SystemThunks, WriteDataFlags,
    WriteMessageFlags,
};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::status_of;
use crate::mapping_table::MappingAddress;
use crate::runtime::{Core, ShutdownReport};
use crate::{Error, Result};

static CORE: Mutex<Option<Arc<Core>>> = parking_lot::const_mutex(None);

/// Installs the process-wide core; `AlreadyExists` if one is installed.
pub fn init(config: Config) -> Result<Arc<Core>> {
    let mut slot = CORE.lock();
    if slot.is_some() {
        return Err(Error::AlreadyExists);
    }
    let core = Arc::new(Core::new(config));
    *slot = Some(core.clone());
    info!("embedder: core installed");
    Ok(core)
}

/// The installed core, if any.
pub fn core() -> Option<Arc<Core>> {
    CORE.lock().clone()
}

/// Uninstalls the core and closes everything it still owns.
pub fn shutdown() -> Result<ShutdownReport> {
    let core = CORE.lock().take().ok_or(Error::FailedPrecondition)?;
    let report = core.shutdown();
    info!(
        "embedder: core shut down (leaked handles={}, mappings={})",
        report.leaked_handles.len(),
        report.leaked_mappings
    );
    Ok(report)
}

/// Thunk table bound to whichever core is installed at call time.
pub fn system_thunks() -> SystemThunks {
    SystemThunks {
        size: SystemThunks::CURRENT_SIZE,
        get_time_ticks_now,
        close,
        wait,
        wait_many,
        create_message_pipe,
        write_message,
        read_message,
        create_data_pipe,
        write_data,
        read_data,
        create_shared_buffer,
        duplicate_buffer_handle,
        map_buffer,
        unmap_buffer,
        create_wait_set,
        add_to_wait_set,
        remove_from_wait_set,
        get_ready_handles,
    }
}

fn with_core(f: impl FnOnce(&Core) -> Result<()>) -> Status {
    match core() {
        Some(core) => status_of(&f(&core)),
        None => Status::Unavailable,
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::OutOfRange)
}

fn get_time_ticks_now() -> u64 {
    core().map_or(0, |core| core.get_time_ticks_now())
}

fn close(handle: Handle) -> Status {
    with_core(|core| core.close(handle))
}

fn wait(
    handle: Handle,
    signals: Signals,
    deadline: Deadline,
    state: Option<&mut SignalsState>,
) -> Status {
    with_core(|core| match core.wait(handle, signals, deadline) {
        Ok(current) => {
            if let Some(out) = state {
                *out = current;
            }
            Ok(())
        }
        Err(err) => {
            if let (Some(out), Some(current)) = (state, err.signals_states.first()) {
                *out = *current;
            }
            Err(err.error)
        }
    })
}

fn wait_many(
    handles: &[Handle],
    signals: &[Signals],
    deadline: Deadline,
    index: Option<&mut u32>,
    states: Option<&mut [SignalsState]>,
) -> Status {
    with_core(|core| {
        let (result, decided, reported) = match core.wait_many(handles, signals, deadline) {
            Ok(ready) => (Ok(()), Some(ready.index), ready.signals_states),
            Err(err) => (Err(err.error), err.index, err.signals_states),
        };
        if let (Some(out), Some(decided)) = (index, decided) {
            *out = to_u32(decided)?;
        }
        if let Some(out) = states {
            for (slot, state) in out.iter_mut().zip(reported) {
                *slot = state;
            }
        }
        result
    })
}

fn create_message_pipe(a: &mut Handle, b: &mut Handle) -> Status {
    with_core(|core| {
        (*a, *b) = core.create_message_pipe()?;
        Ok(())
    })
}

fn write_message(
    handle: Handle,
    bytes: &[u8],
    handles: &[Handle],
    flags: WriteMessageFlags,
) -> Status {
    with_core(|core| core.write_message(handle, bytes, handles, flags))
}

fn read_message(
    handle: Handle,
    bytes: &mut Vec<u8>,
    handles: &mut Vec<Handle>,
    flags: ReadMessageFlags,
) -> Status {
    with_core(|core| {
        let message = core.read_message(handle, flags)?;
        *bytes = message.bytes;
        *handles = message.handles;
        Ok(())
    })
}

fn create_data_pipe(
    options: Option<&CreateDataPipeOptions>,
    producer: &mut Handle,
    consumer: &mut Handle,
) -> Status {
    with_core(|core| {
        (*producer, *consumer) = core.create_data_pipe(options)?;
        Ok(())
    })
}

fn write_data(handle: Handle, bytes: &[u8], written: &mut u32, flags: WriteDataFlags) -> Status {
    with_core(|core| {
        *written = to_u32(core.write_data(handle, bytes, flags)?)?;
        Ok(())
    })
}

fn read_data(handle: Handle, out: &mut [u8], read: &mut u32, flags: ReadDataFlags) -> Status {
    with_core(|core| {
        *read = to_u32(core.read_data(handle, out, flags)?)?;
        Ok(())
    })
}

fn create_shared_buffer(num_bytes: u64, handle: &mut Handle) -> Status {
    with_core(|core| {
        *handle = core.create_shared_buffer(num_bytes)?;
        Ok(())
    })
}

fn duplicate_buffer_handle(
    handle: Handle,
    flags: DuplicateBufferFlags,
    duplicate: &mut Handle,
) -> Status {
    with_core(|core| {
        *duplicate = core.duplicate_buffer_handle(handle, flags)?;
        Ok(())
    })
}

fn map_buffer(
    handle: Handle,
    offset: u64,
    num_bytes: u64,
    flags: MapBufferFlags,
    address: &mut usize,
) -> Status {
    with_core(|core| {
        *address = core.map_buffer(handle, offset, num_bytes, flags)?.raw();
        Ok(())
    })
}

fn unmap_buffer(address: usize) -> Status {
    with_core(|core| core.unmap_buffer(MappingAddress::from_raw(address)))
}

fn create_wait_set(handle: &mut Handle) -> Status {
    with_core(|core| {
        *handle = core.create_wait_set()?;
        Ok(())
    })
}

fn add_to_wait_set(wait_set: Handle, handle: Handle, signals: Signals) -> Status {
    with_core(|core| core.add_to_wait_set(wait_set, handle, signals))
}

fn remove_from_wait_set(wait_set: Handle, handle: Handle) -> Status {
    with_core(|core| core.remove_from_wait_set(wait_set, handle))
}

fn get_ready_handles(wait_set: Handle, max: u32, out: &mut Vec<ReadyHandle>) -> Status {
    with_core(|core| {
        let ready = core.get_ready_handles(wait_set, max as usize)?;
        out.clear();
        out.extend(ready.into_iter().map(|member| ReadyHandle {
            handle: member.handle,
            result: status_of(&member.result),
            signals_state: member.signals_state,
        }));
        Ok(())
    })
}
