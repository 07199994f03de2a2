// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Versioned function-pointer table binding the IPC core into loaded modules
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (append-only)
//!
//! The table starts with its own size in bytes. A module built against a different revision
//! compares that size with the size it was compiled with instead of assuming layout
//! compatibility. Fields are only ever appended; reordering or inserting breaks every module
//! already in the field.

use alloc::vec::Vec;

use crate::{
    CreateDataPipeOptions, Deadline, DuplicateBufferFlags, Handle, MapBufferFlags,
    ReadDataFlags, ReadMessageFlags, ReadyHandle, Signals, SignalsState, Status, WriteDataFlags,
    WriteMessageFlags,
};

/// Monotonic time in microseconds.
pub type GetTimeTicksNowFn = fn() -> u64;
/// Closes a handle.
pub type CloseFn = fn(Handle) -> Status;
/// Waits on one handle; fills the signals state when available.
pub type WaitFn = fn(Handle, Signals, Deadline, Option<&mut SignalsState>) -> Status;
/// Waits on many handles; fills the deciding index and per-handle states when available.
pub type WaitManyFn =
    fn(&[Handle], &[Signals], Deadline, Option<&mut u32>, Option<&mut [SignalsState]>) -> Status;
/// Creates a message pipe.
pub type CreateMessagePipeFn = fn(&mut Handle, &mut Handle) -> Status;
/// Writes a message, transferring `handles`.
pub type WriteMessageFn = fn(Handle, &[u8], &[Handle], WriteMessageFlags) -> Status;
/// Reads the next message.
pub type ReadMessageFn = fn(Handle, &mut Vec<u8>, &mut Vec<Handle>, ReadMessageFlags) -> Status;
/// Creates a data pipe (producer, consumer).
pub type CreateDataPipeFn =
    fn(Option<&CreateDataPipeOptions>, &mut Handle, &mut Handle) -> Status;
/// Writes data; reports the number of bytes written.
pub type WriteDataFn = fn(Handle, &[u8], &mut u32, WriteDataFlags) -> Status;
/// Reads data; reports the number of bytes read (or available for `QUERY`).
pub type ReadDataFn = fn(Handle, &mut [u8], &mut u32, ReadDataFlags) -> Status;
/// Creates a shared buffer of the given size.
pub type CreateSharedBufferFn = fn(u64, &mut Handle) -> Status;
/// Duplicates a shared buffer handle.
pub type DuplicateBufferHandleFn = fn(Handle, DuplicateBufferFlags, &mut Handle) -> Status;
/// Maps a range of a shared buffer; reports the mapping address.
pub type MapBufferFn = fn(Handle, u64, u64, MapBufferFlags, &mut usize) -> Status;
/// Unmaps the mapping at an address.
pub type UnmapBufferFn = fn(usize) -> Status;
/// Creates a wait set.
pub type CreateWaitSetFn = fn(&mut Handle) -> Status;
/// Adds a member to a wait set.
pub type AddToWaitSetFn = fn(Handle, Handle, Signals) -> Status;
/// Removes a member from a wait set.
pub type RemoveFromWaitSetFn = fn(Handle, Handle) -> Status;
/// Fetches up to `max` ready members of a wait set.
pub type GetReadyHandlesFn = fn(Handle, u32, &mut Vec<ReadyHandle>) -> Status;

/// Function-pointer table exposing the core's operation surface.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SystemThunks {
    /// Size of this table in bytes as built by the provider.
    pub size: usize,
    /// See [`GetTimeTicksNowFn`].
    pub get_time_ticks_now: GetTimeTicksNowFn,
    /// See [`CloseFn`].
    pub close: CloseFn,
    /// See [`WaitFn`].
    pub wait: WaitFn,
    /// See [`WaitManyFn`].
    pub wait_many: WaitManyFn,
    /// See [`CreateMessagePipeFn`].
    pub create_message_pipe: CreateMessagePipeFn,
    /// See [`WriteMessageFn`].
    pub write_message: WriteMessageFn,
    /// See [`ReadMessageFn`].
    pub read_message: ReadMessageFn,
    /// See [`CreateDataPipeFn`].
    pub create_data_pipe: CreateDataPipeFn,
    /// See [`WriteDataFn`].
    pub write_data: WriteDataFn,
    /// See [`ReadDataFn`].
    pub read_data: ReadDataFn,
    /// See [`CreateSharedBufferFn`].
    pub create_shared_buffer: CreateSharedBufferFn,
    /// See [`DuplicateBufferHandleFn`].
    pub duplicate_buffer_handle: DuplicateBufferHandleFn,
    /// See [`MapBufferFn`].
    pub map_buffer: MapBufferFn,
    /// See [`UnmapBufferFn`].
    pub unmap_buffer: UnmapBufferFn,
    /// See [`CreateWaitSetFn`].
    pub create_wait_set: CreateWaitSetFn,
    /// See [`AddToWaitSetFn`].
    pub add_to_wait_set: AddToWaitSetFn,
    /// See [`RemoveFromWaitSetFn`].
    pub remove_from_wait_set: RemoveFromWaitSetFn,
    /// See [`GetReadyHandlesFn`].
    pub get_ready_handles: GetReadyHandlesFn,
}

/// Outcome of comparing a provided table with the size a module was built against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThunkCompat {
    /// Same revision.
    Exact,
    /// Provider is newer; the module ignores the trailing fields.
    ProviderNewer,
    /// Provider is older; the module must check [`SystemThunks::provides`] before each call
    /// past the provided size.
    ProviderOlder,
}

impl SystemThunks {
    /// Size of the table in this revision.
    pub const CURRENT_SIZE: usize = core::mem::size_of::<SystemThunks>();

    /// Returns `true` if the field starting at `field_offset` lies within the provided table.
    ///
    /// Use with `core::mem::offset_of!(SystemThunks, field)`.
    pub const fn provides(&self, field_offset: usize) -> bool {
        field_offset + core::mem::size_of::<usize>() <= self.size
    }

    /// Compares the provided size with `expected_size`.
    pub const fn compat(&self, expected_size: usize) -> ThunkCompat {
        if self.size == expected_size {
            ThunkCompat::Exact
        } else if self.size > expected_size {
            ThunkCompat::ProviderNewer
        } else {
            ThunkCompat::ProviderOlder
        }
    }
}

impl core::fmt::Debug for SystemThunks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SystemThunks").field("size", &self.size).finish_non_exhaustive()
    }
}

static_assertions::const_assert_eq!(core::mem::offset_of!(SystemThunks, size), 0);
