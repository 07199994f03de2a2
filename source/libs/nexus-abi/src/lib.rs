// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI definitions for the in-process IPC core
//! OWNERS: @runtime
//! PUBLIC API: Handle, Status, Signals, SignalsState, Deadline, operation flags,
//!             CreateDataPipeOptions, ReadyHandle, SystemThunks
//! DEPENDS_ON: no_std + alloc, bitflags, static_assertions
//! INVARIANTS: Status values are stable; Handle(0) is never a live handle;
//!             SystemThunks only grows by appending fields

extern crate alloc;

use core::fmt;
use core::time::Duration;

use static_assertions::const_assert_eq;

pub mod thunks;

pub use thunks::{SystemThunks, ThunkCompat};

/// Process-local handle referring to an entry in the core's handle table.
///
/// A handle is a capability, not a pointer: the only meaning of the value is as a key into the
/// table that produced it.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32);

impl Handle {
    /// Sentinel value never handed out by the handle table.
    pub const INVALID: Handle = Handle(0);

    /// Wraps a raw handle value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` for the reserved invalid value.
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0
    }

    /// Returns `true` for any value other than [`Handle::INVALID`].
    pub const fn is_valid(self) -> bool {
        !self.is_invalid()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Result codes returned across the ABI boundary.
///
/// Numeric values follow the canonical status space and must never be renumbered.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Operation succeeded.
    Ok = 0,
    /// Operation was cancelled, typically because the handle was closed underneath it.
    Cancelled = 1,
    /// Unknown failure.
    Unknown = 2,
    /// Caller supplied an invalid handle or argument.
    InvalidArgument = 3,
    /// Deadline expired before the operation completed.
    DeadlineExceeded = 4,
    /// Requested entity was not found.
    NotFound = 5,
    /// Entity already exists.
    AlreadyExists = 6,
    /// Caller lacks permission for the operation.
    PermissionDenied = 7,
    /// A resource limit was reached.
    ResourceExhausted = 8,
    /// Operation can never succeed in the current state (e.g. peer closed).
    FailedPrecondition = 9,
    /// Operation was aborted.
    Aborted = 10,
    /// Argument outside the valid range for the current state.
    OutOfRange = 11,
    /// Operation is not implemented by this resource kind.
    Unimplemented = 12,
    /// Internal invariant failed.
    Internal = 13,
    /// Service unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss.
    DataLoss = 15,
    /// Resource is in use (e.g. in transit).
    Busy = 16,
    /// Operation would block; retry after waiting.
    ShouldWait = 17,
}

impl Status {
    /// Decodes a raw status value.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Ok,
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Busy,
            17 => Self::ShouldWait,
            _ => return None,
        })
    }

    /// Returns the raw status value.
    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Returns `true` for [`Status::Ok`].
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid argument",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::PermissionDenied => "permission denied",
            Self::ResourceExhausted => "resource exhausted",
            Self::FailedPrecondition => "failed precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out of range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data loss",
            Self::Busy => "busy",
            Self::ShouldWait => "should wait",
        };
        f.write_str(text)
    }
}

bitflags::bitflags! {
    /// Readiness signals a handle can report.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Signals: u32 {
        /// Data (or a message) can be read.
        const READABLE = 1 << 0;
        /// Data (or a message) can be written.
        const WRITABLE = 1 << 1;
        /// The peer endpoint has been closed.
        const PEER_CLOSED = 1 << 2;
    }
}

/// Snapshot of a handle's signals.
///
/// `satisfiable` describes which signals could still become satisfied; once a signal drops out
/// of it, it never comes back for that handle instance.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignalsState {
    /// Signals currently asserted.
    pub satisfied: Signals,
    /// Signals that are asserted or may become asserted later.
    pub satisfiable: Signals,
}

impl SignalsState {
    /// Creates a state from its two masks.
    pub const fn new(satisfied: Signals, satisfiable: Signals) -> Self {
        Self { satisfied, satisfiable }
    }

    /// State of a resource that can never signal anything.
    pub const fn never() -> Self {
        Self { satisfied: Signals::empty(), satisfiable: Signals::empty() }
    }

    /// Returns `true` if any signal in `signals` is currently satisfied.
    pub fn satisfies(&self, signals: Signals) -> bool {
        self.satisfied.intersects(signals)
    }

    /// Returns `true` if any signal in `signals` may still become satisfied.
    pub fn can_satisfy(&self, signals: Signals) -> bool {
        self.satisfiable.intersects(signals)
    }
}

/// Relative deadline in microseconds, as accepted by blocking operations.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(u64);

impl Deadline {
    /// Never time out.
    pub const INDEFINITE: Deadline = Deadline(u64::MAX);
    /// Do not block; report the current state.
    pub const IMMEDIATE: Deadline = Deadline(0);

    /// Deadline `micros` microseconds from now.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Converts a duration, saturating to [`Deadline::INDEFINITE`].
    pub fn from_duration(duration: Duration) -> Self {
        let micros = duration.as_micros();
        if micros >= u128::from(u64::MAX) {
            Self::INDEFINITE
        } else {
            Self(micros as u64)
        }
    }

    /// Raw microsecond value.
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Returns `true` for [`Deadline::INDEFINITE`].
    pub const fn is_indefinite(self) -> bool {
        self.0 == u64::MAX
    }

    /// Returns `true` for a zero deadline (non-blocking poll).
    pub const fn is_immediate(self) -> bool {
        self.0 == 0
    }

    /// Returns the timeout as a duration, or `None` when indefinite.
    pub fn as_duration(self) -> Option<Duration> {
        if self.is_indefinite() {
            None
        } else {
            Some(Duration::from_micros(self.0))
        }
    }
}

bitflags::bitflags! {
    /// Flags accepted by `write_message`.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct WriteMessageFlags: u32 {}
}

bitflags::bitflags! {
    /// Flags accepted by `read_message`.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ReadMessageFlags: u32 {
        /// Drop the front message if it does not fit the caller's limits.
        const MAY_DISCARD = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Flags accepted by `write_data` / `begin_write_data`.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct WriteDataFlags: u32 {
        /// Write everything or nothing.
        const ALL_OR_NONE = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Flags accepted by `read_data` / `begin_read_data`.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ReadDataFlags: u32 {
        /// Read everything requested or nothing.
        const ALL_OR_NONE = 1 << 0;
        /// Consume without copying.
        const DISCARD = 1 << 1;
        /// Report the number of readable bytes only.
        const QUERY = 1 << 2;
        /// Copy without consuming.
        const PEEK = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Flags accepted by `duplicate_buffer_handle`.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DuplicateBufferFlags: u32 {
        /// The duplicate may only be mapped for reading.
        const READ_ONLY = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Flags accepted by `map_buffer`.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MapBufferFlags: u32 {}
}

/// Options for `create_data_pipe`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateDataPipeOptions {
    /// Size of one element; reads and writes are multiples of it.
    pub element_num_bytes: u32,
    /// Ring capacity in bytes; zero selects the configured default.
    pub capacity_num_bytes: u32,
}

impl Default for CreateDataPipeOptions {
    fn default() -> Self {
        Self { element_num_bytes: 1, capacity_num_bytes: 0 }
    }
}

/// One entry reported by `get_ready_handles`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyHandle {
    /// Member handle as it was added to the wait set.
    pub handle: Handle,
    /// `Ok`, `Cancelled`, or `FailedPrecondition`.
    pub result: Status,
    /// Member signals at the time it was reported.
    pub signals_state: SignalsState,
}

const_assert_eq!(core::mem::size_of::<Handle>(), 4);
const_assert_eq!(core::mem::size_of::<Status>(), 4);
const_assert_eq!(core::mem::size_of::<SignalsState>(), 8);
const_assert_eq!(core::mem::size_of::<Deadline>(), 8);
