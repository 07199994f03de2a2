// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared-memory buffers and their mappings
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! Buffers are zero-initialised heap blocks shared by every duplicate handle and mapping.
//! A mapping keeps the memory alive after the buffer handles are closed.
//!
//! INVARIANTS:
//!   - A read-only handle can never produce a writable handle or mapping
//!   - Signals are never satisfiable

use std::sync::Arc;

use nexus_abi::{DuplicateBufferFlags, MapBufferFlags, Signals, SignalsState};
use parking_lot::Mutex;

use super::{Dispatcher, Lifecycle, Resource, ResourceId};
use crate::awakable::{AddAwakableError, Awakable};
use crate::mapping_table::MappingAddress;
use crate::{Error, Result};

struct SharedMemory {
    id: ResourceId,
    bytes: Mutex<Box<[u8]>>,
}

/// Size and access of a buffer handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    /// Buffer size in bytes.
    pub num_bytes: u64,
    /// Whether this handle only grants read access.
    pub read_only: bool,
}

/// Handle-side view of a shared buffer.
pub struct SharedBufferDispatcher {
    memory: Arc<SharedMemory>,
    read_only: bool,
    lifecycle: Lifecycle,
}

impl SharedBufferDispatcher {
    /// Allocates a zeroed buffer of `num_bytes` (already validated against limits).
    pub(crate) fn create(num_bytes: usize) -> Arc<Self> {
        let memory = Arc::new(SharedMemory {
            id: ResourceId::next(),
            bytes: Mutex::new(vec![0u8; num_bytes].into_boxed_slice()),
        });
        Arc::new(Self { memory, read_only: false, lifecycle: Lifecycle::default() })
    }

    fn num_bytes(&self) -> usize {
        self.memory.bytes.lock().len()
    }

    /// Creates another handle-side view of the same memory.
    pub fn duplicate(&self, flags: DuplicateBufferFlags) -> Result<Arc<Self>> {
        self.lifecycle.check_open()?;
        let read_only = flags.contains(DuplicateBufferFlags::READ_ONLY);
        if self.read_only && !read_only {
            return Err(Error::PermissionDenied);
        }
        Ok(Arc::new(Self {
            memory: self.memory.clone(),
            read_only,
            lifecycle: Lifecycle::default(),
        }))
    }

    /// Maps `num_bytes` starting at `offset`.
    pub fn map(&self, offset: u64, num_bytes: u64, _flags: MapBufferFlags) -> Result<PlatformMapping> {
        self.lifecycle.check_open()?;
        let size = self.num_bytes() as u64;
        let end = offset.checked_add(num_bytes).ok_or(Error::InvalidArgument)?;
        if num_bytes == 0 || end > size {
            return Err(Error::InvalidArgument);
        }
        let offset = usize::try_from(offset).map_err(|_| Error::InvalidArgument)?;
        let len = usize::try_from(num_bytes).map_err(|_| Error::InvalidArgument)?;
        Ok(PlatformMapping {
            base: MappingAddress::allocate(len),
            memory: self.memory.clone(),
            offset,
            len,
            writable: !self.read_only,
        })
    }

    /// Size and access mode.
    pub fn info(&self) -> Result<BufferInfo> {
        self.lifecycle.check_open()?;
        Ok(BufferInfo { num_bytes: self.num_bytes() as u64, read_only: self.read_only })
    }
}

impl Resource for SharedBufferDispatcher {
    fn resource_id(&self) -> ResourceId {
        self.memory.id
    }

    fn close(&self) {
        self.lifecycle.close();
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn signals_state(&self) -> SignalsState {
        SignalsState::never()
    }

    fn add_awakable(
        &self,
        _awakable: Arc<dyn Awakable>,
        _signals: Signals,
        _context: u64,
    ) -> core::result::Result<(), AddAwakableError> {
        if self.lifecycle.is_closed() {
            return Err(AddAwakableError::closed());
        }
        Err(AddAwakableError {
            error: Error::FailedPrecondition,
            signals_state: Some(SignalsState::never()),
        })
    }

    fn watch(
        &self,
        _awakable: Arc<dyn Awakable>,
        _signals: Signals,
        _context: u64,
    ) -> Result<SignalsState> {
        self.lifecycle.check_open()?;
        Ok(SignalsState::never())
    }

    fn remove_awakable(&self, _awakable: &Arc<dyn Awakable>, _context: Option<u64>) {}

    fn end_transit(&self) -> Dispatcher {
        self.lifecycle.close();
        Dispatcher::SharedBuffer(Arc::new(Self {
            memory: self.memory.clone(),
            read_only: self.read_only,
            lifecycle: Lifecycle::default(),
        }))
    }
}

/// A live view of part of a shared buffer, identified by its base address.
pub struct PlatformMapping {
    base: MappingAddress,
    memory: Arc<SharedMemory>,
    offset: usize,
    len: usize,
    writable: bool,
}

impl PlatformMapping {
    /// Base address that identifies the mapping.
    pub fn base(&self) -> MappingAddress {
        self.base
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for an empty mapping.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether writes through this mapping are allowed.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Another view of the same mapping, usable without holding the mapping table.
    pub(crate) fn share(&self) -> PlatformMapping {
        PlatformMapping {
            base: self.base,
            memory: self.memory.clone(),
            offset: self.offset,
            len: self.len,
            writable: self.writable,
        }
    }

    /// Runs `f` over the mapped bytes.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let bytes = self.memory.bytes.lock();
        f(&bytes[self.offset..self.offset + self.len])
    }

    /// Runs `f` over the mapped bytes mutably; read-only mappings fail with
    /// `PermissionDenied`.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        if !self.writable {
            return Err(Error::PermissionDenied);
        }
        let mut bytes = self.memory.bytes.lock();
        Ok(f(&mut bytes[self.offset..self.offset + self.len]))
    }
}

impl core::fmt::Debug for PlatformMapping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PlatformMapping")
            .field("base", &self.base)
            .field("len", &self.len)
            .field("writable", &self.writable)
            .finish()
    }
}
