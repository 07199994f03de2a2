// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Registry of live shared-buffer mappings keyed by base address
//! OWNERS: @runtime
//! PUBLIC API: MappingTable, MappingAddress
//! INVARIANTS: One entry per base address; a duplicate base is table corruption and panics;
//!             base addresses come from a process-wide page-granular allocator and are never
//!             handed out twice

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::HashMap;

use crate::dispatcher::PlatformMapping;
use crate::{Error, Result};

/// Granularity of emulated mapping addresses.
pub const PAGE_SIZE: usize = 4096;

const FIRST_MAPPING_BASE: usize = 0x1000_0000;

/// Base address identifying a live mapping.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MappingAddress(usize);

impl MappingAddress {
    /// Wraps a raw address.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Raw address value.
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Reserves a fresh page-aligned span of at least `len` bytes plus a guard page.
    pub(crate) fn allocate(len: usize) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(FIRST_MAPPING_BASE);
        let pages = len.div_ceil(PAGE_SIZE).max(1) + 1;
        Self(NEXT.fetch_add(pages * PAGE_SIZE, Ordering::Relaxed))
    }
}

impl fmt::Debug for MappingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MappingAddress({:#x})", self.0)
    }
}

impl fmt::Display for MappingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Live mappings, bounded by a configured maximum.
pub struct MappingTable {
    mappings: HashMap<MappingAddress, PlatformMapping>,
    max: usize,
}

impl MappingTable {
    /// Creates an empty table holding at most `max` mappings.
    pub fn new(max: usize) -> Self {
        Self { mappings: HashMap::new(), max }
    }

    /// Registers `mapping` under its base address.
    ///
    /// # Panics
    ///
    /// Panics if a mapping with the same base is already registered.
    pub fn add(&mut self, mapping: PlatformMapping) -> Result<MappingAddress> {
        if self.mappings.len() >= self.max {
            return Err(Error::ResourceExhausted);
        }
        let base = mapping.base();
        if self.mappings.contains_key(&base) {
            log::error!("mapping-table: duplicate base address {base}");
            panic!("mapping table already holds {base}");
        }
        self.mappings.insert(base, mapping);
        Ok(base)
    }

    /// Removes and drops the mapping at `address`.
    pub fn remove(&mut self, address: MappingAddress) -> Result<()> {
        self.mappings.remove(&address).map(drop).ok_or(Error::InvalidArgument)
    }

    /// Mapping at `address`, if live.
    pub fn get(&self, address: MappingAddress) -> Option<&PlatformMapping> {
        self.mappings.get(&address)
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns `true` when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Drops every mapping, returning their base addresses in ascending order.
    pub fn clear(&mut self) -> Vec<MappingAddress> {
        let mut bases: Vec<MappingAddress> = self.mappings.drain().map(|(base, _)| base).collect();
        bases.sort_unstable();
        bases
    }
}
