// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process IPC core: handle-addressed message pipes, data pipes, shared buffers,
//! wait sets and wrapped platform handles
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module, proptest for the handle table, tests/ integration suites
//!
//! PUBLIC API:
//!   - Core: handle-table owning facade for every operation
//!   - Config/ConfigError: limits, loadable from TOML
//!   - Error/Result: error taxonomy mapped 1:1 onto `nexus_abi::Status`
//!   - Dispatcher and the per-kind dispatcher types
//!   - embedder: process-wide core and `SystemThunks`
//!
//! DEPENDENCIES:
//!   - nexus-abi: handle, status, signal and flag types
//!   - parking_lot: table and dispatcher locks
//!   - log: diagnostics
//!   - thiserror: error types
//!   - serde/toml: configuration
//!
//! LOCK ORDER: handle table -> dispatcher -> awakable. Wait sets: members -> member dispatcher
//! -> ready queue. Awakables are called with the dispatcher lock held and never call back.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod awakable;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod embedder;
pub mod error;
pub mod handle_table;
pub mod mapping_table;
pub mod runtime;
pub mod waiter;

pub use config::{Config, ConfigError};
pub use dispatcher::{
    BufferInfo, DataRegion, Dispatcher, DispatcherKind, PlatformMapping, ReadyMember, ResourceId,
};
pub use error::{status_of, Error, Result};
pub use mapping_table::{MappingAddress, PAGE_SIZE};
pub use runtime::{Core, ReadMessage, ShutdownReport, WaitError, WaitManyReady};

pub use nexus_abi;
