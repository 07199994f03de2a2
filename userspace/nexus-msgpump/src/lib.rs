// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Event-loop message pump driving handle readiness from a nexus-ipc wait set
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests + tests/pump_scenarios.rs
//!
//! PUBLIC API:
//!   - MessagePump: registration, run loop, scheduling
//!   - PumpWaker: cross-thread wake-up / quit
//!   - Handler, PumpObserver, Delegate: client callbacks
//!   - PumpConfig: batch-size tunable
//!
//! DEPENDENCIES:
//!   - nexus-ipc: Core, wait sets, message pipes
//!   - parking_lot: registry locks and the fallback condvar
//!   - log: diagnostics

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod config;
mod handler;
mod pump;
mod registry;

pub use config::PumpConfig;
pub use handler::{Delegate, Handler, HandlerId, PumpObserver};
pub use pump::{MessagePump, PumpWaker};
