// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Capability objects behind handles
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! PUBLIC API:
//!   - Dispatcher: closed set of resource kinds sharing one operation surface
//!   - DispatcherKind, ResourceId
//!
//! INVARIANTS:
//!   - A dispatcher is closed exactly once; operations on a closed dispatcher fail with
//!     `InvalidArgument`
//!   - `end_transit` yields a fresh dispatcher for the same resource and retires the old one
//!     without closing the resource
//!   - Kind-specific operations on the wrong kind fail with `NotSupported`

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use nexus_abi::{Signals, SignalsState};

use crate::awakable::{AddAwakableError, Awakable};
use crate::{Error, Result};

pub mod data_pipe;
pub mod message_pipe;
pub mod platform_handle;
pub mod shared_buffer;
pub mod wait_set;

pub use data_pipe::{DataPipeConsumerDispatcher, DataPipeProducerDispatcher, DataRegion};
pub use message_pipe::{Message, MessagePipeDispatcher};
pub use platform_handle::PlatformHandleDispatcher;
pub use shared_buffer::{BufferInfo, PlatformMapping, SharedBufferDispatcher};
pub use wait_set::{ReadyMember, WaitSetDispatcher};

/// Identity of the resource a dispatcher fronts; survives transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Resource kinds a handle can refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatcherKind {
    /// One end of a message pipe.
    MessagePipe,
    /// Writing end of a data pipe.
    DataPipeProducer,
    /// Reading end of a data pipe.
    DataPipeConsumer,
    /// Shared-memory buffer.
    SharedBuffer,
    /// Wait multiplexer.
    WaitSet,
    /// Wrapped OS descriptor.
    PlatformHandle,
}

impl fmt::Display for DispatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MessagePipe => "message-pipe",
            Self::DataPipeProducer => "data-pipe-producer",
            Self::DataPipeConsumer => "data-pipe-consumer",
            Self::SharedBuffer => "shared-buffer",
            Self::WaitSet => "wait-set",
            Self::PlatformHandle => "platform-handle",
        };
        f.write_str(name)
    }
}

/// Open/closed flag shared by every dispatcher kind.
#[derive(Default)]
pub(crate) struct Lifecycle {
    closed: AtomicBool,
}

impl Lifecycle {
    /// Marks the dispatcher closed; returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::InvalidArgument)
        } else {
            Ok(())
        }
    }
}

/// Operations every dispatcher kind implements.
pub(crate) trait Resource: Send + Sync {
    fn resource_id(&self) -> ResourceId;

    fn close(&self);

    fn is_closed(&self) -> bool;

    fn signals_state(&self) -> SignalsState;

    /// One-shot registration; rejected when the outcome is already decided.
    fn add_awakable(
        &self,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> core::result::Result<(), AddAwakableError>;

    /// Persistent registration; returns the state at registration time.
    fn watch(&self, awakable: Arc<dyn Awakable>, signals: Signals, context: u64)
        -> Result<SignalsState>;

    fn remove_awakable(&self, awakable: &Arc<dyn Awakable>, context: Option<u64>);

    fn begin_transit(&self) -> Result<()> {
        Ok(())
    }

    fn cancel_transit(&self) {}

    fn end_transit(&self) -> Dispatcher;
}

/// Capability object for one resource instance.
///
/// Cloning is cheap and yields another reference to the same dispatcher.
#[derive(Clone)]
pub enum Dispatcher {
    /// Message-pipe endpoint.
    MessagePipe(Arc<MessagePipeDispatcher>),
    /// Data-pipe producer.
    DataPipeProducer(Arc<DataPipeProducerDispatcher>),
    /// Data-pipe consumer.
    DataPipeConsumer(Arc<DataPipeConsumerDispatcher>),
    /// Shared buffer.
    SharedBuffer(Arc<SharedBufferDispatcher>),
    /// Wait set.
    WaitSet(Arc<WaitSetDispatcher>),
    /// Platform handle wrapper.
    PlatformHandle(Arc<PlatformHandleDispatcher>),
}

impl Dispatcher {
    fn resource(&self) -> &dyn Resource {
        match self {
            Self::MessagePipe(d) => d.as_ref(),
            Self::DataPipeProducer(d) => d.as_ref(),
            Self::DataPipeConsumer(d) => d.as_ref(),
            Self::SharedBuffer(d) => d.as_ref(),
            Self::WaitSet(d) => d.as_ref(),
            Self::PlatformHandle(d) => d.as_ref(),
        }
    }

    /// Kind of resource behind this dispatcher.
    pub fn kind(&self) -> DispatcherKind {
        match self {
            Self::MessagePipe(_) => DispatcherKind::MessagePipe,
            Self::DataPipeProducer(_) => DispatcherKind::DataPipeProducer,
            Self::DataPipeConsumer(_) => DispatcherKind::DataPipeConsumer,
            Self::SharedBuffer(_) => DispatcherKind::SharedBuffer,
            Self::WaitSet(_) => DispatcherKind::WaitSet,
            Self::PlatformHandle(_) => DispatcherKind::PlatformHandle,
        }
    }

    /// Identity of the underlying resource.
    pub fn resource_id(&self) -> ResourceId {
        self.resource().resource_id()
    }

    /// Current signal state; closed dispatchers report [`SignalsState::never`].
    pub fn signals_state(&self) -> SignalsState {
        self.resource().signals_state()
    }

    /// Returns `true` once the dispatcher has been closed or retired by a transfer.
    pub fn is_closed(&self) -> bool {
        self.resource().is_closed()
    }

    /// Closes the dispatcher. Idempotent.
    pub fn close(&self) {
        self.resource().close();
    }

    /// Returns `true` when both values refer to the same dispatcher instance.
    pub fn ptr_eq(&self, other: &Dispatcher) -> bool {
        match (self, other) {
            (Self::MessagePipe(a), Self::MessagePipe(b)) => Arc::ptr_eq(a, b),
            (Self::DataPipeProducer(a), Self::DataPipeProducer(b)) => Arc::ptr_eq(a, b),
            (Self::DataPipeConsumer(a), Self::DataPipeConsumer(b)) => Arc::ptr_eq(a, b),
            (Self::SharedBuffer(a), Self::SharedBuffer(b)) => Arc::ptr_eq(a, b),
            (Self::WaitSet(a), Self::WaitSet(b)) => Arc::ptr_eq(a, b),
            (Self::PlatformHandle(a), Self::PlatformHandle(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn add_awakable(
        &self,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> core::result::Result<(), AddAwakableError> {
        self.resource().add_awakable(awakable, signals, context)
    }

    pub(crate) fn watch(
        &self,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> Result<SignalsState> {
        self.resource().watch(awakable, signals, context)
    }

    pub(crate) fn remove_awakable(&self, awakable: &Arc<dyn Awakable>, context: Option<u64>) {
        self.resource().remove_awakable(awakable, context);
    }

    pub(crate) fn begin_transit(&self) -> Result<()> {
        self.resource().begin_transit()
    }

    pub(crate) fn cancel_transit(&self) {
        self.resource().cancel_transit();
    }

    pub(crate) fn end_transit(&self) -> Dispatcher {
        self.resource().end_transit()
    }

    /// Message-pipe view, or [`Error::NotSupported`].
    pub fn as_message_pipe(&self) -> Result<&Arc<MessagePipeDispatcher>> {
        match self {
            Self::MessagePipe(d) => Ok(d),
            _ => Err(Error::NotSupported),
        }
    }

    /// Data-pipe producer view, or [`Error::NotSupported`].
    pub fn as_data_pipe_producer(&self) -> Result<&Arc<DataPipeProducerDispatcher>> {
        match self {
            Self::DataPipeProducer(d) => Ok(d),
            _ => Err(Error::NotSupported),
        }
    }

    /// Data-pipe consumer view, or [`Error::NotSupported`].
    pub fn as_data_pipe_consumer(&self) -> Result<&Arc<DataPipeConsumerDispatcher>> {
        match self {
            Self::DataPipeConsumer(d) => Ok(d),
            _ => Err(Error::NotSupported),
        }
    }

    /// Shared-buffer view, or [`Error::NotSupported`].
    pub fn as_shared_buffer(&self) -> Result<&Arc<SharedBufferDispatcher>> {
        match self {
            Self::SharedBuffer(d) => Ok(d),
            _ => Err(Error::NotSupported),
        }
    }

    /// Wait-set view, or [`Error::NotSupported`].
    pub fn as_wait_set(&self) -> Result<&Arc<WaitSetDispatcher>> {
        match self {
            Self::WaitSet(d) => Ok(d),
            _ => Err(Error::NotSupported),
        }
    }

    /// Platform-handle view, or [`Error::NotSupported`].
    pub fn as_platform_handle(&self) -> Result<&Arc<PlatformHandleDispatcher>> {
        match self {
            Self::PlatformHandle(d) => Ok(d),
            _ => Err(Error::NotSupported),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kind", &self.kind())
            .field("resource", &self.resource_id().raw())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_kind_is_not_supported() {
        let (a, _b) = MessagePipeDispatcher::create_pair();
        let d = Dispatcher::MessagePipe(a);
        assert_eq!(d.kind(), DispatcherKind::MessagePipe);
        assert!(d.as_message_pipe().is_ok());
        assert_eq!(d.as_shared_buffer().err(), Some(Error::NotSupported));
        assert_eq!(d.as_wait_set().err(), Some(Error::NotSupported));
    }

    #[test]
    fn lifecycle_closes_once() {
        let lifecycle = Lifecycle::default();
        assert!(lifecycle.check_open().is_ok());
        assert!(lifecycle.close());
        assert!(!lifecycle.close());
        assert_eq!(lifecycle.check_open(), Err(Error::InvalidArgument));
    }

    #[test]
    fn transit_preserves_resource_identity() {
        let (a, _b) = MessagePipeDispatcher::create_pair();
        let before = Dispatcher::MessagePipe(a);
        before.begin_transit().unwrap();
        let after = before.end_transit();
        assert_eq!(before.resource_id(), after.resource_id());
        assert!(before.is_closed());
        assert!(!after.is_closed());
        assert!(!before.ptr_eq(&after));
    }
}
