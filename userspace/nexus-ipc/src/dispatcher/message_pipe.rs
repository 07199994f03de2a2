// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process message pipe
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! Two endpoints share one locked state block. Each endpoint owns the queue of messages
//! written by its peer. Messages carry bytes plus dispatchers that were transferred out of the
//! sender's handle table; a message dropped without being read closes its dispatchers.
//!
//! INVARIANTS:
//!   - Attached dispatchers are never closed while the pipe lock is held
//!   - READABLE becomes unsatisfiable only when the peer is closed and the queue is empty

use std::collections::VecDeque;
use std::sync::Arc;

use nexus_abi::{ReadMessageFlags, Signals, SignalsState};
use parking_lot::Mutex;

use super::{Dispatcher, Lifecycle, Resource, ResourceId};
use crate::awakable::{AddAwakableError, Awakable, AwakableList};
use crate::{Error, Result};

/// A queued message: payload plus transferred dispatchers.
pub struct Message {
    bytes: Vec<u8>,
    dispatchers: Vec<Dispatcher>,
}

impl Message {
    pub(crate) fn new(bytes: Vec<u8>, dispatchers: Vec<Dispatcher>) -> Self {
        Self { bytes, dispatchers }
    }

    /// Payload length.
    pub fn num_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Number of attached dispatchers.
    pub fn num_dispatchers(&self) -> usize {
        self.dispatchers.len()
    }

    pub(crate) fn into_parts(mut self) -> (Vec<u8>, Vec<Dispatcher>) {
        (core::mem::take(&mut self.bytes), core::mem::take(&mut self.dispatchers))
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        for dispatcher in self.dispatchers.drain(..) {
            dispatcher.close();
        }
    }
}

#[derive(Default)]
struct Endpoint {
    open: bool,
    queue: VecDeque<Message>,
    awakables: AwakableList,
}

impl Endpoint {
    fn signals(&self, peer: &Endpoint) -> SignalsState {
        let mut satisfied = Signals::empty();
        let mut satisfiable = Signals::PEER_CLOSED;
        if !self.queue.is_empty() {
            satisfied |= Signals::READABLE;
            satisfiable |= Signals::READABLE;
        }
        if peer.open {
            satisfied |= Signals::WRITABLE;
            satisfiable |= Signals::READABLE | Signals::WRITABLE;
        } else {
            satisfied |= Signals::PEER_CLOSED;
        }
        SignalsState::new(satisfied, satisfiable)
    }
}

struct PipeState {
    endpoints: [Endpoint; 2],
}

impl PipeState {
    fn split(&mut self, port: usize) -> (&mut Endpoint, &mut Endpoint) {
        let [a, b] = &mut self.endpoints;
        if port == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn signals(&self, port: usize) -> SignalsState {
        self.endpoints[port].signals(&self.endpoints[port ^ 1])
    }
}

struct MessagePipe {
    state: Mutex<PipeState>,
}

/// One endpoint of a message pipe.
pub struct MessagePipeDispatcher {
    pipe: Arc<MessagePipe>,
    port: usize,
    id: ResourceId,
    lifecycle: Lifecycle,
}

impl MessagePipeDispatcher {
    /// Creates both endpoints of a new pipe.
    pub fn create_pair() -> (Arc<Self>, Arc<Self>) {
        let open = || Endpoint { open: true, ..Endpoint::default() };
        let pipe = Arc::new(MessagePipe { state: Mutex::new(PipeState { endpoints: [open(), open()] }) });
        let endpoint = |port| {
            Arc::new(Self {
                pipe: pipe.clone(),
                port,
                id: ResourceId::next(),
                lifecycle: Lifecycle::default(),
            })
        };
        (endpoint(0), endpoint(1))
    }

    /// Fails unless a write could currently be delivered.
    pub fn check_writable(&self) -> Result<()> {
        let state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        if state.endpoints[self.port ^ 1].open {
            Ok(())
        } else {
            Err(Error::FailedPrecondition)
        }
    }

    /// Queues `message` on the peer.
    ///
    /// A peer that closed after [`Self::check_writable`] silently discards the message.
    pub fn enqueue(&self, message: Message) -> Result<()> {
        let discarded;
        {
            let mut state = self.pipe.state.lock();
            self.lifecycle.check_open()?;
            let peer_port = self.port ^ 1;
            let (_, peer) = state.split(self.port);
            if peer.open {
                peer.queue.push_back(message);
                discarded = None;
                let peer_state = state.signals(peer_port);
                state.endpoints[peer_port].awakables.awake_for_state_change(peer_state);
            } else {
                log::debug!("message-pipe: peer closed during write, discarding message");
                discarded = Some(message);
            }
        }
        drop(discarded);
        Ok(())
    }

    /// Dequeues the next message.
    ///
    /// A message larger than `max_num_bytes` or carrying more than `max_num_handles`
    /// dispatchers fails with `ResourceExhausted`; with [`ReadMessageFlags::MAY_DISCARD`] it
    /// is also dropped.
    pub fn read_message(
        &self,
        max_num_bytes: usize,
        max_num_handles: usize,
        flags: ReadMessageFlags,
    ) -> Result<Message> {
        let outcome;
        let mut discarded = None;
        {
            let mut state = self.pipe.state.lock();
            self.lifecycle.check_open()?;
            let (own, peer) = state.split(self.port);
            let Some(front) = own.queue.front() else {
                return Err(if peer.open { Error::ShouldWait } else { Error::FailedPrecondition });
            };
            if front.num_bytes() > max_num_bytes || front.num_dispatchers() > max_num_handles {
                if flags.contains(ReadMessageFlags::MAY_DISCARD) {
                    discarded = own.queue.pop_front();
                }
                outcome = Err(Error::ResourceExhausted);
            } else {
                outcome = own.queue.pop_front().ok_or(Error::Internal);
            }
            let own_state = state.signals(self.port);
            state.endpoints[self.port].awakables.awake_for_state_change(own_state);
        }
        drop(discarded);
        outcome
    }

    /// Number of queued messages waiting to be read on this endpoint.
    pub fn queued_messages(&self) -> usize {
        self.pipe.state.lock().endpoints[self.port].queue.len()
    }
}

impl Resource for MessagePipeDispatcher {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn close(&self) {
        let orphaned;
        {
            let mut state = self.pipe.state.lock();
            if !self.lifecycle.close() {
                return;
            }
            let peer_port = self.port ^ 1;
            let (own, _) = state.split(self.port);
            own.open = false;
            orphaned = core::mem::take(&mut own.queue);
            own.awakables.cancel_all(SignalsState::never());
            let peer_state = state.signals(peer_port);
            state.endpoints[peer_port].awakables.awake_for_state_change(peer_state);
        }
        drop(orphaned);
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn signals_state(&self) -> SignalsState {
        let state = self.pipe.state.lock();
        if self.lifecycle.is_closed() {
            return SignalsState::never();
        }
        state.signals(self.port)
    }

    fn add_awakable(
        &self,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> core::result::Result<(), AddAwakableError> {
        let mut state = self.pipe.state.lock();
        if self.lifecycle.is_closed() {
            return Err(AddAwakableError::closed());
        }
        let current = state.signals(self.port);
        state.endpoints[self.port].awakables.add(current, awakable, signals, context)
    }

    fn watch(
        &self,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> Result<SignalsState> {
        let mut state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        state.endpoints[self.port].awakables.watch(awakable, signals, context);
        Ok(state.signals(self.port))
    }

    fn remove_awakable(&self, awakable: &Arc<dyn Awakable>, context: Option<u64>) {
        self.pipe.state.lock().endpoints[self.port].awakables.remove(awakable, context);
    }

    fn end_transit(&self) -> Dispatcher {
        let mut state = self.pipe.state.lock();
        self.lifecycle.close();
        state.endpoints[self.port].awakables.cancel_all(SignalsState::never());
        Dispatcher::MessagePipe(Arc::new(Self {
            pipe: self.pipe.clone(),
            port: self.port,
            id: self.id,
            lifecycle: Lifecycle::default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(from: &MessagePipeDispatcher, bytes: &[u8]) {
        from.check_writable().unwrap();
        from.enqueue(Message::new(bytes.to_vec(), Vec::new())).unwrap();
    }

    #[test]
    fn delivers_in_order() {
        let (a, b) = MessagePipeDispatcher::create_pair();
        send(&a, b"one");
        send(&a, b"two");
        let flags = ReadMessageFlags::empty();
        let (first, _) = b.read_message(usize::MAX, usize::MAX, flags).unwrap().into_parts();
        let (second, _) = b.read_message(usize::MAX, usize::MAX, flags).unwrap().into_parts();
        assert_eq!(first, b"one");
        assert_eq!(second, b"two");
        assert_eq!(b.read_message(usize::MAX, usize::MAX, flags).err(), Some(Error::ShouldWait));
    }

    #[test]
    fn signals_follow_peer_closure() {
        let (a, b) = MessagePipeDispatcher::create_pair();
        assert!(a.signals_state().satisfies(Signals::WRITABLE));
        send(&b, b"last words");
        b.close();
        let state = a.signals_state();
        assert!(state.satisfies(Signals::READABLE | Signals::PEER_CLOSED));
        assert!(!state.can_satisfy(Signals::WRITABLE));
        a.read_message(usize::MAX, usize::MAX, ReadMessageFlags::empty()).unwrap();
        let state = a.signals_state();
        assert!(!state.can_satisfy(Signals::READABLE));
        assert_eq!(a.check_writable(), Err(Error::FailedPrecondition));
        assert_eq!(
            a.read_message(usize::MAX, usize::MAX, ReadMessageFlags::empty()).err(),
            Some(Error::FailedPrecondition)
        );
    }

    #[test]
    fn oversized_message_is_kept_unless_discard_requested() {
        let (a, b) = MessagePipeDispatcher::create_pair();
        send(&a, b"0123456789");
        let flags = ReadMessageFlags::empty();
        assert_eq!(b.read_message(4, usize::MAX, flags).err(), Some(Error::ResourceExhausted));
        assert_eq!(b.queued_messages(), 1);
        let discard = ReadMessageFlags::MAY_DISCARD;
        assert_eq!(b.read_message(4, usize::MAX, discard).err(), Some(Error::ResourceExhausted));
        assert_eq!(b.queued_messages(), 0);
    }

    #[test]
    fn discarded_messages_close_attachments() {
        let (a, b) = MessagePipeDispatcher::create_pair();
        let (c, d) = MessagePipeDispatcher::create_pair();
        a.enqueue(Message::new(Vec::new(), vec![Dispatcher::MessagePipe(c.clone())])).unwrap();
        b.close();
        assert!(c.is_closed());
        assert!(d.signals_state().satisfies(Signals::PEER_CLOSED));
    }

    #[test]
    fn closed_endpoint_rejects_operations() {
        let (a, _b) = MessagePipeDispatcher::create_pair();
        a.close();
        assert_eq!(a.check_writable(), Err(Error::InvalidArgument));
        assert_eq!(a.signals_state(), SignalsState::never());
    }
}
