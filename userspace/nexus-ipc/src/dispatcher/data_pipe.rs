// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process data pipe (byte stream in fixed-size elements)
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! PUBLIC API:
//!   - DataPipeProducerDispatcher: write_data, begin_write, end_write
//!   - DataPipeConsumerDispatcher: read_data, query, begin_read, end_read
//!   - DataRegion: scoped access to a two-phase region
//!
//! INVARIANTS:
//!   - Every transferred length is a multiple of the element size
//!   - While a two-phase operation is active on a side, other data operations on that side fail
//!     with `Busy` and the side refuses transfer
//!   - A region token is only valid until its two-phase operation ends; afterwards access
//!     fails with `FailedPrecondition`

use core::ops::Range;
use std::sync::Arc;

use nexus_abi::{ReadDataFlags, Signals, SignalsState, WriteDataFlags};
use parking_lot::Mutex;

use super::{Dispatcher, Lifecycle, Resource, ResourceId};
use crate::awakable::{AddAwakableError, Awakable, AwakableList};
use crate::{Error, Result};

struct Ring {
    buf: Vec<u8>,
    start: usize,
    len: usize,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.len
    }

    fn readable_chunk(&self) -> Range<usize> {
        let end = (self.start + self.len).min(self.capacity());
        self.start..end
    }

    fn writable_chunk(&self) -> Range<usize> {
        let at = (self.start + self.len) % self.capacity();
        let end = (at + self.free()).min(self.capacity());
        at..end
    }

    fn push(&mut self, bytes: &[u8]) {
        let mut written = 0;
        while written < bytes.len() {
            let chunk = self.writable_chunk();
            let n = chunk.len().min(bytes.len() - written);
            self.buf[chunk.start..chunk.start + n].copy_from_slice(&bytes[written..written + n]);
            self.len += n;
            written += n;
        }
    }

    fn copy_out(&self, out: &mut [u8]) {
        let first = self.readable_chunk();
        let n = first.len().min(out.len());
        out[..n].copy_from_slice(&self.buf[first.start..first.start + n]);
        let rest = out.len() - n;
        if rest > 0 {
            out[n..].copy_from_slice(&self.buf[..rest]);
        }
    }

    fn consume(&mut self, n: usize) {
        self.start = (self.start + n) % self.capacity();
        self.len -= n;
    }
}

#[derive(Clone, Copy)]
struct Phase {
    range: (usize, usize),
    epoch: u64,
}

struct PipeState {
    ring: Ring,
    element_num_bytes: usize,
    producer_open: bool,
    consumer_open: bool,
    write_phase: Option<Phase>,
    read_phase: Option<Phase>,
    epoch: u64,
    producer_awakables: AwakableList,
    consumer_awakables: AwakableList,
}

impl PipeState {
    fn producer_signals(&self) -> SignalsState {
        if !self.consumer_open {
            return SignalsState::new(Signals::PEER_CLOSED, Signals::PEER_CLOSED);
        }
        let mut satisfied = Signals::empty();
        if self.ring.free() > 0 && self.write_phase.is_none() {
            satisfied |= Signals::WRITABLE;
        }
        SignalsState::new(satisfied, Signals::WRITABLE | Signals::PEER_CLOSED)
    }

    fn consumer_signals(&self) -> SignalsState {
        let mut satisfied = Signals::empty();
        let mut satisfiable = Signals::PEER_CLOSED;
        if self.ring.len > 0 || self.producer_open {
            satisfiable |= Signals::READABLE;
        }
        if self.ring.len > 0 && self.read_phase.is_none() {
            satisfied |= Signals::READABLE;
        }
        if !self.producer_open {
            satisfied |= Signals::PEER_CLOSED;
        }
        SignalsState::new(satisfied, satisfiable)
    }

    fn notify_producer(&mut self) {
        let state = self.producer_signals();
        self.producer_awakables.awake_for_state_change(state);
    }

    fn notify_consumer(&mut self) {
        let state = self.consumer_signals();
        self.consumer_awakables.awake_for_state_change(state);
    }

    fn start_phase(&mut self, range: Range<usize>) -> Phase {
        self.epoch += 1;
        Phase { range: (range.start, range.end), epoch: self.epoch }
    }

    fn check_elements(&self, num_bytes: usize) -> Result<()> {
        if num_bytes % self.element_num_bytes == 0 {
            Ok(())
        } else {
            Err(Error::InvalidArgument)
        }
    }
}

struct DataPipe {
    state: Mutex<PipeState>,
}

/// Scoped access to the bytes of an active two-phase read or write.
pub struct DataRegion {
    pipe: Arc<DataPipe>,
    phase: Phase,
    writable: bool,
}

impl DataRegion {
    /// Region length in bytes.
    pub fn len(&self) -> usize {
        self.phase.range.1 - self.phase.range.0
    }

    /// Returns `true` for an empty region.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` over the region's bytes.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let state = self.pipe.state.lock();
        self.check_current(&state)?;
        Ok(f(&state.ring.buf[self.phase.range.0..self.phase.range.1]))
    }

    /// Runs `f` over the region's bytes mutably; only write regions allow this.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        if !self.writable {
            return Err(Error::PermissionDenied);
        }
        let mut state = self.pipe.state.lock();
        self.check_current(&state)?;
        Ok(f(&mut state.ring.buf[self.phase.range.0..self.phase.range.1]))
    }

    fn check_current(&self, state: &PipeState) -> Result<()> {
        let active = if self.writable { state.write_phase } else { state.read_phase };
        match active {
            Some(phase) if phase.epoch == self.phase.epoch => Ok(()),
            _ => Err(Error::FailedPrecondition),
        }
    }
}

/// Creates a pipe with the given (already validated) element size and capacity.
pub(crate) fn create(
    element_num_bytes: usize,
    capacity_num_bytes: usize,
) -> (Arc<DataPipeProducerDispatcher>, Arc<DataPipeConsumerDispatcher>) {
    let pipe = Arc::new(DataPipe {
        state: Mutex::new(PipeState {
            ring: Ring { buf: vec![0; capacity_num_bytes], start: 0, len: 0 },
            element_num_bytes,
            producer_open: true,
            consumer_open: true,
            write_phase: None,
            read_phase: None,
            epoch: 0,
            producer_awakables: AwakableList::new(),
            consumer_awakables: AwakableList::new(),
        }),
    });
    let producer = Arc::new(DataPipeProducerDispatcher {
        pipe: pipe.clone(),
        id: ResourceId::next(),
        lifecycle: Lifecycle::default(),
    });
    let consumer =
        Arc::new(DataPipeConsumerDispatcher { pipe, id: ResourceId::next(), lifecycle: Lifecycle::default() });
    (producer, consumer)
}

/// Writing end of a data pipe.
pub struct DataPipeProducerDispatcher {
    pipe: Arc<DataPipe>,
    id: ResourceId,
    lifecycle: Lifecycle,
}

impl DataPipeProducerDispatcher {
    /// Copies as many whole elements of `bytes` as fit; returns the number of bytes written.
    ///
    /// With [`WriteDataFlags::ALL_OR_NONE`] a partial write fails with `OutOfRange`.
    pub fn write_data(&self, bytes: &[u8], flags: WriteDataFlags) -> Result<usize> {
        let mut state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        if state.write_phase.is_some() {
            return Err(Error::Busy);
        }
        state.check_elements(bytes.len())?;
        if !state.consumer_open {
            return Err(Error::FailedPrecondition);
        }
        if bytes.is_empty() {
            return Ok(0);
        }
        let free = state.ring.free();
        if flags.contains(WriteDataFlags::ALL_OR_NONE) && bytes.len() > free {
            return Err(Error::OutOfRange);
        }
        if free == 0 {
            return Err(Error::ShouldWait);
        }
        let n = bytes.len().min(free);
        let n = n - n % state.element_num_bytes;
        state.ring.push(&bytes[..n]);
        state.notify_consumer();
        state.notify_producer();
        Ok(n)
    }

    /// Starts a two-phase write over the largest contiguous free region.
    pub fn begin_write(&self) -> Result<DataRegion> {
        let mut state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        if state.write_phase.is_some() {
            return Err(Error::Busy);
        }
        if !state.consumer_open {
            return Err(Error::FailedPrecondition);
        }
        if state.ring.free() == 0 {
            return Err(Error::ShouldWait);
        }
        let chunk = state.ring.writable_chunk();
        let phase = state.start_phase(chunk);
        state.write_phase = Some(phase);
        state.notify_producer();
        Ok(DataRegion { pipe: self.pipe.clone(), phase, writable: true })
    }

    /// Commits `num_bytes` of the active two-phase write and ends it.
    ///
    /// An invalid count still ends the two-phase write, committing nothing.
    pub fn end_write(&self, num_bytes: usize) -> Result<()> {
        let mut state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        let phase = state.write_phase.take().ok_or(Error::FailedPrecondition)?;
        let outcome = if num_bytes > phase.range.1 - phase.range.0 {
            Err(Error::InvalidArgument)
        } else {
            state.check_elements(num_bytes)
        };
        if outcome.is_ok() {
            state.ring.len += num_bytes;
            state.notify_consumer();
        }
        state.notify_producer();
        outcome
    }
}

impl Resource for DataPipeProducerDispatcher {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn close(&self) {
        let mut state = self.pipe.state.lock();
        if !self.lifecycle.close() {
            return;
        }
        state.producer_open = false;
        state.write_phase = None;
        state.producer_awakables.cancel_all(SignalsState::never());
        state.notify_consumer();
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn signals_state(&self) -> SignalsState {
        let state = self.pipe.state.lock();
        if self.lifecycle.is_closed() {
            return SignalsState::never();
        }
        state.producer_signals()
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
        let current = state.producer_signals();
        state.producer_awakables.add(current, awakable, signals, context)
    }

    fn watch(
        &self,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> Result<SignalsState> {
        let mut state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        state.producer_awakables.watch(awakable, signals, context);
        Ok(state.producer_signals())
    }

    fn remove_awakable(&self, awakable: &Arc<dyn Awakable>, context: Option<u64>) {
        self.pipe.state.lock().producer_awakables.remove(awakable, context);
    }

    fn begin_transit(&self) -> Result<()> {
        if self.pipe.state.lock().write_phase.is_some() {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }

    fn end_transit(&self) -> Dispatcher {
        let mut state = self.pipe.state.lock();
        self.lifecycle.close();
        state.producer_awakables.cancel_all(SignalsState::never());
        Dispatcher::DataPipeProducer(Arc::new(Self {
            pipe: self.pipe.clone(),
            id: self.id,
            lifecycle: Lifecycle::default(),
        }))
    }
}

/// Reading end of a data pipe.
pub struct DataPipeConsumerDispatcher {
    pipe: Arc<DataPipe>,
    id: ResourceId,
    lifecycle: Lifecycle,
}

impl DataPipeConsumerDispatcher {
    /// Reads, peeks or discards up to `num_bytes` bytes.
    ///
    /// `out` receives the data unless [`ReadDataFlags::DISCARD`] is set. Returns the number of
    /// bytes transferred.
    pub fn read_data(
        &self,
        out: Option<&mut [u8]>,
        num_bytes: usize,
        flags: ReadDataFlags,
    ) -> Result<usize> {
        let mut state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        if state.read_phase.is_some() {
            return Err(Error::Busy);
        }
        if flags.contains(ReadDataFlags::QUERY) {
            return Ok(state.ring.len);
        }
        if flags.contains(ReadDataFlags::DISCARD) && flags.contains(ReadDataFlags::PEEK) {
            return Err(Error::InvalidArgument);
        }
        state.check_elements(num_bytes)?;
        let available = state.ring.len;
        if flags.contains(ReadDataFlags::ALL_OR_NONE) && num_bytes > available {
            return Err(if state.producer_open { Error::OutOfRange } else { Error::FailedPrecondition });
        }
        if available == 0 {
            return Err(if state.producer_open { Error::ShouldWait } else { Error::FailedPrecondition });
        }
        let n = num_bytes.min(available);
        if !flags.contains(ReadDataFlags::DISCARD) {
            let out = out.ok_or(Error::InvalidArgument)?;
            if out.len() < n {
                return Err(Error::InvalidArgument);
            }
            state.ring.copy_out(&mut out[..n]);
        }
        if !flags.contains(ReadDataFlags::PEEK) {
            state.ring.consume(n);
            state.notify_producer();
            state.notify_consumer();
        }
        Ok(n)
    }

    /// Number of bytes currently readable.
    pub fn query(&self) -> Result<usize> {
        let state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        Ok(state.ring.len)
    }

    /// Starts a two-phase read over the largest contiguous readable region.
    pub fn begin_read(&self) -> Result<DataRegion> {
        let mut state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        if state.read_phase.is_some() {
            return Err(Error::Busy);
        }
        if state.ring.len == 0 {
            return Err(if state.producer_open { Error::ShouldWait } else { Error::FailedPrecondition });
        }
        let chunk = state.ring.readable_chunk();
        let phase = state.start_phase(chunk);
        state.read_phase = Some(phase);
        state.notify_consumer();
        Ok(DataRegion { pipe: self.pipe.clone(), phase, writable: false })
    }

    /// Consumes `num_bytes` of the active two-phase read and ends it.
    pub fn end_read(&self, num_bytes: usize) -> Result<()> {
        let mut state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        let phase = state.read_phase.take().ok_or(Error::FailedPrecondition)?;
        let outcome = if num_bytes > phase.range.1 - phase.range.0 {
            Err(Error::InvalidArgument)
        } else {
            state.check_elements(num_bytes)
        };
        if outcome.is_ok() && num_bytes > 0 {
            state.ring.consume(num_bytes);
            state.notify_producer();
        }
        state.notify_consumer();
        outcome
    }
}

impl Resource for DataPipeConsumerDispatcher {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn close(&self) {
        let mut state = self.pipe.state.lock();
        if !self.lifecycle.close() {
            return;
        }
        state.consumer_open = false;
        state.read_phase = None;
        let len = state.ring.len;
        state.ring.consume(len);
        state.consumer_awakables.cancel_all(SignalsState::never());
        state.notify_producer();
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn signals_state(&self) -> SignalsState {
        let state = self.pipe.state.lock();
        if self.lifecycle.is_closed() {
            return SignalsState::never();
        }
        state.consumer_signals()
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
        let current = state.consumer_signals();
        state.consumer_awakables.add(current, awakable, signals, context)
    }

    fn watch(
        &self,
        awakable: Arc<dyn Awakable>,
        signals: Signals,
        context: u64,
    ) -> Result<SignalsState> {
        let mut state = self.pipe.state.lock();
        self.lifecycle.check_open()?;
        state.consumer_awakables.watch(awakable, signals, context);
        Ok(state.consumer_signals())
    }

    fn remove_awakable(&self, awakable: &Arc<dyn Awakable>, context: Option<u64>) {
        self.pipe.state.lock().consumer_awakables.remove(awakable, context);
    }

    fn begin_transit(&self) -> Result<()> {
        if self.pipe.state.lock().read_phase.is_some() {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }

    fn end_transit(&self) -> Dispatcher {
        let mut state = self.pipe.state.lock();
        self.lifecycle.close();
        state.consumer_awakables.cancel_all(SignalsState::never());
        Dispatcher::DataPipeConsumer(Arc::new(Self {
            pipe: self.pipe.clone(),
            id: self.id,
            lifecycle: Lifecycle::default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(consumer: &DataPipeConsumerDispatcher, n: usize) -> Vec<u8> {
        let mut out = vec![0; n];
        let got = consumer.read_data(Some(&mut out), n, ReadDataFlags::empty()).unwrap();
        out.truncate(got);
        out
    }

    #[test]
    fn wraps_around_the_ring() {
        let (p, c) = create(1, 8);
        assert_eq!(p.write_data(b"abcdef", WriteDataFlags::empty()), Ok(6));
        assert_eq!(read_all(&c, 4), b"abcd");
        assert_eq!(p.write_data(b"ghijklmn", WriteDataFlags::empty()), Ok(6));
        assert_eq!(c.query(), Ok(8));
        assert_eq!(read_all(&c, 8), b"efghijkl");
    }

    #[test]
    fn all_or_none_and_element_size() {
        let (p, c) = create(4, 8);
        assert_eq!(p.write_data(b"abc", WriteDataFlags::empty()), Err(Error::InvalidArgument));
        assert_eq!(
            p.write_data(&[0; 12], WriteDataFlags::ALL_OR_NONE),
            Err(Error::OutOfRange)
        );
        assert_eq!(p.write_data(&[1; 12], WriteDataFlags::empty()), Ok(8));
        assert_eq!(p.write_data(&[1; 4], WriteDataFlags::empty()), Err(Error::ShouldWait));
        let mut out = [0u8; 12];
        assert_eq!(
            c.read_data(Some(&mut out), 12, ReadDataFlags::ALL_OR_NONE),
            Err(Error::OutOfRange)
        );
        assert_eq!(c.read_data(None, 4, ReadDataFlags::DISCARD), Ok(4));
        assert_eq!(c.read_data(Some(&mut out), 4, ReadDataFlags::PEEK), Ok(4));
        assert_eq!(c.query(), Ok(4));
    }

    #[test]
    fn two_phase_write_blocks_other_writes() {
        let (p, c) = create(1, 16);
        let region = p.begin_write().unwrap();
        assert_eq!(region.len(), 16);
        assert_eq!(p.write_data(b"x", WriteDataFlags::empty()), Err(Error::Busy));
        assert_eq!(Resource::begin_transit(p.as_ref()), Err(Error::Busy));
        region.with_mut(|buf| buf[..5].copy_from_slice(b"hello")).unwrap();
        p.end_write(5).unwrap();
        assert_eq!(region.with(|_| ()), Err(Error::FailedPrecondition));
        assert_eq!(read_all(&c, 16), b"hello");
    }

    #[test]
    fn two_phase_read_consumes_on_end() {
        let (p, c) = create(1, 16);
        p.write_data(b"stream", WriteDataFlags::empty()).unwrap();
        let region = c.begin_read().unwrap();
        assert_eq!(region.with(|buf| buf.to_vec()), Ok(b"stream".to_vec()));
        assert_eq!(region.with_mut(|_| ()), Err(Error::PermissionDenied));
        assert!(!c.signals_state().satisfies(Signals::READABLE));
        c.end_read(2).unwrap();
        assert_eq!(read_all(&c, 16), b"ream");
        assert_eq!(c.end_read(0), Err(Error::FailedPrecondition));
    }

    #[test]
    fn producer_close_drains_then_fails() {
        let (p, c) = create(1, 16);
        p.write_data(b"tail", WriteDataFlags::empty()).unwrap();
        p.close();
        let state = c.signals_state();
        assert!(state.satisfies(Signals::READABLE | Signals::PEER_CLOSED));
        assert_eq!(read_all(&c, 16), b"tail");
        assert!(!c.signals_state().can_satisfy(Signals::READABLE));
        let mut out = [0u8; 4];
        assert_eq!(
            c.read_data(Some(&mut out), 4, ReadDataFlags::empty()),
            Err(Error::FailedPrecondition)
        );
    }

    #[test]
    fn consumer_close_fails_writes() {
        let (p, c) = create(1, 16);
        c.close();
        assert!(p.signals_state().satisfies(Signals::PEER_CLOSED));
        assert_eq!(p.write_data(b"x", WriteDataFlags::empty()), Err(Error::FailedPrecondition));
    }
}
