// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Message pipe and handle transfer tests through the Core facade
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_COVERAGE: 7 integration tests
//!
//! TEST_SCENARIOS:
//!   - test_transfer_yields_fresh_handle(): bytes and an endpoint arrive; old handle is gone
//!   - test_transferred_endpoint_keeps_peer(): a moved endpoint still talks to its peer
//!   - test_failed_transfer_leaves_handles_usable(): invalid attachment rolls back the batch
//!   - test_two_phase_data_pipe_refuses_transfer(): Busy while a two-phase write is active
//!   - test_unread_attachments_close_with_pipe(): closing the reader closes queued resources
//!   - test_oversized_read_may_discard(): MAY_DISCARD drops, otherwise the message stays
//!   - test_close_racing_write_keeps_attachments(): a write either delivers its attachments or
//!     leaves them usable, even while another thread closes the writing endpoint
//!
//! DEPENDENCIES:
//!   - nexus_ipc::Core
//!   - nexus_abi flags and signals

use std::sync::Arc;
use std::thread;

use nexus_abi::{
    Deadline, Handle, ReadMessageFlags, Signals, WriteDataFlags, WriteMessageFlags,
};
use nexus_ipc::{Core, Error};

fn write(core: &Core, handle: Handle, bytes: &[u8], handles: &[Handle]) -> nexus_ipc::Result<()> {
    core.write_message(handle, bytes, handles, WriteMessageFlags::empty())
}

#[test]
fn test_transfer_yields_fresh_handle() {
    let core = Core::default();
    let (a, b) = core.create_message_pipe().unwrap();
    let (a2, _b2) = core.create_message_pipe().unwrap();
    let original = core.get_dispatcher(a2).unwrap();

    write(&core, a, b"0123456789", &[a2]).unwrap();
    assert_eq!(core.close(a2), Err(Error::InvalidArgument));
    assert!(original.is_closed());

    let message = core.read_message(b, ReadMessageFlags::empty()).unwrap();
    assert_eq!(message.bytes, b"0123456789");
    assert_eq!(message.handles.len(), 1);
    let received = message.handles[0];
    assert_ne!(received, a2);
    let moved = core.get_dispatcher(received).unwrap();
    assert_eq!(moved.resource_id(), original.resource_id());
    assert!(!moved.is_closed());
}

#[test]
fn test_transferred_endpoint_keeps_peer() {
    let core = Core::default();
    let (a, b) = core.create_message_pipe().unwrap();
    let (c, d) = core.create_message_pipe().unwrap();
    write(&core, a, b"", &[c]).unwrap();
    let moved = core.read_message(b, ReadMessageFlags::empty()).unwrap().handles[0];

    write(&core, moved, b"through", &[]).unwrap();
    let state = core.wait(d, Signals::READABLE, Deadline::IMMEDIATE).unwrap();
    assert!(state.satisfies(Signals::READABLE));
    assert_eq!(core.read_message(d, ReadMessageFlags::empty()).unwrap().bytes, b"through");

    core.close(moved).unwrap();
    let err = core.wait(d, Signals::READABLE, Deadline::INDEFINITE).unwrap_err();
    assert_eq!(err.error, Error::FailedPrecondition);
    assert!(err.signals_states[0].satisfies(Signals::PEER_CLOSED));
}

#[test]
fn test_failed_transfer_leaves_handles_usable() {
    let core = Core::default();
    let (a, b) = core.create_message_pipe().unwrap();
    let (c, d) = core.create_message_pipe().unwrap();
    let bogus = Handle::from_raw(4242);

    assert_eq!(write(&core, a, b"x", &[c, bogus]), Err(Error::InvalidArgument));
    assert_eq!(write(&core, a, b"x", &[c, c]), Err(Error::Busy));
    assert!(core.get_dispatcher(c).is_ok());
    write(&core, c, b"still mine", &[]).unwrap();
    assert_eq!(core.read_message(d, ReadMessageFlags::empty()).unwrap().bytes, b"still mine");
    assert_eq!(
        core.read_message(b, ReadMessageFlags::empty()).err(),
        Some(Error::ShouldWait)
    );
}

#[test]
fn test_two_phase_data_pipe_refuses_transfer() {
    let core = Core::default();
    let (a, _b) = core.create_message_pipe().unwrap();
    let (producer, _consumer) = core.create_data_pipe(None).unwrap();

    let region = core.begin_write_data(producer).unwrap();
    assert_eq!(write(&core, a, b"p", &[producer]), Err(Error::Busy));
    region.with_mut(|bytes| bytes[0] = b'!').unwrap();
    core.end_write_data(producer, 1).unwrap();
    assert_eq!(core.write_data(producer, b"?", WriteDataFlags::empty()), Ok(1));

    write(&core, a, b"p", &[producer]).unwrap();
    assert_eq!(core.get_dispatcher(producer).err(), Some(Error::InvalidArgument));
}

#[test]
fn test_unread_attachments_close_with_pipe() {
    let core = Core::default();
    let (a, b) = core.create_message_pipe().unwrap();
    let (c, d) = core.create_message_pipe().unwrap();
    write(&core, a, b"carry", &[c]).unwrap();

    core.close(b).unwrap();
    let err = core.wait(d, Signals::READABLE, Deadline::INDEFINITE).unwrap_err();
    assert_eq!(err.error, Error::FailedPrecondition);
    assert_eq!(write(&core, a, b"late", &[]), Err(Error::FailedPrecondition));
}

#[test]
fn test_oversized_read_may_discard() {
    let core = Core::default();
    let (a, b) = core.create_message_pipe().unwrap();
    write(&core, a, b"twelve bytes", &[]).unwrap();

    assert_eq!(
        core.read_message_with_limits(b, 4, 0, ReadMessageFlags::empty()).err(),
        Some(Error::ResourceExhausted)
    );
    assert_eq!(
        core.read_message_with_limits(b, 4, 0, ReadMessageFlags::MAY_DISCARD).err(),
        Some(Error::ResourceExhausted)
    );
    assert_eq!(
        core.read_message(b, ReadMessageFlags::empty()).err(),
        Some(Error::ShouldWait)
    );
}

#[test]
fn test_close_racing_write_keeps_attachments() {
    let core = Arc::new(Core::default());
    for _ in 0..200 {
        let (a, b) = core.create_message_pipe().unwrap();
        let (c, _d) = core.create_message_pipe().unwrap();
        let closer = {
            let core = core.clone();
            thread::spawn(move || loop {
                match core.close(a) {
                    Err(Error::Busy) => thread::yield_now(),
                    other => break other,
                }
            })
        };
        let written = write(&core, a, b"attached", &[c]);
        assert_eq!(closer.join().unwrap(), Ok(()));

        match written {
            Ok(()) => {
                assert_eq!(core.close(c), Err(Error::InvalidArgument));
                let message = core.read_message(b, ReadMessageFlags::empty()).unwrap();
                assert_eq!(message.handles.len(), 1);
                core.close(message.handles[0]).unwrap();
            }
            Err(err) => {
                assert_eq!(err, Error::InvalidArgument);
                assert_eq!(core.close(c), Ok(()), "attachment must survive a failed write");
            }
        }
        core.close(b).unwrap();
    }
}
