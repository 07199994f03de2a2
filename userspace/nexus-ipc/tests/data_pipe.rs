// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Data pipe tests through the Core facade
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_COVERAGE: 5 integration tests
//!
//! TEST_SCENARIOS:
//!   - test_stream_between_threads(): bytes arrive in order through a small ring
//!   - test_two_phase_write_and_read(): zero-copy regions commit and expire
//!   - test_element_granularity(): partial elements are rejected
//!   - test_read_modes(): peek, query, discard and all-or-none
//!   - test_consumer_close_fails_writer(): producer sees PEER_CLOSED and FailedPrecondition
//!
//! DEPENDENCIES:
//!   - nexus_ipc::Core

use std::sync::Arc;
use std::thread;

use nexus_abi::{CreateDataPipeOptions, Deadline, ReadDataFlags, Signals, WriteDataFlags};
use nexus_ipc::{Core, Error};

fn options(element: u32, capacity: u32) -> CreateDataPipeOptions {
    CreateDataPipeOptions { element_num_bytes: element, capacity_num_bytes: capacity }
}

#[test]
fn test_stream_between_threads() {
    let core = Arc::new(Core::default());
    let (producer, consumer) = core.create_data_pipe(Some(&options(1, 64))).unwrap();
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

    let writer = {
        let core = core.clone();
        let payload = payload.clone();
        thread::spawn(move || {
            let mut offset = 0;
            while offset < payload.len() {
                match core.write_data(producer, &payload[offset..], WriteDataFlags::empty()) {
                    Ok(n) => offset += n,
                    Err(Error::ShouldWait) => {
                        core.wait(producer, Signals::WRITABLE, Deadline::INDEFINITE).unwrap();
                    }
                    Err(err) => panic!("write failed: {err}"),
                }
            }
            core.close(producer).unwrap();
        })
    };

    let mut received = Vec::new();
    let mut chunk = [0u8; 24];
    loop {
        match core.read_data(consumer, &mut chunk, ReadDataFlags::empty()) {
            Ok(n) => received.extend_from_slice(&chunk[..n]),
            Err(Error::ShouldWait) => {
                if core.wait(consumer, Signals::READABLE, Deadline::INDEFINITE).is_err() {
                    break;
                }
            }
            Err(Error::FailedPrecondition) => break,
            Err(err) => panic!("read failed: {err}"),
        }
    }
    writer.join().unwrap();
    assert_eq!(received, payload);
}

#[test]
fn test_two_phase_write_and_read() {
    let core = Core::default();
    let (producer, consumer) = core.create_data_pipe(Some(&options(2, 8))).unwrap();

    let region = core.begin_write_data(producer).unwrap();
    assert_eq!(region.len(), 8);
    assert_eq!(core.begin_write_data(producer).err(), Some(Error::Busy));
    assert_eq!(core.write_data(producer, b"xx", WriteDataFlags::empty()), Err(Error::Busy));
    region.with_mut(|bytes| bytes[..4].copy_from_slice(b"abcd")).unwrap();
    assert_eq!(core.end_write_data(producer, 3), Err(Error::InvalidArgument));
    assert_eq!(region.with(|_| ()), Err(Error::FailedPrecondition));
    assert_eq!(core.end_write_data(producer, 2), Err(Error::FailedPrecondition));

    let region = core.begin_write_data(producer).unwrap();
    region.with_mut(|bytes| bytes[..4].copy_from_slice(b"abcd")).unwrap();
    core.end_write_data(producer, 4).unwrap();

    let read = core.begin_read_data(consumer).unwrap();
    assert_eq!(read.with(|bytes| bytes.to_vec()).unwrap(), b"abcd");
    assert_eq!(read.with_mut(|_| ()), Err(Error::PermissionDenied));
    let mut out = [0u8; 2];
    assert_eq!(core.read_data(consumer, &mut out, ReadDataFlags::empty()), Err(Error::Busy));
    core.end_read_data(consumer, 2).unwrap();
    assert_eq!(core.query_data(consumer), Ok(2));
    assert_eq!(core.read_data(consumer, &mut out, ReadDataFlags::empty()), Ok(2));
    assert_eq!(&out, b"cd");
}

#[test]
fn test_element_granularity() {
    let core = Core::default();
    let (producer, consumer) = core.create_data_pipe(Some(&options(4, 16))).unwrap();
    assert_eq!(
        core.write_data(producer, b"abc", WriteDataFlags::empty()),
        Err(Error::InvalidArgument)
    );
    assert_eq!(core.write_data(producer, b"abcdefgh", WriteDataFlags::empty()), Ok(8));
    let mut odd = [0u8; 6];
    assert_eq!(
        core.read_data(consumer, &mut odd, ReadDataFlags::empty()),
        Err(Error::InvalidArgument)
    );

    let (defaulted, _) = core.create_data_pipe(Some(&options(3, 0))).unwrap();
    let region = core.begin_write_data(defaulted).unwrap();
    assert_eq!(region.len() % 3, 0);
}

#[test]
fn test_read_modes() {
    let core = Core::default();
    let (producer, consumer) = core.create_data_pipe(Some(&options(1, 8))).unwrap();
    core.write_data(producer, b"hello", WriteDataFlags::empty()).unwrap();
    assert_eq!(
        core.write_data(producer, b"world", WriteDataFlags::ALL_OR_NONE),
        Err(Error::OutOfRange)
    );

    let mut out = [0u8; 5];
    assert_eq!(core.read_data(consumer, &mut out, ReadDataFlags::PEEK), Ok(5));
    assert_eq!(&out, b"hello");
    assert_eq!(core.read_data(consumer, &mut [], ReadDataFlags::QUERY), Ok(5));
    assert_eq!(core.discard_data(consumer, 2, ReadDataFlags::empty()), Ok(2));
    let mut big = [0u8; 4];
    assert_eq!(
        core.read_data(consumer, &mut big, ReadDataFlags::ALL_OR_NONE),
        Err(Error::OutOfRange)
    );
    assert_eq!(core.read_data(consumer, &mut big, ReadDataFlags::empty()), Ok(3));
    assert_eq!(&big[..3], b"llo");
    assert_eq!(core.read_data(consumer, &mut big, ReadDataFlags::empty()), Err(Error::ShouldWait));
}

#[test]
fn test_consumer_close_fails_writer() {
    let core = Core::default();
    let (producer, consumer) = core.create_data_pipe(None).unwrap();
    core.write_data(producer, b"pending", WriteDataFlags::empty()).unwrap();
    core.close(consumer).unwrap();

    let state = core.wait(producer, Signals::PEER_CLOSED, Deadline::IMMEDIATE).unwrap();
    assert!(!state.can_satisfy(Signals::WRITABLE));
    assert_eq!(
        core.write_data(producer, b"more", WriteDataFlags::empty()),
        Err(Error::FailedPrecondition)
    );
}
