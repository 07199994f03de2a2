// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared buffer and mapping tests through the Core facade
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_COVERAGE: 5 integration tests
//!
//! TEST_SCENARIOS:
//!   - test_data_survives_remap(): unmap then remap the same handle sees earlier writes
//!   - test_double_unmap(): OK then InvalidArgument
//!   - test_read_only_duplicate(): read-only handles map read-only and cannot widen access
//!   - test_buffer_crosses_pipe(): a buffer sent through a pipe shares memory with the sender
//!   - test_mapping_table_limit(): mappings beyond the configured maximum are refused
//!
//! DEPENDENCIES:
//!   - nexus_ipc::Core, nexus_ipc::Config

use nexus_abi::{DuplicateBufferFlags, MapBufferFlags, ReadMessageFlags, WriteMessageFlags};
use nexus_ipc::{BufferInfo, Config, Core, Error, PAGE_SIZE};

#[test]
fn test_data_survives_remap() {
    let core = Core::default();
    let buffer = core.create_shared_buffer(100).unwrap();
    let first = core.map_buffer(buffer, 0, 100, MapBufferFlags::empty()).unwrap();
    assert_eq!(first.raw() % PAGE_SIZE, 0);
    core.with_mapping_mut(first, |bytes| bytes[90..95].copy_from_slice(b"hello")).unwrap();
    core.unmap_buffer(first).unwrap();

    let second = core.map_buffer(buffer, 90, 5, MapBufferFlags::empty()).unwrap();
    assert_ne!(first, second, "addresses are never reused");
    assert_eq!(core.with_mapping(second, |bytes| bytes.to_vec()).unwrap(), b"hello");
}

#[test]
fn test_double_unmap() {
    let core = Core::default();
    let buffer = core.create_shared_buffer(8).unwrap();
    let address = core.map_buffer(buffer, 0, 8, MapBufferFlags::empty()).unwrap();
    assert_eq!(core.mapping_count(), 1);
    assert_eq!(core.unmap_buffer(address), Ok(()));
    assert_eq!(core.unmap_buffer(address), Err(Error::InvalidArgument));
    assert_eq!(core.with_mapping(address, |_| ()).err(), Some(Error::InvalidArgument));
    assert_eq!(core.mapping_count(), 0);
}

#[test]
fn test_read_only_duplicate() {
    let core = Core::default();
    let buffer = core.create_shared_buffer(16).unwrap();
    let read_only = core.duplicate_buffer_handle(buffer, DuplicateBufferFlags::READ_ONLY).unwrap();
    assert_eq!(
        core.get_buffer_info(read_only),
        Ok(BufferInfo { num_bytes: 16, read_only: true })
    );
    assert_eq!(
        core.duplicate_buffer_handle(read_only, DuplicateBufferFlags::empty()),
        Err(Error::PermissionDenied)
    );

    let writable = core.map_buffer(buffer, 0, 16, MapBufferFlags::empty()).unwrap();
    core.with_mapping_mut(writable, |bytes| bytes[0] = 7).unwrap();
    let view = core.map_buffer(read_only, 0, 16, MapBufferFlags::empty()).unwrap();
    assert_eq!(core.with_mapping(view, |bytes| bytes[0]), Ok(7));
    assert_eq!(core.with_mapping_mut(view, |_| ()), Err(Error::PermissionDenied));
    assert_eq!(core.map_buffer(buffer, 8, 9, MapBufferFlags::empty()), Err(Error::InvalidArgument));
}

#[test]
fn test_buffer_crosses_pipe() {
    let core = Core::default();
    let (a, b) = core.create_message_pipe().unwrap();
    let buffer = core.create_shared_buffer(4).unwrap();
    let mine = core.map_buffer(buffer, 0, 4, MapBufferFlags::empty()).unwrap();

    core.write_message(a, b"buf", &[buffer], WriteMessageFlags::empty()).unwrap();
    let received = core.read_message(b, ReadMessageFlags::empty()).unwrap().handles[0];
    let theirs = core.map_buffer(received, 0, 4, MapBufferFlags::empty()).unwrap();

    core.with_mapping_mut(theirs, |bytes| bytes.copy_from_slice(b"sync")).unwrap();
    assert_eq!(core.with_mapping(mine, |bytes| bytes.to_vec()).unwrap(), b"sync");
}

#[test]
fn test_mapping_table_limit() {
    let core = Core::new(Config { max_mapping_table_size: 2, ..Config::default() });
    let buffer = core.create_shared_buffer(8).unwrap();
    core.map_buffer(buffer, 0, 8, MapBufferFlags::empty()).unwrap();
    let second = core.map_buffer(buffer, 0, 8, MapBufferFlags::empty()).unwrap();
    assert_eq!(
        core.map_buffer(buffer, 0, 8, MapBufferFlags::empty()),
        Err(Error::ResourceExhausted)
    );
    core.unmap_buffer(second).unwrap();
    assert!(core.map_buffer(buffer, 0, 8, MapBufferFlags::empty()).is_ok());
}
