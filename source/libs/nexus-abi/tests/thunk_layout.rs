// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Tests for SystemThunks size negotiation
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 integration tests
//!
//! TEST_SCOPE:
//!   - Leading size field
//!   - Field availability checks against an older provider
//!   - Compatibility classification
//!
//! TEST_SCENARIOS:
//!   - test_size_is_first_field(): size lives at offset 0
//!   - test_older_provider_hides_trailing_fields(): provides() respects the provided size
//!   - test_compat_classification(): exact / newer / older
//!
//! DEPENDENCIES:
//!   - nexus_abi::SystemThunks: Function table under test

use core::mem::offset_of;

use nexus_abi::{
    Handle, ReadyHandle, Signals, SignalsState, Status, SystemThunks, ThunkCompat,
};

fn table(size: usize) -> SystemThunks {
    SystemThunks {
        size,
        get_time_ticks_now: || 0,
        close: |_| Status::Ok,
        wait: |_, _, _, _| Status::Ok,
        wait_many: |_, _, _, _, _| Status::Ok,
        create_message_pipe: |_, _| Status::Ok,
        write_message: |_, _, _, _| Status::Ok,
        read_message: |_, _, _, _| Status::ShouldWait,
        create_data_pipe: |_, _, _| Status::Ok,
        write_data: |_, _, _, _| Status::Ok,
        read_data: |_, _, _, _| Status::Ok,
        create_shared_buffer: |_, _| Status::Ok,
        duplicate_buffer_handle: |_, _, _| Status::Ok,
        map_buffer: |_, _, _, _, _| Status::Ok,
        unmap_buffer: |_| Status::Ok,
        create_wait_set: |_| Status::Ok,
        add_to_wait_set: |_, _, _| Status::Ok,
        remove_from_wait_set: |_, _| Status::Ok,
        get_ready_handles: |_, _, out: &mut Vec<ReadyHandle>| {
            out.push(ReadyHandle {
                handle: Handle::from_raw(7),
                result: Status::Ok,
                signals_state: SignalsState::new(Signals::READABLE, Signals::READABLE),
            });
            Status::Ok
        },
    }
}

#[test]
fn size_is_first_field() {
    assert_eq!(offset_of!(SystemThunks, size), 0);
    assert_eq!(SystemThunks::CURRENT_SIZE, core::mem::size_of::<SystemThunks>());
}

#[test]
fn older_provider_hides_trailing_fields() {
    let cutoff = offset_of!(SystemThunks, create_wait_set);
    let older = table(cutoff);
    assert!(older.provides(offset_of!(SystemThunks, close)));
    assert!(older.provides(offset_of!(SystemThunks, unmap_buffer)));
    assert!(!older.provides(offset_of!(SystemThunks, create_wait_set)));
    assert!(!older.provides(offset_of!(SystemThunks, get_ready_handles)));

    let current = table(SystemThunks::CURRENT_SIZE);
    assert!(current.provides(offset_of!(SystemThunks, get_ready_handles)));
    let mut ready = Vec::new();
    assert_eq!((current.get_ready_handles)(Handle::from_raw(1), 4, &mut ready), Status::Ok);
    assert_eq!(ready.len(), 1);
}

#[test]
fn compat_classification() {
    let current = table(SystemThunks::CURRENT_SIZE);
    assert_eq!(current.compat(SystemThunks::CURRENT_SIZE), ThunkCompat::Exact);
    assert_eq!(current.compat(SystemThunks::CURRENT_SIZE - 8), ThunkCompat::ProviderNewer);
    assert_eq!(table(64).compat(SystemThunks::CURRENT_SIZE), ThunkCompat::ProviderOlder);
}
