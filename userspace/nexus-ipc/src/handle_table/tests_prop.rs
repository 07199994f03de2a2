// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the handle table
//! OWNERS: @runtime
//! NOTE: Tests only. Checks allocation monotonicity and transfer atomicity.
//!
//! TEST_SCENARIOS:
//!   - handles_are_unique_and_increasing(): interleaved add/take never reissues a value
//!   - begin_transit_all_or_nothing(): arbitrary handle lists either mark all busy or none
//!   - add_batch_respects_capacity(): batches never partially insert

use nexus_abi::Handle;
use proptest::prelude::*;

use super::HandleTable;
use crate::dispatcher::{Dispatcher, MessagePipeDispatcher};
use crate::Error;

fn endpoint() -> Dispatcher {
    Dispatcher::MessagePipe(MessagePipeDispatcher::create_pair().0)
}

#[derive(Clone, Debug)]
enum Op {
    Add,
    Take(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![3 => Just(Op::Add), 1 => (0usize..64).prop_map(Op::Take)]
}

proptest! {
    #[test]
    fn handles_are_unique_and_increasing(ops in proptest::collection::vec(arb_op(), 1..64)) {
        let mut table = HandleTable::new(1024);
        let mut live: Vec<Handle> = Vec::new();
        let mut last = 0u32;
        for op in ops {
            match op {
                Op::Add => {
                    let handle = table.add(endpoint()).unwrap();
                    prop_assert!(handle.is_valid());
                    prop_assert!(handle.raw() > last);
                    last = handle.raw();
                    live.push(handle);
                }
                Op::Take(index) if !live.is_empty() => {
                    let handle = live.remove(index % live.len());
                    prop_assert!(table.take(handle).is_ok());
                    prop_assert_eq!(table.take(handle).err(), Some(Error::InvalidArgument));
                }
                Op::Take(_) => {}
            }
        }
        prop_assert_eq!(table.handles(), live);
    }

    #[test]
    fn begin_transit_all_or_nothing(
        count in 1usize..8,
        picks in proptest::collection::vec(0u32..10, 0..6),
    ) {
        let mut table = HandleTable::new(64);
        for _ in 0..count {
            table.add(endpoint()).unwrap();
        }
        let handles: Vec<Handle> = picks.iter().map(|raw| Handle::from_raw(*raw)).collect();
        match table.begin_transit(&handles) {
            Ok(records) => {
                for handle in &handles {
                    prop_assert_eq!(table.get_available(*handle).err(), Some(Error::Busy));
                }
                table.cancel_transit(records);
            }
            Err(err) => {
                prop_assert!(err == Error::InvalidArgument || err == Error::Busy);
            }
        }
        for handle in table.handles() {
            prop_assert!(table.get_available(handle).is_ok());
        }
        prop_assert_eq!(table.len(), count);
    }

    #[test]
    fn add_batch_respects_capacity(max in 1usize..16, first in 0usize..16, batch in 0usize..16) {
        let mut table = HandleTable::new(max);
        let first = first.min(max);
        for _ in 0..first {
            table.add(endpoint()).unwrap();
        }
        let dispatchers: Vec<Dispatcher> = (0..batch).map(|_| endpoint()).collect();
        match table.add_batch(&dispatchers) {
            Ok(handles) => {
                prop_assert!(first + batch <= max);
                prop_assert_eq!(handles.len(), batch);
                prop_assert_eq!(table.len(), first + batch);
            }
            Err(err) => {
                prop_assert_eq!(err, Error::ResourceExhausted);
                prop_assert!(first + batch > max);
                prop_assert_eq!(table.len(), first);
            }
        }
    }
}
