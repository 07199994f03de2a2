// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! One-shot blocking awakable used by `wait` and `wait_many`.

use std::sync::Arc;
use std::time::Instant;

use nexus_abi::SignalsState;
use parking_lot::{Condvar, Mutex};

use crate::awakable::{AwakeReason, Awakable};
use crate::{Error, Result};

/// Blocks a thread until the first notification arrives.
#[derive(Default)]
pub struct Waiter {
    outcome: Mutex<Option<(u64, AwakeReason)>>,
    cv: Condvar,
}

impl Waiter {
    /// Creates a waiter that has not been awoken.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks until awoken or until `expiry` passes.
    ///
    /// Returns the context and reason of the first notification, or
    /// [`Error::DeadlineExceeded`].
    pub fn wait(&self, expiry: Option<Instant>) -> Result<(u64, AwakeReason)> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(first) = *outcome {
                return Ok(first);
            }
            match expiry {
                None => self.cv.wait(&mut outcome),
                Some(at) => {
                    if self.cv.wait_until(&mut outcome, at).timed_out() {
                        return outcome.ok_or(Error::DeadlineExceeded);
                    }
                }
            }
        }
    }
}

impl Awakable for Waiter {
    fn awake(&self, context: u64, reason: AwakeReason, _state: SignalsState) -> bool {
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            *outcome = Some((context, reason));
            self.cv.notify_all();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn times_out_without_notification() {
        let waiter = Waiter::new();
        let at = Instant::now() + Duration::from_millis(10);
        assert_eq!(waiter.wait(Some(at)), Err(Error::DeadlineExceeded));
    }

    #[test]
    fn first_notification_wins() {
        let waiter = Waiter::new();
        let remote = waiter.clone();
        let t = thread::spawn(move || {
            remote.awake(3, AwakeReason::Satisfied, SignalsState::never());
            remote.awake(4, AwakeReason::Cancelled, SignalsState::never());
        });
        assert_eq!(waiter.wait(None), Ok((3, AwakeReason::Satisfied)));
        t.join().unwrap();
        assert_eq!(waiter.wait(None), Ok((3, AwakeReason::Satisfied)));
    }
}
