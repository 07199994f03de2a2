// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Monotonic time source for deadlines and `get_time_ticks_now`.
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests
//!
//! Blocking waits take relative [`Deadline`]s; this module turns them into absolute instants
//! once, at the start of the wait, so spurious wake-ups never extend the total wait.

use std::time::{Duration, Instant};

use nexus_abi::Deadline;

/// Clock source used by the core.
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary fixed origin.
    fn now_micros(&self) -> u64;
}

/// Clock backed by `std::time::Instant`.
pub struct HostClock {
    start: Instant,
}

impl HostClock {
    /// Creates a clock whose origin is now.
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn now_micros(&self) -> u64 {
        duration_to_micros(self.start.elapsed())
    }
}

fn duration_to_micros(d: Duration) -> u64 {
    d.as_secs().saturating_mul(1_000_000).saturating_add(u64::from(d.subsec_micros()))
}

/// Absolute instant at which a wait started with `deadline` gives up; `None` means never.
pub fn expiry(deadline: Deadline) -> Option<Instant> {
    let timeout = deadline.as_duration()?;
    Instant::now().checked_add(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_clock_is_monotonic() {
        let clock = HostClock::new();
        let a = clock.now_micros();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now_micros();
        assert!(b >= a + 1_000, "clock advanced only {}us", b - a);
    }

    #[test]
    fn expiry_of_indefinite_is_none() {
        assert!(expiry(Deadline::INDEFINITE).is_none());
        let soon = expiry(Deadline::from_micros(1_000)).unwrap();
        assert!(soon > Instant::now() - Duration::from_millis(1));
    }

    #[test]
    fn micros_saturate() {
        assert_eq!(duration_to_micros(Duration::MAX), u64::MAX);
        assert_eq!(duration_to_micros(Duration::from_millis(3)), 3_000);
    }
}
