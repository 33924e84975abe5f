//! Monotonic time source for the polling loop
//!
//! Replaces the interrupt-decremented busy-wait counter: the platform timer
//! feeds `now_ms`, and `sleep_ms` is the only way the loop gives up time.

/// Monotonic millisecond clock with a blocking sleep
pub trait Clock {
    /// Milliseconds since boot. Never goes backwards.
    fn now_ms(&self) -> u64;

    /// Block the caller for `ms` milliseconds.
    fn sleep_ms(&self, ms: u32);

    /// Timestamp in the form smoltcp expects
    fn instant(&self) -> smoltcp::time::Instant {
        smoltcp::time::Instant::from_millis(i64::try_from(self.now_ms()).unwrap_or(i64::MAX))
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn sleep_ms(&self, ms: u32) {
        (**self).sleep_ms(ms)
    }
}

/// Returns true once `timeout_ms` has passed since `started_ms`.
pub fn elapsed(clock: &impl Clock, started_ms: u64, timeout_ms: u64) -> bool {
    clock.now_ms().saturating_sub(started_ms) >= timeout_ms
}
