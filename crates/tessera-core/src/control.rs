//! Shared run control for tick loops.
//!
//! [`RunControl`] is shared between every world's tick thread and whoever
//! decides when the process should stop (signal handler, tick bound, tests).
//! The stop flag is an atomic so tick threads can poll it without locking;
//! the condvar only exists so a sleeping loop wakes immediately on stop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Stop flag, tick bound, and tick pacing shared by tick loops.
#[derive(Debug)]
pub struct RunControl {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Current tick interval in milliseconds (runtime-adjustable).
    tick_interval_ms: AtomicU64,

    /// Maximum number of ticks per world (0 = unlimited).
    max_ticks: u64,

    /// Paired with `wake` so `sleep_until_next_tick` can be cut short.
    gate: Mutex<()>,
    wake: Condvar,
}

impl RunControl {
    /// Create a run control. A zero interval is raised to 1ms.
    pub fn new(tick_interval_ms: u64, max_ticks: u64) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            tick_interval_ms: AtomicU64::new(tick_interval_ms.max(1)),
            max_ticks,
            gate: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    /// Request a clean stop and wake any sleeping loop.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        let _guard = self.gate.lock();
        self.wake.notify_all();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Get the current tick interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Set the tick interval. Returns the previous interval, or `None` if
    /// `ms` is zero.
    pub fn set_tick_interval_ms(&self, ms: u64) -> Option<u64> {
        if ms == 0 {
            return None;
        }
        Some(self.tick_interval_ms.swap(ms, Ordering::AcqRel))
    }

    /// Get the configured max ticks.
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Returns `true` if `max_ticks > 0` and `completed >= max_ticks`.
    pub const fn tick_limit_reached(&self, completed: u64) -> bool {
        self.max_ticks > 0 && completed >= self.max_ticks
    }

    /// Sleep out the rest of the tick that began at `tick_start`.
    ///
    /// Returns early, with `false`, if a stop is requested while sleeping.
    pub fn sleep_until_next_tick(&self, tick_start: Instant) -> bool {
        let Some(deadline) = tick_start.checked_add(Duration::from_millis(self.tick_interval_ms())) else {
            return !self.is_stop_requested();
        };
        let mut guard = self.gate.lock();
        while !self.is_stop_requested() {
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_stop_requested();
            }
        }
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn initial_state_runs() {
        let control = RunControl::new(50, 0);
        assert!(!control.is_stop_requested());
        assert!(!control.tick_limit_reached(1_000_000));
    }

    #[test]
    fn tick_limit_reached() {
        let control = RunControl::new(50, 10);
        assert!(!control.tick_limit_reached(9));
        assert!(control.tick_limit_reached(10));
    }

    #[test]
    fn set_tick_interval() {
        let control = RunControl::new(50, 0);
        assert_eq!(control.set_tick_interval_ms(20), Some(50));
        assert_eq!(control.tick_interval_ms(), 20);
        assert_eq!(control.set_tick_interval_ms(0), None);
        assert_eq!(control.tick_interval_ms(), 20);
    }

    #[test]
    fn sleep_completes_without_stop() {
        let control = RunControl::new(5, 0);
        assert!(control.sleep_until_next_tick(Instant::now()));
    }

    #[test]
    fn stop_wakes_sleeper() {
        let control = Arc::new(RunControl::new(60_000, 0));
        let sleeper = {
            let control = Arc::clone(&control);
            thread::spawn(move || control.sleep_until_next_tick(Instant::now()))
        };
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        control.request_stop();
        assert!(!sleeper.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
