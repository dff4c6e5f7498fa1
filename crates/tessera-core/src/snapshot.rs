//! Live/snapshot double-buffering.
//!
//! A snapshotable cell holds two values. The *live* value is overwritten
//! freely by tick workers during a tick; concurrent `set` calls have no
//! relative ordering and the last write before the copy wins. The *snapshot*
//! value is what every other thread reads through `get`. It only changes
//! when the owning [`SnapshotManager`] runs its copy during
//! [`TickStage::CopySnapshot`], at most once per tick.
//!
//! Readers never lock against writers, so reads of the snapshot are never
//! torn and are at most one tick stale.
//!
//! Copying requires a [`CopyPermit`], which only [`SnapshotManager`] can
//! create. That keeps `copy_snapshot` out of reach of ordinary callers.

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::stage::{StageClock, StageError, TickStage};

/// Proof that the caller is a [`SnapshotManager`] running its copy phase.
#[derive(Debug)]
pub struct CopyPermit {
    sequence: u64,
}

impl CopyPermit {
    /// Tick sequence the copy belongs to.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// A value with a live slot and a stable snapshot slot.
pub trait Snapshotable: Send + Sync {
    /// Publish the live value into the snapshot slot.
    fn copy_snapshot(&self, permit: &CopyPermit);

    /// Whether the live value differs from the snapshot.
    fn is_dirty(&self) -> bool;
}

/// Implemented by owners that publish their snapshots once per tick.
pub trait CopySnapshotManager {
    /// Error produced when the copy cannot run.
    type Error;

    /// Publish all owned snapshots for tick `sequence`.
    ///
    /// # Errors
    ///
    /// Implementations fail when called outside the copy stage.
    fn copy_snapshot_run(&self, sequence: u64) -> Result<(), Self::Error>;
}

// ---------------------------------------------------------------------------
// Primitive cells
// ---------------------------------------------------------------------------

/// Snapshotable boolean.
#[derive(Debug)]
pub struct SnapshotableBool {
    live: AtomicBool,
    snapshot: AtomicBool,
}

impl SnapshotableBool {
    /// Both slots start at `initial`.
    pub const fn new(initial: bool) -> Self {
        Self {
            live: AtomicBool::new(initial),
            snapshot: AtomicBool::new(initial),
        }
    }

    /// Overwrite the live value.
    pub fn set(&self, next: bool) {
        self.live.store(next, Ordering::Release);
    }

    /// Set the live value to `next` only if it currently equals `expect`.
    pub fn compare_and_set(&self, expect: bool, next: bool) -> bool {
        self.live
            .compare_exchange(expect, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The stable snapshot value.
    pub fn get(&self) -> bool {
        self.snapshot.load(Ordering::Acquire)
    }

    /// The live value. May race with concurrent writers.
    pub fn get_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

impl Snapshotable for SnapshotableBool {
    fn copy_snapshot(&self, _permit: &CopyPermit) {
        self.snapshot.store(self.get_live(), Ordering::Release);
    }

    fn is_dirty(&self) -> bool {
        self.get() != self.get_live()
    }
}

/// Snapshotable unsigned 64-bit counter. Used for world age.
#[derive(Debug)]
pub struct SnapshotableU64 {
    live: AtomicU64,
    snapshot: AtomicU64,
}

impl SnapshotableU64 {
    /// Both slots start at `initial`.
    pub const fn new(initial: u64) -> Self {
        Self {
            live: AtomicU64::new(initial),
            snapshot: AtomicU64::new(initial),
        }
    }

    /// Overwrite the live value.
    pub fn set(&self, next: u64) {
        self.live.store(next, Ordering::Release);
    }

    /// Set the live value to `next` only if it currently equals `expect`.
    pub fn compare_and_set(&self, expect: u64, next: u64) -> bool {
        self.live
            .compare_exchange(expect, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Add one to the live value, saturating at `u64::MAX`. Returns the new live value.
    pub fn increment(&self) -> u64 {
        loop {
            let current = self.get_live();
            let next = current.saturating_add(1);
            if self.compare_and_set(current, next) {
                return next;
            }
        }
    }

    /// The stable snapshot value.
    pub fn get(&self) -> u64 {
        self.snapshot.load(Ordering::Acquire)
    }

    /// The live value. May race with concurrent writers.
    pub fn get_live(&self) -> u64 {
        self.live.load(Ordering::Acquire)
    }
}

impl Snapshotable for SnapshotableU64 {
    fn copy_snapshot(&self, _permit: &CopyPermit) {
        self.snapshot.store(self.get_live(), Ordering::Release);
    }

    fn is_dirty(&self) -> bool {
        self.get() != self.get_live()
    }
}

// ---------------------------------------------------------------------------
// Generic cell
// ---------------------------------------------------------------------------

/// Snapshotable cell for any cloneable value.
///
/// The live slot is guarded by a short mutex; the snapshot slot is an
/// [`ArcSwap`], so `get` is wait-free and never observes a half-written value.
pub struct SnapshotableValue<T> {
    live: Mutex<T>,
    snapshot: ArcSwap<T>,
}

impl<T> SnapshotableValue<T>
where
    T: Clone + PartialEq + Send + Sync,
{
    /// Both slots start at `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            live: Mutex::new(initial.clone()),
            snapshot: ArcSwap::from_pointee(initial),
        }
    }

    /// Overwrite the live value.
    pub fn set(&self, next: T) {
        *self.live.lock() = next;
    }

    /// Set the live value to `next` only if it currently equals `expect`.
    pub fn compare_and_set(&self, expect: &T, next: T) -> bool {
        let mut live = self.live.lock();
        if *live == *expect {
            *live = next;
            true
        } else {
            false
        }
    }

    /// The stable snapshot value.
    pub fn get(&self) -> Arc<T> {
        self.snapshot.load_full()
    }

    /// A copy of the live value. May race with concurrent writers.
    pub fn get_live(&self) -> T {
        self.live.lock().clone()
    }
}

impl<T> Snapshotable for SnapshotableValue<T>
where
    T: Clone + PartialEq + Send + Sync,
{
    fn copy_snapshot(&self, _permit: &CopyPermit) {
        let live = self.live.lock().clone();
        self.snapshot.store(Arc::new(live));
    }

    fn is_dirty(&self) -> bool {
        *self.live.lock() != **self.snapshot.load()
    }
}

impl<T: fmt::Debug> fmt::Debug for SnapshotableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotableValue")
            .field("live", &*self.live.lock())
            .field("snapshot", &**self.snapshot.load())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns a set of snapshotable cells and publishes them together.
///
/// Registration is permanent for the manager's lifetime.
pub struct SnapshotManager {
    values: Mutex<Vec<Arc<dyn Snapshotable>>>,
    last_copied: Mutex<Option<u64>>,
}

impl SnapshotManager {
    /// A manager with nothing registered.
    pub const fn new() -> Self {
        Self {
            values: Mutex::new(Vec::new()),
            last_copied: Mutex::new(None),
        }
    }

    /// Register `value` and return a shared handle to it.
    pub fn track<S>(&self, value: S) -> Arc<S>
    where
        S: Snapshotable + 'static,
    {
        let value = Arc::new(value);
        let erased: Arc<dyn Snapshotable> = Arc::clone(&value) as Arc<dyn Snapshotable>;
        self.values.lock().push(erased);
        value
    }

    /// Number of registered cells.
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    /// Number of registered cells whose live value differs from the snapshot.
    pub fn dirty_count(&self) -> usize {
        self.values.lock().iter().filter(|v| v.is_dirty()).count()
    }

    /// Tick sequence of the most recent copy, if any.
    pub fn last_copied(&self) -> Option<u64> {
        *self.last_copied.lock()
    }

    /// Publish every registered cell.
    ///
    /// Must run during [`TickStage::CopySnapshot`]. A second call within the
    /// same tick sequence is a no-op and returns `Ok(0)`. Otherwise returns the
    /// number of cells copied.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Violation`] when `clock` is in any other stage.
    pub fn copy_all(&self, clock: &StageClock) -> Result<usize, StageError> {
        clock.check(TickStage::CopySnapshot)?;
        let sequence = clock.sequence();

        let mut last = self.last_copied.lock();
        if *last == Some(sequence) {
            debug!(sequence, "Snapshots already copied this tick");
            return Ok(0);
        }
        *last = Some(sequence);

        let permit = CopyPermit { sequence };
        let values = self.values.lock();
        for value in values.iter() {
            value.copy_snapshot(&permit);
        }
        Ok(values.len())
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("registered", &self.len())
            .field("last_copied", &self.last_copied())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use rand::Rng;

    use super::*;

    /// Drive a fresh clock to the copy stage of tick 1.
    fn clock_at_copy() -> StageClock {
        let clock = StageClock::new();
        while clock.advance() != TickStage::CopySnapshot {}
        clock
    }

    /// Walk a clock once around to the next tick's copy stage.
    fn next_copy(clock: &StageClock) {
        while clock.advance() != TickStage::CopySnapshot {}
    }

    #[test]
    fn set_is_invisible_until_copy() {
        let manager = SnapshotManager::new();
        let flag = manager.track(SnapshotableBool::new(false));
        flag.set(true);
        assert!(!flag.get());
        assert!(flag.get_live());
        assert!(flag.is_dirty());

        let clock = clock_at_copy();
        assert_eq!(manager.copy_all(&clock).unwrap(), 1);
        assert!(flag.get());
        assert!(!flag.is_dirty());
    }

    #[test]
    fn three_writers_then_one_copy() {
        let manager = SnapshotManager::new();
        let flag = manager.track(SnapshotableBool::new(false));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let flag = Arc::clone(&flag);
                thread::spawn(move || flag.set(true))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let clock = clock_at_copy();
        manager.copy_all(&clock).unwrap();
        assert!(flag.get());
        assert!(!flag.is_dirty());
    }

    #[test]
    fn last_set_before_copy_wins() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let manager = SnapshotManager::new();
            let counter = manager.track(SnapshotableU64::new(0));
            let writes: Vec<u64> = (0..rng.random_range(1..20))
                .map(|_| rng.random_range(0..1_000))
                .collect();
            for value in &writes {
                counter.set(*value);
            }
            let clock = clock_at_copy();
            manager.copy_all(&clock).unwrap();
            assert_eq!(Some(counter.get()), writes.last().copied());
        }
    }

    #[test]
    fn copy_with_no_new_writes_is_idempotent() {
        let manager = SnapshotManager::new();
        let counter = manager.track(SnapshotableU64::new(7));
        counter.set(9);

        let clock = clock_at_copy();
        manager.copy_all(&clock).unwrap();
        assert_eq!(counter.get(), 9);

        next_copy(&clock);
        manager.copy_all(&clock).unwrap();
        assert_eq!(counter.get(), 9);
    }

    #[test]
    fn second_copy_in_same_tick_is_skipped() {
        let manager = SnapshotManager::new();
        let counter = manager.track(SnapshotableU64::new(0));
        let clock = clock_at_copy();

        counter.set(1);
        assert_eq!(manager.copy_all(&clock).unwrap(), 1);
        counter.set(2);
        assert_eq!(manager.copy_all(&clock).unwrap(), 0);
        assert_eq!(counter.get(), 1);
        assert_eq!(manager.last_copied(), Some(1));
    }

    #[test]
    fn copy_outside_copy_stage_is_rejected() {
        let manager = SnapshotManager::new();
        let counter = manager.track(SnapshotableU64::new(0));
        counter.set(5);

        let clock = StageClock::new();
        clock.advance();
        let result = manager.copy_all(&clock);
        assert!(matches!(
            result,
            Err(StageError::Violation {
                actual: TickStage::Simulation,
                ..
            })
        ));
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn compare_and_set_only_on_match() {
        let counter = SnapshotableU64::new(3);
        assert!(!counter.compare_and_set(4, 10));
        assert!(counter.compare_and_set(3, 10));
        assert_eq!(counter.get_live(), 10);
        assert_eq!(counter.get(), 3);
    }

    #[test]
    fn increment_from_many_threads() {
        let manager = SnapshotManager::new();
        let age = manager.track(SnapshotableU64::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let age = Arc::clone(&age);
                thread::spawn(move || {
                    for _ in 0..100 {
                        age.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(age.get_live(), 800);
        assert_eq!(age.get(), 0);
    }

    #[test]
    fn generic_value_publishes_clone() {
        let manager = SnapshotManager::new();
        let name = manager.track(SnapshotableValue::new(String::from("before")));
        name.set(String::from("after"));
        assert_eq!(*name.get(), "before");
        assert!(name.is_dirty());

        assert!(!name.compare_and_set(&String::from("before"), String::from("nope")));
        assert!(name.compare_and_set(&String::from("after"), String::from("final")));

        let clock = clock_at_copy();
        manager.copy_all(&clock).unwrap();
        assert_eq!(*name.get(), "final");
        assert!(!name.is_dirty());
    }

    #[test]
    fn dirty_count_tracks_pending_writes() {
        let manager = SnapshotManager::new();
        let a = manager.track(SnapshotableBool::new(false));
        let b = manager.track(SnapshotableU64::new(0));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.dirty_count(), 0);
        a.set(true);
        b.set(1);
        assert_eq!(manager.dirty_count(), 2);
    }
}
