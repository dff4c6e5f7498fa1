//! Tick stages and the per-thread stage clock.
//!
//! A tick is divided into an ordered set of stages that repeat forever:
//!
//! ```text
//! Simulation -> Physics -> Lighting -> PreSnapshot -> CopySnapshot -> Finalize -> Simulation ...
//! ```
//!
//! Each world's tick thread owns one [`StageClock`]. Phase-sensitive
//! operations call [`StageClock::check`] with the set of stages they may run
//! in. A mismatch is a programming error: the call returns
//! [`StageError::Violation`], which the caller propagates with `?` so the
//! operation is abandoned rather than retried.

use core::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::error;

/// Errors raised by the stage machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// A phase-gated operation ran outside its permitted stages.
    #[error("stage violation: expected one of {expected}, but the tick thread is in {actual}")]
    Violation {
        /// Stages the operation may run in.
        expected: StageSet,
        /// Stage the tick thread was actually in.
        actual: TickStage,
    },

    /// A stage was entered out of cyclic order.
    #[error("cannot enter {requested} from {current}; next stage is {}", .current.next())]
    OutOfOrder {
        /// Stage the clock was in.
        current: TickStage,
        /// Stage the caller tried to enter.
        requested: TickStage,
    },
}

/// One phase of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TickStage {
    /// Worker threads mutate live state.
    Simulation = 0,
    /// Physics integration over live state.
    Physics = 1,
    /// Light propagation over live state.
    Lighting = 2,
    /// Last chance to persist or prepare before publication.
    PreSnapshot = 3,
    /// Live values are published to snapshots; regions may be removed.
    CopySnapshot = 4,
    /// Post-publication bookkeeping.
    Finalize = 5,
}

impl TickStage {
    /// All stages in tick order.
    pub const ALL: [Self; 6] = [
        Self::Simulation,
        Self::Physics,
        Self::Lighting,
        Self::PreSnapshot,
        Self::CopySnapshot,
        Self::Finalize,
    ];

    /// The stage that follows this one, wrapping from `Finalize` to `Simulation`.
    pub const fn next(self) -> Self {
        match self {
            Self::Simulation => Self::Physics,
            Self::Physics => Self::Lighting,
            Self::Lighting => Self::PreSnapshot,
            Self::PreSnapshot => Self::CopySnapshot,
            Self::CopySnapshot => Self::Finalize,
            Self::Finalize => Self::Simulation,
        }
    }

    /// Bit of this stage inside a [`StageSet`].
    pub const fn mask(self) -> u16 {
        1_u16.wrapping_shl(self as u32)
    }

    /// Stable lowercase name, used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Simulation => "simulation",
            Self::Physics => "physics",
            Self::Lighting => "lighting",
            Self::PreSnapshot => "pre_snapshot",
            Self::CopySnapshot => "copy_snapshot",
            Self::Finalize => "finalize",
        }
    }

    const fn from_index(index: u8) -> Self {
        match index {
            0 => Self::Simulation,
            1 => Self::Physics,
            2 => Self::Lighting,
            3 => Self::PreSnapshot,
            4 => Self::CopySnapshot,
            // The clock only ever stores discriminants written by `store`.
            _ => Self::Finalize,
        }
    }
}

impl fmt::Display for TickStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of stages, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StageSet(u16);

impl StageSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// A set containing exactly `stages`.
    pub const fn of(stages: &[TickStage]) -> Self {
        let mut bits = 0;
        let mut rest = stages;
        while let [first, tail @ ..] = rest {
            bits |= first.mask();
            rest = tail;
        }
        Self(bits)
    }

    /// A set containing a single stage.
    pub const fn only(stage: TickStage) -> Self {
        Self(stage.mask())
    }

    /// Every stage.
    pub const fn all() -> Self {
        Self::of(&TickStage::ALL)
    }

    /// Every stage except those in `excluded`.
    pub const fn none_of(excluded: Self) -> Self {
        Self(Self::all().0 & !excluded.0)
    }

    /// Whether `stage` is a member.
    pub const fn contains(self, stage: TickStage) -> bool {
        self.0 & stage.mask() != 0
    }

    /// Whether the two sets share at least one stage.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the set has no members.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate members in tick order.
    pub fn iter(self) -> impl Iterator<Item = TickStage> {
        TickStage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl From<TickStage> for StageSet {
    fn from(stage: TickStage) -> Self {
        Self::only(stage)
    }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, stage) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(stage.name())?;
        }
        f.write_str("}")
    }
}

/// The stage a world's tick thread is currently in, plus the tick sequence.
///
/// The owning tick thread is the only writer; any thread may read. The clock
/// starts in [`TickStage::Finalize`] at sequence 0, so the first
/// [`advance`](Self::advance) enters `Simulation` of tick 1.
#[derive(Debug)]
pub struct StageClock {
    stage: AtomicU8,
    sequence: AtomicU64,
}

impl StageClock {
    /// A clock parked at the end of tick 0.
    pub const fn new() -> Self {
        Self {
            stage: AtomicU8::new(TickStage::Finalize as u8),
            sequence: AtomicU64::new(0),
        }
    }

    /// Current stage.
    pub fn current(&self) -> TickStage {
        TickStage::from_index(self.stage.load(Ordering::Acquire))
    }

    /// Sequence number of the tick in progress (incremented on entering `Simulation`).
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Move to the next stage in cyclic order and return it.
    pub fn advance(&self) -> TickStage {
        let next = self.current().next();
        self.store(next);
        next
    }

    /// Enter `stage`, which must be the next stage in cyclic order.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::OutOfOrder`] if `stage` does not follow the
    /// current stage.
    pub fn enter(&self, stage: TickStage) -> Result<(), StageError> {
        let current = self.current();
        if current.next() != stage {
            return Err(StageError::OutOfOrder {
                current,
                requested: stage,
            });
        }
        self.store(stage);
        Ok(())
    }

    /// Assert that the current stage is one of `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Violation`] when it is not. The violation is
    /// also logged at error level since it always indicates a bug.
    pub fn check(&self, expected: impl Into<StageSet>) -> Result<(), StageError> {
        let expected = expected.into();
        let actual = self.current();
        if expected.contains(actual) {
            return Ok(());
        }
        error!(%expected, %actual, "Stage violation");
        Err(StageError::Violation { expected, actual })
    }

    fn store(&self, stage: TickStage) {
        if stage == TickStage::Simulation {
            self.sequence.fetch_add(1, Ordering::AcqRel);
        }
        self.stage.store(stage as u8, Ordering::Release);
    }
}

impl Default for StageClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_cycle_in_order() {
        let mut stage = TickStage::Simulation;
        for expected in TickStage::ALL.iter().skip(1) {
            stage = stage.next();
            assert_eq!(stage, *expected);
        }
        assert_eq!(stage.next(), TickStage::Simulation);
    }

    #[test]
    fn stage_order_is_total() {
        assert!(TickStage::Simulation < TickStage::Physics);
        assert!(TickStage::PreSnapshot < TickStage::CopySnapshot);
        assert!(TickStage::CopySnapshot < TickStage::Finalize);
    }

    #[test]
    fn clock_starts_before_first_tick() {
        let clock = StageClock::new();
        assert_eq!(clock.current(), TickStage::Finalize);
        assert_eq!(clock.sequence(), 0);
        assert_eq!(clock.advance(), TickStage::Simulation);
        assert_eq!(clock.sequence(), 1);
    }

    #[test]
    fn sequence_increments_once_per_cycle() {
        let clock = StageClock::new();
        // Three full cycles.
        for _ in 0..18 {
            clock.advance();
        }
        assert_eq!(clock.sequence(), 3);
        assert_eq!(clock.current(), TickStage::Finalize);
    }

    #[test]
    fn enter_rejects_skipping() {
        let clock = StageClock::new();
        assert!(clock.enter(TickStage::Simulation).is_ok());
        let err = clock.enter(TickStage::CopySnapshot);
        assert_eq!(
            err,
            Err(StageError::OutOfOrder {
                current: TickStage::Simulation,
                requested: TickStage::CopySnapshot,
            })
        );
        assert_eq!(clock.current(), TickStage::Simulation);
    }

    #[test]
    fn check_accepts_member_stage() {
        let clock = StageClock::new();
        clock.advance();
        assert!(clock.check(TickStage::Simulation).is_ok());
        assert!(
            clock
                .check(StageSet::of(&[TickStage::Physics, TickStage::Simulation]))
                .is_ok()
        );
    }

    #[test]
    fn check_rejects_other_stage() {
        let clock = StageClock::new();
        clock.advance();
        let result = clock.check(TickStage::CopySnapshot);
        assert_eq!(
            result,
            Err(StageError::Violation {
                expected: StageSet::only(TickStage::CopySnapshot),
                actual: TickStage::Simulation,
            })
        );
    }

    #[test]
    fn none_of_excludes() {
        let set = StageSet::none_of(StageSet::only(TickStage::CopySnapshot));
        assert!(!set.contains(TickStage::CopySnapshot));
        assert!(set.contains(TickStage::Simulation));
        assert!(set.contains(TickStage::Finalize));
        assert_eq!(set.iter().count(), 5);
    }

    #[test]
    fn set_display_lists_names() {
        let set = StageSet::of(&[TickStage::Finalize, TickStage::Simulation]);
        assert_eq!(set.to_string(), "{simulation, finalize}");
        assert!(StageSet::EMPTY.is_empty());
        assert!(set.intersects(StageSet::only(TickStage::Finalize)));
    }
}
