//! Tick stages, snapshot double-buffering, and configuration for Tessera.
//!
//! Every world is driven by one tick thread that walks a fixed, cyclic
//! sequence of [`TickStage`]s. State that other threads need to read is
//! wrapped in a snapshotable cell: tick workers write the *live* value, and
//! readers see the *snapshot* value, which only changes during
//! [`TickStage::CopySnapshot`].
//!
//! # Modules
//!
//! - [`stage`] -- [`TickStage`], [`StageSet`], and the per-world
//!   [`StageClock`] with its `check` assertion.
//! - [`snapshot`] -- Live/snapshot cells and the [`SnapshotManager`] that
//!   publishes them once per tick.
//! - [`config`] -- Loading `tessera-config.yaml` into typed structs.
//! - [`control`] -- Shared stop flag and bounds for tick loops.
//!
//! [`TickStage`]: stage::TickStage
//! [`TickStage::CopySnapshot`]: stage::TickStage::CopySnapshot
//! [`StageSet`]: stage::StageSet
//! [`StageClock`]: stage::StageClock
//! [`SnapshotManager`]: snapshot::SnapshotManager

pub mod config;
pub mod control;
pub mod snapshot;
pub mod stage;
