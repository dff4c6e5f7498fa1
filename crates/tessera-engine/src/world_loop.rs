//! Tick loop for one world, bounded by the shared [`RunControl`].

use std::time::Instant;

use tessera_core::control::RunControl;
use tessera_world::{TickSummary, WorldError, WorldTicker};
use tracing::{info, warn};

/// Why a world's tick loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A stop was requested before or between ticks.
    StopRequested,
    /// The configured tick limit was reached.
    MaxTicksReached,
}

/// Outcome of a world's tick loop.
#[derive(Debug)]
pub struct WorldRunResult {
    /// World name.
    pub world: String,
    /// Why the loop stopped.
    pub end_reason: EndReason,
    /// The last tick summary, if any tick completed.
    pub final_summary: Option<TickSummary>,
    /// Ticks run by this loop.
    pub total_ticks: u64,
}

/// Run ticks until a stop is requested or the tick limit is reached.
///
/// # Errors
///
/// Returns the first error from a tick. The world's stage clock is left
/// where the tick failed.
pub fn run_world(ticker: &mut WorldTicker, control: &RunControl) -> Result<WorldRunResult, WorldError> {
    let world = ticker.world().name().to_owned();
    let mut last_summary: Option<TickSummary> = None;
    let mut total_ticks: u64 = 0;

    info!(
        world,
        max_ticks = control.max_ticks(),
        tick_interval_ms = control.tick_interval_ms(),
        "World tick loop starting"
    );

    loop {
        if control.is_stop_requested() {
            return Ok(WorldRunResult {
                world,
                end_reason: EndReason::StopRequested,
                final_summary: last_summary,
                total_ticks,
            });
        }

        let tick_start = Instant::now();
        let summary = ticker.run_tick()?;
        total_ticks = total_ticks.saturating_add(1);

        if control.tick_limit_reached(total_ticks) {
            info!(world, tick = summary.sequence, max_ticks = control.max_ticks(), "Tick limit reached");
            return Ok(WorldRunResult {
                world,
                end_reason: EndReason::MaxTicksReached,
                final_summary: Some(summary),
                total_ticks,
            });
        }
        last_summary = Some(summary);

        if !control.sleep_until_next_tick(tick_start) {
            return Ok(WorldRunResult {
                world,
                end_reason: EndReason::StopRequested,
                final_summary: last_summary,
                total_ticks,
            });
        }
    }
}

/// Log how a world's tick loop ended.
pub fn log_world_end(result: &WorldRunResult) {
    info!(
        world = result.world,
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_age = result.final_summary.as_ref().map(|s| s.age),
        "World tick loop ended"
    );
    if result.final_summary.is_none() {
        warn!(world = result.world, "World ended with no ticks executed");
    }
}
