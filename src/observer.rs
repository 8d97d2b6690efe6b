//! Sort progress observers.

use std::fmt;
use std::fmt::Display;
use std::time::Instant;

use log;

use crate::feasibility::Plan;
use crate::sort::SortError;

/// Sort engine state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    /// Input size and resources are checked.
    Validated,
    /// Input is being split into sorted runs.
    Splitting,
    /// Runs are being merged into the output.
    Merging,
    Done,
    Failed,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Validated => "validated",
            Phase::Splitting => "splitting",
            Phase::Merging => "merging",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Sort engine observer. Invoked at phase boundaries and on progress events.
/// All methods do nothing by default.
pub trait SortObserver {
    /// Engine entered a new phase.
    fn on_phase(&mut self, _phase: Phase) {}

    /// Resource check succeeded.
    fn on_plan(&mut self, _plan: &Plan) {}

    /// A sorted run was saved.
    fn on_run_created(&mut self, _index: usize, _records: usize) {}

    /// Output buffer was written to the output stream.
    fn on_output_flushed(&mut self, _bytes: usize) {}

    /// Engine is about to enter [`Phase::Failed`] from `phase`.
    fn on_failure(&mut self, _phase: Phase, _error: &SortError) {}
}

/// Observer ignoring all events.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopObserver;

impl SortObserver for NoopObserver {}

/// Observer reporting progress and phase timings through the `log` facade.
pub struct LogObserver {
    started: Instant,
    phase_started: Instant,
    phase: Phase,
    runs: usize,
    flushed_bytes: u64,
}

impl LogObserver {
    pub fn new() -> Self {
        let now = Instant::now();
        LogObserver {
            started: now,
            phase_started: now,
            phase: Phase::Init,
            runs: 0,
            flushed_bytes: 0,
        }
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        LogObserver::new()
    }
}

impl SortObserver for LogObserver {
    fn on_phase(&mut self, phase: Phase) {
        let elapsed_ms = self.phase_started.elapsed().as_secs_f64() * 1000.0;
        match self.phase {
            Phase::Validated => log::info!("preparation done in {:.3} ms", elapsed_ms),
            Phase::Splitting => log::info!("{} runs created in {:.3} ms", self.runs, elapsed_ms),
            Phase::Merging => log::info!("{} bytes merged in {:.3} ms", self.flushed_bytes, elapsed_ms),
            _ => {}
        }

        self.phase = phase;
        self.phase_started = Instant::now();

        match phase {
            Phase::Done | Phase::Failed => log::info!(
                "sorting {} in {:.3} ms",
                phase,
                self.started.elapsed().as_secs_f64() * 1000.0
            ),
            _ => log::debug!("entering {} phase", phase),
        }
    }

    fn on_plan(&mut self, plan: &Plan) {
        log::info!(
            "input size: {} bytes, blocks: {}, file handles: {} of {}, disk space: {} of {} bytes",
            plan.input_size,
            plan.block_count,
            plan.required_handles,
            plan.available_handles,
            plan.required_space,
            plan.available_space
        );
    }

    fn on_run_created(&mut self, index: usize, records: usize) {
        self.runs += 1;
        log::debug!("run {} saved ({} records)", index, records);
    }

    fn on_output_flushed(&mut self, bytes: usize) {
        self.flushed_bytes += bytes as u64;
        log::trace!("{} bytes written to output", bytes);
    }

    fn on_failure(&mut self, phase: Phase, error: &SortError) {
        log::error!("sorting failed in {} phase: {}", phase, error);
    }
}
