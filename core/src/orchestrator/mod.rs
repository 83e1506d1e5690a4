//! Phase barrier shared by every worker thread
//!
//! The Orchestrator is the one object all worker threads agree through: it
//! tracks which phase is active, how many participant votes a phase needs
//! before it can start or end, and whether the run has been aborted. It is a
//! reusable two-point barrier: each phase is entered through
//! [`Orchestrator::await_phase_start`] and left through
//! [`Orchestrator::await_phase_end`], and the phase number only advances when
//! the departure quota is met.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use treadmill_core::Orchestrator;
//!
//! let orchestrator = Arc::new(Orchestrator::new());
//! orchestrator.add_required_tokens(1);
//! orchestrator.phases_at_least_to(1);
//!
//! while orchestrator.more_phases() {
//!     let phase = orchestrator.await_phase_start(true, 1);
//!     // ... iterate within `phase` ...
//!     orchestrator.await_phase_end(true, 1);
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

/// Identifies a workload phase. Phase 0 runs first; the number only ever
/// increases over the course of a run.
pub type PhaseNumber = u32;

/// Which rendezvous point the barrier is currently parked between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarrierState {
    /// The previous phase has ended; arrival votes are accumulating.
    PhaseEnded,
    /// The current phase has started; departure votes are accumulating.
    PhaseStarted,
}

/// State guarded by the barrier mutex. Phase transitions are rare compared to
/// iterations, so a single mutex is cheap enough here; per-iteration reads go
/// through [`Orchestrator::continue_running`] instead.
#[derive(Debug)]
struct Rendezvous {
    required_tokens: i64,
    current_tokens: i64,
    current_phase: PhaseNumber,
    max_phase: PhaseNumber,
    state: BarrierState,
}

impl Rendezvous {
    fn more_phases(&self, aborted: bool) -> bool {
        !aborted && self.current_phase <= self.max_phase
    }
}

/// Synchronizes worker threads across a workload's phases.
///
/// One instance is shared by every worker thread of a run. Each thread casts
/// one arrival vote per phase (via `await_phase_start`) and one departure vote
/// (via `await_phase_end`); a vote may carry more than one token when a thread
/// represents several logical participants. `abort()` is the only escape
/// hatch: it is sticky, wakes every parked thread, and ends the entire run.
pub struct Orchestrator {
    sync: Mutex<Rendezvous>,
    phase_change: Condvar,
    // Read on every inner-loop iteration; keeping it off the mutex matters.
    aborted: AtomicBool,
}

impl Orchestrator {
    /// Create a barrier with no participants and a phase watermark of 0.
    pub fn new() -> Self {
        Orchestrator {
            sync: Mutex::new(Rendezvous {
                required_tokens: 0,
                current_tokens: 0,
                current_phase: 0,
                max_phase: 0,
                state: BarrierState::PhaseEnded,
            }),
            phase_change: Condvar::new(),
            aborted: AtomicBool::new(false),
        }
    }

    /// The currently active phase number.
    pub fn current_phase(&self) -> PhaseNumber {
        self.sync.lock().current_phase
    }

    /// Whether any phases remain: the current phase is within the watermark
    /// and the run has not been aborted.
    pub fn more_phases(&self) -> bool {
        let aborted = self.aborted.load(Ordering::Relaxed);
        self.sync.lock().more_phases(aborted)
    }

    /// Whether the run should keep going, i.e. `abort()` has not been called.
    /// Lock-free so inner loops can consult it every iteration.
    pub fn continue_running(&self) -> bool {
        !self.aborted.load(Ordering::Relaxed)
    }

    /// Raise the quota of votes needed to cross each barrier point. Called
    /// once per participant while workers are being set up, not concurrently
    /// with an in-progress crossing.
    pub fn add_required_tokens(&self, tokens: u32) {
        let mut sync = self.sync.lock();
        sync.required_tokens += i64::from(tokens);
    }

    /// Raise the phase watermark to at least `min_phase`. Safe to call while
    /// phases are running; a value at or below the current watermark is a
    /// no-op.
    pub fn phases_at_least_to(&self, min_phase: PhaseNumber) {
        let mut sync = self.sync.lock();
        sync.max_phase = sync.max_phase.max(min_phase);
    }

    /// Cast `add_tokens` arrival votes for the next phase and return its
    /// number.
    ///
    /// If `block` is set, suspends until arrival votes reach the required
    /// quota (every waiter then wakes observing the same phase number) or the
    /// run is aborted. A non-blocking call registers its votes and returns
    /// immediately; such participants still count toward quota but never hold
    /// up the rest.
    pub fn await_phase_start(&self, block: bool, add_tokens: u32) -> PhaseNumber {
        let mut sync = self.sync.lock();
        debug_assert!(
            sync.state == BarrierState::PhaseEnded || !self.continue_running(),
            "await_phase_start called while a phase is in progress"
        );

        sync.current_tokens += i64::from(add_tokens);
        let arrived_phase = sync.current_phase;

        if sync.current_tokens >= sync.required_tokens {
            sync.state = BarrierState::PhaseStarted;
            tracing::debug!(phase = arrived_phase, "phase started");
            self.phase_change.notify_all();
        } else if block {
            while sync.state != BarrierState::PhaseStarted
                && !self.aborted.load(Ordering::Relaxed)
            {
                self.phase_change.wait(&mut sync);
            }
        }

        arrived_phase
    }

    /// Cast `remove_tokens` departure votes for the current phase and return
    /// whether more phases remain.
    ///
    /// When the departure quota is met the phase number advances atomically
    /// with the wake-up, so no waiter observes a stale phase. If `block` is
    /// set, suspends until the phase ends or the run is aborted; a
    /// non-blocking call contributes its votes and returns immediately.
    pub fn await_phase_end(&self, block: bool, remove_tokens: u32) -> bool {
        let mut sync = self.sync.lock();
        debug_assert!(
            sync.state == BarrierState::PhaseStarted || !self.continue_running(),
            "await_phase_end called before the phase started"
        );

        sync.current_tokens -= i64::from(remove_tokens);

        if sync.current_tokens <= 0 {
            sync.current_phase += 1;
            sync.state = BarrierState::PhaseEnded;
            tracing::debug!(phase = sync.current_phase, "phase advanced");
            self.phase_change.notify_all();
        } else if block {
            while sync.state != BarrierState::PhaseEnded && !self.aborted.load(Ordering::Relaxed)
            {
                self.phase_change.wait(&mut sync);
            }
        }

        let aborted = self.aborted.load(Ordering::Relaxed);
        sync.more_phases(aborted)
    }

    /// Abort the run. Sticky and idempotent: every parked thread wakes, and
    /// every blocked and future barrier call returns immediately with a
    /// neutral result. Always ends the whole run, never a single phase.
    pub fn abort(&self) {
        let _sync = self.sync.lock();
        self.aborted.store(true, Ordering::Relaxed);
        tracing::debug!("run aborted");
        self.phase_change.notify_all();
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Orchestrator");
        if let Some(sync) = self.sync.try_lock() {
            dbg.field("current_phase", &sync.current_phase)
                .field("max_phase", &sync.max_phase)
                .field("required_tokens", &sync.required_tokens)
                .field("current_tokens", &sync.current_tokens);
        }
        dbg.field("aborted", &self.aborted.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests;
