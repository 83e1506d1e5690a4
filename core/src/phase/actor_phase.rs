//! Inner per-phase iteration surface

use std::time::Instant;

use crate::orchestrator::{Orchestrator, PhaseNumber};

use super::checker::IterationChecker;

/// One phase of one actor: a phase number plus its iteration policy.
#[derive(Debug)]
pub struct ActorPhase {
    number: PhaseNumber,
    checker: IterationChecker,
}

impl ActorPhase {
    /// Pair a phase number with its policy.
    pub fn new(number: PhaseNumber, checker: IterationChecker) -> Self {
        ActorPhase { number, checker }
    }

    /// The phase this entry covers.
    pub fn number(&self) -> PhaseNumber {
        self.number
    }

    /// This phase's iteration policy.
    pub fn checker(&self) -> &IterationChecker {
        &self.checker
    }

    /// Whether this actor's completion of the phase gates the barrier.
    pub fn blocks_completion(&self) -> bool {
        self.checker.does_block_completion()
    }

    /// Fresh per-thread run-state for iterating this phase.
    pub fn iterations<'a>(&'a self, orchestrator: &'a Orchestrator) -> ActorPhaseIter<'a> {
        ActorPhaseIter::new(orchestrator, &self.checker, self.number)
    }
}

/// Drives the repetitions of one thread within one phase.
///
/// Each `next()` call first closes out the previous iteration (post-sleep,
/// iteration count, rate-limiter bookkeeping), then decides whether to
/// continue, then applies pre-iteration pacing (fixed sleep or shared rate
/// budget) before yielding. Making the pacing part of `next()` keeps the
/// effect visible at the call site: a plain `for` loop gets exactly one
/// pacing application per body run.
///
/// For a phase with a termination bound the policy is local
/// ([`IterationChecker::is_done`]); for an unbounded background phase the
/// shared phase number is authoritative, and the loop stops as soon as some
/// other participant advances it.
pub struct ActorPhaseIter<'a> {
    orchestrator: &'a Orchestrator,
    checker: &'a IterationChecker,
    phase: PhaseNumber,
    iterations: u64,
    started_at: Option<Instant>,
    mid_iteration: bool,
}

impl<'a> ActorPhaseIter<'a> {
    pub(crate) fn new(
        orchestrator: &'a Orchestrator,
        checker: &'a IterationChecker,
        phase: PhaseNumber,
    ) -> Self {
        ActorPhaseIter {
            orchestrator,
            checker,
            phase,
            iterations: 0,
            started_at: None,
            mid_iteration: false,
        }
    }

    /// Number of iterations whose bodies have completed.
    pub fn completed(&self) -> u64 {
        self.iterations
    }

    fn keep_going(&mut self) -> bool {
        if !self.orchestrator.continue_running() {
            return false;
        }

        if self.checker.does_block_completion() {
            if self.started_at.is_none() && self.checker.needs_start_time() {
                // Reference start time is captured at first use, not at
                // construction: the phase clock starts with the first check.
                self.started_at = Some(Instant::now());
            }
            !self
                .checker
                .is_done(self.started_at, self.iterations, Instant::now())
        } else {
            // Background phase: run until another participant moves the
            // shared phase number past us.
            self.orchestrator.current_phase() == self.phase
        }
    }
}

impl Iterator for ActorPhaseIter<'_> {
    type Item = ();

    fn next(&mut self) -> Option<()> {
        if self.mid_iteration {
            // Close out the body that just ran.
            self.checker.sleep_after(self.orchestrator, self.phase);
            self.checker.notify_iteration();
            self.iterations += 1;
            self.mid_iteration = false;
        }

        if !self.keep_going() {
            return None;
        }

        self.checker.sleep_before(self.orchestrator, self.phase);
        self.checker
            .limit_rate(self.orchestrator, self.started_at, self.iterations);
        self.mid_iteration = true;
        Some(())
    }
}

impl std::fmt::Debug for ActorPhaseIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorPhaseIter")
            .field("phase", &self.phase)
            .field("iterations", &self.iterations)
            .field("mid_iteration", &self.mid_iteration)
            .finish()
    }
}
