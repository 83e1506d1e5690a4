//! Outer per-actor iteration across phases

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::PhaseConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, PhaseNumber};
use crate::rate_limit::RateLimiterRegistry;

use super::actor_phase::{ActorPhase, ActorPhaseIter};
use super::checker::IterationChecker;

/// One worker thread's view of the whole workload: a phase-number-to-policy
/// map plus the shared [`Orchestrator`].
///
/// Iterating a `&PhaseLoop` drives the barrier: entering a phase casts this
/// thread's arrival vote (and, for a phase that does not gate the barrier,
/// immediately casts a non-blocking departure vote so the rest of the run
/// never waits on it); leaving a gating phase casts a blocking departure
/// vote. The loop ends when no phases remain or the run is aborted.
///
/// A `PhaseLoop` holds no per-thread state, so the worker threads of one
/// actor share a single instance; each thread's run-state lives in the
/// iterators it creates.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use treadmill_core::{Orchestrator, PhaseConfig, PhaseLoop, RateLimiterRegistry};
///
/// let orchestrator = Arc::new(Orchestrator::new());
/// orchestrator.add_required_tokens(1);
/// let limiters = RateLimiterRegistry::new();
///
/// let phases = PhaseLoop::new(
///     Arc::clone(&orchestrator),
///     [(0, PhaseConfig::repeat(3)), (1, PhaseConfig::nop())],
///     &limiters,
/// )?;
///
/// let mut total = 0;
/// for phase in &phases {
///     for _ in phase.iterations() {
///         total += 1; // the domain operation runs here
///     }
/// }
/// assert_eq!(total, 3);
/// # Ok::<(), treadmill_core::Error>(())
/// ```
pub struct PhaseLoop {
    orchestrator: Arc<Orchestrator>,
    phases: BTreeMap<PhaseNumber, ActorPhase>,
    // Stand-in policy for phase numbers past this actor's configuration,
    // reachable when another participant raises the watermark higher.
    implicit_nop: IterationChecker,
}

impl PhaseLoop {
    /// Build the per-phase policies for one actor and register the highest
    /// configured phase number as a watermark with the orchestrator.
    ///
    /// Every configuration error for every phase surfaces here, before any
    /// worker thread starts iterating.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        configs: impl IntoIterator<Item = (PhaseNumber, PhaseConfig)>,
        limiters: &RateLimiterRegistry,
    ) -> Result<Self> {
        let mut phases = BTreeMap::new();
        for (number, config) in configs {
            let checker = IterationChecker::new(&config, limiters).map_err(|err| match err {
                Error::Config(msg) => Error::config(format!("phase {number}: {msg}")),
                other => other,
            })?;
            if phases.insert(number, ActorPhase::new(number, checker)).is_some() {
                return Err(Error::config(format!(
                    "phase {number} is configured twice for this actor"
                )));
            }
        }

        if let Some(highest) = phases.keys().next_back() {
            orchestrator.phases_at_least_to(*highest);
        }

        Ok(PhaseLoop {
            orchestrator,
            phases,
            implicit_nop: IterationChecker::nop(),
        })
    }

    /// The shared barrier this loop coordinates through.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// This actor's entry for `number`, if configured.
    pub fn phase(&self, number: PhaseNumber) -> Option<&ActorPhase> {
        self.phases.get(&number)
    }

    /// Iterate the workload's phases, one [`PhaseRef`] per phase.
    pub fn iter(&self) -> PhaseLoopIter<'_> {
        PhaseLoopIter {
            phase_loop: self,
            pending_end: None,
            finished: false,
        }
    }
}

impl<'a> IntoIterator for &'a PhaseLoop {
    type Item = PhaseRef<'a>;
    type IntoIter = PhaseLoopIter<'a>;

    fn into_iter(self) -> PhaseLoopIter<'a> {
        self.iter()
    }
}

impl std::fmt::Debug for PhaseLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseLoop")
            .field("phases", &self.phases.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Drives one thread through the phase sequence, casting the barrier votes
/// described on [`PhaseLoop`].
///
/// Abandoning the iterator mid-run (dropping it between phases) withholds
/// this thread's departure vote and will stall the other participants; a
/// driver that unwinds early must call [`Orchestrator::abort`].
pub struct PhaseLoopIter<'a> {
    phase_loop: &'a PhaseLoop,
    // Whether the phase we yielded last still owes a blocking departure vote.
    pending_end: Option<bool>,
    finished: bool,
}

impl<'a> Iterator for PhaseLoopIter<'a> {
    type Item = PhaseRef<'a>;

    fn next(&mut self) -> Option<PhaseRef<'a>> {
        let orchestrator = &*self.phase_loop.orchestrator;

        if let Some(gates_barrier) = self.pending_end.take() {
            if gates_barrier && !orchestrator.await_phase_end(true, 1) {
                self.finished = true;
            }
        }
        if self.finished || !orchestrator.more_phases() {
            self.finished = true;
            return None;
        }

        let number = orchestrator.await_phase_start(true, 1);
        let checker = match self.phase_loop.phases.get(&number) {
            Some(phase) => phase.checker(),
            // Unconfigured phase: a structural no-op that still owes the
            // barrier its departure vote.
            None => &self.phase_loop.implicit_nop,
        };

        let gates_barrier = checker.does_block_completion();
        if !gates_barrier {
            // Free the barrier immediately; this thread's inner loop runs in
            // the background until the phase number moves on.
            orchestrator.await_phase_end(false, 1);
        }
        self.pending_end = Some(gates_barrier);

        Some(PhaseRef {
            orchestrator,
            checker,
            number,
        })
    }
}

/// Handle to the phase a [`PhaseLoopIter`] is currently visiting.
///
/// Create the inner loop with [`iterations`](PhaseRef::iterations). The
/// handle is only meaningful while its phase is the one the outer loop is
/// visiting; holding it across an outer-loop step and iterating it then is a
/// misuse the barrier cannot detect.
pub struct PhaseRef<'a> {
    orchestrator: &'a Orchestrator,
    checker: &'a IterationChecker,
    number: PhaseNumber,
}

impl<'a> PhaseRef<'a> {
    /// The phase number being visited.
    pub fn number(&self) -> PhaseNumber {
        self.number
    }

    /// Whether this actor's completion of the phase gates the barrier.
    pub fn blocks_completion(&self) -> bool {
        self.checker.does_block_completion()
    }

    /// Fresh run-state for iterating this phase on the calling thread.
    pub fn iterations(&self) -> ActorPhaseIter<'a> {
        ActorPhaseIter::new(self.orchestrator, self.checker, self.number)
    }
}

impl std::fmt::Debug for PhaseRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRef")
            .field("number", &self.number)
            .field("blocks_completion", &self.blocks_completion())
            .finish()
    }
}
