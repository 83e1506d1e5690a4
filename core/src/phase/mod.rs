//! Per-actor phase iteration
//!
//! The nested-loop surface worker threads run on: the outer loop visits each
//! phase of the workload and drives the shared barrier; the inner loop runs
//! the repetitions of the current phase under that phase's iteration policy.
//!
//! ```text
//! for phase in &phase_loop {          // barrier votes happen here
//!     for _ in phase.iterations() {   // pacing + termination policy here
//!         operation();
//!     }
//! }
//! ```
//!
//! [`IterationChecker`] is the per-phase policy (how many times, for how
//! long, with what pacing); [`ActorPhase`] pairs a policy with its phase
//! number; [`PhaseLoop`] owns the phase map for one actor and composes the
//! policies with the [`Orchestrator`](crate::Orchestrator).

mod actor_phase;
mod checker;
mod phase_loop;

pub use actor_phase::{ActorPhase, ActorPhaseIter};
pub use checker::IterationChecker;
pub use phase_loop::{PhaseLoop, PhaseLoopIter, PhaseRef};
