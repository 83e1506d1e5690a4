//! Spawning and joining the worker threads of a run
//!
//! The runner is the driver boundary around the coordination core: it builds
//! every [`PhaseLoop`] up front (so all configuration errors surface before a
//! single thread starts), wires the barrier quota, spawns one thread per
//! worker, and joins them into per-worker statistics. A panic in any
//! operation body aborts the whole run and unwinds every other worker
//! through its failing barrier waits.
//!
//! # Example
//!
//! ```
//! use treadmill_core::{ActorSpec, PhaseConfig, WorkloadRunner};
//!
//! let mut runner = WorkloadRunner::new();
//! runner.add_actor(ActorSpec::new("writer", 2, [(0, PhaseConfig::repeat(10))], |_phase| {
//!     // domain operation
//! }));
//!
//! let stats = runner.run()?;
//! assert_eq!(stats.iter().map(|s| s.iterations()).sum::<u64>(), 20);
//! # Ok::<(), treadmill_core::Error>(())
//! ```

mod stats;

pub use stats::{aggregate_worker_stats, AggregatedStats, WorkerStats};

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::config::PhaseConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, PhaseNumber};
use crate::phase::PhaseLoop;
use crate::rate_limit::RateLimiterRegistry;

/// The operation a worker thread runs once per inner-loop iteration.
pub type Operation = Arc<dyn Fn(PhaseNumber) + Send + Sync>;

/// One actor: a named role, a thread count, a phase-config map, and the
/// operation its threads repeat.
#[derive(Clone)]
pub struct ActorSpec {
    /// Actor name, used for thread names and logging.
    pub name: String,

    /// Number of worker threads to spawn for this actor.
    pub threads: usize,

    /// Per-phase configuration for this actor.
    pub phases: BTreeMap<PhaseNumber, PhaseConfig>,

    /// The domain operation, invoked with the active phase number.
    pub operation: Operation,
}

impl ActorSpec {
    /// Describe an actor running `operation` on `threads` worker threads.
    pub fn new(
        name: impl Into<String>,
        threads: usize,
        phases: impl IntoIterator<Item = (PhaseNumber, PhaseConfig)>,
        operation: impl Fn(PhaseNumber) + Send + Sync + 'static,
    ) -> Self {
        ActorSpec {
            name: name.into(),
            threads,
            phases: phases.into_iter().collect(),
            operation: Arc::new(operation),
        }
    }
}

impl std::fmt::Debug for ActorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSpec")
            .field("name", &self.name)
            .field("threads", &self.threads)
            .field("phases", &self.phases.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Owns the shared run context and drives a set of actors to completion.
pub struct WorkloadRunner {
    orchestrator: Arc<Orchestrator>,
    limiters: RateLimiterRegistry,
    actors: Vec<ActorSpec>,
}

impl WorkloadRunner {
    /// Create a runner with a fresh orchestrator and rate-limiter registry.
    pub fn new() -> Self {
        WorkloadRunner {
            orchestrator: Arc::new(Orchestrator::new()),
            limiters: RateLimiterRegistry::new(),
            actors: Vec::new(),
        }
    }

    /// The shared barrier, e.g. for a supervising thread to `abort()` on.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Add an actor to the run.
    pub fn add_actor(&mut self, actor: ActorSpec) -> &mut Self {
        self.actors.push(actor);
        self
    }

    /// Run every actor to completion and return per-worker statistics.
    ///
    /// Validates all phase configurations first; nothing is spawned if any
    /// actor's configuration is invalid. Returns [`Error::Worker`] when any
    /// worker panicked (the run will have been aborted).
    pub fn run(&self) -> Result<Vec<WorkerStats>> {
        // One PhaseLoop per actor, shared by its threads. Building them also
        // raises the phase watermark and resolves shared rate limiters, so
        // every configuration error lands here.
        let mut loops = Vec::with_capacity(self.actors.len());
        let mut total_threads: u32 = 0;
        for actor in &self.actors {
            if actor.threads == 0 {
                return Err(Error::config(format!(
                    "actor {:?} needs at least one thread",
                    actor.name
                )));
            }
            let phases = PhaseLoop::new(
                Arc::clone(&self.orchestrator),
                actor.phases.iter().map(|(n, c)| (*n, c.clone())),
                &self.limiters,
            )
            .map_err(|err| match err {
                Error::Config(msg) => Error::config(format!("actor {:?}: {msg}", actor.name)),
                other => other,
            })?;
            loops.push(phases);
            total_threads += actor.threads as u32;
        }
        self.orchestrator.add_required_tokens(total_threads);

        tracing::info!(
            actors = self.actors.len(),
            workers = total_threads,
            "starting workload"
        );

        let mut results = Vec::with_capacity(total_threads as usize);
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(total_threads as usize);
            for (actor, phases) in self.actors.iter().zip(&loops) {
                for index in 0..actor.threads {
                    let worker = format!("{}-{index}", actor.name);
                    let operation = Arc::clone(&actor.operation);
                    let orchestrator = Arc::clone(&self.orchestrator);
                    let builder = thread::Builder::new().name(worker.clone());
                    let handle = builder
                        .spawn_scoped(scope, move || {
                            run_worker(&worker, phases, &*operation, &orchestrator)
                        })
                        .expect("spawning a worker thread");
                    handles.push(handle);
                }
            }

            for handle in handles {
                // Panics are caught inside the worker; join only fails if
                // something slipped past that, which we surface the same way.
                match handle.join() {
                    Ok(result) => results.push(result),
                    Err(_) => results.push(Err(Error::worker("worker thread died unexpectedly"))),
                }
            }
        });

        let mut stats = Vec::with_capacity(results.len());
        let mut failures = 0;
        for result in results {
            match result {
                Ok(worker_stats) => stats.push(worker_stats),
                Err(err) => {
                    failures += 1;
                    tracing::error!(error = %err, "worker failed");
                }
            }
        }

        if failures > 0 {
            return Err(Error::worker(format!(
                "{failures} worker(s) panicked; run aborted"
            )));
        }

        let aggregated = aggregate_worker_stats(&stats);
        tracing::info!(
            workers = aggregated.total_workers,
            iterations = aggregated.total_iterations,
            elapsed_secs = aggregated.total_duration.as_secs_f64(),
            "workload completed"
        );

        Ok(stats)
    }
}

impl Default for WorkloadRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkloadRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadRunner")
            .field("actors", &self.actors)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

/// Drive one worker thread through the full phase sequence.
///
/// The phase loop itself never catches a panic from the operation body; we
/// catch it here, abort the run so the other workers unwind off the barrier,
/// and report the worker as failed.
fn run_worker(
    worker: &str,
    phases: &PhaseLoop,
    operation: &(dyn Fn(PhaseNumber) + Send + Sync),
    orchestrator: &Orchestrator,
) -> Result<WorkerStats> {
    let mut stats = WorkerStats::new(worker);
    stats.start();
    tracing::debug!(worker, "worker started");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        for phase in phases {
            tracing::debug!(worker, phase = phase.number(), "entering phase");
            let mut iterations = phase.iterations();
            while iterations.next().is_some() {
                operation(phase.number());
            }
            stats.record_phase(phase.number(), iterations.completed());
        }
    }));

    stats.stop();

    match outcome {
        Ok(()) => {
            tracing::debug!(
                worker,
                iterations = stats.iterations(),
                elapsed_ms = stats.elapsed().map(|d| d.as_millis() as u64),
                "worker finished"
            );
            Ok(stats)
        }
        Err(payload) => {
            orchestrator.abort();
            let reason = panic_message(payload.as_ref());
            tracing::error!(worker, reason, "operation panicked, aborting run");
            Err(Error::worker(format!("{worker} panicked: {reason}")))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
