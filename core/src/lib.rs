//! treadmill-core: phase coordination for multi-actor workload generation
//!
//! This crate is the coordination core of treadmill, a synthetic load
//! generator that drives workloads against a target system in an ordered
//! sequence of numbered phases. It provides:
//!
//! - The phase barrier ([`Orchestrator`]) every worker thread agrees through
//! - The per-actor iteration surface ([`PhaseLoop`]) and its per-phase
//!   termination/pacing policy ([`IterationChecker`])
//! - Rate limiting, both per call site ([`SimpleRateLimiter`]) and shared
//!   across threads ([`GlobalRateLimiter`])
//! - A thread-per-worker driver ([`WorkloadRunner`]) that wires the above
//!
//! The domain operations actors perform, workload-file parsing, and metrics
//! recording live outside this crate; the core only creates the coordination
//! windows they run in.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod rate_limit;
pub mod runner;

pub use config::{PhaseConfig, RateLimiterRef, RateSpec, TimeSpec};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, PhaseNumber};
pub use phase::{ActorPhase, ActorPhaseIter, IterationChecker, PhaseLoop, PhaseLoopIter, PhaseRef};
pub use rate_limit::{GlobalRateLimiter, PacingOptions, RateLimiterRegistry, SimpleRateLimiter};
pub use runner::{aggregate_worker_stats, ActorSpec, AggregatedStats, WorkerStats, WorkloadRunner};

#[cfg(test)]
mod integration_tests {
    use super::*;

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    // =========================================================================
    // Whole-stack runs through the public surface
    // =========================================================================

    #[test]
    fn test_mixed_workload_end_to_end() {
        let inserts = Arc::new(AtomicU64::new(0));
        let scans = Arc::new(AtomicU64::new(0));

        let mut runner = WorkloadRunner::new();

        // A loader that fills in phase 0 and idles (nop) during phase 1.
        let insert_counter = Arc::clone(&inserts);
        runner.add_actor(ActorSpec::new(
            "loader",
            2,
            [(0, PhaseConfig::repeat(25)), (1, PhaseConfig::nop())],
            move |_| {
                insert_counter.fetch_add(1, Ordering::Relaxed);
            },
        ));

        // A scanner that runs in the background during the load and then
        // gets a time-boxed phase of its own.
        let scan_counter = Arc::clone(&scans);
        runner.add_actor(ActorSpec::new(
            "scanner",
            1,
            [
                (0, PhaseConfig::background()),
                (1, PhaseConfig::duration_millis(20)),
            ],
            move |_| {
                scan_counter.fetch_add(1, Ordering::Relaxed);
            },
        ));

        let stats = runner.run().expect("run failed");

        assert_eq!(stats.len(), 3);
        assert_eq!(inserts.load(Ordering::Relaxed), 50);
        assert!(scans.load(Ordering::Relaxed) > 0);

        let aggregated = aggregate_worker_stats(&stats);
        assert_eq!(aggregated.per_phase[&0], 50 + stats[2].per_phase[&0]);
    }

    #[test]
    fn test_simple_rate_limiter_composes_with_phase_loop() {
        // A per-call-site pacer used inside the operation body, independent
        // of the phase machinery.
        let limiter = SimpleRateLimiter::new(PacingOptions {
            min_period: Duration::from_millis(10),
            ..Default::default()
        });

        let orchestrator = Arc::new(Orchestrator::new());
        orchestrator.add_required_tokens(1);
        let phases = PhaseLoop::new(
            Arc::clone(&orchestrator),
            [(0, PhaseConfig::repeat(3))],
            &RateLimiterRegistry::new(),
        )
        .unwrap();

        let started = Instant::now();
        let mut bodies = 0;
        for phase in &phases {
            for _ in phase.iterations() {
                limiter.run(|| bodies += 1);
            }
        }

        assert_eq!(bodies, 3);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
