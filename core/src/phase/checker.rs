//! Per-(actor, phase) termination and pacing policy

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::PhaseConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, PhaseNumber};
use crate::rate_limit::{GlobalRateLimiter, RateLimiterRegistry};

/// Longest single sleep while polling a depleted shared rate limiter. Keeps a
/// very slow budget from parking a thread past the point where the phase
/// could end.
const MAX_RATE_RETRY_SLEEP: Duration = Duration::from_secs(1);

/// Decides whether one thread's inner loop keeps iterating within a phase,
/// and applies pacing at each iteration boundary.
///
/// Immutable once built. Validation happens here, before any worker thread
/// starts: negative bounds, fixed sleeps combined with a shared rate limiter
/// (two contradictory pacing strategies), and a rate limiter on a phase with
/// no blocking termination bound are all rejected as configuration errors.
pub struct IterationChecker {
    min_iterations: Option<u64>,
    min_duration: Option<Duration>,
    sleep_before: Duration,
    sleep_after: Duration,
    rate_limiter: Option<Arc<GlobalRateLimiter>>,
}

impl IterationChecker {
    /// Build the policy for one phase, resolving any named rate limiter
    /// through `limiters`.
    pub fn new(config: &PhaseConfig, limiters: &RateLimiterRegistry) -> Result<Self> {
        if config.nop {
            // A structural placeholder ignores every other field.
            return Ok(Self::nop());
        }

        if let Some(iterations) = config.min_iterations {
            if iterations < 0 {
                return Err(Error::config(format!(
                    "min_iterations must be non-negative, got {iterations}"
                )));
            }
        }
        for (field, value) in [
            ("min_duration", config.min_duration),
            ("sleep_before", config.sleep_before),
            ("sleep_after", config.sleep_after),
        ] {
            if let Some(spec) = value {
                if spec.is_negative() {
                    return Err(Error::config(format!(
                        "{field} must be non-negative, got {spec}"
                    )));
                }
            }
        }

        let has_bound = config.min_iterations.is_some() || config.min_duration.is_some();

        let rate_limiter = match &config.rate_limiter {
            None => None,
            Some(reference) => {
                if config.sleep_before.is_some() || config.sleep_after.is_some() {
                    return Err(Error::config(
                        "fixed sleeps cannot be combined with a shared rate limiter; \
                         pick one pacing strategy",
                    ));
                }
                if !has_bound {
                    return Err(Error::config(
                        "a shared rate limiter requires min_iterations or min_duration; \
                         an unbounded phase would poll it forever",
                    ));
                }
                let limiter = limiters.get_or_create(&reference.name, reference.rate)?;
                limiter.register_user();
                Some(limiter)
            }
        };

        Ok(IterationChecker {
            min_iterations: config.min_iterations.map(|n| n as u64),
            min_duration: config.min_duration.map(|spec| spec.duration()),
            sleep_before: config.sleep_before.map_or(Duration::ZERO, |s| s.duration()),
            sleep_after: config.sleep_after.map_or(Duration::ZERO, |s| s.duration()),
            rate_limiter,
        })
    }

    /// The policy of a structural no-op phase: blocking, zero iterations.
    pub fn nop() -> Self {
        IterationChecker {
            min_iterations: Some(0),
            min_duration: None,
            sleep_before: Duration::ZERO,
            sleep_after: Duration::ZERO,
            rate_limiter: None,
        }
    }

    /// Configured minimum iteration count, if any.
    pub fn min_iterations(&self) -> Option<u64> {
        self.min_iterations
    }

    /// Configured minimum duration, if any.
    pub fn min_duration(&self) -> Option<Duration> {
        self.min_duration
    }

    /// Whether this phase gates the barrier: true iff at least one
    /// termination bound is configured. A phase with neither is a deliberate
    /// background phase and must never be the reason the barrier waits.
    pub fn does_block_completion(&self) -> bool {
        self.min_iterations.is_some() || self.min_duration.is_some()
    }

    /// Whether the run-state needs to capture a start instant (only phases
    /// with a duration bound do).
    pub fn needs_start_time(&self) -> bool {
        self.min_duration.is_some()
    }

    /// Whether the phase's termination conditions are all met. Both
    /// configured bounds must hold, so a phase with both runs until whichever
    /// finishes last.
    pub fn is_done(&self, started_at: Option<Instant>, iterations: u64, now: Instant) -> bool {
        let iterations_met = self
            .min_iterations
            .map_or(true, |min| iterations >= min);
        let duration_met = self.min_duration.map_or(true, |min| match started_at {
            Some(started) => now.saturating_duration_since(started) >= min,
            None => false,
        });
        iterations_met && duration_met
    }

    /// Apply the configured pre-iteration sleep.
    pub(crate) fn sleep_before(&self, orchestrator: &Orchestrator, phase: PhaseNumber) {
        sleep_in_phase(self.sleep_before, orchestrator, phase);
    }

    /// Apply the configured post-iteration sleep.
    pub(crate) fn sleep_after(&self, orchestrator: &Orchestrator, phase: PhaseNumber) {
        sleep_in_phase(self.sleep_after, orchestrator, phase);
    }

    /// Block until the shared rate limiter grants a token, polling with
    /// jittered sleeps. The termination bound wins over the rate bound at the
    /// tail: once the phase could end anyway, the final iteration runs
    /// without a token rather than extending a time-boxed phase.
    pub(crate) fn limit_rate(
        &self,
        orchestrator: &Orchestrator,
        started_at: Option<Instant>,
        iterations: u64,
    ) {
        let Some(limiter) = &self.rate_limiter else {
            return;
        };

        loop {
            if limiter.consume_if_within_rate(Instant::now()) {
                return;
            }
            if self.is_done(started_at, iterations, Instant::now()) {
                return;
            }
            if !orchestrator.continue_running() {
                return;
            }
            thread::sleep(jittered(limiter.interval().min(MAX_RATE_RETRY_SLEEP)));
        }
    }

    /// Report a completed iteration to the shared rate limiter, if any.
    pub(crate) fn notify_iteration(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.notify_of_iteration();
        }
    }
}

impl std::fmt::Debug for IterationChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationChecker")
            .field("min_iterations", &self.min_iterations)
            .field("min_duration", &self.min_duration)
            .field("sleep_before", &self.sleep_before)
            .field("sleep_after", &self.sleep_after)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

/// Sleep unless the phase has already moved on; a stale sleep would bleed
/// into the next phase.
fn sleep_in_phase(duration: Duration, orchestrator: &Orchestrator, phase: PhaseNumber) {
    if !duration.is_zero() && orchestrator.current_phase() == phase {
        thread::sleep(duration);
    }
}

/// ±5% jitter spreads the wakeups of many threads polling one bucket.
fn jittered(base: Duration) -> Duration {
    base.mul_f64(rand::thread_rng().gen_range(0.95..=1.05))
}
