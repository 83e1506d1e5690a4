//! Shared aggregate-rate budget across worker threads

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::RateSpec;
use crate::error::Result;

/// Token-bucket limiter bounding the combined rate of every thread sharing it.
///
/// The bucket starts full at its burst capacity (the `operations` count of the
/// [`RateSpec`]) and refills continuously at one token per
/// [`interval`](GlobalRateLimiter::interval). The whole bucket lives in a
/// single atomic: the nanosecond timestamp at which the bucket would run
/// empty. Refill-then-consume is one compare-and-swap, so two threads can
/// never double-spend the same refill, and the hot path takes no lock.
///
/// [`consume_if_within_rate`](GlobalRateLimiter::consume_if_within_rate) never
/// blocks; callers are responsible for backing off when it returns `false`.
pub struct GlobalRateLimiter {
    spec: RateSpec,
    origin: Instant,
    interval_ns: i64,
    burst: i64,

    // Nanoseconds relative to `origin` at which the bucket runs empty, given
    // continuous refill. Tokens available at time t = (t - empty_at) / interval,
    // clamped to [0, burst]. Negative while credit from the initial fill remains.
    empty_at_ns: AtomicI64,

    iterations: AtomicU64,
    users: AtomicU64,
}

impl GlobalRateLimiter {
    /// Create a limiter from a validated rate spec. The bucket starts full.
    pub fn new(spec: RateSpec) -> Result<Self> {
        spec.validate()?;
        let interval_ns = spec.interval().as_nanos().min(i64::MAX as u128) as i64;
        let burst = spec.operations.min(i64::MAX as u64) as i64;

        Ok(GlobalRateLimiter {
            spec,
            origin: Instant::now(),
            interval_ns,
            burst,
            empty_at_ns: AtomicI64::new(-(burst.saturating_mul(interval_ns))),
            iterations: AtomicU64::new(0),
            users: AtomicU64::new(0),
        })
    }

    /// The rate spec this limiter was built from.
    pub fn spec(&self) -> RateSpec {
        self.spec
    }

    /// The interval one token takes to replenish. Callers polling an empty
    /// bucket size their retry sleeps from this.
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns as u64)
    }

    /// Try to remove one token from the bucket at time `now`.
    ///
    /// Returns `false` without blocking if the bucket is empty; the caller
    /// picks an appropriate back-off strategy.
    pub fn consume_if_within_rate(&self, now: Instant) -> bool {
        self.consume_at(self.nanos_since_origin(now))
    }

    /// Bookkeeping hook: one inner-loop iteration completed, whether or not a
    /// token gated it.
    pub fn notify_of_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of iterations reported via
    /// [`notify_of_iteration`](GlobalRateLimiter::notify_of_iteration).
    pub fn observed_iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Record one more thread drawing from this bucket.
    pub fn register_user(&self) {
        self.users.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of registered users. Bookkeeping only; token math is
    /// independent of it.
    pub fn users(&self) -> u64 {
        self.users.load(Ordering::Relaxed)
    }

    fn nanos_since_origin(&self, now: Instant) -> i64 {
        now.saturating_duration_since(self.origin)
            .as_nanos()
            .min(i64::MAX as u128) as i64
    }

    // Token math against an explicit timestamp so tests need no fake clock.
    fn consume_at(&self, now_ns: i64) -> bool {
        // Credit older than one full bucket is forfeited: the stored empty
        // point never trails `now` by more than burst * interval.
        let floor = now_ns.saturating_sub(self.burst.saturating_mul(self.interval_ns));

        let mut observed = self.empty_at_ns.load(Ordering::Relaxed);
        loop {
            let empty_at = observed.max(floor);
            if now_ns - empty_at < self.interval_ns {
                // Not a full token in the bucket.
                return false;
            }
            match self.empty_at_ns.compare_exchange_weak(
                observed,
                empty_at + self.interval_ns,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => observed = actual,
            }
        }
    }
}

impl fmt::Debug for GlobalRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalRateLimiter")
            .field("spec", &self.spec)
            .field("interval", &self.interval())
            .field("users", &self.users())
            .field("observed_iterations", &self.observed_iterations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeSpec;

    use std::thread;

    fn limiter(operations: u64, per_millis: i64) -> GlobalRateLimiter {
        GlobalRateLimiter::new(RateSpec::new(operations, TimeSpec::from_millis(per_millis)))
            .unwrap()
    }

    #[test]
    fn test_rejects_invalid_spec() {
        assert!(GlobalRateLimiter::new(RateSpec::new(0, TimeSpec::from_millis(10))).is_err());
        assert!(GlobalRateLimiter::new(RateSpec::new(5, TimeSpec::from_millis(-1))).is_err());
    }

    #[test]
    fn test_interval_derivation() {
        assert_eq!(limiter(2, 3).interval(), Duration::from_nanos(1_500_000));
        assert_eq!(limiter(500, 1000).interval(), Duration::from_millis(2));
    }

    #[test]
    fn test_burst_then_starve_then_refill() {
        let grl = limiter(2, 3); // 2 ops per 3ms: interval 1.5ms, burst 2.
        let interval = grl.interval().as_nanos() as i64;

        // The full burst is available immediately.
        assert!(grl.consume_at(0));
        assert!(grl.consume_at(0));
        // The bucket is now empty until one interval has elapsed.
        assert!(!grl.consume_at(0));
        assert!(!grl.consume_at(interval - 1));
        assert!(grl.consume_at(interval));
        assert!(!grl.consume_at(interval));

        // A full window later, the whole burst is available again.
        let later = interval * 3;
        assert!(grl.consume_at(later));
        assert!(grl.consume_at(later));
        assert!(!grl.consume_at(later));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let grl = limiter(3, 30);
        let interval = grl.interval().as_nanos() as i64;

        // Idle for many windows: still only `burst` tokens accumulated.
        let much_later = interval * 100;
        assert!(grl.consume_at(much_later));
        assert!(grl.consume_at(much_later));
        assert!(grl.consume_at(much_later));
        assert!(!grl.consume_at(much_later));
    }

    #[test]
    fn test_concurrent_consumers_never_oversubscribe() {
        let grl = limiter(8, 80);

        let granted: u64 = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| (0..10).filter(|_| grl.consume_at(0)).count() as u64)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        // 40 attempts at t=0 against a burst of 8: exactly 8 may win.
        assert_eq!(granted, 8);
    }

    #[test]
    fn test_wall_clock_consumption() {
        let grl = limiter(1, 40);

        assert!(grl.consume_if_within_rate(Instant::now()));
        assert!(!grl.consume_if_within_rate(Instant::now()));

        thread::sleep(Duration::from_millis(50));
        assert!(grl.consume_if_within_rate(Instant::now()));
    }

    #[test]
    fn test_iteration_and_user_bookkeeping() {
        let grl = limiter(1, 10);
        assert_eq!(grl.observed_iterations(), 0);
        assert_eq!(grl.users(), 0);

        grl.notify_of_iteration();
        grl.notify_of_iteration();
        grl.register_user();

        assert_eq!(grl.observed_iterations(), 2);
        assert_eq!(grl.users(), 1);
    }

    #[test]
    fn test_debug_format() {
        let grl = limiter(7, 20);
        let debug = format!("{grl:?}");
        assert!(debug.contains("GlobalRateLimiter"));
        assert!(debug.contains("7"));
    }
}
