//! Per-call-site pacing with plain timed sleeps

use std::thread;
use std::time::{Duration, Instant};

/// Timing applied by a [`SimpleRateLimiter`] around each `run()` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacingOptions {
    /// Floor between the starts of successive `run()` invocations.
    pub min_period: Duration,

    /// Fixed sleep before the body.
    pub pre_sleep: Duration,

    /// Fixed sleep after the body.
    pub post_sleep: Duration,
}

/// Paces a single call site with no cross-thread coordination.
///
/// For every call to [`run`](SimpleRateLimiter::run): sleep `pre_sleep`,
/// invoke the body, sleep `post_sleep`, and finally pad out to `min_period`
/// measured from the start of the invocation. The implementation is plain
/// sleeps; callers wanting an aggregate bound across threads should use
/// [`GlobalRateLimiter`](super::GlobalRateLimiter) instead.
#[derive(Debug, Clone, Default)]
pub struct SimpleRateLimiter {
    options: PacingOptions,
}

impl SimpleRateLimiter {
    /// Create a limiter with the given pacing options.
    pub fn new(options: PacingOptions) -> Self {
        SimpleRateLimiter { options }
    }

    /// The configured pacing options.
    pub fn options(&self) -> &PacingOptions {
        &self.options
    }

    /// Run `body` with the configured pacing and return its result.
    pub fn run<T>(&self, body: impl FnOnce() -> T) -> T {
        let started = Instant::now();

        maybe_sleep(self.options.pre_sleep);
        let out = body();
        maybe_sleep(self.options.post_sleep);

        let elapsed = started.elapsed();
        if elapsed < self.options.min_period {
            thread::sleep(self.options.min_period - elapsed);
        }

        out
    }
}

fn maybe_sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
