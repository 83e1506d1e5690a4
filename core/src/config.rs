//! Per-(actor, phase) configuration records
//!
//! These are the boundary objects a configuration layer hands to the
//! coordination core: how often a phase repeats, how long it runs, how it is
//! paced, and whether it shares an aggregate rate budget with other actors.
//! Parsing workload files and inheritance rules live outside this crate.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A duration expressed in whole milliseconds.
///
/// Signed so that a negative value coming from configuration survives
/// deserialization and is rejected during validation instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSpec(pub i64);

impl TimeSpec {
    /// Zero milliseconds.
    pub const ZERO: TimeSpec = TimeSpec(0);

    /// Create a spec from whole milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        TimeSpec(millis)
    }

    /// Raw millisecond count, sign preserved.
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Whether the configured value is negative (invalid).
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Convert to a [`Duration`]. Callers validate sign first; a negative
    /// value clamps to zero here rather than panicking.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.0.max(0) as u64)
    }
}

impl From<Duration> for TimeSpec {
    fn from(d: Duration) -> Self {
        TimeSpec(d.as_millis().min(i64::MAX as u128) as i64)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} milliseconds", self.0)
    }
}

/// An aggregate rate budget: `operations` tokens per `per` window.
///
/// `operations` doubles as the bucket's burst capacity, so "500 per 1 second"
/// allows 500 back-to-back operations before the per-token interval (2ms)
/// starts gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSpec {
    /// Number of operations allowed per window. Also the burst capacity.
    pub operations: u64,

    /// Length of the window.
    pub per: TimeSpec,
}

impl RateSpec {
    /// Create a rate spec of `operations` per `per` window.
    pub fn new(operations: u64, per: TimeSpec) -> Self {
        RateSpec { operations, per }
    }

    /// Shorthand for `operations` per second.
    pub fn per_second(operations: u64) -> Self {
        RateSpec::new(operations, TimeSpec::from_millis(1000))
    }

    /// The interval one token takes to replenish. At least one nanosecond so
    /// extreme rates still make forward progress in token math.
    pub fn interval(&self) -> Duration {
        let window_ns = (self.per.as_millis().max(0) as u64).saturating_mul(1_000_000);
        Duration::from_nanos((window_ns / self.operations.max(1)).max(1))
    }

    /// Check the spec is usable: a positive window and at least one operation.
    pub fn validate(&self) -> Result<()> {
        if self.operations == 0 {
            return Err(Error::config("rate spec needs at least one operation per window"));
        }
        if self.per.as_millis() <= 0 {
            return Err(Error::config(format!(
                "rate spec needs a positive window, got {}",
                self.per
            )));
        }
        Ok(())
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {}", self.operations, self.per)
    }
}

impl FromStr for RateSpec {
    type Err = Error;

    /// Parse the conventional `"<N> per <D> <unit>"` form carried by workload
    /// files, e.g. `"7 per 20 milliseconds"` or `"500 per 1 second"`.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::config(format!("cannot parse rate spec from {s:?}"));

        let (ops, window) = s.split_once(" per ").ok_or_else(bad)?;
        let operations: u64 = ops.trim().parse().map_err(|_| bad())?;

        let mut parts = window.split_whitespace();
        let count: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let unit = parts.next().ok_or_else(bad)?;
        if parts.next().is_some() {
            return Err(bad());
        }

        let millis = match unit {
            "millisecond" | "milliseconds" | "ms" => count,
            "second" | "seconds" | "s" => count.saturating_mul(1000),
            "minute" | "minutes" | "min" => count.saturating_mul(60_000),
            _ => return Err(bad()),
        };

        let spec = RateSpec::new(operations, TimeSpec::from_millis(millis));
        spec.validate()?;
        Ok(spec)
    }
}

/// Reference to a shared rate budget.
///
/// Phases naming the same limiter draw from one bucket, bounding their
/// combined rate regardless of how many actors or threads are involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterRef {
    /// Registry key. Phases with the same name share one bucket.
    pub name: String,

    /// Rate budget of the shared bucket.
    pub rate: RateSpec,
}

impl RateLimiterRef {
    /// Reference the named limiter with the given rate.
    pub fn new(name: impl Into<String>, rate: RateSpec) -> Self {
        RateLimiterRef {
            name: name.into(),
            rate,
        }
    }

    /// Reference the default shared limiter.
    pub fn unnamed(rate: RateSpec) -> Self {
        RateLimiterRef::new("default", rate)
    }
}

/// Configuration for one (actor, phase) pair.
///
/// All fields are optional; a record with none set describes an unbounded
/// background phase that runs until some other participant advances the
/// shared phase number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Structural placeholder: the phase performs zero iterations and every
    /// other field is ignored.
    #[serde(default)]
    pub nop: bool,

    /// Minimum number of iterations the inner loop must run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_iterations: Option<i64>,

    /// Minimum wall-clock time the inner loop must run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<TimeSpec>,

    /// Fixed sleep before each iteration. Mutually exclusive with
    /// `rate_limiter`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_before: Option<TimeSpec>,

    /// Fixed sleep after each iteration. Mutually exclusive with
    /// `rate_limiter`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_after: Option<TimeSpec>,

    /// Shared aggregate-rate budget for this phase. Requires at least one of
    /// `min_iterations` / `min_duration`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limiter: Option<RateLimiterRef>,
}

impl PhaseConfig {
    /// A phase repeating exactly `iterations` times.
    pub fn repeat(iterations: i64) -> Self {
        PhaseConfig {
            min_iterations: Some(iterations),
            ..Default::default()
        }
    }

    /// A phase running for at least `millis` milliseconds.
    pub fn duration_millis(millis: i64) -> Self {
        PhaseConfig {
            min_duration: Some(TimeSpec::from_millis(millis)),
            ..Default::default()
        }
    }

    /// A structural no-op phase.
    pub fn nop() -> Self {
        PhaseConfig {
            nop: true,
            ..Default::default()
        }
    }

    /// An unbounded background phase: iterates until the phase number moves.
    pub fn background() -> Self {
        PhaseConfig::default()
    }

    /// Set the minimum duration.
    pub fn with_min_duration(mut self, spec: TimeSpec) -> Self {
        self.min_duration = Some(spec);
        self
    }

    /// Set the fixed sleep before each iteration.
    pub fn with_sleep_before(mut self, spec: TimeSpec) -> Self {
        self.sleep_before = Some(spec);
        self
    }

    /// Set the fixed sleep after each iteration.
    pub fn with_sleep_after(mut self, spec: TimeSpec) -> Self {
        self.sleep_after = Some(spec);
        self
    }

    /// Attach a shared rate limiter.
    pub fn with_rate_limiter(mut self, limiter: RateLimiterRef) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}
