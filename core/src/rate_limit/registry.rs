//! Named registry of shared rate limiters
//!
//! The top-level run context owns one registry; actors look limiters up by
//! name, so two actors naming the same limiter deliberately share one bucket.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::RateSpec;
use crate::error::{Error, Result};

use super::GlobalRateLimiter;

/// Name-to-limiter map with get-or-create semantics.
///
/// Lookups happen while phase policies are being built, never on the
/// iteration hot path, so a mutex around the map is fine.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<GlobalRateLimiter>>>,
}

impl RateLimiterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the limiter registered under `name`, creating it with `rate` if
    /// absent.
    ///
    /// Re-registering a name with a different rate is a configuration error:
    /// two phases disagreeing about a shared budget is never intentional.
    pub fn get_or_create(&self, name: &str, rate: RateSpec) -> Result<Arc<GlobalRateLimiter>> {
        let mut limiters = self.limiters.lock();

        if let Some(existing) = limiters.get(name) {
            if existing.spec() != rate {
                return Err(Error::config(format!(
                    "rate limiter {:?} is already registered as {}, cannot re-register as {}",
                    name,
                    existing.spec(),
                    rate
                )));
            }
            return Ok(Arc::clone(existing));
        }

        let limiter = Arc::new(GlobalRateLimiter::new(rate)?);
        tracing::debug!(name, rate = %rate, "created shared rate limiter");
        limiters.insert(name.to_owned(), Arc::clone(&limiter));
        Ok(limiter)
    }

    /// Number of registered limiters.
    pub fn len(&self) -> usize {
        self.limiters.lock().len()
    }

    /// Whether the registry holds no limiters.
    pub fn is_empty(&self) -> bool {
        self.limiters.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeSpec;

    #[test]
    fn test_same_name_shares_one_bucket() {
        let registry = RateLimiterRegistry::new();
        let rate = RateSpec::new(1, TimeSpec::from_millis(1000));

        let first = registry.get_or_create("inserts", rate).unwrap();
        let second = registry.get_or_create("inserts", rate).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        // One shared budget: the second handle sees the first one's draw.
        assert!(first.consume_if_within_rate(std::time::Instant::now()));
        assert!(!second.consume_if_within_rate(std::time::Instant::now()));
    }

    #[test]
    fn test_distinct_names_are_independent() {
        let registry = RateLimiterRegistry::new();
        let rate = RateSpec::new(1, TimeSpec::from_millis(1000));

        let reads = registry.get_or_create("reads", rate).unwrap();
        let writes = registry.get_or_create("writes", rate).unwrap();
        assert!(!Arc::ptr_eq(&reads, &writes));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_conflicting_rate_is_rejected() {
        let registry = RateLimiterRegistry::new();
        registry
            .get_or_create("inserts", RateSpec::new(5, TimeSpec::from_millis(100)))
            .unwrap();

        let conflict =
            registry.get_or_create("inserts", RateSpec::new(6, TimeSpec::from_millis(100)));
        assert!(conflict.is_err());
    }

    #[test]
    fn test_invalid_rate_is_rejected() {
        let registry = RateLimiterRegistry::new();
        assert!(registry
            .get_or_create("bad", RateSpec::new(0, TimeSpec::from_millis(100)))
            .is_err());
        assert!(registry.is_empty());
    }
}
