//! Rate limiting for worker iterations
//!
//! Two deliberately different abstractions live here:
//!
//! - [`SimpleRateLimiter`] paces a single call site: fixed sleeps around a
//!   body plus a minimum period between successive invocations. No
//!   cross-thread coordination.
//! - [`GlobalRateLimiter`] bounds the *aggregate* rate of every worker thread
//!   sharing it, via a lock-free token bucket. Use it to limit load from the
//!   perspective of the system under test, regardless of thread count.
//!
//! If you are unsure which one you need, it is usually the global one.
//! Shared limiters are looked up by name through [`RateLimiterRegistry`] so
//! several actors can deliberately draw from a single budget.

mod global;
mod registry;
mod simple;

pub use global::GlobalRateLimiter;
pub use registry::RateLimiterRegistry;
pub use simple::{PacingOptions, SimpleRateLimiter};
