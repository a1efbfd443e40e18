//! Callgate - call-rate control for callables
//!
//! This crate wraps a callable in a debounce (leading or trailing edge) or
//! throttle policy. Each wrapper owns its window state and drives deferred
//! runs with tokio timers.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{CallgateError, Result};
pub use ratelimit::{
    debounce, debounce_end, debounce_start, throttle, Policy, RateLimiter, RateLimiterBuilder,
    DEFAULT_DELAY,
};
