//! Call-rate control: debounce and throttle over one window state machine.

mod limiter;
mod policy;
mod state;

pub use limiter::{
    debounce, debounce_end, debounce_start, throttle, RateLimiter, RateLimiterBuilder,
    DEFAULT_DELAY,
};
pub use policy::Policy;
pub use state::{CallAction, FireAction, WindowState};
