//! Rate limiter driving a `WindowState` with tokio timers.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use super::policy::Policy;
use super::state::{FireAction, WindowState};
use crate::config::LimiterConfig;
use crate::error::{CallgateError, Result};

/// Window length used when none is given.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(2000);

static NEXT_LIMITER_ID: AtomicU64 = AtomicU64::new(1);

type Callable<A> = Arc<dyn Fn(A) + Send + Sync>;

/// Wraps a callable so that repeated calls collapse according to a [`Policy`].
///
/// Calls never block: the callable either runs right away (leading edge),
/// runs later from a timer task (trailing edge, throttle) or is dropped.
/// Cloning yields another handle to the same limiter. Dropping the last
/// handle cancels any pending run.
pub struct RateLimiter<A> {
    inner: Arc<Inner<A>>,
}

struct Inner<A> {
    name: String,
    delay: Duration,
    callable: Callable<A>,
    runtime: Handle,
    shared: Mutex<Shared<A>>,
}

struct Shared<A> {
    window: WindowState<A>,
    /// Task sleeping until the window ends
    timer: Option<JoinHandle<()>>,
}

impl<A: Send + 'static> RateLimiter<A> {
    /// Create a rate limiter on the current tokio runtime.
    pub fn new<F>(callable: F, delay: Duration, policy: Policy) -> Result<Self>
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::builder()
            .callable(callable)
            .delay(delay)
            .policy(policy)
            .build()
    }

    /// Start building a rate limiter.
    pub fn builder() -> RateLimiterBuilder<A> {
        RateLimiterBuilder::new()
    }

    /// Create a rate limiter from configuration.
    pub fn from_config<F>(config: &LimiterConfig, callable: F) -> Result<Self>
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        let mut builder = Self::builder()
            .callable(callable)
            .delay(config.delay()?)
            .policy(config.policy);
        if let Some(ref name) = config.name {
            builder = builder.name(name.clone());
        }
        builder.build()
    }

    /// Request a call with `args`.
    ///
    /// A leading-edge run happens on the caller's stack, after the window
    /// state was updated, so a panicking callable leaves the limiter usable.
    pub fn call(&self, args: A) {
        let run_now = {
            let mut shared = self.inner.shared.lock();
            let action = shared.window.on_call(args);

            match action.arm {
                Some(epoch) => {
                    if let Some(previous) = shared.timer.take() {
                        previous.abort();
                    }
                    shared.timer = Some(self.spawn_timer(epoch));
                    trace!(
                        limiter = %self.inner.name,
                        epoch = epoch,
                        run_now = action.run_now.is_some(),
                        "Window armed"
                    );
                }
                None => {
                    trace!(limiter = %self.inner.name, "Call dropped inside open window");
                }
            }

            action.run_now
        };

        if let Some(args) = run_now {
            debug!(limiter = %self.inner.name, "Running leading-edge call");
            (self.inner.callable)(args);
        }
    }

    /// Discard the pending run, if any, and reopen the leading gate.
    pub fn cancel(&self) {
        let mut shared = self.inner.shared.lock();
        let was_pending = shared.window.cancel();
        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        if was_pending {
            debug!(limiter = %self.inner.name, "Pending window cancelled");
        }
    }

    /// Whether a window is currently open.
    pub fn is_pending(&self) -> bool {
        self.inner.shared.lock().window.is_pending()
    }

    pub fn policy(&self) -> Policy {
        self.inner.shared.lock().window.policy()
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn spawn_timer(&self, epoch: u64) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let delay = self.inner.delay;

        self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire(inner, epoch);
        })
    }
}

fn fire<A>(inner: Weak<Inner<A>>, epoch: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let action = {
        let mut shared = inner.shared.lock();
        let action = shared.window.on_fire(epoch);
        if !matches!(action, FireAction::Stale) {
            // This task is the one being cleared
            shared.timer = None;
        }
        action
    };

    match action {
        FireAction::Stale => {
            trace!(limiter = %inner.name, epoch = epoch, "Stale timer ignored");
        }
        FireAction::Closed => {
            debug!(limiter = %inner.name, "Window closed");
        }
        FireAction::Run(args) => {
            debug!(limiter = %inner.name, "Running deferred call");
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (inner.callable)(args))) {
                error!(limiter = %inner.name, "Deferred call panicked");
                panic::resume_unwind(payload);
            }
        }
    }
}

impl<A> Clone for RateLimiter<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A> fmt::Debug for RateLimiter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("RateLimiter")
            .field("name", &self.inner.name)
            .field("policy", &shared.window.policy())
            .field("delay", &self.inner.delay)
            .field("pending", &shared.window.is_pending())
            .finish()
    }
}

impl<A> Drop for Inner<A> {
    fn drop(&mut self) {
        if let Some(timer) = self.shared.get_mut().timer.take() {
            timer.abort();
        }
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder<A> {
    callable: Option<Callable<A>>,
    delay: Duration,
    policy: Policy,
    name: Option<String>,
    runtime: Option<Handle>,
}

impl<A: Send + 'static> RateLimiterBuilder<A> {
    fn new() -> Self {
        Self {
            callable: None,
            delay: DEFAULT_DELAY,
            policy: Policy::default(),
            name: None,
            runtime: None,
        }
    }

    /// The function to rate-limit. Bind any receiver inside the closure.
    pub fn callable<F>(mut self, callable: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        self.callable = Some(Arc::new(callable));
        self
    }

    /// Window length. Defaults to [`DEFAULT_DELAY`].
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Defaults to [`Policy::Trailing`].
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Name used in log output.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Runtime that hosts the timer tasks. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<RateLimiter<A>> {
        let callable = self.callable.ok_or(CallgateError::MissingCallable)?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| CallgateError::NoRuntime)?,
        };

        let id = NEXT_LIMITER_ID.fetch_add(1, Ordering::Relaxed);
        let name = self
            .name
            .unwrap_or_else(|| format!("{}-{}", self.policy, id));

        debug!(
            limiter = %name,
            policy = %self.policy,
            delay_ms = self.delay.as_millis() as u64,
            "Creating rate limiter"
        );

        Ok(RateLimiter {
            inner: Arc::new(Inner {
                name,
                delay: self.delay,
                callable,
                runtime,
                shared: Mutex::new(Shared {
                    window: WindowState::new(self.policy),
                    timer: None,
                }),
            }),
        })
    }
}

/// Debounce `callable`: leading edge if `immediate`, trailing edge otherwise.
pub fn debounce<A, F>(callable: F, delay: Duration, immediate: bool) -> Result<RateLimiter<A>>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    RateLimiter::new(callable, delay, Policy::from_immediate(immediate))
}

/// Leading-edge debounce: run the first call of a burst, drop the rest.
pub fn debounce_start<A, F>(callable: F, delay: Duration) -> Result<RateLimiter<A>>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    debounce(callable, delay, true)
}

/// Trailing-edge debounce: run once after the burst settles, with the last arguments.
pub fn debounce_end<A, F>(callable: F, delay: Duration) -> Result<RateLimiter<A>>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    debounce(callable, delay, false)
}

/// Throttle: at most one run per window, at its end, with the opening call's arguments.
pub fn throttle<A, F>(callable: F, delay: Duration) -> Result<RateLimiter<A>>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    RateLimiter::new(callable, delay, Policy::Throttle)
}
