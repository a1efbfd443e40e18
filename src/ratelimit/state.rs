//! Window state machine shared by all policies.
//!
//! `WindowState` knows nothing about clocks or tasks. Each transition
//! returns what the driver has to do next, which keeps the policy rules
//! testable without a runtime.

use super::policy::Policy;

/// What the driver must do after a call was recorded.
#[derive(Debug, PartialEq, Eq)]
pub struct CallAction<A> {
    /// Arguments to run the callable with right now.
    pub run_now: Option<A>,
    /// Epoch of a new timer to arm. Any previous timer is superseded.
    pub arm: Option<u64>,
}

impl<A> CallAction<A> {
    fn dropped() -> Self {
        Self {
            run_now: None,
            arm: None,
        }
    }
}

/// Outcome of a timer firing.
#[derive(Debug, PartialEq, Eq)]
pub enum FireAction<A> {
    /// The timer was superseded or cancelled; nothing changes.
    Stale,
    /// The window closed without a deferred run.
    Closed,
    /// The window closed and the callable runs with these arguments.
    Run(A),
}

/// Per-instance state: pending timer, leading gate and deferred arguments.
#[derive(Debug)]
pub struct WindowState<A> {
    policy: Policy,
    /// Leading gate; open means the next call may run immediately.
    gate_open: bool,
    /// Epoch of the live timer, if any.
    pending: Option<u64>,
    /// Arguments for the deferred run.
    deferred: Option<A>,
    /// Last epoch handed out.
    epoch: u64,
}

impl<A> WindowState<A> {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            gate_open: true,
            pending: None,
            deferred: None,
            epoch: 0,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Whether a timer is live, i.e. a window is open.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether a leading call would run immediately.
    pub fn gate_open(&self) -> bool {
        self.gate_open
    }

    /// Record a call and decide what to do with it.
    pub fn on_call(&mut self, args: A) -> CallAction<A> {
        match self.policy {
            Policy::Trailing => {
                self.deferred = Some(args);
                CallAction {
                    run_now: None,
                    arm: Some(self.next_epoch()),
                }
            }
            Policy::Leading => {
                let run_now = if self.gate_open {
                    self.gate_open = false;
                    Some(args)
                } else {
                    None
                };
                CallAction {
                    run_now,
                    arm: Some(self.next_epoch()),
                }
            }
            Policy::Throttle => {
                if self.pending.is_some() {
                    return CallAction::dropped();
                }
                self.deferred = Some(args);
                CallAction {
                    run_now: None,
                    arm: Some(self.next_epoch()),
                }
            }
        }
    }

    /// Handle the timer with `epoch` firing.
    pub fn on_fire(&mut self, epoch: u64) -> FireAction<A> {
        if self.pending != Some(epoch) {
            return FireAction::Stale;
        }
        self.pending = None;

        match self.policy {
            Policy::Leading => {
                self.gate_open = true;
                FireAction::Closed
            }
            Policy::Trailing | Policy::Throttle => match self.deferred.take() {
                Some(args) => FireAction::Run(args),
                None => FireAction::Closed,
            },
        }
    }

    /// Forget the live timer and deferred arguments, and reopen the gate.
    ///
    /// Returns `true` if a window was open.
    pub fn cancel(&mut self) -> bool {
        self.deferred = None;
        self.gate_open = true;
        self.pending.take().is_some()
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.pending = Some(self.epoch);
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_keeps_latest_args() {
        let mut state = WindowState::new(Policy::Trailing);

        let first = state.on_call("a");
        assert_eq!(first.run_now, None);
        let first_epoch = first.arm.unwrap();

        state.on_call("b");
        let last_epoch = state.on_call("c").arm.unwrap();

        // The superseded timer does nothing
        assert_eq!(state.on_fire(first_epoch), FireAction::Stale);
        assert!(state.is_pending());

        assert_eq!(state.on_fire(last_epoch), FireAction::Run("c"));
        assert!(!state.is_pending());
    }

    #[test]
    fn test_leading_runs_first_call_only() {
        let mut state = WindowState::new(Policy::Leading);
        assert!(state.gate_open());

        let first = state.on_call(1);
        assert_eq!(first.run_now, Some(1));
        assert!(!state.gate_open());

        let second = state.on_call(2);
        assert_eq!(second.run_now, None);
        // Every call restarts the cool-down
        assert!(second.arm.unwrap() > first.arm.unwrap());

        assert_eq!(state.on_fire(first.arm.unwrap()), FireAction::Stale);
        assert!(!state.gate_open());

        assert_eq!(state.on_fire(second.arm.unwrap()), FireAction::Closed);
        assert!(state.gate_open());
        assert_eq!(state.on_call(3).run_now, Some(3));
    }

    #[test]
    fn test_throttle_keeps_opening_args() {
        let mut state = WindowState::new(Policy::Throttle);

        let opening = state.on_call("t0");
        let epoch = opening.arm.unwrap();

        // Mid-window calls are dropped without re-arming
        assert_eq!(state.on_call("t30"), CallAction { run_now: None, arm: None });
        assert_eq!(state.on_call("t60"), CallAction { run_now: None, arm: None });

        assert_eq!(state.on_fire(epoch), FireAction::Run("t0"));

        let next = state.on_call("t150");
        assert_eq!(state.on_fire(next.arm.unwrap()), FireAction::Run("t150"));
    }

    #[test]
    fn test_fire_twice_is_stale() {
        let mut state = WindowState::new(Policy::Throttle);
        let epoch = state.on_call(()).arm.unwrap();

        assert_eq!(state.on_fire(epoch), FireAction::Run(()));
        assert_eq!(state.on_fire(epoch), FireAction::Stale);
    }

    #[test]
    fn test_cancel_resets_window() {
        let mut state = WindowState::new(Policy::Leading);
        let epoch = state.on_call(()).arm.unwrap();

        assert!(state.cancel());
        assert!(state.gate_open());
        assert!(!state.is_pending());
        assert_eq!(state.on_fire(epoch), FireAction::Stale);

        // Nothing left to cancel
        assert!(!state.cancel());
    }

    #[test]
    fn test_cancel_discards_deferred_args() {
        let mut state = WindowState::new(Policy::Trailing);
        state.on_call("dropped");
        state.cancel();

        let epoch = state.on_call("kept").arm.unwrap();
        assert_eq!(state.on_fire(epoch), FireAction::Run("kept"));
    }
}
