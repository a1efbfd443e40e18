//! Call-rate policies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CallgateError;

/// How repeated calls inside a window collapse into executed calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Run once, `delay` after the last call of a burst, with its arguments.
    #[default]
    Trailing,
    /// Run the first call of a burst immediately, drop the rest.
    Leading,
    /// Run at most once per window, at its end, with the opening call's arguments.
    Throttle,
}

impl Policy {
    /// Map the `immediate` flag of `debounce` to a policy.
    pub fn from_immediate(immediate: bool) -> Self {
        if immediate {
            Policy::Leading
        } else {
            Policy::Trailing
        }
    }

    /// Whether a call can leave a run behind for the timer to perform.
    pub fn defers_run(&self) -> bool {
        match self {
            Policy::Trailing | Policy::Throttle => true,
            Policy::Leading => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Trailing => "trailing",
            Policy::Leading => "leading",
            Policy::Throttle => "throttle",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = CallgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trailing" => Ok(Policy::Trailing),
            "leading" => Ok(Policy::Leading),
            "throttle" => Ok(Policy::Throttle),
            other => Err(CallgateError::InvalidConfig(format!(
                "unknown policy '{}', expected trailing, leading or throttle",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_immediate() {
        assert_eq!(Policy::from_immediate(true), Policy::Leading);
        assert_eq!(Policy::from_immediate(false), Policy::Trailing);
    }

    #[test]
    fn test_only_leading_runs_nothing_deferred() {
        assert!(Policy::Trailing.defers_run());
        assert!(Policy::Throttle.defers_run());
        assert!(!Policy::Leading.defers_run());
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("throttle".parse::<Policy>().unwrap(), Policy::Throttle);
        assert_eq!("Leading".parse::<Policy>().unwrap(), Policy::Leading);
        assert!("sometimes".parse::<Policy>().is_err());
    }

    #[test]
    fn test_policy_serde_lowercase() {
        let policy: Policy = serde_yaml::from_str("leading").unwrap();
        assert_eq!(policy, Policy::Leading);
        assert_eq!(Policy::Throttle.to_string(), "throttle");
    }
}
