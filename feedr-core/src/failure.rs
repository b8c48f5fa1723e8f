use serde::{Deserialize, Serialize};

use crate::error::Error;

/// What a virtual user does after a step fails.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abandon the iteration and start the next one.
    #[strum(to_string = "continue")]
    Continue,

    /// Stop this virtual user; the others keep running.
    #[default]
    #[strum(to_string = "stop-user")]
    StopUser,

    /// Start the scenario over from its first iteration with a fresh value cache.
    #[strum(to_string = "restart-scenario")]
    RestartScenario,

    /// Ask the controller to stop every worker.
    #[strum(to_string = "abort-run")]
    AbortRun,
}

impl FailurePolicy {
    /// The policy that actually applies to `err`.
    #[must_use]
    pub fn on_error(self, err: &Error) -> Self {
        if err.is_fatal() { Self::AbortRun } else { self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn string_forms() {
        assert_eq!(FailurePolicy::from_str("stop-user").ok(), Some(FailurePolicy::StopUser));
        assert_eq!(
            FailurePolicy::from_str("restart-scenario").ok(),
            Some(FailurePolicy::RestartScenario)
        );
        assert_eq!(FailurePolicy::AbortRun.to_string(), "abort-run");
        assert_eq!(FailurePolicy::default(), FailurePolicy::StopUser);
    }

    #[test]
    fn configuration_errors_always_abort() {
        let exhausted = Error::Exhausted {
            variable: "books".to_string(),
            consumer: "w/vu-1".to_string(),
        };
        assert_eq!(FailurePolicy::Continue.on_error(&exhausted), FailurePolicy::Continue);

        let config = Error::Configuration("duplicate variable `books`".to_string());
        assert_eq!(FailurePolicy::Continue.on_error(&config), FailurePolicy::AbortRun);
    }
}
