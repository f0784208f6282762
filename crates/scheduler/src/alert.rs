//! Pluggable reactions to the two conditions a single-thread worker can hit
//! before it runs: the job row is missing, or another executor holds the lock.

use std::fmt;

use hourglass_core::{Job, JobKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    MissingJobDefinition,
    JobLocked,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::MissingJobDefinition => f.write_str("MISSING_JOB_DEFINITION"),
            Alert::JobLocked => f.write_str("JOB_LOCKED"),
        }
    }
}

/// Everything a policy needs to decide.
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub alert: Alert,
    pub worker_name: String,
    pub key: JobKey,
    /// The locked row, for [`Alert::JobLocked`].
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    /// Fail the run with an error.
    Raise,
    /// Skip the run quietly.
    Discard,
}

pub trait AlertPolicy: Send + Sync {
    fn decide(&self, ctx: &AlertContext) -> AlertAction;
}

/// Missing definition is fatal, lock contention is not.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAlertPolicy;

impl AlertPolicy for DefaultAlertPolicy {
    fn decide(&self, ctx: &AlertContext) -> AlertAction {
        match ctx.alert {
            Alert::MissingJobDefinition => AlertAction::Raise,
            Alert::JobLocked => AlertAction::Discard,
        }
    }
}

/// Policy backed by a closure.
pub struct FnAlertPolicy<F>(pub F);

impl<F> AlertPolicy for FnAlertPolicy<F>
where
    F: Fn(&AlertContext) -> AlertAction + Send + Sync,
{
    fn decide(&self, ctx: &AlertContext) -> AlertAction {
        (self.0)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(alert: Alert) -> AlertContext {
        AlertContext {
            alert,
            worker_name: "digest".into(),
            key: JobKey::Id(7),
            job: None,
        }
    }

    #[test]
    fn default_policy_is_asymmetric() {
        let policy = DefaultAlertPolicy;
        assert_eq!(policy.decide(&ctx(Alert::MissingJobDefinition)), AlertAction::Raise);
        assert_eq!(policy.decide(&ctx(Alert::JobLocked)), AlertAction::Discard);
    }

    #[test]
    fn closure_policy() {
        let strict = FnAlertPolicy(|_: &AlertContext| AlertAction::Raise);
        assert_eq!(strict.decide(&ctx(Alert::JobLocked)), AlertAction::Raise);
        assert_eq!(Alert::JobLocked.to_string(), "JOB_LOCKED");
    }
}
