use thiserror::Error;

use hourglass_core::{CoreError, JobKey};
use hourglass_queue::QueueError;
use hourglass_storage::StoreError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Failure raised by a worker's own business logic.
    #[error("execution failed: {0:#}")]
    Execution(#[from] anyhow::Error),

    #[error("missing job definition: {0}")]
    MissingJobDefinition(JobKey),

    #[error("job is locked: {0}")]
    JobLocked(JobKey),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("no worker registered as '{0}'")]
    UnknownWorker(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    /// Text recorded as the job's `last_error`. A worker's own failure is
    /// stored as it raised it, without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            WorkerError::Execution(e) => format!("{e:#}"),
            other => other.to_string(),
        }
    }

    /// Failures that redelivery can never fix: the message itself is unusable.
    pub fn is_poison(&self) -> bool {
        matches!(self, WorkerError::UnknownWorker(_) | WorkerError::Payload(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unusable_messages_are_poison() {
        assert!(WorkerError::UnknownWorker("nobody".into()).is_poison());
        assert!(WorkerError::Payload("truncated".into()).is_poison());
        assert!(!WorkerError::JobLocked(JobKey::Id(1)).is_poison());
        assert!(!WorkerError::Execution(anyhow::anyhow!("boom")).is_poison());
    }

    #[test]
    fn execution_message_has_no_prefix() {
        let err = WorkerError::Execution(anyhow::anyhow!("disk full").context("export failed"));
        assert_eq!(err.message(), "export failed: disk full");
        assert_eq!(
            WorkerError::Config("no queue target".into()).message(),
            "configuration error: no queue target"
        );
    }
}
