use protocol::{error_type, ExecutionId, ExecutionResult, StreamMessage, ValidationError};

use crate::cluster::ClusterError;

/// Creates one job per request
mod submitter;
pub use submitter::{job_name, Submitter};

/// Polls a job until it is done, then extracts its result
mod waiter;
pub use waiter::{WaitConfig, Waiter};

/// Runs executions in the background and bridges them to streaming sessions
mod executor;
pub use executor::{new_execution_id, Executor, ExecutorConfig};

/// Runs the steps of a compiled workflow one after another
mod workflow_runner;
pub use workflow_runner::{summarize, StepOutcome, WorkflowRunner};

/// Source label of events produced by the orchestrator itself.
pub const ORCHESTRATOR: &str = "orchestrator";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),
    #[error("Job submission failed: {0}")]
    Submission(#[source] ClusterError),
    #[error("Gave up waiting for job {name} after {waited_secs}s; it is left to its cluster deadline")]
    PollTimeout { name: String, waited_secs: u64 },
    #[error("Job {name} failed: {reason}")]
    JobFailed {
        name: String,
        reason: String,
        /// Tail of the job's output.
        logs: String,
    },
    #[error("execution cancelled")]
    Cancelled,
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl Error {
    /// Value used for `ExecutionResult::error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => error_type::INVALID_REQUEST,
            Error::Submission(_) => error_type::SUBMISSION,
            Error::PollTimeout { .. } => error_type::TIMEOUT,
            Error::JobFailed { .. } => error_type::JOB_FAILED,
            Error::Cancelled => error_type::CANCELLED,
            Error::Cluster(_) => error_type::ORCHESTRATOR,
        }
    }

    /// Fold into a failed result; a failed job keeps its log excerpt.
    pub fn into_result(self) -> ExecutionResult {
        let result = ExecutionResult::failure(self.error_type(), self.to_string());
        match self {
            Error::JobFailed { logs, .. } if !logs.is_empty() => result.with_raw_log(logs),
            _ => result,
        }
    }

    /// The terminal stream message for this error.
    /// A job that ran and failed reports a result; anything that went wrong
    /// around the job reports an `error` message.
    pub fn into_terminal(self, id: &ExecutionId) -> StreamMessage {
        match self {
            Error::JobFailed { .. } => StreamMessage::Result(self.into_result()),
            e => StreamMessage::error(id, e.to_string()),
        }
    }
}
