use std::time::Duration;

use tokio::time::Instant;

use protocol::{excerpt, extract_result, find_payload, progress_lines, ExecutionResult};

use super::Error;
use crate::cluster::{Cluster, ClusterError, JobHandle, JobStatus};
use crate::stream::EventSink;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_PROGRESS_EVERY: Duration = Duration::from_secs(10);
/// Extra time past the job's own deadline before the waiter gives up.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct WaitConfig {
    pub poll_interval: Duration,
    /// Fixed wait budget; when unset, the job's timeout plus `grace`.
    pub budget: Option<Duration>,
    pub grace: Duration,
    /// How often to report that the job is still running.
    pub progress_every: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            budget: None,
            grace: DEFAULT_GRACE,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl WaitConfig {
    pub fn budget_for(&self, timeout_secs: u64) -> Duration {
        self.budget
            .unwrap_or_else(|| Duration::from_secs(timeout_secs) + self.grace)
    }
}

/// Progress lines of a job already relayed to the client.
#[derive(Debug, Default)]
struct ProgressCursor {
    seen: usize,
}

impl ProgressCursor {
    fn relay(&mut self, logs: &str, sink: &EventSink) {
        let mut n = 0;
        for line in progress_lines(logs) {
            if n >= self.seen {
                sink.info(line);
            }
            n += 1;
        }
        self.seen = self.seen.max(n);
    }
}

/// Polls one job until it reaches a terminal state, then turns its logs
/// into a result.
pub struct Waiter<'a> {
    cluster: &'a dyn Cluster,
    config: &'a WaitConfig,
}

impl<'a> Waiter<'a> {
    pub fn new(cluster: &'a dyn Cluster, config: &'a WaitConfig) -> Self {
        Self { cluster, config }
    }

    /// Wait for `job` for at most `budget`.
    ///
    /// Status is observed monotonically: a report that would move the job
    /// backwards is ignored. Progress lines are relayed on every poll while
    /// the job runs. Transient cluster errors are retried until the
    /// budget runs out. When the budget runs out the job is left alone; its
    /// cluster deadline still applies.
    pub async fn wait(
        &self,
        job: &JobHandle,
        budget: Duration,
        sink: &EventSink,
    ) -> Result<ExecutionResult, Error> {
        let start = Instant::now();
        let mut last_report = start;
        let mut status = JobStatus::Pending;
        let mut cursor = ProgressCursor::default();

        loop {
            if sink.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.cluster.status(job).await {
                Ok(observed) if observed < status => {
                    log::warn!(
                        "Ignoring status {observed} of job {}: it was already {status}",
                        job.name
                    );
                }
                Ok(observed) => {
                    if observed != status {
                        log::debug!("Job {} is {observed}", job.name);
                        if observed == JobStatus::Running {
                            sink.info(format!("Job {} is running", job.name));
                        }
                        status = observed;
                    }
                }
                Err(ClusterError::NotFound(_)) => {
                    return Err(Error::JobFailed {
                        name: job.name.clone(),
                        reason: "job no longer exists".to_owned(),
                        logs: String::new(),
                    });
                }
                Err(e) => log::warn!("Unable to get status of job {} (will retry): {e}", job.name),
            }

            if status.is_terminal() {
                return self.collect(job, status, sink, &mut cursor).await;
            }

            let now = Instant::now();
            let waited = now.duration_since(start);
            if waited >= budget {
                return Err(Error::PollTimeout {
                    name: job.name.clone(),
                    waited_secs: waited.as_secs(),
                });
            }

            if status == JobStatus::Running {
                match self.cluster.logs(job).await {
                    Ok(logs) => cursor.relay(&logs, sink),
                    Err(e) => log::debug!("No logs for job {} yet: {e}", job.name),
                }
            }
            if now.duration_since(last_report) >= self.config.progress_every {
                sink.info(format!(
                    "Job {} still {status} ({}s elapsed)",
                    job.name,
                    waited.as_secs()
                ));
                last_report = now;
            }

            tokio::time::sleep(self.config.poll_interval.min(budget - waited)).await;
        }
    }

    async fn collect(
        &self,
        job: &JobHandle,
        status: JobStatus,
        sink: &EventSink,
        cursor: &mut ProgressCursor,
    ) -> Result<ExecutionResult, Error> {
        let logs = self.cluster.logs(job).await?;
        cursor.relay(&logs, sink);

        if status == JobStatus::Succeeded {
            return Ok(extract_result(&logs));
        }
        // the runner exits non-zero after printing its own error result:
        match find_payload(&logs) {
            Ok(_) => Ok(extract_result(&logs)),
            Err(e) => Err(Error::JobFailed {
                name: job.name.clone(),
                reason: e.to_string(),
                logs: excerpt(&logs).to_owned(),
            }),
        }
    }
}
