use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use protocol::ResourceLimits;

/// Runs jobs as local subprocesses
mod local;
pub use local::{LocalCluster, LocalClusterConfig};

/// Kubernetes manifest rendering
mod manifest;
pub use manifest::render_manifest;

// kubernetes object names are DNS-1123 labels:
const MAX_NAME_LEN: usize = 63;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Cluster rejected job: {0}")]
    Rejected(String),
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Cluster API error: {0}")]
    Api(String),
}

/// Lifecycle of a job. Ordered so that a later state compares greater;
/// the only allowed moves are Pending -> Running -> Succeeded | Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Everything the cluster needs to run one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Unique job name.
    pub name: String,
    /// Generic runtime image shared by every job.
    pub image: String,
    /// Program and arguments; the runner script is embedded here.
    pub command: Vec<String>,
    /// Per-request inputs, passed as environment variables.
    pub env: Vec<(String, String)>,
    pub resources: ResourceLimits,
    /// Hard wall-clock limit enforced by the cluster.
    pub active_deadline_secs: u64,
    /// Finished jobs are reclaimed after this long even if nobody deletes them.
    pub ttl_after_finished_secs: u64,
    pub labels: Vec<(String, String)>,
}

impl JobSpec {
    /// Checks a real cluster API would perform before accepting the spec.
    pub fn check_well_formed(&self) -> Result<(), ClusterError> {
        if self.name.is_empty()
            || self.name.len() > MAX_NAME_LEN
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || self.name.starts_with('-')
            || self.name.ends_with('-')
        {
            return Err(ClusterError::Rejected(format!(
                "invalid job name \"{}\"",
                self.name
            )));
        }
        if self.command.is_empty() {
            return Err(ClusterError::Rejected("empty command".to_owned()));
        }
        if self.active_deadline_secs == 0 {
            return Err(ClusterError::Rejected(
                "active deadline must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Reference to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// The scheduler that owns ephemeral jobs.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Create a job. Returns as soon as the cluster has accepted it.
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, ClusterError>;

    async fn status(&self, job: &JobHandle) -> Result<JobStatus, ClusterError>;

    /// Everything the job has printed so far (stdout and stderr).
    async fn logs(&self, job: &JobHandle) -> Result<String, ClusterError>;

    /// Delete a job, stopping it first if it is still running.
    async fn delete(&self, job: &JobHandle) -> Result<(), ClusterError>;

    async fn exists(&self, job: &JobHandle) -> Result<bool, ClusterError> {
        match self.status(job).await {
            Ok(_) => Ok(true),
            Err(ClusterError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec(name: &str) -> JobSpec {
        JobSpec {
            name: name.to_owned(),
            image: "img".to_owned(),
            command: vec!["true".to_owned()],
            env: Vec::new(),
            resources: ResourceLimits::default(),
            active_deadline_secs: 10,
            ttl_after_finished_secs: 10,
            labels: Vec::new(),
        }
    }

    #[test]
    fn test_status_order() {
        assert!(JobStatus::Pending < JobStatus::Running);
        assert!(JobStatus::Running < JobStatus::Succeeded);
        assert!(JobStatus::Running < JobStatus::Failed);
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_well_formed() {
        assert!(spec("qubots-20260101000000-abcd1234").check_well_formed().is_ok());
        assert!(spec("Upper").check_well_formed().is_err());
        assert!(spec("-lead").check_well_formed().is_err());
        assert!(spec(&"a".repeat(64)).check_well_formed().is_err());

        let mut s = spec("ok");
        s.command.clear();
        assert!(s.check_well_formed().is_err());

        let mut s = spec("ok");
        s.active_deadline_secs = 0;
        assert!(s.check_well_formed().is_err());
    }
}
