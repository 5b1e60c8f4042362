use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use protocol::{ExecutionId, ExecutionRequest};

use super::Error;
use crate::cluster::{Cluster, JobHandle};
use crate::prep::JobTemplate;

/// A fresh job name: `qubots-<utc timestamp>-<8 random hex chars>`.
/// Always a valid DNS-1123 label.
pub fn job_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "qubots-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..8]
    )
}

/// Creates exactly one job for each request it is given.
pub struct Submitter {
    cluster: Arc<dyn Cluster>,
    template: JobTemplate,
}

impl Submitter {
    pub fn new(cluster: Arc<dyn Cluster>, template: JobTemplate) -> Self {
        Self { cluster, template }
    }

    pub fn template(&self) -> &JobTemplate {
        &self.template
    }

    /// Validate the request and create its job. Returns as soon as the cluster
    /// has accepted the job; a rejection is never retried.
    pub async fn submit(
        &self,
        id: &ExecutionId,
        request: &ExecutionRequest,
    ) -> Result<JobHandle, Error> {
        request.validate()?;
        let spec = self.template.build(&job_name(), id, request);
        let handle = self
            .cluster
            .submit(&spec)
            .await
            .map_err(Error::Submission)?;
        log::info!(
            "Created job {} for {} ({} on {})",
            handle.name,
            id,
            request.optimizer,
            request.problem
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_job_name() {
        let name = job_name();
        assert!(name.starts_with("qubots-"));
        // qubots- + 14 digit timestamp + - + 8 hex chars
        assert_eq!(name.len(), 7 + 14 + 1 + 8);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert_ne!(job_name(), job_name());
    }
}
