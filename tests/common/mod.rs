#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;

use protocol::{ArtifactRef, ExecutionRequest, LogEvent, StreamMessage};
use qubots_runner::cluster::{Cluster, ClusterError, JobHandle, JobSpec, JobStatus};
use qubots_runner::exec::{Executor, ExecutorConfig, WaitConfig};
use qubots_runner::stream::SessionStore;

pub const SUCCESS_LOGS: &str = "QUBOTS_PROGRESS loading problem alice/tsp-50\n\
QUBOTS_PROGRESS optimizing\n\
QUBOTS_RESULT_START\n\
{\"success\": true, \"best_value\": 425.3}\n\
QUBOTS_RESULT_END\n";

pub const CRASH_LOGS: &str = "Traceback (most recent call last):\n  \
File \"<string>\", line 1, in <module>\n\
ModuleNotFoundError: No module named 'qubots'\n";

/// How one fake job behaves.
#[derive(Debug, Clone)]
pub struct Script {
    /// Reported by successive `status` calls; the last one repeats forever.
    pub statuses: Vec<JobStatus>,
    pub logs: String,
}

impl Script {
    pub fn succeeds(logs: &str) -> Self {
        Self {
            statuses: vec![JobStatus::Pending, JobStatus::Running, JobStatus::Succeeded],
            logs: logs.to_owned(),
        }
    }

    pub fn fails(logs: &str) -> Self {
        Self {
            statuses: vec![JobStatus::Running, JobStatus::Failed],
            logs: logs.to_owned(),
        }
    }

    pub fn runs_forever() -> Self {
        Self {
            statuses: vec![JobStatus::Running],
            logs: "QUBOTS_PROGRESS optimizing\n".to_owned(),
        }
    }
}

struct FakeJob {
    handle: JobHandle,
    statuses: VecDeque<JobStatus>,
    logs: String,
}

/// A cluster that plays back one `Script` per submitted job, in order,
/// and records what happened to it.
#[derive(Default)]
pub struct FakeCluster {
    scripts: Mutex<VecDeque<Script>>,
    jobs: Mutex<Vec<FakeJob>>,
    pub submitted: Mutex<Vec<JobSpec>>,
    pub deleted: Mutex<Vec<String>>,
    pub reject_with: Mutex<Option<String>>,
    pub fail_deletes: Mutex<bool>,
    pub panic_on_status: Mutex<bool>,
}

impl FakeCluster {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        })
    }

    pub fn submitted_names(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn deleted_names(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn live_jobs(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, ClusterError> {
        spec.check_well_formed()?;
        if let Some(reason) = self.reject_with.lock().unwrap().clone() {
            return Err(ClusterError::Rejected(reason));
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::succeeds(SUCCESS_LOGS));
        let handle = JobHandle {
            name: spec.name.clone(),
            created_at: Utc::now(),
        };
        self.jobs.lock().unwrap().push(FakeJob {
            handle: handle.clone(),
            statuses: script.statuses.into(),
            logs: script.logs,
        });
        self.submitted.lock().unwrap().push(spec.clone());
        Ok(handle)
    }

    async fn status(&self, job: &JobHandle) -> Result<JobStatus, ClusterError> {
        if *self.panic_on_status.lock().unwrap() {
            panic!("status of {} exploded", job.name);
        }
        let mut jobs = self.jobs.lock().unwrap();
        let fake = jobs
            .iter_mut()
            .find(|j| j.handle == *job)
            .ok_or_else(|| ClusterError::NotFound(job.name.clone()))?;
        let status = if fake.statuses.len() > 1 {
            fake.statuses.pop_front()
        } else {
            fake.statuses.front().copied()
        };
        Ok(status.unwrap_or(JobStatus::Running))
    }

    async fn logs(&self, job: &JobHandle) -> Result<String, ClusterError> {
        let jobs = self.jobs.lock().unwrap();
        jobs.iter()
            .find(|j| j.handle == *job)
            .map(|j| j.logs.clone())
            .ok_or_else(|| ClusterError::NotFound(job.name.clone()))
    }

    async fn delete(&self, job: &JobHandle) -> Result<(), ClusterError> {
        if *self.fail_deletes.lock().unwrap() {
            return Err(ClusterError::Api("connection refused".to_owned()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| j.handle != *job);
        if jobs.len() == before {
            return Err(ClusterError::NotFound(job.name.clone()));
        }
        self.deleted.lock().unwrap().push(job.name.clone());
        Ok(())
    }
}

pub fn request() -> ExecutionRequest {
    ExecutionRequest::new(
        ArtifactRef::new("alice", "tsp-50"),
        ArtifactRef::new("bob", "sa-optimizer"),
    )
}

pub fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        wait: WaitConfig {
            poll_interval: Duration::from_secs(1),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn executor(cluster: Arc<FakeCluster>, config: ExecutorConfig) -> Executor {
    Executor::new(cluster, Arc::new(SessionStore::default()), config)
}

/// Everything sent on a stream until it closes.
pub async fn collect(mut rx: UnboundedReceiver<StreamMessage>) -> Vec<StreamMessage> {
    let mut msgs = Vec::new();
    while let Some(msg) = rx.recv().await {
        msgs.push(msg);
    }
    msgs
}

pub fn terminals(msgs: &[StreamMessage]) -> Vec<&StreamMessage> {
    msgs.iter().filter(|m| m.is_terminal()).collect()
}

pub fn log_events(msgs: &[StreamMessage]) -> Vec<&LogEvent> {
    msgs.iter()
        .filter_map(|m| match m {
            StreamMessage::Log(e) => Some(e),
            _ => None,
        })
        .collect()
}
