use std::fs::File;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle as TaskHandle;

use util::{lock, HashMap};

use super::{Cluster, ClusterError, JobHandle, JobSpec, JobStatus};
use crate::fs::Fs;

// how long to wait for output pipes to close once the process is gone:
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct LocalClusterConfig {
    /// Each job gets its own directory under here.
    pub work_dir: PathBuf,
    /// Submissions beyond this many unfinished jobs are rejected.
    pub max_active_jobs: usize,
}

struct LocalJob {
    handle: JobHandle,
    status: Arc<Mutex<JobStatus>>,
    supervisor: TaskHandle<()>,
}

type JobTable = Arc<Mutex<HashMap<String, LocalJob>>>;

/// A cluster that runs each job as a subprocess on this machine.
///
/// Honors the same contract as a real scheduler: the active deadline kills
/// the job and marks it failed, finished jobs are reclaimed after their TTL,
/// and output is captured to a log file that can be read at any time.
pub struct LocalCluster {
    fs: Fs,
    max_active_jobs: usize,
    jobs: JobTable,
}

impl LocalCluster {
    pub fn new(config: LocalClusterConfig) -> Result<Self> {
        let mut fs = Fs::new(&config.work_dir);
        fs.ensure_work_dir_exists()?;
        Ok(Self {
            fs,
            max_active_jobs: config.max_active_jobs,
            jobs: Arc::new(Mutex::new(util::hash_map(16))),
        })
    }

    fn lookup(&self, job: &JobHandle) -> Result<Arc<Mutex<JobStatus>>, ClusterError> {
        let jobs = lock(&self.jobs);
        match jobs.get(&job.name) {
            Some(j) if j.handle.created_at == job.created_at => Ok(Arc::clone(&j.status)),
            _ => Err(ClusterError::NotFound(job.name.clone())),
        }
    }

    /// Create the job dir and its log file, returning two append handles
    /// (one each for stdout and stderr).
    fn prepare_dir(&self, spec: &JobSpec) -> Result<(File, File)> {
        let dir = self.fs.job_dir(&spec.name);
        self.fs.create_dir(&dir)?;
        self.fs
            .write_file(self.fs.command_file(&spec.name), &spec.command.join(" "))?;
        let log_file = self.fs.log_file(&spec.name);
        self.fs.write_file(&log_file, "")?;
        Ok((self.fs.open_append(&log_file)?, self.fs.open_append(&log_file)?))
    }
}

#[async_trait]
impl Cluster for LocalCluster {
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, ClusterError> {
        spec.check_well_formed()?;

        // the whole admission runs under the table lock, so that concurrent
        // submissions can't both squeeze past the quota:
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&spec.name) {
            return Err(ClusterError::Rejected(format!(
                "job \"{}\" already exists",
                spec.name
            )));
        }
        let active = jobs.values().filter(|j| !lock(&j.status).is_terminal()).count();
        if active >= self.max_active_jobs {
            return Err(ClusterError::Rejected(format!(
                "quota exceeded: {active} of {} jobs active",
                self.max_active_jobs
            )));
        }

        let (out_file, err_file) = self
            .prepare_dir(spec)
            .map_err(|e| ClusterError::Api(format!("{e:#}")))?;

        let mut cmd = Command::new(&spec.command[0]);
        cmd.args(&spec.command[1..])
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(self.fs.job_dir(&spec.name))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                if let Err(e) = self.fs.delete_dir(self.fs.job_dir(&spec.name)) {
                    log::warn!("Unable to clean up {}: {e:#}", spec.name);
                }
                return Err(ClusterError::Rejected(format!(
                    "cannot start {:?}: {e}",
                    spec.command[0]
                )));
            }
        };

        let handle = JobHandle {
            name: spec.name.clone(),
            created_at: Utc::now(),
        };
        let status = Arc::new(Mutex::new(JobStatus::Pending));

        let supervisor = Supervisor {
            handle: handle.clone(),
            status: Arc::clone(&status),
            deadline: Duration::from_secs(spec.active_deadline_secs),
            ttl: Duration::from_secs(spec.ttl_after_finished_secs),
            jobs: Arc::clone(&self.jobs),
            fs: self.fs.clone(),
        };
        let supervisor = tokio::spawn(supervisor.run(child, out_file, err_file));

        jobs.insert(
            spec.name.clone(),
            LocalJob {
                handle: handle.clone(),
                status,
                supervisor,
            },
        );
        log::debug!("Started local job {}", spec.name);
        Ok(handle)
    }

    async fn status(&self, job: &JobHandle) -> Result<JobStatus, ClusterError> {
        let status = self.lookup(job)?;
        let status = *lock(&status);
        Ok(status)
    }

    async fn logs(&self, job: &JobHandle) -> Result<String, ClusterError> {
        self.lookup(job)?;
        self.fs
            .read_lossy(self.fs.log_file(&job.name))
            .map_err(|e| ClusterError::Api(format!("reading logs of {}: {e:#}", job.name)))
    }

    async fn delete(&self, job: &JobHandle) -> Result<(), ClusterError> {
        let removed = remove_job(&self.jobs, job);
        let Some(removed) = removed else {
            return Err(ClusterError::NotFound(job.name.clone()));
        };

        // dropping the supervisor drops the child, which kills it:
        removed.supervisor.abort();
        self.fs
            .delete_dir(self.fs.job_dir(&job.name))
            .map_err(|e| ClusterError::Api(format!("{e:#}")))?;
        log::debug!("Deleted local job {}", job.name);
        Ok(())
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    DeadlineExceeded,
}

/// Owns a running job: enforces its deadline, records its final status,
/// and reclaims it once the TTL runs out.
struct Supervisor {
    handle: JobHandle,
    status: Arc<Mutex<JobStatus>>,
    deadline: Duration,
    ttl: Duration,
    jobs: JobTable,
    fs: Fs,
}

impl Supervisor {
    async fn run(self, mut child: Child, out_file: File, err_file: File) {
        *lock(&self.status) = JobStatus::Running;

        let tee_out = child
            .stdout
            .take()
            .map(|s| tokio::spawn(communicate(s, tokio::fs::File::from_std(out_file))));
        let tee_err = child
            .stderr
            .take()
            .map(|s| tokio::spawn(communicate(s, tokio::fs::File::from_std(err_file))));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(self.deadline) => Outcome::DeadlineExceeded,
        };

        let (final_status, note) = match outcome {
            Outcome::Exited(Ok(status)) if status.success() => (JobStatus::Succeeded, None),
            Outcome::Exited(Ok(status)) => (
                JobStatus::Failed,
                Some(format!("Job failed: process exited with {status}")),
            ),
            Outcome::Exited(Err(e)) => (
                JobStatus::Failed,
                Some(format!("Job failed: unable to wait on process: {e}")),
            ),
            Outcome::DeadlineExceeded => {
                if let Err(e) = child.kill().await {
                    log::warn!("Unable to kill job {}: {e}", self.handle.name);
                }
                (
                    JobStatus::Failed,
                    Some(format!(
                        "Job terminated: DeadlineExceeded (active deadline {}s)",
                        self.deadline.as_secs()
                    )),
                )
            }
        };

        for tee in [tee_out, tee_err].into_iter().flatten() {
            match tokio::time::timeout(DRAIN_TIMEOUT, tee).await {
                Ok(Ok(Ok(()))) => (),
                Ok(Ok(Err(e))) => log::warn!("Error capturing output of {}: {e}", self.handle.name),
                Ok(Err(e)) => log::warn!("Output task of {} failed: {e}", self.handle.name),
                Err(_) => log::debug!("Output of {} still open; not waiting", self.handle.name),
            }
        }

        if let Some(note) = note {
            self.append_note(&note).await;
        }
        *lock(&self.status) = final_status;
        log::debug!("Local job {} {final_status}", self.handle.name);

        tokio::time::sleep(self.ttl).await;
        self.reclaim();
    }

    async fn append_note(&self, note: &str) {
        let written = match self.fs.open_append(self.fs.log_file(&self.handle.name)) {
            Ok(f) => {
                let mut f = tokio::fs::File::from_std(f);
                let line = format!("{note}\n");
                match f.write_all(line.as_bytes()).await {
                    Ok(()) => f.flush().await.map_err(anyhow::Error::from),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            log::warn!("Unable to write to log of {}: {e:#}", self.handle.name);
        }
    }

    fn reclaim(&self) {
        let removed = remove_job(&self.jobs, &self.handle);
        // if it's gone already, somebody deleted it explicitly.
        if removed.is_some() {
            log::debug!("TTL expired; reclaiming job {}", self.handle.name);
            if let Err(e) = self.fs.delete_dir(self.fs.job_dir(&self.handle.name)) {
                log::warn!("Unable to remove dir of {}: {e:#}", self.handle.name);
            }
        }
    }
}

/// Remove the job from the table, provided it is the same incarnation as `job`.
fn remove_job(jobs: &JobTable, job: &JobHandle) -> Option<LocalJob> {
    let mut jobs = lock(jobs);
    let same = jobs
        .get(&job.name)
        .is_some_and(|j| j.handle.created_at == job.created_at);
    if same {
        jobs.remove(&job.name)
    } else {
        None
    }
}

/// Copy everything from `stream` to `file` until the stream closes.
async fn communicate<R: AsyncRead + Unpin>(
    mut stream: R,
    mut file: tokio::fs::File,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let num_read = stream.read(&mut buf).await?;
        if num_read == 0 {
            break;
        }

        file.write_all(&buf[..num_read]).await?;
        // flush so the bytes are visible to `logs` right away:
        file.flush().await?;
    }

    Ok(())
}
