use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use uuid::Uuid;

use protocol::{ExecutionId, ExecutionRequest, ExecutionResult, ResourceLimits, StreamMessage};
use workflow::{Plan, WorkflowGraph};

use super::{summarize, Error, Submitter, WaitConfig, Waiter, WorkflowRunner, ORCHESTRATOR};
use crate::cluster::{Cluster, ClusterError, JobHandle};
use crate::prep::JobTemplate;
use crate::stream::{EventSink, SessionStore, Subject};

/// Timeout of each workflow step, unless configured otherwise.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// A new, unique execution id.
pub fn new_execution_id() -> ExecutionId {
    ExecutionId::from(format!("exec-{}", Uuid::new_v4().simple()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub template: JobTemplate,
    pub wait: WaitConfig,
    /// Limits applied to every workflow step.
    pub step_resources: ResourceLimits,
    pub step_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            template: JobTemplate::default(),
            wait: WaitConfig::default(),
            step_resources: ResourceLimits::default(),
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
        }
    }
}

/// Entry point for running executions.
///
/// Each execution becomes exactly one job (workflows: one job per step, one
/// at a time). The pipeline is submit, wait, extract, deliver, delete. Every
/// outcome, including orchestrator failures, ends in exactly one terminal
/// message on the execution's session. Cheap to clone.
#[derive(Clone)]
pub struct Executor {
    cluster: Arc<dyn Cluster>,
    sessions: Arc<SessionStore>,
    config: Arc<ExecutorConfig>,
    submitter: Arc<Submitter>,
}

impl Executor {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        sessions: Arc<SessionStore>,
        config: ExecutorConfig,
    ) -> Self {
        let submitter = Arc::new(Submitter::new(Arc::clone(&cluster), config.template.clone()));
        Self {
            cluster,
            sessions,
            config: Arc::new(config),
            submitter,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Start an execution in the background and return its id right away.
    /// Progress and the outcome are delivered through the session; see
    /// `attach` and `poll_result`.
    pub fn submit(&self, request: ExecutionRequest) -> ExecutionId {
        let id = new_execution_id();
        let request = Arc::new(request);
        self.sessions.open(&id, Subject::Execution(Arc::clone(&request)));
        let sink = self.sink(&id);
        sink.info(format!(
            "Execution {id} accepted: {} on {}",
            request.optimizer, request.problem
        ));

        let this = self.clone();
        let pipeline_sink = sink.clone();
        spawn_pipeline(sink, async move {
            match this.execute(&request, &pipeline_sink).await {
                Ok(result) => StreamMessage::Result(result),
                Err(e) => e.into_terminal(pipeline_sink.execution_id()),
            }
        });
        id
    }

    /// Validate and compile a workflow graph, then run its steps in the
    /// background. Graph errors are reported here, all at once.
    pub fn submit_workflow(&self, graph: &WorkflowGraph) -> Result<ExecutionId> {
        let plan = Arc::new(Plan::from_graph(graph)?);
        let id = new_execution_id();
        self.sessions.open(&id, Subject::Workflow(Arc::clone(&plan)));
        let sink = self.sink(&id);
        sink.info(format!("Workflow {id} accepted: {} steps", plan.len()));

        let this = self.clone();
        let pipeline_sink = sink.clone();
        spawn_pipeline(sink, async move {
            let outcomes = WorkflowRunner::new(&this).run(&plan, &pipeline_sink).await;
            if pipeline_sink.is_cancelled() {
                Error::Cancelled.into_terminal(pipeline_sink.execution_id())
            } else {
                StreamMessage::Result(summarize(&outcomes))
            }
        });
        Ok(id)
    }

    /// Run one execution to completion and return its result.
    /// Nothing is retained once this returns.
    pub async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        let id = new_execution_id();
        let request = Arc::new(request);
        self.sessions.open(&id, Subject::Execution(Arc::clone(&request)));
        let sink = self.sink(&id);
        let result = match self.execute(&request, &sink).await {
            Ok(result) => result,
            Err(e) => e.into_result(),
        };
        self.sessions.close(&id);
        result
    }

    /// Receive the stream of an execution; see `SessionStore::attach`.
    pub fn attach(&self, id: &ExecutionId) -> Option<UnboundedReceiver<StreamMessage>> {
        self.sessions.attach(id)
    }

    pub fn poll_result(&self, id: &ExecutionId) -> Option<ExecutionResult> {
        self.sessions.poll_result(id)
    }

    /// Request cancellation. The running pipeline notices on its next poll,
    /// deletes the job and ends the stream with an error.
    pub fn cancel(&self, id: &ExecutionId) -> bool {
        let cancelled = self.sessions.cancel(id);
        if cancelled {
            log::info!("Cancellation of {id} requested");
        }
        cancelled
    }

    /// Periodically drop results nobody collected.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let every = (sessions.retention() / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let purged = sessions.purge_expired();
                if purged > 0 {
                    log::info!("Purged {purged} expired sessions");
                }
            }
        })
    }

    /// The single-job pipeline: submit, wait, extract, delete.
    pub(crate) async fn execute(
        &self,
        request: &ExecutionRequest,
        sink: &EventSink,
    ) -> Result<ExecutionResult, Error> {
        if sink.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let job = self
            .submitter
            .submit(sink.execution_id(), request)
            .await
            .map_err(|e| {
                sink.error(e.to_string());
                e
            })?;
        sink.info(format!("Job {} created", job.name));

        let budget = self.config.wait.budget_for(request.timeout_secs);
        let outcome = Waiter::new(self.cluster.as_ref(), &self.config.wait)
            .wait(&job, budget, sink)
            .await;

        match &outcome {
            Ok(result) if result.success => sink.info(format!("Job {} succeeded", job.name)),
            Ok(result) => sink.warning(format!("Job {} failed: {}", job.name, result.summary())),
            Err(e) => sink.warning(e.to_string()),
        }
        if !matches!(outcome, Err(Error::PollTimeout { .. })) {
            self.cleanup(&job, sink).await;
        }
        outcome
    }

    /// Delete the job. If that fails the cluster's TTL reclaims it eventually.
    async fn cleanup(&self, job: &JobHandle, sink: &EventSink) {
        match self.cluster.delete(job).await {
            Ok(()) => log::debug!("Deleted job {}", job.name),
            Err(ClusterError::NotFound(_)) => log::debug!("Job {} already gone", job.name),
            Err(e) => sink.warning(format!(
                "Unable to delete job {}; it will be reclaimed after its TTL: {e}",
                job.name
            )),
        }
    }

    fn sink(&self, id: &ExecutionId) -> EventSink {
        EventSink::new(Arc::clone(&self.sessions), id.clone(), ORCHESTRATOR)
    }
}

/// Run `pipeline` in its own task and deliver whatever terminal message it
/// produces. If the task dies instead, the session still gets an error
/// terminal, so attached clients are released and the entry can expire.
fn spawn_pipeline<F>(sink: EventSink, pipeline: F)
where
    F: Future<Output = StreamMessage> + Send + 'static,
{
    tokio::spawn(async move {
        let terminal = match tokio::spawn(pipeline).await {
            Ok(terminal) => terminal,
            Err(e) => {
                log::error!("Task of execution {} failed: {e}", sink.execution_id());
                StreamMessage::error(sink.execution_id(), format!("orchestrator task failed: {e}"))
            }
        };
        sink.finish(terminal);
    });
}
