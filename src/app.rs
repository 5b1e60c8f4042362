use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use protocol::{ExecutionId, ExecutionRequest, StreamMessage};
use workflow::{Plan, WorkflowGraph};

use crate::cluster::{render_manifest, LocalCluster};
use crate::exec::{job_name, new_execution_id, Executor};
use crate::settings::{Input, Settings};
use crate::stream::{SessionStore, DEFAULT_BACKLOG};
use crate::ui::Ui;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Session of execution {0} disappeared before it could be attached")]
    SessionVanished(ExecutionId),
    #[error("Stream of execution {0} closed without a terminal message")]
    StreamClosed(ExecutionId),
}

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line settings
    settings: Settings,
    /// User interface
    ui: Ui,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let ui = Ui::new(&settings);
        Self { settings, ui }
    }

    /// Run the app. Returns whether the execution succeeded.
    pub fn run(mut self) -> Result<bool> {
        if self.settings.emit_manifest {
            self.emit_manifests()?;
            return Ok(true);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("while starting async runtime")?;

        self.ui.start_timer();
        let success = runtime.block_on(self.execute())?;
        self.ui.print_elapsed("Execution");
        Ok(success)
    }

    async fn execute(&self) -> Result<bool> {
        self.ui
            .verbose_msg(&format!("Using work directory {:?}", self.settings.work_dir));
        let cluster = LocalCluster::new(self.settings.cluster_config())
            .context("while preparing work directory")?;
        let sessions = Arc::new(SessionStore::new(self.settings.retention, DEFAULT_BACKLOG));
        let executor = Executor::new(Arc::new(cluster), sessions, self.settings.executor_config());
        let sweeper = executor.spawn_sweeper();

        let id = match &self.settings.input {
            Input::Request(path) => executor.submit(read_request(path)?),
            Input::Workflow(path) => executor.submit_workflow(&read_workflow(path)?)?,
        };
        let outcome = self.stream(&executor, &id).await;
        sweeper.abort();
        outcome
    }

    /// Print every message of the execution's stream until the terminal one:
    /// NDJSON on stdout, readable progress on stderr.
    async fn stream(&self, executor: &Executor, id: &ExecutionId) -> Result<bool> {
        let mut rx = executor
            .attach(id)
            .ok_or_else(|| Error::SessionVanished(id.clone()))?;
        if let Some(subject) = executor.sessions().subject(id) {
            self.ui.verbose_msg(&format!("Streaming {id}: {subject}"));
        }
        let mut interrupted = false;

        loop {
            let msg = tokio::select! {
                msg = rx.recv() => msg,
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    eprintln!("Interrupted; cancelling {id}...");
                    executor.cancel(id);
                    continue;
                }
            };
            let Some(msg) = msg else {
                return Err(Error::StreamClosed(id.clone()).into());
            };

            let line = msg.to_line().context("while serializing stream message")?;
            writeln!(std::io::stdout().lock(), "{line}").context("while writing to stdout")?;
            self.ui.show(&msg);

            match msg {
                StreamMessage::Log(_) => (),
                StreamMessage::Result(result) => return Ok(result.success),
                StreamMessage::Error(_) => return Ok(false),
            }
        }
    }

    /// Print the job manifests the input would create, without running anything.
    fn emit_manifests(&self) -> Result<()> {
        let template = &self.settings.template;
        let manifest = match &self.settings.input {
            Input::Request(path) => {
                let request = read_request(path)?;
                request.validate()?;
                render_manifest(&template.build(&job_name(), &new_execution_id(), &request))
            }
            Input::Workflow(path) => {
                let plan = Plan::from_graph(&read_workflow(path)?)?;
                let config = self.settings.executor_config();
                let manifests = plan
                    .steps
                    .iter()
                    .map(|step| {
                        let request =
                            step.to_request(config.step_resources, config.step_timeout_secs);
                        render_manifest(&template.build(&job_name(), &new_execution_id(), &request))
                    })
                    .collect();
                Value::Array(manifests)
            }
        };
        let text = serde_json::to_string_pretty(&manifest)?;
        writeln!(std::io::stdout().lock(), "{text}")?;
        Ok(())
    }
}

fn read_request(path: &Path) -> Result<ExecutionRequest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("while reading request file {path:?}"))?;
    serde_json::from_str(&text).with_context(|| format!("while parsing request file {path:?}"))
}

fn read_workflow(path: &Path) -> Result<WorkflowGraph> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("while reading workflow file {path:?}"))?;
    serde_json::from_str(&text).with_context(|| format!("while parsing workflow file {path:?}"))
}
