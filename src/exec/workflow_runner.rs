use serde::Serialize;
use serde_json::Value;

use protocol::{error_type, ExecutionResult};
use workflow::Plan;

use super::{Error, Executor};
use crate::stream::EventSink;

/// What happened to one step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub label: String,
    pub result: ExecutionResult,
}

/// `WorkflowRunner` runs the steps of a compiled plan.
///
/// Steps run strictly one at a time, each as a single-job execution with its
/// events relabelled to the step. A failed step is recorded and the next step
/// still runs. Once the workflow is cancelled, the step in flight stops and
/// the remaining steps are recorded as cancelled without creating any jobs.
pub struct WorkflowRunner<'a> {
    executor: &'a Executor,
}

impl<'a> WorkflowRunner<'a> {
    pub fn new(executor: &'a Executor) -> Self {
        Self { executor }
    }

    /// One outcome per step, in plan order.
    pub async fn run(&self, plan: &Plan, sink: &EventSink) -> Vec<StepOutcome> {
        let config = self.executor.config();
        let mut outcomes = Vec::with_capacity(plan.len());

        for step in &plan.steps {
            let label = step.label();
            let step_sink = sink.relabel(&label);

            let result = if step_sink.is_cancelled() {
                Error::Cancelled.into_result()
            } else {
                step_sink.info(format!(
                    "Running {} on {}",
                    step.optimizer, step.problem
                ));
                let request = step.to_request(config.step_resources, config.step_timeout_secs);
                match self.executor.execute(&request, &step_sink).await {
                    Ok(result) => result,
                    Err(e) => e.into_result(),
                }
            };

            if result.success {
                step_sink.info(format!("Step succeeded: {}", result.summary()));
            } else {
                step_sink.warning(format!("Step failed: {}", result.summary()));
            }
            outcomes.push(StepOutcome {
                index: step.index,
                label,
                result,
            });
        }

        let failed = outcomes.iter().filter(|o| !o.result.success).count();
        sink.info(format!(
            "Workflow finished: {} of {} steps succeeded",
            outcomes.len() - failed,
            outcomes.len()
        ));
        outcomes
    }
}

/// Fold step outcomes into the workflow's result: successful only if every
/// step succeeded, with the outcomes under `metadata.steps`.
pub fn summarize(outcomes: &[StepOutcome]) -> ExecutionResult {
    let failed = outcomes.iter().filter(|o| !o.result.success).count();
    let completed = outcomes.len() - failed;

    let mut result = if failed == 0 && !outcomes.is_empty() {
        ExecutionResult {
            success: true,
            ..Default::default()
        }
    } else {
        ExecutionResult::failure(
            error_type::STEP_FAILED,
            format!("{failed} of {} workflow steps failed", outcomes.len()),
        )
    };

    let steps = serde_json::to_value(outcomes).unwrap_or_else(|e| {
        log::error!("Unable to serialize step outcomes: {e}");
        Value::Array(Vec::new())
    });
    result.metadata.insert("steps".to_owned(), steps);
    result
        .metadata
        .insert("completed".to_owned(), completed.into());
    result.metadata.insert("failed".to_owned(), failed.into());
    result
}
