use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Values used in `ExecutionResult::error_type` by the orchestrator itself.
/// Jobs may report their own types (e.g. `execution_error`) as well.
pub mod error_type {
    /// Sentinel markers missing, or the payload between them is not a result object.
    pub const PARSE: &str = "parse_error";
    /// The job reached the Failed state without printing a result.
    pub const JOB_FAILED: &str = "job_failed";
    /// The cluster refused the job.
    pub const SUBMISSION: &str = "submission_error";
    /// The orchestrator gave up waiting; the job may still be running.
    pub const TIMEOUT: &str = "timeout";
    /// The execution was cancelled by its caller.
    pub const CANCELLED: &str = "cancelled";
    /// The request was rejected before any job was created.
    pub const INVALID_REQUEST: &str = "invalid_request";
    /// At least one step of a workflow did not succeed.
    pub const STEP_FAILED: &str = "step_failed";
    /// Any other failure outside the job.
    pub const ORCHESTRATOR: &str = "orchestrator_error";
}

/// The one outcome produced for every execution request.
///
/// Fields the job reports beyond the ones named here (`iterations`,
/// `termination_reason`, ...) are kept verbatim in `extra`, and unset
/// optional fields are left out when serializing, so passing a result
/// through this type never adds or drops information.
///
/// `best_value` and `runtime_seconds` are read leniently: numbers and
/// numeric strings are accepted, and any other value (a list of objectives,
/// say) stays in `extra` under its own key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct ExecutionResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_solution: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Trace reported by the job itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_trace: Option<String>,
    /// Tail of the job's log output, attached by the orchestrator on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_log: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for ExecutionResult {
    type Error = serde_json::Error;

    fn try_from(mut doc: Map<String, Value>) -> Result<Self, Self::Error> {
        Ok(Self {
            success: take(&mut doc, "success")?.unwrap_or(false),
            best_value: take_number(&mut doc, "best_value"),
            best_solution: take(&mut doc, "best_solution")?,
            runtime_seconds: take_number(&mut doc, "runtime_seconds"),
            metadata: take(&mut doc, "metadata")?.unwrap_or_default(),
            error_message: take(&mut doc, "error_message")?,
            error_type: take(&mut doc, "error_type")?,
            error_trace: take(&mut doc, "error_trace")?,
            raw_log: take(&mut doc, "raw_log")?,
            extra: doc,
        })
    }
}

/// Remove `key` and decode it; absent and null both mean `None`.
fn take<T: DeserializeOwned>(doc: &mut Map<String, Value>, key: &str) -> serde_json::Result<Option<T>> {
    match doc.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("field `{key}`: {e}"))),
    }
}

/// Remove `key` if it holds a finite number (or a string spelling one).
/// Anything else is left in place.
fn take_number(doc: &mut Map<String, Value>, key: &str) -> Option<f64> {
    let number = match doc.get(key)? {
        Value::Null => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => return None,
    };
    if number.is_some() || doc.get(key).is_some_and(Value::is_null) {
        doc.remove(key);
    }
    number
}

impl ExecutionResult {
    /// A failed result with the given type and message.
    pub fn failure(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            error_type: Some(error_type.to_owned()),
            ..Default::default()
        }
    }

    /// Attach a log excerpt for diagnostics.
    pub fn with_raw_log(mut self, raw_log: impl Into<String>) -> Self {
        self.raw_log = Some(raw_log.into());
        self
    }

    /// Short human-readable summary for terminal output.
    pub fn summary(&self) -> String {
        if self.success {
            match (self.best_value, self.runtime_seconds) {
                (Some(v), Some(t)) => format!("best value {v} in {t:.3}s"),
                (Some(v), None) => format!("best value {v}"),
                _ => "completed".to_owned(),
            }
        } else {
            let kind = self.error_type.as_deref().unwrap_or("error");
            let msg = self.error_message.as_deref().unwrap_or("unknown failure");
            format!("{kind}: {msg}")
        }
    }
}
