use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameter overrides passed to a problem or optimizer.
pub type Params = Map<String, Value>;

// used to separate owner from name e.g. "alice/tsp-50"
const REF_DELIM: char = '/';

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CPU_MILLIS: u32 = 1000;
const DEFAULT_MEMORY_MIB: u32 = 1024;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid reference \"{0}\" (should be formatted 'owner/name')")]
    InvalidReference(String),
    #[error("{0} reference has an empty owner or name")]
    EmptyReference(&'static str),
    #[error("{0} parameters contain an empty key")]
    EmptyParamKey(&'static str),
    #[error("Timeout must be greater than zero")]
    ZeroTimeout,
    #[error("CPU and memory limits must be greater than zero")]
    ZeroResources,
}

/// Reference to a repository hosted on the hub, e.g. `alice/tsp-50`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactRef {
    pub owner: String,
    pub name: String,
}

impl ArtifactRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Id used by loaders to find this artifact on the hub.
    pub fn repo_id(&self) -> String {
        format!("{}{REF_DELIM}{}", self.owner, self.name)
    }

    fn is_empty(&self) -> bool {
        self.owner.trim().is_empty() || self.name.trim().is_empty()
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{REF_DELIM}{}", self.owner, self.name)
    }
}

impl std::str::FromStr for ArtifactRef {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, name) = s
            .split_once(REF_DELIM)
            .ok_or_else(|| ValidationError::InvalidReference(s.to_owned()))?;
        let artifact = Self::new(owner, name);
        if artifact.is_empty() || name.contains(REF_DELIM) {
            return Err(ValidationError::InvalidReference(s.to_owned()));
        }
        Ok(artifact)
    }
}

impl TryFrom<String> for ArtifactRef {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ArtifactRef> for String {
    fn from(artifact: ArtifactRef) -> String {
        artifact.repo_id()
    }
}

/// CPU and memory limits for one job. Requests are declared at half the limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub cpu_millis: u32,
    pub memory_mib: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_millis: DEFAULT_CPU_MILLIS,
            memory_mib: DEFAULT_MEMORY_MIB,
        }
    }
}

impl ResourceLimits {
    pub fn cpu_request_millis(&self) -> u32 {
        (self.cpu_millis / 2).max(1)
    }

    pub fn memory_request_mib(&self) -> u32 {
        (self.memory_mib / 2).max(1)
    }
}

/// A request to run one optimizer against one problem.
/// Never mutated after it has been submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub problem: ArtifactRef,
    pub optimizer: ArtifactRef,
    #[serde(default)]
    pub problem_params: Params,
    #[serde(default)]
    pub optimizer_params: Params,
    /// Optional platform dataset bound to the problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(default)]
    pub resources: ResourceLimits,
    /// Wall-clock limit, enforced by the cluster as the job deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ExecutionRequest {
    /// Create a request with empty parameters and default limits.
    pub fn new(problem: ArtifactRef, optimizer: ArtifactRef) -> Self {
        Self {
            problem,
            optimizer,
            problem_params: Params::new(),
            optimizer_params: Params::new(),
            dataset: None,
            resources: ResourceLimits::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Check everything the submitter relies on before it builds a job.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.problem.is_empty() {
            return Err(ValidationError::EmptyReference("Problem"));
        }
        if self.optimizer.is_empty() {
            return Err(ValidationError::EmptyReference("Optimizer"));
        }
        if self.problem_params.keys().any(|k| k.is_empty()) {
            return Err(ValidationError::EmptyParamKey("Problem"));
        }
        if self.optimizer_params.keys().any(|k| k.is_empty()) {
            return Err(ValidationError::EmptyParamKey("Optimizer"));
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout);
        }
        if self.resources.cpu_millis == 0 || self.resources.memory_mib == 0 {
            return Err(ValidationError::ZeroResources);
        }
        Ok(())
    }
}
