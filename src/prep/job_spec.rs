use serde_json::Value;

use protocol::{ExecutionId, ExecutionRequest, Params};

use super::runner_script::*;
use crate::cluster::JobSpec;

pub const DEFAULT_IMAGE: &str = "qubots/playground:latest";
pub const DEFAULT_HUB_URL: &str = "https://hub.rastion.com";
const DEFAULT_PYTHON: &str = "python3";
/// Finished jobs linger this long before the cluster reclaims them.
pub const DEFAULT_TTL_AFTER_FINISHED_SECS: u64 = 300;

/// The parts of a job that are the same for every request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    /// Generic runtime image shared by every job.
    pub image: String,
    /// Interpreter the runner script is handed to.
    pub python: String,
    /// Base URL artifacts are cloned from.
    pub hub_url: String,
    /// Where the runner caches artifacts; the job's own directory when unset.
    pub cache_dir: Option<String>,
    pub convention: LoadingConvention,
    pub ttl_after_finished_secs: u64,
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_owned(),
            python: DEFAULT_PYTHON.to_owned(),
            hub_url: DEFAULT_HUB_URL.to_owned(),
            cache_dir: None,
            convention: LoadingConvention::default(),
            ttl_after_finished_secs: DEFAULT_TTL_AFTER_FINISHED_SECS,
        }
    }
}

impl JobTemplate {
    /// Fill in the template for one request.
    /// The script text is identical for every request with the same convention;
    /// the request only shows up in the environment.
    pub fn build(&self, name: &str, id: &ExecutionId, request: &ExecutionRequest) -> JobSpec {
        let mut script = String::with_capacity(6144);
        RunnerScriptBuilder::new(&mut script).write_script(self.convention);

        let mut env = vec![
            (ENV_PROBLEM_REPO.to_owned(), request.problem.repo_id()),
            (ENV_OPTIMIZER_REPO.to_owned(), request.optimizer.repo_id()),
            (ENV_PROBLEM_PARAMS.to_owned(), params_json(&request.problem_params)),
            (ENV_OPTIMIZER_PARAMS.to_owned(), params_json(&request.optimizer_params)),
            (ENV_HUB_URL.to_owned(), self.hub_url.clone()),
            (ENV_EXECUTION_ID.to_owned(), id.to_string()),
        ];
        if let Some(dataset) = &request.dataset {
            env.push((ENV_DATASET_ID.to_owned(), dataset.clone()));
        }
        if let Some(cache_dir) = &self.cache_dir {
            env.push((ENV_CACHE_DIR.to_owned(), cache_dir.clone()));
        }

        JobSpec {
            name: name.to_owned(),
            image: self.image.clone(),
            command: vec![
                self.python.clone(),
                "-u".to_owned(),
                "-c".to_owned(),
                script,
            ],
            env,
            resources: request.resources,
            active_deadline_secs: request.timeout_secs,
            ttl_after_finished_secs: self.ttl_after_finished_secs,
            labels: vec![
                ("app".to_owned(), "qubots-runner".to_owned()),
                ("qubots/execution-id".to_owned(), id.to_string()),
                ("qubots/convention".to_owned(), self.convention.to_string()),
            ],
        }
    }
}

fn params_json(params: &Params) -> String {
    Value::Object(params.clone()).to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use protocol::ArtifactRef;
    use serde_json::json;

    fn request() -> ExecutionRequest {
        let mut req = ExecutionRequest::new(
            ArtifactRef::new("alice", "tsp-50"),
            ArtifactRef::new("bob", "sa-optimizer"),
        );
        req.optimizer_params
            .insert("iterations".to_owned(), json!(1000));
        req.timeout_secs = 120;
        req
    }

    fn env<'a>(spec: &'a JobSpec, key: &str) -> Option<&'a str> {
        spec.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_build() {
        let template = JobTemplate::default();
        let id = ExecutionId::from("exec-1");
        let spec = template.build("qubots-20260101000000-abcd1234", &id, &request());

        assert_eq!(spec.active_deadline_secs, 120);
        assert_eq!(spec.command[0], "python3");
        assert_eq!(spec.command[3], runner_script(LoadingConvention::Hub));
        assert_eq!(env(&spec, ENV_PROBLEM_REPO), Some("alice/tsp-50"));
        assert_eq!(env(&spec, ENV_OPTIMIZER_REPO), Some("bob/sa-optimizer"));
        assert_eq!(env(&spec, ENV_PROBLEM_PARAMS), Some("{}"));
        assert_eq!(
            env(&spec, ENV_OPTIMIZER_PARAMS),
            Some(r#"{"iterations":1000}"#)
        );
        assert_eq!(env(&spec, ENV_EXECUTION_ID), Some("exec-1"));
        assert_eq!(env(&spec, ENV_DATASET_ID), None);
        assert_eq!(env(&spec, ENV_CACHE_DIR), None);
        assert!(spec.check_well_formed().is_ok());
    }

    #[test]
    fn test_request_values_stay_out_of_script() {
        let mut req = request();
        req.problem_params
            .insert("name".to_owned(), json!("\"; import os; os.system('rm -rf /') #"));
        req.dataset = Some("ds-42".to_owned());
        let template = JobTemplate {
            convention: LoadingConvention::Legacy,
            cache_dir: Some("/cache".to_owned()),
            ..Default::default()
        };
        let spec = template.build("job", &ExecutionId::from("exec-2"), &req);

        let script = &spec.command[3];
        assert_eq!(script, &runner_script(LoadingConvention::Legacy));
        assert!(!script.contains("alice"));
        assert!(!script.contains("rm -rf"));
        assert_eq!(env(&spec, ENV_DATASET_ID), Some("ds-42"));
        assert_eq!(env(&spec, ENV_CACHE_DIR), Some("/cache"));
        let params: Value = serde_json::from_str(env(&spec, ENV_PROBLEM_PARAMS).unwrap()).unwrap();
        assert_eq!(params["name"], "\"; import os; os.system('rm -rf /') #");
    }
}
