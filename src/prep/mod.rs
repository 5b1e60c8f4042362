/// Generates the python program every job runs.
mod runner_script;
pub use runner_script::{
    runner_script, LoadingConvention, RunnerScriptBuilder, UnknownConvention, ENV_CACHE_DIR,
    ENV_DATASET_ID, ENV_EXECUTION_ID, ENV_HUB_URL, ENV_OPTIMIZER_PARAMS, ENV_OPTIMIZER_REPO,
    ENV_PROBLEM_PARAMS, ENV_PROBLEM_REPO,
};

/// Turns a request into a complete job spec.
mod job_spec;
pub use job_spec::{JobTemplate, DEFAULT_HUB_URL, DEFAULT_IMAGE, DEFAULT_TTL_AFTER_FINISHED_SECS};
