use std::fmt;
use std::str::FromStr;

/// "owner/name" of the problem artifact.
pub const ENV_PROBLEM_REPO: &str = "QUBOTS_PROBLEM_REPO";
/// "owner/name" of the optimizer artifact.
pub const ENV_OPTIMIZER_REPO: &str = "QUBOTS_OPTIMIZER_REPO";
/// JSON object of problem parameter overrides.
pub const ENV_PROBLEM_PARAMS: &str = "QUBOTS_PROBLEM_PARAMS";
/// JSON object of optimizer parameter overrides.
pub const ENV_OPTIMIZER_PARAMS: &str = "QUBOTS_OPTIMIZER_PARAMS";
/// Optional platform dataset bound to the problem.
pub const ENV_DATASET_ID: &str = "QUBOTS_DATASET_ID";
pub const ENV_HUB_URL: &str = "QUBOTS_HUB_URL";
pub const ENV_CACHE_DIR: &str = "QUBOTS_CACHE_DIR";
pub const ENV_EXECUTION_ID: &str = "QUBOTS_EXECUTION_ID";

/// How the runner script turns an artifact reference into live objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingConvention {
    /// `AutoProblem.from_repo("owner/name", ...)`, cached under the cache dir.
    #[default]
    Hub,
    /// Clone into `<cache>/problems|optimizers/<name>` and load from that path.
    Legacy,
}

impl fmt::Display for LoadingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadingConvention::Hub => write!(f, "hub"),
            LoadingConvention::Legacy => write!(f, "legacy"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown loading convention \"{0}\" (expected \"hub\" or \"legacy\")")]
pub struct UnknownConvention(String);

impl FromStr for LoadingConvention {
    type Err = UnknownConvention;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hub" => Ok(LoadingConvention::Hub),
            "legacy" => Ok(LoadingConvention::Legacy),
            _ => Err(UnknownConvention(s.to_owned())),
        }
    }
}

/// Utility for building the contents of the python runner script.
/// Note that it modifies a String reference held internally;
/// read that String to get the script's contents.
///
/// The script is assembled from fixed sections only. Everything that varies
/// per request reaches the script through environment variables.
#[derive(Debug)]
pub struct RunnerScriptBuilder<'a> {
    strbuf: &'a mut String,
}

impl<'a> RunnerScriptBuilder<'a> {
    pub fn new(strbuf: &'a mut String) -> Self {
        Self { strbuf }
    }
}

impl RunnerScriptBuilder<'_> {
    /// Write a complete script for the given convention.
    pub fn write_script(&mut self, convention: LoadingConvention) {
        self.write_prefix();
        self.write_setup(convention);
        self.write_loader(convention);
        self.write_main();
    }

    /// imports, inputs read from the environment, output helpers
    pub fn write_prefix(&mut self) {
        self.strbuf.clear();
        self.strbuf.push_str(PREFIX);
    }

    /// fetch artifacts into the cache and install their requirements
    pub fn write_setup(&mut self, convention: LoadingConvention) {
        self.strbuf.push_str(SETUP);
        match convention {
            LoadingConvention::Hub => self.strbuf.push_str(HUB_DESTINATIONS),
            LoadingConvention::Legacy => self.strbuf.push_str(LEGACY_DESTINATIONS),
        }
    }

    /// instantiate problem and optimizer
    pub fn write_loader(&mut self, convention: LoadingConvention) {
        match convention {
            LoadingConvention::Hub => self.strbuf.push_str(HUB_LOADER),
            LoadingConvention::Legacy => self.strbuf.push_str(LEGACY_LOADER),
        }
    }

    /// run, then print exactly one delimited result
    pub fn write_main(&mut self) {
        self.strbuf.push_str(MAIN);
    }
}

/// Convenience wrapper for a one-off script.
pub fn runner_script(convention: LoadingConvention) -> String {
    let mut script = String::with_capacity(6144);
    RunnerScriptBuilder::new(&mut script).write_script(convention);
    script
}

const PREFIX: &str = r#"import json
import math
import os
import subprocess
import sys
import time
import traceback

RESULT_START = "QUBOTS_RESULT_START"
RESULT_END = "QUBOTS_RESULT_END"
PROGRESS_PREFIX = "QUBOTS_PROGRESS "


def warn(msg):
    print("WARNING: " + msg, flush=True)


def progress(msg):
    print(PROGRESS_PREFIX + msg, flush=True)


def env_json(name):
    raw = os.environ.get(name, "")
    if not raw:
        return {}
    try:
        value = json.loads(raw)
    except ValueError as e:
        warn("ignoring invalid JSON in %s: %s" % (name, e))
        return {}
    if not isinstance(value, dict):
        warn("ignoring %s: not a JSON object" % name)
        return {}
    return value


PROBLEM_REPO = os.environ.get("QUBOTS_PROBLEM_REPO", "")
OPTIMIZER_REPO = os.environ.get("QUBOTS_OPTIMIZER_REPO", "")
PROBLEM_PARAMS = env_json("QUBOTS_PROBLEM_PARAMS")
OPTIMIZER_PARAMS = env_json("QUBOTS_OPTIMIZER_PARAMS")
DATASET_ID = os.environ.get("QUBOTS_DATASET_ID", "")
HUB_URL = os.environ.get("QUBOTS_HUB_URL", "").rstrip("/")
CACHE_DIR = os.environ.get("QUBOTS_CACHE_DIR") or os.path.join(os.getcwd(), ".qubots-cache")
EXECUTION_ID = os.environ.get("QUBOTS_EXECUTION_ID", "")


def finite(value):
    if isinstance(value, float) and not math.isfinite(value):
        return None
    if isinstance(value, dict):
        return {k: finite(v) for k, v in value.items()}
    if isinstance(value, (list, tuple)):
        return [finite(v) for v in value]
    return value


def emit(result):
    try:
        doc = json.dumps(finite(result), default=str, allow_nan=False)
    except (TypeError, ValueError) as e:
        doc = json.dumps({
            "success": False,
            "error_message": "result is not serializable: %s" % e,
            "error_type": "SerializationError",
        })
    print(RESULT_START)
    print(doc)
    print(RESULT_END, flush=True)

"#;

const SETUP: &str = r#"
def run_quiet(args):
    try:
        proc = subprocess.run(args, capture_output=True, text=True)
    except OSError as e:
        return str(e)
    if proc.returncode != 0:
        return proc.stderr.strip() or ("exit status %d" % proc.returncode)
    return None


def fetch(repo_id, dest):
    if os.path.isdir(dest):
        progress("using cached " + repo_id)
        return
    os.makedirs(os.path.dirname(dest), exist_ok=True)
    progress("cloning " + repo_id)
    err = run_quiet(["git", "clone", "--depth", "1", "%s/%s.git" % (HUB_URL, repo_id), dest])
    if err:
        warn("unable to clone %s: %s" % (repo_id, err))
        return
    requirements = os.path.join(dest, "requirements.txt")
    if os.path.isfile(requirements):
        progress("installing requirements of " + repo_id)
        err = run_quiet([sys.executable, "-m", "pip", "install", "-q", "-r", requirements])
        if err:
            warn("unable to install requirements of %s: %s" % (repo_id, err))


def setup():
    if not PROBLEM_REPO or not OPTIMIZER_REPO:
        raise ValueError("QUBOTS_PROBLEM_REPO and QUBOTS_OPTIMIZER_REPO are required")
    fetch(PROBLEM_REPO, problem_dir())
    fetch(OPTIMIZER_REPO, optimizer_dir())

"#;

const HUB_DESTINATIONS: &str = r#"
def problem_dir():
    return os.path.join(CACHE_DIR, *PROBLEM_REPO.split("/"))


def optimizer_dir():
    return os.path.join(CACHE_DIR, *OPTIMIZER_REPO.split("/"))

"#;

const LEGACY_DESTINATIONS: &str = r#"
def problem_dir():
    return os.path.join(CACHE_DIR, "problems", PROBLEM_REPO.split("/")[-1])


def optimizer_dir():
    return os.path.join(CACHE_DIR, "optimizers", OPTIMIZER_REPO.split("/")[-1])

"#;

const HUB_LOADER: &str = r#"
def problem_overrides():
    params = dict(PROBLEM_PARAMS)
    if DATASET_ID:
        params["dataset_source"] = "platform"
        params["dataset_id"] = DATASET_ID
    return params


def load():
    from qubots import AutoOptimizer, AutoProblem

    progress("loading problem " + PROBLEM_REPO)
    problem = AutoProblem.from_repo(PROBLEM_REPO, override_params=problem_overrides())
    progress("loading optimizer " + OPTIMIZER_REPO)
    optimizer = AutoOptimizer.from_repo(OPTIMIZER_REPO, override_params=OPTIMIZER_PARAMS)
    return problem, optimizer

"#;

const LEGACY_LOADER: &str = r#"
def problem_overrides():
    params = dict(PROBLEM_PARAMS)
    if DATASET_ID:
        params["dataset_source"] = "platform"
        params["dataset_id"] = DATASET_ID
    return params


def load():
    for d in (os.path.dirname(problem_dir()), os.path.dirname(optimizer_dir())):
        if d not in sys.path:
            sys.path.insert(0, d)
    from qubots import AutoOptimizer, AutoProblem

    progress("loading problem from " + problem_dir())
    problem = AutoProblem.from_repo(problem_dir(), override_params=problem_overrides())
    progress("loading optimizer from " + optimizer_dir())
    optimizer = AutoOptimizer.from_repo(optimizer_dir(), override_params=OPTIMIZER_PARAMS)
    return problem, optimizer

"#;

const MAIN: &str = r#"
def run(started):
    setup()
    problem, optimizer = load()
    progress("optimizing")
    result = optimizer.optimize(problem)
    elapsed = time.time() - started
    return {
        "success": True,
        "best_value": getattr(result, "best_value", None),
        "best_solution": getattr(result, "best_solution", None),
        "runtime_seconds": getattr(result, "runtime_seconds", None) or elapsed,
        "iterations": getattr(result, "iterations", None),
        "termination_reason": getattr(result, "termination_reason", "completed"),
        "execution_time": elapsed,
        "problem": PROBLEM_REPO,
        "optimizer": OPTIMIZER_REPO,
        "execution_id": EXECUTION_ID,
    }


def main():
    started = time.time()
    try:
        output = run(started)
        code = 0
    except Exception as e:
        output = {
            "success": False,
            "error_message": str(e),
            "error_type": type(e).__name__,
            "error_trace": traceback.format_exc(),
            "execution_time": time.time() - started,
        }
        code = 1
    emit(output)
    sys.exit(code)


if __name__ == "__main__":
    main()
"#;

#[cfg(test)]
mod test {
    use super::*;
    use protocol::{PROGRESS_PREFIX, RESULT_END, RESULT_START};

    #[test]
    fn test_script_uses_shared_markers() {
        let script = runner_script(LoadingConvention::Hub);
        assert!(script.contains(&format!("RESULT_START = \"{RESULT_START}\"")));
        assert!(script.contains(&format!("RESULT_END = \"{RESULT_END}\"")));
        assert!(script.contains(&format!("PROGRESS_PREFIX = \"{PROGRESS_PREFIX}\"")));
    }

    #[test]
    fn test_script_reads_every_input_from_env() {
        let script = runner_script(LoadingConvention::Legacy);
        for var in [
            ENV_PROBLEM_REPO,
            ENV_OPTIMIZER_REPO,
            ENV_PROBLEM_PARAMS,
            ENV_OPTIMIZER_PARAMS,
            ENV_DATASET_ID,
            ENV_HUB_URL,
            ENV_CACHE_DIR,
            ENV_EXECUTION_ID,
        ] {
            assert!(script.contains(&format!("\"{var}\"")), "{var} not read");
        }
    }

    #[test]
    fn test_conventions_differ_only_in_loading() {
        let hub = runner_script(LoadingConvention::Hub);
        let legacy = runner_script(LoadingConvention::Legacy);
        assert!(hub.contains("from_repo(PROBLEM_REPO"));
        assert!(!hub.contains("\"problems\""));
        assert!(legacy.contains("\"problems\""));
        assert!(legacy.contains("sys.path.insert"));
        assert!(hub.starts_with(PREFIX) && legacy.starts_with(PREFIX));
        assert!(hub.ends_with(MAIN) && legacy.ends_with(MAIN));
    }

    #[test]
    fn test_non_finite_values_emitted_as_null() {
        // needs a python interpreter on the test machine:
        let program = format!(
            "{PREFIX}\nemit({{\"success\": True, \"best_value\": float(\"inf\"), \"history\": [1.5, float(\"nan\")]}})\n"
        );
        let Ok(output) = std::process::Command::new("python3")
            .args(["-c", &program])
            .output()
        else {
            eprintln!("python3 not found; skipping");
            return;
        };
        assert!(output.status.success());
        let logs = String::from_utf8_lossy(&output.stdout);
        let result = protocol::extract_result(&logs);
        assert!(result.success, "{result:?}");
        assert_eq!(result.best_value, None);
        assert_eq!(result.extra["history"], serde_json::json!([1.5, null]));
    }

    #[test]
    fn test_builder_reuses_buffer() {
        let mut buf = String::from("stale contents");
        RunnerScriptBuilder::new(&mut buf).write_script(LoadingConvention::Hub);
        assert!(!buf.contains("stale"));
        assert_eq!(buf, runner_script(LoadingConvention::Hub));
    }

    #[test]
    fn test_parse_convention() {
        assert_eq!("hub".parse::<LoadingConvention>().unwrap(), LoadingConvention::Hub);
        assert_eq!(
            "legacy".parse::<LoadingConvention>().unwrap(),
            LoadingConvention::Legacy
        );
        assert!("git".parse::<LoadingConvention>().is_err());
        assert_eq!(LoadingConvention::default().to_string(), "hub");
    }
}
