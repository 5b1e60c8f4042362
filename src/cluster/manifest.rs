use serde_json::{json, Map, Value};

use super::JobSpec;

const RUNNER_CONTAINER: &str = "runner";

/// Render a spec as a Kubernetes `batch/v1` Job.
///
/// The deadline and ttl are set on the Job itself, so the cluster stops and
/// reclaims it even if the process that submitted it is gone.
pub fn render_manifest(spec: &JobSpec) -> Value {
    let labels: Map<String, Value> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|(k, v)| json!({"name": k, "value": v}))
        .collect();
    let res = &spec.resources;

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": spec.name,
            "labels": labels,
        },
        "spec": {
            "activeDeadlineSeconds": spec.active_deadline_secs,
            "ttlSecondsAfterFinished": spec.ttl_after_finished_secs,
            "backoffLimit": 0,
            "template": {
                "metadata": {"labels": labels},
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": RUNNER_CONTAINER,
                        "image": spec.image,
                        "command": spec.command,
                        "env": env,
                        "resources": {
                            "requests": {
                                "cpu": format!("{}m", res.cpu_request_millis()),
                                "memory": format!("{}Mi", res.memory_request_mib()),
                            },
                            "limits": {
                                "cpu": format!("{}m", res.cpu_millis),
                                "memory": format!("{}Mi", res.memory_mib),
                            },
                        },
                    }],
                },
            },
        },
    })
}
