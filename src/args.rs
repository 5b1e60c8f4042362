use clap::{ArgAction, ArgGroup, Parser};

use crate::prep::{LoadingConvention, DEFAULT_HUB_URL, DEFAULT_IMAGE};

const CMD_NAME: &str = "qr";
const DEFAULT_WORK_DIR: &str = "qubots-jobs";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_RETENTION_SECS: u64 = 600;
const DEFAULT_MAX_JOBS: usize = 4;

/// Stores our command-line args format.
#[derive(Parser)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
#[command(group(ArgGroup::new("input").required(true).args(["request", "workflow"])))]
pub struct Args {
    /// Execution request to run (JSON file)
    #[arg(short, long, value_name = "FILE")]
    pub request: Option<String>,

    /// Workflow graph to run (JSON file)
    #[arg(short, long, value_name = "FILE")]
    pub workflow: Option<String>,

    /// Directory local jobs run in
    #[arg(short = 'd', long, value_name = "DIR", default_value = DEFAULT_WORK_DIR)]
    #[arg(env = "QUBOTS_WORK_DIR")]
    pub work_dir: String,

    /// Runtime image declared in job specs
    #[arg(long, value_name = "IMAGE", default_value = DEFAULT_IMAGE)]
    #[arg(env = "QUBOTS_IMAGE")]
    pub image: String,

    /// Where artifacts are cloned from
    #[arg(long, value_name = "URL", default_value = DEFAULT_HUB_URL)]
    #[arg(env = "QUBOTS_HUB_URL")]
    pub hub_url: String,

    /// Artifact cache shared by jobs (default: each job's own directory)
    #[arg(long, value_name = "DIR")]
    #[arg(env = "QUBOTS_CACHE_DIR")]
    pub cache_dir: Option<String>,

    /// How jobs load artifacts: hub or legacy
    #[arg(long, value_name = "CONVENTION", default_value = "hub")]
    pub convention: LoadingConvention,

    /// Seconds between job status checks
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval: u64,

    /// Give up waiting after this many seconds (default: job timeout plus a grace period)
    #[arg(long, value_name = "SECS")]
    pub wait_budget: Option<u64>,

    /// Seconds an uncollected result is kept
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_RETENTION_SECS)]
    pub retention: u64,

    /// Maximum number of jobs running at once
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_JOBS)]
    pub max_jobs: usize,

    /// Print the Kubernetes Job manifest(s) instead of running anything
    #[arg(long)]
    pub emit_manifest: bool,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
