use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::args::Args;
use crate::cluster::LocalClusterConfig;
use crate::exec::{ExecutorConfig, WaitConfig};
use crate::prep::JobTemplate;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Nothing to run: specify --request or --workflow")]
    NoInput,
    #[error("Input file \"{0}\" does not exist")]
    MissingInput(String),
    #[error("--poll-interval must be at least 1 second")]
    ZeroPollInterval,
    #[error("--max-jobs must be at least 1")]
    ZeroMaxJobs,
}

/// What the user asked us to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Request(PathBuf),
    Workflow(PathBuf),
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. defaults are added in.
#[derive(Debug)]
pub struct Settings {
    pub input: Input,
    pub work_dir: PathBuf,
    pub template: JobTemplate,
    pub wait: WaitConfig,
    pub retention: Duration,
    pub max_jobs: usize,
    pub emit_manifest: bool,
    pub verbose: u8,
}

impl Settings {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            template: self.template.clone(),
            wait: self.wait.clone(),
            ..Default::default()
        }
    }

    pub fn cluster_config(&self) -> LocalClusterConfig {
        LocalClusterConfig {
            work_dir: self.work_dir.clone(),
            max_active_jobs: self.max_jobs,
        }
    }
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let input = match (args.request, args.workflow) {
            (Some(path), _) => Input::Request(existing_file(path)?),
            (None, Some(path)) => Input::Workflow(existing_file(path)?),
            (None, None) => return Err(Error::NoInput.into()),
        };

        if args.poll_interval == 0 {
            return Err(Error::ZeroPollInterval.into());
        }
        if args.max_jobs == 0 {
            return Err(Error::ZeroMaxJobs.into());
        }

        let template = JobTemplate {
            image: args.image,
            hub_url: args.hub_url,
            cache_dir: args.cache_dir,
            convention: args.convention,
            ..Default::default()
        };
        let wait = WaitConfig {
            poll_interval: Duration::from_secs(args.poll_interval),
            budget: args.wait_budget.map(Duration::from_secs),
            ..Default::default()
        };

        Ok(Self {
            input,
            work_dir: PathBuf::from(&args.work_dir),
            template,
            wait,
            retention: Duration::from_secs(args.retention),
            max_jobs: args.max_jobs,
            emit_manifest: args.emit_manifest,
            verbose: args.verbose,
        })
    }
}

fn existing_file(path: String) -> Result<PathBuf> {
    let path = PathBuf::from(path);
    if path.is_file() {
        Ok(path.canonicalize()?)
    } else {
        Err(Error::MissingInput(path.display().to_string()).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    use crate::prep::LoadingConvention;

    #[test]
    fn test_from_args() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        let path = file.path().to_str().unwrap();
        let args = Args::try_parse_from([
            "qr",
            "--request",
            path,
            "--convention",
            "legacy",
            "--wait-budget",
            "60",
            "-vv",
        ])?;
        let settings = Settings::try_from(args)?;

        assert_eq!(settings.input, Input::Request(file.path().canonicalize()?));
        assert_eq!(settings.template.convention, LoadingConvention::Legacy);
        assert_eq!(settings.wait.budget, Some(Duration::from_secs(60)));
        assert_eq!(settings.wait.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.retention, Duration::from_secs(600));
        assert_eq!(settings.verbose, 2);
        assert_eq!(settings.cluster_config().max_active_jobs, 4);
        Ok(())
    }

    #[test]
    fn test_bad_args() -> Result<()> {
        assert!(Args::try_parse_from(["qr"]).is_err());
        assert!(Args::try_parse_from(["qr", "-r", "a.json", "-w", "b.json"]).is_err());
        assert!(Args::try_parse_from(["qr", "-r", "a.json", "--convention", "git"]).is_err());

        let args = Args::try_parse_from(["qr", "-r", "/definitely/missing.json"])?;
        assert!(Settings::try_from(args).is_err());

        let file = tempfile::NamedTempFile::new()?;
        let path = file.path().to_str().unwrap();
        let args = Args::try_parse_from(["qr", "-r", path, "--poll-interval", "0"])?;
        assert!(Settings::try_from(args).is_err());
        Ok(())
    }
}
