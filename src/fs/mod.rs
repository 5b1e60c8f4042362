use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const LOG_FILE: &str = "job.log";
const SCRIPT_FILE: &str = "command.txt";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Specified work directory \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
}

/// All file operations of the local cluster go through this struct.
///
/// All destructive operations check that the path in question is a child of the
/// single whitelisted prefix (the work dir), otherwise they will not be performed.
/// Note that the jobs themselves can break this rule; they run as ordinary
/// processes of the current user.
#[derive(Debug, Clone)]
pub struct Fs {
    /// The directory we are allowed to modify
    work_dir: PathBuf,
}

impl Fs {
    /// Create a new `Fs` rooted at the given work directory.
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Check whether the work dir exists, and create it if not.
    pub fn ensure_work_dir_exists(&mut self) -> Result<()> {
        if !self.work_dir.exists() {
            log::info!("Work directory {:?} doesn't exist. Creating.", self.work_dir);
            fs::create_dir_all(&self.work_dir).context("creating work directory")?;
        } else if !self.work_dir.is_dir() {
            return Err(Error::NotDirectory(self.work_dir.display().to_string()).into());
        }
        self.work_dir = self.work_dir.canonicalize()?;
        Ok(())
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// $WORK_DIR/job_name
    pub fn job_dir(&self, job: &str) -> PathBuf {
        self.work_dir.join(job)
    }

    /// $WORK_DIR/job_name/job.log
    pub fn log_file(&self, job: &str) -> PathBuf {
        self.job_dir(job).join(LOG_FILE)
    }

    /// $WORK_DIR/job_name/command.txt
    pub fn command_file(&self, job: &str) -> PathBuf {
        self.job_dir(job).join(SCRIPT_FILE)
    }

    /// Create a directory (uses `std::fs::create_dir_all`, so an entire tree of dirs can be created).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::create_dir_all(path).context("creating dir")?;
        Ok(())
    }

    /// Open a file for appending, creating it if needed.
    /// Several handles opened this way can safely write to the same file.
    pub fn open_append<T: AsRef<Path>>(&self, path: T) -> Result<fs::File> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        let f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("opening file for append")?;
        Ok(f)
    }

    /// Write entire str to a file.
    pub fn write_file<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::write(path, text).context("writing file")?;
        Ok(())
    }

    /// Recursively delete a directory.
    pub fn delete_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_dir_all(path).context("deleting dir")?;
        Ok(())
    }

    /// Read an entire file, replacing invalid UTF-8 sequences.
    pub fn read_lossy<T: AsRef<Path>>(&self, path: T) -> Result<String> {
        let bytes = fs::read(path.as_ref()).context("reading file")?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn check_whitelist(&self, path: &Path) -> Result<()> {
        if path.starts_with(&self.work_dir) && path != self.work_dir {
            Ok(())
        } else {
            Err(Error::NotWhitelisted(path.display().to_string()).into())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_whitelist() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fs = Fs::new(dir.path());
        fs.ensure_work_dir_exists()?;

        let job = fs.job_dir("job-1");
        fs.create_dir(&job)?;
        fs.write_file(fs.log_file("job-1"), "hello\n")?;
        {
            use std::io::Write;
            let mut a = fs.open_append(fs.log_file("job-1"))?;
            let mut b = fs.open_append(fs.log_file("job-1"))?;
            a.write_all(b"out\n")?;
            b.write_all(b"err\n")?;
        }
        assert_eq!(fs.read_lossy(fs.log_file("job-1"))?, "hello\nout\nerr\n");

        assert!(fs.delete_dir("/tmp").is_err());
        assert!(fs.delete_dir(fs.work_dir().to_path_buf()).is_err());
        fs.delete_dir(&job)?;
        assert!(!job.exists());
        Ok(())
    }

    #[test]
    fn test_creates_missing_work_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("a/b");
        let mut fs = Fs::new(&nested);
        fs.ensure_work_dir_exists()?;
        assert!(nested.is_dir());
        Ok(())
    }
}
