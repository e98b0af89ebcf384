//! Per-run history and log directories.
//!
//! Every run gets a directory under the per-user history root, keyed by a
//! lexicographically-sortable unique id. The root also holds the
//! `history.log` index (one tab-separated record per run) and a `last`
//! symlink pointing at the newest run directory.
//!
//! ```text
//! $HOME/.seqpipe/history/
//!   history.log            # id, host, start-time, full-command-line
//!   last -> <id>/
//!   <id>/
//!     sysinfo.txt
//!     pipeline.txt
//!     <step-id>.log        # written by the launcher
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::system;

/// A failure preparing or writing run records. These abort the run before
/// any step starts.
#[derive(Debug, thiserror::Error)]
pub enum RunLogError {
    #[error("cannot create run directory '{}': {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write history log '{}': {source}", .path.display())]
    WriteHistory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot record run info '{}': {source}", .path.display())]
    WriteInfo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Handle to one run's directory under the history root.
#[derive(Debug, Clone)]
pub struct RunLog {
    root: PathBuf,
    id: String,
    run_dir: PathBuf,
}

impl RunLog {
    /// The per-user default history root: `$HOME/.seqpipe/history`.
    pub fn default_root() -> PathBuf {
        system::home_dir().join(".seqpipe").join("history")
    }

    /// Path of the history index under a root.
    pub fn history_path(root: &Path) -> PathBuf {
        root.join("history.log")
    }

    /// Allocate a unique run id and create its directory, creating the
    /// history root on first use.
    pub fn prepare(root: PathBuf) -> Result<Self, RunLogError> {
        fs::create_dir_all(&root).map_err(|source| RunLogError::CreateDir {
            path: root.clone(),
            source,
        })?;

        // Two runs from the same process in the same second would collide;
        // disambiguate with a sequence suffix.
        let base = unique_id();
        let mut id = base.clone();
        let mut seq = 1u32;
        loop {
            let run_dir = root.join(&id);
            match fs::create_dir(&run_dir) {
                Ok(()) => return Ok(Self { root, id, run_dir }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    seq += 1;
                    id = format!("{base}-{seq}");
                }
                Err(source) => {
                    return Err(RunLogError::CreateDir {
                        path: run_dir,
                        source,
                    });
                }
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Log file path for one step.
    pub fn step_log_path(&self, step_id: &str) -> PathBuf {
        self.run_dir.join(format!("{}.log", step_id))
    }

    /// Append this run's record to the history index.
    ///
    /// One short single-writer append per run; no locking needed.
    pub fn append_history(&self) -> Result<(), RunLogError> {
        let path = Self::history_path(&self.root);
        let record = format!(
            "{}\t{}\t{}\t{}\n",
            self.id,
            system::hostname(),
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            system::full_command_line(),
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RunLogError::WriteHistory {
                path: path.clone(),
                source,
            })?;
        file.write_all(record.as_bytes())
            .map_err(|source| RunLogError::WriteHistory { path, source })
    }

    /// Repoint the `last` symlink at this run's directory.
    ///
    /// Failure is non-fatal: the run proceeds with a warning.
    pub fn link_last(&self) {
        #[cfg(unix)]
        {
            let link = self.root.join("last");
            if link.symlink_metadata().is_ok() {
                if let Err(e) = fs::remove_file(&link) {
                    tracing::warn!("cannot remove old 'last' symlink: {e}");
                    return;
                }
            }
            if let Err(e) = std::os::unix::fs::symlink(&self.id, &link) {
                tracing::warn!("cannot create 'last' symlink: {e}");
            }
        }
    }

    /// Write `sysinfo.txt` (host, command line, cwd, pid) and
    /// `pipeline.txt` (the effective pipeline) into the run directory.
    pub fn record_sysinfo(&self, pipeline_text: &str) -> Result<(), RunLogError> {
        let sysinfo_path = self.run_dir.join("sysinfo.txt");
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "?".to_string());
        let sysinfo = format!(
            "host: {}\ncmdline: {}\ncwd: {}\npid: {}\n",
            system::hostname(),
            system::full_command_line(),
            cwd,
            std::process::id(),
        );
        fs::write(&sysinfo_path, sysinfo).map_err(|source| RunLogError::WriteInfo {
            path: sysinfo_path,
            source,
        })?;

        let pipeline_path = self.run_dir.join("pipeline.txt");
        fs::write(&pipeline_path, pipeline_text).map_err(|source| RunLogError::WriteInfo {
            path: pipeline_path,
            source,
        })
    }
}

/// A short lexicographically-sortable run id:
/// `YYYYMMDD-HHMMSS-<hostname>-<pid>`.
fn unique_id() -> String {
    format!(
        "{}-{}-{}",
        Local::now().format("%Y%m%d-%H%M%S"),
        system::hostname(),
        std::process::id(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_creates_root_and_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("history");

        let log = RunLog::prepare(root.clone()).unwrap();
        assert!(root.is_dir());
        assert_eq!(log.root(), root);
        assert!(log.run_dir().is_dir());
        assert!(log.run_dir().starts_with(&root));
        assert!(!log.id().is_empty());
    }

    #[test]
    fn unique_id_shape() {
        let id = unique_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert!(parts.len() >= 4, "id should have at least 4 parts: {id}");
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
    }

    #[test]
    fn append_history_appends_one_record_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("history");

        let first = RunLog::prepare(root.clone()).unwrap();
        first.append_history().unwrap();
        let second = RunLog::prepare(root.clone()).unwrap();
        second.append_history().unwrap();

        let text = fs::read_to_string(RunLog::history_path(&root)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(first.id()));
        assert!(lines[1].starts_with(second.id()));
        assert_eq!(lines[0].split('\t').count(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn link_last_points_at_newest_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("history");

        let log = RunLog::prepare(root.clone()).unwrap();
        log.link_last();
        let link = root.join("last");
        let target = fs::read_link(&link).unwrap();
        assert_eq!(target, PathBuf::from(log.id()));

        // Repointing replaces the old link.
        let next = RunLog::prepare(root.clone()).unwrap();
        next.link_last();
        let target = fs::read_link(&link).unwrap();
        assert_eq!(target, PathBuf::from(next.id()));
    }

    #[test]
    fn record_sysinfo_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::prepare(dir.path().join("history")).unwrap();

        log.record_sysinfo("demo() {\n\techo x\n}\n").unwrap();
        let sysinfo = fs::read_to_string(log.run_dir().join("sysinfo.txt")).unwrap();
        assert!(sysinfo.contains("host: "));
        assert!(sysinfo.contains("pid: "));
        let pipeline = fs::read_to_string(log.run_dir().join("pipeline.txt")).unwrap();
        assert!(pipeline.contains("demo()"));
    }

    #[test]
    fn step_log_paths_live_in_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::prepare(dir.path().join("history")).unwrap();
        let path = log.step_log_path("1.2");
        assert_eq!(path, log.run_dir().join("1.2.log"));
    }
}
