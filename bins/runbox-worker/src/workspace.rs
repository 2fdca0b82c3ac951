use crate::error::SandboxError;
use crate::metrics;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Per-job directory holding the single source file.
///
/// Named by job id so concurrent jobs never collide under the shared root.
/// Removed (file, then directory) when dropped, on every exit path.
#[derive(Debug)]
pub struct Workspace {
    job_id: Uuid,
    dir: PathBuf,
    source_file: Option<PathBuf>,
}

impl Workspace {
    /// Create `<root>/<job_id>/` and write `source` verbatim into `filename`
    pub fn create(
        root: &Path,
        job_id: Uuid,
        filename: &str,
        source: &str,
    ) -> Result<Self, SandboxError> {
        fs::create_dir_all(root).map_err(|e| workspace_error(root, e))?;

        let dir = root.join(job_id.to_string());
        match fs::create_dir(&dir) {
            Ok(()) => {}
            // Left behind by an attempt that died before teardown; the job is redelivered
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!(job_id = %job_id, dir = %dir.display(), "Replacing stale workspace");
                fs::remove_dir_all(&dir).map_err(|e| workspace_error(&dir, e))?;
                fs::create_dir(&dir).map_err(|e| workspace_error(&dir, e))?;
            }
            Err(e) => return Err(workspace_error(&dir, e)),
        }

        // From here on Drop owns the directory
        let mut workspace = Self {
            job_id,
            dir,
            source_file: None,
        };

        let path = workspace.dir.join(filename);
        fs::write(&path, source).map_err(|e| workspace_error(&path, e))?;
        workspace.source_file = Some(path);

        Ok(workspace)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn remove(&mut self) -> Result<(), SandboxError> {
        if let Some(file) = self.source_file.take() {
            if let Err(e) = fs::remove_file(&file) {
                if e.kind() != ErrorKind::NotFound {
                    return Err(teardown_error(&file, e));
                }
            }
        }
        match fs::remove_dir(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(teardown_error(&self.dir, e)),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            metrics::record_teardown_failure("workspace");
            tracing::warn!(job_id = %self.job_id, error = %e, "Workspace teardown failed");
        }
    }
}

/// Remove every job directory under `root`.
///
/// Only safe before this worker starts leasing: anything found then belongs
/// to a previous process that died mid-job. Entries that are not job ids are
/// left alone.
pub fn sweep_stale(root: &Path) -> Result<usize, SandboxError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(workspace_error(root, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| workspace_error(root, e))?;
        let path = entry.path();
        let is_job_dir = path.is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| Uuid::parse_str(name).is_ok())
                .unwrap_or(false);
        if !is_job_dir {
            continue;
        }

        match fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(e) => {
                metrics::record_teardown_failure("workspace");
                tracing::warn!(dir = %path.display(), error = %e, "Failed to remove stale workspace");
            }
        }
    }
    Ok(removed)
}

fn workspace_error(path: &Path, source: std::io::Error) -> SandboxError {
    SandboxError::WorkspaceFailure {
        path: path.display().to_string(),
        source,
    }
}

fn teardown_error(path: &Path, e: std::io::Error) -> SandboxError {
    SandboxError::TeardownFailure {
        resource: path.display().to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_writes_source_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();
        let source = "print(2+2)\n# ünïcode\n";

        let workspace = Workspace::create(root.path(), job_id, "main.py", source).unwrap();

        assert_eq!(workspace.dir(), root.path().join(job_id.to_string()));
        let written = fs::read_to_string(workspace.dir().join("main.py")).unwrap();
        assert_eq!(written, source);
    }

    #[test]
    fn test_drop_removes_file_and_dir() {
        let root = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();

        let workspace = Workspace::create(root.path(), job_id, "main.cpp", "int main(){}").unwrap();
        let dir = workspace.dir().to_path_buf();
        assert!(dir.exists());

        drop(workspace);

        assert!(!dir.exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_concurrent_jobs_get_distinct_dirs() {
        let root = tempfile::tempdir().unwrap();

        let a = Workspace::create(root.path(), Uuid::new_v4(), "Solution.java", "a").unwrap();
        let b = Workspace::create(root.path(), Uuid::new_v4(), "Solution.java", "b").unwrap();

        assert_ne!(a.dir(), b.dir());
        assert_eq!(fs::read_to_string(a.dir().join("Solution.java")).unwrap(), "a");
        assert_eq!(fs::read_to_string(b.dir().join("Solution.java")).unwrap(), "b");
    }

    #[test]
    fn test_stale_dir_from_crashed_attempt_is_replaced() {
        let root = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();
        let stale = root.path().join(job_id.to_string());
        fs::create_dir(&stale).unwrap();
        fs::write(stale.join("main.py"), "old attempt").unwrap();
        fs::write(stale.join("core"), "leftover").unwrap();

        let workspace = Workspace::create(root.path(), job_id, "main.py", "print(1)").unwrap();

        assert_eq!(fs::read_to_string(workspace.dir().join("main.py")).unwrap(), "print(1)");
        assert!(!workspace.dir().join("core").exists());
        drop(workspace);
        assert!(!stale.exists());
    }

    #[test]
    fn test_sweep_removes_only_job_dirs() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join(Uuid::new_v4().to_string());
        fs::create_dir(&stale).unwrap();
        fs::write(stale.join("Solution.java"), "x").unwrap();
        fs::create_dir(root.path().join("lost+found")).unwrap();
        fs::write(root.path().join("README"), "keep").unwrap();

        assert_eq!(sweep_stale(root.path()).unwrap(), 1);

        assert!(!stale.exists());
        assert!(root.path().join("lost+found").exists());
        assert!(root.path().join("README").exists());
    }

    #[test]
    fn test_sweep_missing_root_is_noop() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(sweep_stale(&root.path().join("absent")).unwrap(), 0);
    }

    #[test]
    fn test_failed_write_cleans_dir() {
        let root = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();

        // A filename pointing into a missing subdirectory cannot be written
        let err = Workspace::create(root.path(), job_id, "missing/main.py", "x").unwrap_err();

        assert_eq!(err.kind(), "workspace_failure");
        assert!(!root.path().join(job_id.to_string()).exists());
    }

    #[test]
    fn test_drop_tolerates_externally_removed_dir() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), Uuid::new_v4(), "main.py", "x").unwrap();

        fs::remove_dir_all(workspace.dir()).unwrap();
        drop(workspace);
    }
}
