//! Lazily allocated, per-task temporary directory.
//!
//! The directory is created on the first [`WorkingDirectory::path`] call and swept
//! once the owning task reached a terminal state. Permanent paths survive the sweep
//! and keep their parent directories alive.

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug)]
pub struct WorkingDirectory {
    base: PathBuf,
    prefix: String,
    path: Mutex<Option<PathBuf>>,
    permanent: Mutex<HashSet<PathBuf>>,
}

impl WorkingDirectory {
    pub fn new(base: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            prefix: prefix.into(),
            path: Mutex::new(None),
            permanent: Mutex::new(HashSet::new()),
        }
    }

    /// Directory for this task, created on first call
    ///
    /// Later calls return the same path without touching the filesystem.
    pub fn path(&self) -> Result<PathBuf> {
        let mut slot = self.path.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }

        let dir = self.base.join(format!("{}-{}", self.prefix, Uuid::new_v4()));
        fs::create_dir_all(&dir)?;
        debug!(path = %dir.display(), "Allocated working directory");

        *slot = Some(dir.clone());
        Ok(dir)
    }

    /// Convenience for `path()?.join(name)`
    pub fn file(&self, name: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.path()?.join(name))
    }

    /// Path if the directory was already allocated, without allocating it
    pub fn allocated_path(&self) -> Option<PathBuf> {
        self.path.lock().clone()
    }

    pub fn is_allocated(&self) -> bool {
        self.path.lock().is_some()
    }

    /// Exclude a path from the cleanup sweep
    ///
    /// Relative paths resolve against the working directory. Marking a directory
    /// protects everything beneath it.
    pub fn set_file_as_permanent(&self, path: impl AsRef<Path>) {
        self.permanent.lock().insert(path.as_ref().to_path_buf());
    }

    /// Whether the sweep would keep `path`
    ///
    /// Paths are resolved the way the sweep resolves them, so a relative and an
    /// absolute spelling of the same file agree.
    pub fn is_permanent(&self, path: impl AsRef<Path>) -> bool {
        let root = self
            .allocated_path()
            .map(|root| fs::canonicalize(&root).unwrap_or(root));
        let resolve = |p: &Path| match &root {
            Some(root) => resolve_against(root, p),
            None => p.to_path_buf(),
        };

        let target = resolve(path.as_ref());
        self.permanent
            .lock()
            .iter()
            .any(|p| target.starts_with(resolve(p)))
    }

    pub fn permanent_files(&self) -> Vec<PathBuf> {
        self.permanent.lock().iter().cloned().collect()
    }

    /// Sweep the directory on the blocking pool
    ///
    /// Returns `None` when nothing was ever allocated.
    pub fn schedule_cleanup(&self, runtime: &Handle) -> Option<JoinHandle<CleanupReport>> {
        let root = self.allocated_path()?;
        let permanent = self.permanent_files();
        Some(runtime.spawn_blocking(move || sweep(&root, &permanent)))
    }

    /// Sweep on the calling thread
    pub fn cleanup_blocking(&self) -> Option<CleanupReport> {
        let root = self.allocated_path()?;
        Some(sweep(&root, &self.permanent_files()))
    }
}

/// Join relative paths onto `root` and canonicalize when the path exists
fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    let resolved = if path.is_relative() {
        root.join(path)
    } else {
        path.to_path_buf()
    };
    fs::canonicalize(&resolved).unwrap_or(resolved)
}

/// Outcome of a cleanup sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_files: usize,
    pub removed_dirs: usize,
    /// Permanent entries plus anything that could not be removed
    pub retained: usize,
}

/// Best-effort recursive delete of `root`, skipping `permanent` paths
///
/// Failures, including "directory not empty", are logged and counted, never raised.
pub fn sweep(root: &Path, permanent: &[PathBuf]) -> CleanupReport {
    let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let permanent: Vec<PathBuf> = permanent.iter().map(|p| resolve_against(&root, p)).collect();

    let mut report = CleanupReport::default();

    for entry in WalkDir::new(&root).contents_first(true).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "Skipping unreadable entry during cleanup");
                continue;
            }
        };

        let path = entry.path();
        if permanent.iter().any(|p| path.starts_with(p)) {
            report.retained += 1;
            continue;
        }

        let removal = if entry.file_type().is_dir() {
            fs::remove_dir(path).map(|()| report.removed_dirs += 1)
        } else {
            fs::remove_file(path).map(|()| report.removed_files += 1)
        };

        if let Err(err) = removal {
            debug!(path = %path.display(), error = %err, "Entry left in place during cleanup");
            report.retained += 1;
        }
    }

    debug!(
        root = %root.display(),
        removed_files = report.removed_files,
        removed_dirs = report.removed_dirs,
        retained = report.retained,
        "Working directory swept"
    );

    report
}
