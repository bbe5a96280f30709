// Temporary path bookkeeping
// Files and directories queued for deletion at shutdown, plus a workspace
// factory that creates them under one application temp directory

use super::error::Result;
use super::CleanupManager;
use crate::config::TempConfig;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Default prefix for the application temp directory
pub const DEFAULT_TEMP_PREFIX: &str = "chroma_cleanup_";

/// Sets of paths pending deletion. Membership is idempotent.
#[derive(Debug, Default)]
pub struct TempLedger {
    files: BTreeSet<PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl TempLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> bool {
        self.files.insert(path.into())
    }

    pub fn add_dir(&mut self, path: impl Into<PathBuf>) -> bool {
        self.dirs.insert(path.into())
    }

    pub fn remove_file(&mut self, path: &Path) -> bool {
        self.files.remove(path)
    }

    pub fn remove_dir(&mut self, path: &Path) -> bool {
        self.dirs.remove(path)
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    pub fn contains_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    /// Snapshot of the file set
    pub fn files(&self) -> Vec<PathBuf> {
        self.files.iter().cloned().collect()
    }

    /// Snapshot of the directory set
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.iter().cloned().collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }
}

/// Delete a file. Returns true only if something was actually removed.
pub(crate) fn delete_file(path: &Path) -> bool {
    report_delete(path, fs::remove_file(path))
}

/// Recursively delete a directory. Returns true only if something was actually removed.
pub(crate) fn delete_dir(path: &Path) -> bool {
    report_delete(path, fs::remove_dir_all(path))
}

fn report_delete(path: &Path, result: io::Result<()>) -> bool {
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "Removed temp path");
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not remove temp path");
            false
        }
    }
}

/// Creates temp files and directories and hands them to the coordinator.
///
/// Everything lives under a single application directory that is created on
/// first use. Paths are persisted on creation; removing them is the
/// coordinator's job.
pub struct TempWorkspace {
    manager: Arc<CleanupManager>,
    prefix: String,
    base_dir: Option<PathBuf>,
    root: Mutex<Option<PathBuf>>,
}

impl TempWorkspace {
    pub fn new(manager: Arc<CleanupManager>) -> Self {
        Self {
            manager,
            prefix: DEFAULT_TEMP_PREFIX.to_string(),
            base_dir: None,
            root: Mutex::new(None),
        }
    }

    pub fn from_config(manager: Arc<CleanupManager>, config: &TempConfig) -> Self {
        Self {
            manager,
            prefix: config.prefix.clone(),
            base_dir: config.base_dir.clone(),
            root: Mutex::new(None),
        }
    }

    /// Application temp directory, created and registered on first call
    pub fn root(&self) -> Result<PathBuf> {
        let mut root = self.root.lock();
        if let Some(path) = root.as_ref() {
            return Ok(path.clone());
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix);
        let dir = match &self.base_dir {
            Some(base) => builder.tempdir_in(base)?,
            None => builder.tempdir()?,
        };
        let path = dir.keep();

        info!(path = %path.display(), "Created application temp directory");
        self.manager.add_temp_dir(&path);
        *root = Some(path.clone());
        Ok(path)
    }

    /// Create an empty temp file inside the application directory
    pub fn create_temp_file(&self, prefix: &str, suffix: &str) -> Result<PathBuf> {
        let root = self.root()?;
        self.create_temp_file_in(&root, prefix, suffix)
    }

    /// Create an empty temp file inside `dir`
    pub fn create_temp_file_in(&self, dir: &Path, prefix: &str, suffix: &str) -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?;
        // Handle is closed here; only the path is kept
        let (_, path) = file.keep().map_err(|e| e.error)?;

        debug!(path = %path.display(), "Created temp file");
        self.manager.add_temp_file(&path);
        Ok(path)
    }

    /// Create a temp directory inside the application directory
    pub fn create_temp_dir(&self, prefix: &str, suffix: &str) -> Result<PathBuf> {
        let root = self.root()?;
        self.create_temp_dir_in(&root, prefix, suffix)
    }

    /// Create a temp directory inside `dir`
    pub fn create_temp_dir_in(&self, dir: &Path, prefix: &str, suffix: &str) -> Result<PathBuf> {
        let path = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempdir_in(dir)?
            .keep();

        debug!(path = %path.display(), "Created temp directory");
        self.manager.add_temp_dir(&path);
        Ok(path)
    }
}
