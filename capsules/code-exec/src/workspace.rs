//! Ephemeral per-execution scratch directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::language::LanguageProfile;

/// Allocates uniquely named workspaces under a scratch root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh workspace and write `code` into it as the profile's source file.
    ///
    /// The directory name combines the execution id with a random suffix, so
    /// concurrent requests never share a path.
    pub async fn acquire(
        &self,
        execution_id: &str,
        code: &str,
        profile: &LanguageProfile,
    ) -> Result<Workspace, ExecError> {
        let root = self.root.clone();
        let prefix = format!("exec-{}-", execution_id);
        let file_name = profile.file_name();
        let code = code.to_string();

        tokio::task::spawn_blocking(move || create_workspace(&root, &prefix, &file_name, &code))
            .await
            .map_err(|err| ExecError::internal(format!("workspace task failed: {}", err)))?
    }
}

fn create_workspace(
    root: &Path,
    prefix: &str,
    file_name: &str,
    code: &str,
) -> Result<Workspace, ExecError> {
    fs::create_dir_all(root).map_err(|source| ExecError::Workspace {
        message: format!("Failed to create scratch root {}", root.display()),
        source,
    })?;

    let dir = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(root)
        .map_err(|source| ExecError::Workspace {
            message: format!("Failed to create workspace under {}", root.display()),
            source,
        })?;

    let path = dir.path().to_path_buf();
    let file_path = path.join(file_name);
    // On failure `dir` is dropped here and removes the partial workspace.
    fs::write(&file_path, code).map_err(|source| ExecError::Workspace {
        message: format!("Failed to write source file {}", file_path.display()),
        source,
    })?;

    debug!(workspace = %path.display(), "workspace created");

    Ok(Workspace {
        dir: Some(dir),
        path,
        file_path,
    })
}

/// Scratch directory exclusively owned by one execution.
///
/// Released explicitly by the supervisor; dropping an unreleased workspace
/// removes it as well.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    file_path: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file holding the caller's code.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Remove the workspace and everything in it. Releasing twice is a no-op.
    pub fn release(&mut self) -> Result<(), ExecError> {
        match self.dir.take() {
            Some(dir) => close_dir(dir, &self.path),
            None => Ok(()),
        }
    }

    /// [`Workspace::release`] on the blocking pool. The program decides how
    /// much the workspace holds, so removal must not stall the executor.
    pub async fn release_async(&mut self) -> Result<(), ExecError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || close_dir(dir, &path))
            .await
            .map_err(|err| ExecError::internal(format!("workspace cleanup task failed: {}", err)))?
    }
}

fn close_dir(dir: TempDir, path: &Path) -> Result<(), ExecError> {
    match dir.close() {
        Ok(()) => {
            debug!(workspace = %path.display(), "workspace released");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ExecError::Workspace {
            message: format!("Failed to remove workspace {}", path.display()),
            source,
        }),
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(error = %err, "failed to release workspace on drop");
        }
    }
}
