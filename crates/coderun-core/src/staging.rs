//! Per-execution staging directories.
//!
//! A `StagingArea` is a fresh temporary directory holding exactly one source
//! file. It belongs to a single execution and is removed when that execution
//! ends: explicitly through [`StagingArea::release`], or by the `TempDir`
//! destructor on any other path.

use crate::errors::SandboxError;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STAGING_PREFIX: &str = "coderun-";

#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
    source_path: PathBuf,
}

impl StagingArea {
    /// Create a uniquely named directory and write `code` verbatim into
    /// `filename` inside it.
    pub async fn create(filename: &str, code: &str) -> Result<Self, SandboxError> {
        Self::create_in(None, filename, code).await
    }

    /// Same as [`StagingArea::create`] but rooted at `parent` instead of the
    /// system temp directory.
    pub async fn create_in(
        parent: Option<&Path>,
        filename: &str,
        code: &str,
    ) -> Result<Self, SandboxError> {
        let mut builder = Builder::new();
        builder.prefix(STAGING_PREFIX);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| SandboxError::staging(format!("Could not create temporary directory: {}", e)))?;

        let source_path = dir.path().join(filename);
        let mut file = fs::File::create(&source_path).await.map_err(|e| {
            SandboxError::staging(format!(
                "Could not create {}: {}",
                source_path.display(),
                e
            ))
        })?;
        file.write_all(code.as_bytes())
            .await
            .map_err(|e| SandboxError::staging(format!("Could not write source file: {}", e)))?;
        file.flush().await?;
        drop(file);

        // The sandbox runs as an unprivileged user, so the bind mount must be
        // world-readable. tempfile creates the directory as 0700.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).await?;
            fs::set_permissions(&source_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        log::debug!("Staged source at {}", source_path.display());
        Ok(Self { dir, source_path })
    }

    pub fn host_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Remove the directory. Failures are logged, never propagated, so they
    /// cannot mask a result that was already obtained.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => log::debug!("Released staging area {}", path.display()),
            Err(e) => log::error!("Failed to remove staging area {}: {}", path.display(), e),
        }
    }
}
