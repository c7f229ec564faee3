//! Per-job scratch namespaces.
//!
//! Every job gets exactly one directory under the configured scratch root,
//! named by its job id. All files the job touches (input copy, intermediates,
//! output) live inside that directory, and the whole namespace is removed when
//! the [`Workspace`] guard drops. Cleanup is scheduled by construction, not by
//! callers, so no exit path can forget it.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Hands out per-job namespaces under a configured scratch root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager rooted at the given scratch directory.
    ///
    /// The directory itself is created lazily on first allocation.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The scratch root this manager allocates under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate the namespace for a job id.
    ///
    /// Job ids are UUIDv4, so names are unguessable and never reused. The
    /// namespace directory is created with `create_dir` (not `create_dir_all`),
    /// which makes the filesystem the serialization point: a second allocation
    /// for the same id fails instead of silently sharing the directory.
    pub async fn allocate(&self, job_id: Uuid) -> Result<Workspace> {
        tokio::fs::create_dir_all(&self.root).await?;

        let dir = self.root.join(job_id.to_string());
        tokio::fs::create_dir(&dir).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::Workspace(format!("namespace already allocated for job {}", job_id))
            } else {
                Error::Io(e)
            }
        })?;

        tracing::debug!(job_id = %job_id, dir = %dir.display(), "Allocated workspace");

        Ok(Workspace { job_id, dir })
    }
}

/// A job's scratch namespace. Removing it is this guard's `Drop` impl.
#[derive(Debug)]
pub struct Workspace {
    job_id: Uuid,
    dir: PathBuf,
}

impl Workspace {
    /// The namespace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The job id this namespace belongs to.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Path for the job's private copy of the input, keeping the source
    /// extension so the engine can sniff the container from the name.
    pub fn input_path(&self, source: &Path) -> PathBuf {
        match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.dir.join(format!("source.{}", ext)),
            None => self.dir.join("source"),
        }
    }

    /// Path for the final output artifact.
    pub fn output_path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("output.{}", extension))
    }

    /// Path for a named intermediate file.
    pub fn scratch_file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // Idempotent: a namespace that is already gone is not an error, and
        // cleanup failures are logged, never escalated -- the terminal result
        // has already been decided by the time this runs.
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!(job_id = %self.job_id, "Removed workspace");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    dir = %self.dir.display(),
                    "Failed to remove workspace: {}",
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_allocate_creates_namespace() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let id = Uuid::new_v4();
        let ws = manager.allocate(id).await.unwrap();

        assert!(ws.dir().is_dir());
        assert!(ws.dir().starts_with(root.path()));
        assert_eq!(ws.dir().file_name().unwrap().to_str().unwrap(), id.to_string());
    }

    #[tokio::test]
    async fn test_allocate_same_id_twice_fails() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let id = Uuid::new_v4();
        let _ws = manager.allocate(id).await.unwrap();
        let err = manager.allocate(id).await.unwrap_err();
        assert!(matches!(err, Error::Workspace(_)));
    }

    #[tokio::test]
    async fn test_namespaces_are_disjoint() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let a = manager.allocate(Uuid::new_v4()).await.unwrap();
        let b = manager.allocate(Uuid::new_v4()).await.unwrap();
        assert_ne!(a.dir(), b.dir());
    }

    #[tokio::test]
    async fn test_drop_removes_all_files() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let ws = manager.allocate(Uuid::new_v4()).await.unwrap();
        let dir = ws.dir().to_path_buf();

        std::fs::write(ws.input_path(Path::new("in.mp4")), b"input").unwrap();
        std::fs::write(ws.output_path("mp3"), b"output").unwrap();
        std::fs::write(ws.scratch_file("partial.tmp"), b"tmp").unwrap();

        drop(ws);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_drop_tolerates_missing_namespace() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let ws = manager.allocate(Uuid::new_v4()).await.unwrap();
        std::fs::remove_dir_all(ws.dir()).unwrap();
        // Dropping after the directory vanished must not panic.
        drop(ws);
    }

    #[tokio::test]
    async fn test_input_path_keeps_extension() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(root.path());
        let ws = manager.allocate(Uuid::new_v4()).await.unwrap();

        let path = ws.input_path(Path::new("/uploads/movie.mkv"));
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "source.mkv");

        let bare = ws.input_path(Path::new("/uploads/blob"));
        assert_eq!(bare.file_name().unwrap().to_str().unwrap(), "source");
    }
}
