//! Per-launch temporary workspace holding the engine's data and logs.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::LaunchError;

/// A uniquely named `run-*` directory with `data/` and `logs/` inside.
///
/// Removed by [`remove`](Self::remove), or on drop if a launch is abandoned
/// part-way through.
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
    data_dir: PathBuf,
    logs_dir: PathBuf,
}

impl TempWorkspace {
    /// Create a fresh workspace under `root`, creating `root` if needed.
    pub async fn create(root: &Path) -> Result<Self, LaunchError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| LaunchError::Workspace {
                path: root.to_path_buf(),
                source,
            })?;

        let dir = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(root)
            .map_err(|source| LaunchError::Workspace {
                path: root.to_path_buf(),
                source,
            })?;

        let data_dir = dir.path().join("data");
        let logs_dir = dir.path().join("logs");
        for sub in [&data_dir, &logs_dir] {
            // `dir` is dropped (and removed) if this fails.
            tokio::fs::create_dir(sub)
                .await
                .map_err(|source| LaunchError::Workspace {
                    path: sub.clone(),
                    source,
                })?;
            open_permissions(sub).await?;
        }

        tracing::debug!("Created temporary workspace {}", dir.path().display());
        Ok(Self {
            dir,
            data_dir,
            logs_dir,
        })
    }

    /// Workspace root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Engine storage root.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Engine log root.
    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Recursively delete the workspace on the blocking pool.
    pub async fn remove(self) -> Result<(), LaunchError> {
        let path = self.dir.path().to_path_buf();
        tracing::info!("Removing temporary directory {}", path.display());
        let dir = self.dir;
        tokio::task::spawn_blocking(move || dir.close())
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)))
            .map_err(|source| LaunchError::Workspace { path, source })
    }
}

/// Containerized engines run as their own UID and must be able to write
/// into the bind-mounted directories.
#[cfg(unix)]
async fn open_permissions(path: &Path) -> Result<(), LaunchError> {
    use std::os::unix::fs::PermissionsExt;

    let parent = path.parent().unwrap_or(path);
    for (dir, mode) in [(parent, 0o755), (path, 0o777)] {
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|source| LaunchError::Workspace {
                path: dir.to_path_buf(),
                source,
            })?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn open_permissions(_path: &Path) -> Result<(), LaunchError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_layout() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(&root.path().join("nested")).await.unwrap();

        assert!(ws.path().starts_with(root.path()));
        assert!(
            ws.path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("run-")
        );
        assert!(ws.data_dir().is_dir());
        assert!(ws.logs_dir().is_dir());
        assert_eq!(ws.data_dir(), ws.path().join("data"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_storage_dirs_writable_by_other_users() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(root.path()).await.unwrap();
        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;

        assert_eq!(mode(ws.path()), 0o755);
        assert_eq!(mode(ws.data_dir()), 0o777);
        assert_eq!(mode(ws.logs_dir()), 0o777);
    }

    #[tokio::test]
    async fn test_workspaces_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = TempWorkspace::create(root.path()).await.unwrap();
        let b = TempWorkspace::create(root.path()).await.unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn test_remove_deletes_contents() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(root.path()).await.unwrap();
        std::fs::write(ws.data_dir().join("segment"), b"data").unwrap();
        let path = ws.path().to_path_buf();

        ws.remove().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_deletes_workspace() {
        let root = tempfile::tempdir().unwrap();
        let ws = TempWorkspace::create(root.path()).await.unwrap();
        let path = ws.path().to_path_buf();

        drop(ws);
        assert!(!path.exists());
    }
}
