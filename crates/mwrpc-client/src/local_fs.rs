//! Local-disk implementation of [`FileSystem`].
//!
//! Useful when the client runs on the managed host itself, and as the
//! alternate transport in tests. An optional root confines every path below
//! one directory.

use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use mwrpc_core::{BoxFuture, ClientError, ClientResult, FileSystem, Ownership};

/// Filesystem operations on the local machine.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    root: Option<PathBuf>,
}

impl LocalFileSystem {
    /// Operates on absolute paths as given.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves every path below `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str) -> ClientResult<PathBuf> {
        let requested = Path::new(path);
        if requested
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes its root: {}", path),
            )
            .into());
        }

        match &self.root {
            Some(root) => {
                let relative = requested.strip_prefix("/").unwrap_or(requested);
                Ok(root.join(relative))
            }
            None => Ok(requested.to_path_buf()),
        }
    }
}

async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

/// Applies `mode` to `path` and, for directories, to everything below it.
fn chmod_tree(path: &Path, mode: u32) -> io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    if metadata.is_dir() {
        for entry in std::fs::read_dir(path)? {
            chmod_tree(&entry?.path(), mode)?;
        }
    }
    Ok(())
}

async fn blocking<T, F>(f: F) -> ClientResult<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ClientError::from(io::Error::other(e)))?
        .map_err(ClientError::from)
}

impl FileSystem for LocalFileSystem {
    fn write_file<'a>(
        &'a self,
        path: &'a str,
        contents: &'a [u8],
        mode: u32,
    ) -> BoxFuture<'a, ClientResult<()>> {
        Box::pin(async move {
            let target = self.resolve(path)?;
            tokio::fs::write(&target, contents).await?;
            set_mode(&target, mode).await?;
            debug!(path = %target.display(), len = contents.len(), "wrote file");
            Ok(())
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<Vec<u8>>> {
        Box::pin(async move { Ok(tokio::fs::read(self.resolve(path)?).await?) })
    }

    fn delete_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>> {
        Box::pin(async move { Ok(tokio::fs::remove_file(self.resolve(path)?).await?) })
    }

    fn remove_dir_all<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>> {
        Box::pin(async move { Ok(tokio::fs::remove_dir_all(self.resolve(path)?).await?) })
    }

    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<bool>> {
        Box::pin(async move { Ok(tokio::fs::try_exists(self.resolve(path)?).await?) })
    }

    fn chown<'a>(&'a self, path: &'a str, owner: Ownership) -> BoxFuture<'a, ClientResult<()>> {
        Box::pin(async move {
            let target = self.resolve(path)?;
            blocking(move || std::os::unix::fs::chown(&target, Some(owner.uid), Some(owner.gid)))
                .await
        })
    }

    fn chmod_recursive<'a>(&'a self, path: &'a str, mode: u32) -> BoxFuture<'a, ClientResult<()>> {
        Box::pin(async move {
            let target = self.resolve(path)?;
            blocking(move || chmod_tree(&target, mode)).await
        })
    }

    fn mkdir_all<'a>(&'a self, path: &'a str, mode: u32) -> BoxFuture<'a, ClientResult<()>> {
        Box::pin(async move {
            let target = self.resolve(path)?;
            blocking(move || {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(mode)
                    .create(&target)
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn mode_of(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn write_read_delete() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::rooted(dir.path());

        fs.write_file("/config.json", b"{}", 0o600).await.unwrap();
        assert_eq!(mode_of(&dir.path().join("config.json")), 0o600);
        assert_eq!(fs.read_file("/config.json").await.unwrap(), b"{}");
        assert!(fs.exists("/config.json").await.unwrap());

        fs.delete_file("/config.json").await.unwrap();
        assert!(!fs.exists("/config.json").await.unwrap());
        assert!(matches!(
            fs.read_file("/config.json").await.unwrap_err(),
            ClientError::Io(_)
        ));
    }

    #[tokio::test]
    async fn directories() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::rooted(dir.path());

        fs.mkdir_all("/a/b/c", 0o755).await.unwrap();
        fs.write_file("/a/b/c/file", b"x", 0o644).await.unwrap();
        fs.chmod_recursive("/a", 0o700).await.unwrap();
        assert_eq!(mode_of(&dir.path().join("a/b")), 0o700);
        assert_eq!(mode_of(&dir.path().join("a/b/c/file")), 0o700);

        fs.mkdir_all("/empty", 0o755).await.unwrap();
        fs.remove_dir_all("/empty").await.unwrap();
        fs.remove_dir_all("/a").await.unwrap();
        assert!(!fs.exists("/a").await.unwrap());
        assert!(!fs.exists("/empty").await.unwrap());
    }

    #[tokio::test]
    async fn chown_to_current_owner() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::rooted(dir.path());
        fs.write_file("/owned", b"", 0o644).await.unwrap();

        let meta = std::fs::metadata(dir.path().join("owned")).unwrap();
        fs.chown("/owned", Ownership::new(meta.uid(), meta.gid()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn parent_components_are_rejected() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::rooted(dir.path());
        let err = fs.read_file("/../etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }
}
