//! Fallback dispatcher for filesystem-style operations.
//!
//! Delegates every operation verbatim to the injected [`FileSystem`], or
//! fails it with [`ClientError::Unsupported`] when none was configured.

use std::fmt;
use std::sync::Arc;

use mwrpc_core::{BoxFuture, ClientError, ClientResult, FileSystem, Ownership};

/// Routes filesystem operations to an optional alternate transport.
#[derive(Clone, Default)]
pub struct Fallback {
    inner: Option<Arc<dyn FileSystem>>,
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallback")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl Fallback {
    /// Delegates to `fs`.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { inner: Some(fs) }
    }

    /// Fails every operation.
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// Delegates to `fs` if present.
    pub fn from_option(fs: Option<Arc<dyn FileSystem>>) -> Self {
        Self { inner: fs }
    }

    /// Returns true if an alternate transport is configured.
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }

    fn target(&self, operation: &'static str) -> ClientResult<&dyn FileSystem> {
        self.inner
            .as_deref()
            .ok_or(ClientError::Unsupported(operation))
    }
}

impl FileSystem for Fallback {
    fn write_file<'a>(
        &'a self,
        path: &'a str,
        contents: &'a [u8],
        mode: u32,
    ) -> BoxFuture<'a, ClientResult<()>> {
        match self.target("write_file") {
            Ok(fs) => fs.write_file(path, contents, mode),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<Vec<u8>>> {
        match self.target("read_file") {
            Ok(fs) => fs.read_file(path),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn delete_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>> {
        match self.target("delete_file") {
            Ok(fs) => fs.delete_file(path),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn remove_dir_all<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>> {
        match self.target("remove_dir_all") {
            Ok(fs) => fs.remove_dir_all(path),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<bool>> {
        match self.target("exists") {
            Ok(fs) => fs.exists(path),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn chown<'a>(&'a self, path: &'a str, owner: Ownership) -> BoxFuture<'a, ClientResult<()>> {
        match self.target("chown") {
            Ok(fs) => fs.chown(path, owner),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn chmod_recursive<'a>(&'a self, path: &'a str, mode: u32) -> BoxFuture<'a, ClientResult<()>> {
        match self.target("chmod_recursive") {
            Ok(fs) => fs.chmod_recursive(path, mode),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn mkdir_all<'a>(&'a self, path: &'a str, mode: u32) -> BoxFuture<'a, ClientResult<()>> {
        match self.target("mkdir_all") {
            Ok(fs) => fs.mkdir_all(path, mode),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory filesystem that records every operation.
    #[derive(Default)]
    pub(crate) struct RecordingFs {
        pub(crate) files: Mutex<HashMap<String, Vec<u8>>>,
        pub(crate) ops: Mutex<Vec<String>>,
    }

    impl RecordingFs {
        fn record(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }
    }

    impl FileSystem for RecordingFs {
        fn write_file<'a>(
            &'a self,
            path: &'a str,
            contents: &'a [u8],
            mode: u32,
        ) -> BoxFuture<'a, ClientResult<()>> {
            Box::pin(async move {
                self.record(format!("write_file {} {:o}", path, mode));
                self.files.lock().unwrap().insert(path.to_string(), contents.to_vec());
                Ok(())
            })
        }

        fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<Vec<u8>>> {
            Box::pin(async move {
                self.record(format!("read_file {}", path));
                self.files.lock().unwrap().get(path).cloned().ok_or_else(|| {
                    ClientError::from(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        path.to_string(),
                    ))
                })
            })
        }

        fn delete_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>> {
            Box::pin(async move {
                self.record(format!("delete_file {}", path));
                self.files.lock().unwrap().remove(path);
                Ok(())
            })
        }

        fn remove_dir_all<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>> {
            Box::pin(async move {
                self.record(format!("remove_dir_all {}", path));
                Ok(())
            })
        }

        fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<bool>> {
            Box::pin(async move {
                self.record(format!("exists {}", path));
                Ok(self.files.lock().unwrap().contains_key(path))
            })
        }

        fn chown<'a>(&'a self, path: &'a str, owner: Ownership) -> BoxFuture<'a, ClientResult<()>> {
            Box::pin(async move {
                self.record(format!("chown {} {}:{}", path, owner.uid, owner.gid));
                Ok(())
            })
        }

        fn chmod_recursive<'a>(
            &'a self,
            path: &'a str,
            mode: u32,
        ) -> BoxFuture<'a, ClientResult<()>> {
            Box::pin(async move {
                self.record(format!("chmod_recursive {} {:o}", path, mode));
                Ok(())
            })
        }

        fn mkdir_all<'a>(&'a self, path: &'a str, mode: u32) -> BoxFuture<'a, ClientResult<()>> {
            Box::pin(async move {
                self.record(format!("mkdir_all {} {:o}", path, mode));
                Ok(())
            })
        }
    }

    /// Runs every filesystem operation against `fs`, collecting the errors.
    pub(crate) async fn run_every_operation(fs: &dyn FileSystem) -> Vec<ClientError> {
        let owner = Ownership::new(1000, 1000);
        let results = vec![
            fs.write_file("/mnt/tank/a", b"x", 0o644).await.err(),
            fs.read_file("/mnt/tank/a").await.err(),
            fs.delete_file("/mnt/tank/a").await.err(),
            fs.remove_dir_all("/mnt/tank/empty").await.err(),
            fs.remove_dir_all("/mnt/tank/full").await.err(),
            fs.exists("/mnt/tank/a").await.err(),
            fs.chown("/mnt/tank/a", owner).await.err(),
            fs.chmod_recursive("/mnt/tank", 0o755).await.err(),
            fs.mkdir_all("/mnt/tank/x/y/z", 0o755).await.err(),
        ];
        results.into_iter().flatten().collect()
    }

    #[tokio::test]
    async fn unconfigured_fails_every_operation() {
        let fallback = Fallback::none();
        assert!(!fallback.is_configured());

        let errors = run_every_operation(&fallback).await;
        assert_eq!(errors.len(), 9);
        assert!(errors.iter().all(ClientError::is_unsupported));
        assert!(matches!(errors[0], ClientError::Unsupported("write_file")));
        assert!(matches!(errors[8], ClientError::Unsupported("mkdir_all")));
    }

    #[tokio::test]
    async fn configured_delegates_verbatim() {
        let fs = Arc::new(RecordingFs::default());
        let fallback = Fallback::new(fs.clone());

        fallback.write_file("/data/cfg", b"hello", 0o600).await.unwrap();
        assert_eq!(fallback.read_file("/data/cfg").await.unwrap(), b"hello");
        assert!(fallback.exists("/data/cfg").await.unwrap());
        fallback.chown("/data/cfg", Ownership::new(0, 568)).await.unwrap();
        fallback.delete_file("/data/cfg").await.unwrap();
        assert!(!fallback.exists("/data/cfg").await.unwrap());

        let ops = fs.ops.lock().unwrap().clone();
        assert_eq!(
            ops,
            vec![
                "write_file /data/cfg 600",
                "read_file /data/cfg",
                "exists /data/cfg",
                "chown /data/cfg 0:568",
                "delete_file /data/cfg",
                "exists /data/cfg",
            ]
        );
    }

    #[tokio::test]
    async fn delegate_errors_pass_through() {
        let fallback = Fallback::new(Arc::new(RecordingFs::default()));
        let err = fallback.read_file("/missing").await.unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
