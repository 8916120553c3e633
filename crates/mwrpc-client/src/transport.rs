//! The transport contract.
//!
//! Callers above this layer program against [`Transport`] and never care
//! which variant is behind it. The variant set is closed and chosen once,
//! at construction time:
//!
//! | Variant | RPC operations | Filesystem operations |
//! |---------|----------------|-----------------------|
//! | [`WsClient`] | JSON-RPC over WebSocket | injected fallback |
//! | [`FilesystemTransport`] | `Unsupported` | injected filesystem |
//! | [`UnsupportedTransport`] | `Unsupported` | injected fallback, usually none |
//! | `MockTransport` | scripted | injected fallback |
//!
//! [`WsClient`]: crate::WsClient
//! [`FilesystemTransport`]: crate::FilesystemTransport
//! [`UnsupportedTransport`]: crate::UnsupportedTransport

use std::sync::Arc;

use serde_json::Value;

use mwrpc_core::{BoxFuture, ClientError, ClientResult, FileSystem, Ownership, Version};

use crate::client::WsClient;
use crate::config::{ClientConfig, TransportKind};
use crate::fallback::Fallback;
use crate::filesystem::FilesystemTransport;
use crate::subscriptions::Subscription;
use crate::unsupported::UnsupportedTransport;

/// Operations every transport variant provides.
///
/// Filesystem operations have default implementations that go through
/// [`Transport::fallback`], so a variant only decides which fallback it
/// carries.
pub trait Transport: Send + Sync {
    /// Establishes the session.
    fn connect(&self) -> BoxFuture<'_, ClientResult<()>>;

    /// The cached server version, or `None` before a successful connect.
    fn try_version(&self) -> Option<Version>;

    /// The cached server version.
    ///
    /// # Panics
    ///
    /// Panics if called before a successful [`connect`](Self::connect).
    /// Reading the version too early is a bug in the caller, not a
    /// recoverable condition.
    fn version(&self) -> Version {
        match self.try_version() {
            Some(version) => version,
            None => panic!("server version read before a successful connect"),
        }
    }

    /// Issues a call and waits for its result.
    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, ClientResult<Value>>;

    /// Issues a job-producing call and waits for the job to finish.
    fn call_and_wait<'a>(
        &'a self,
        method: &'a str,
        params: Value,
    ) -> BoxFuture<'a, ClientResult<Value>>;

    /// Subscribes to change events of `collection`. `filter` is sent along
    /// unless it is null.
    fn subscribe<'a>(
        &'a self,
        collection: &'a str,
        filter: Value,
    ) -> BoxFuture<'a, ClientResult<Subscription>>;

    /// Ends the session. Idempotent.
    fn close(&self) -> BoxFuture<'_, ClientResult<()>>;

    /// Where filesystem operations go.
    fn fallback(&self) -> &Fallback;

    /// Creates or replaces a file with `contents` and sets its mode.
    fn write_file<'a>(
        &'a self,
        path: &'a str,
        contents: &'a [u8],
        mode: u32,
    ) -> BoxFuture<'a, ClientResult<()>> {
        self.fallback().write_file(path, contents, mode)
    }

    /// Reads a whole file.
    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<Vec<u8>>> {
        self.fallback().read_file(path)
    }

    /// Deletes a single file.
    fn delete_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>> {
        self.fallback().delete_file(path)
    }

    /// Removes a directory and everything below it.
    fn remove_dir_all<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>> {
        self.fallback().remove_dir_all(path)
    }

    /// Returns whether the path exists.
    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<bool>> {
        self.fallback().exists(path)
    }

    /// Changes the owner of a path.
    fn chown<'a>(&'a self, path: &'a str, owner: Ownership) -> BoxFuture<'a, ClientResult<()>> {
        self.fallback().chown(path, owner)
    }

    /// Sets `mode` on a path and everything below it.
    fn chmod_recursive<'a>(&'a self, path: &'a str, mode: u32) -> BoxFuture<'a, ClientResult<()>> {
        self.fallback().chmod_recursive(path, mode)
    }

    /// Creates a directory and any missing parents.
    fn mkdir_all<'a>(&'a self, path: &'a str, mode: u32) -> BoxFuture<'a, ClientResult<()>> {
        self.fallback().mkdir_all(path, mode)
    }
}

/// Builds the transport variant named by `config.transport`.
///
/// `fs` is the alternate filesystem transport. It is required for
/// [`TransportKind::Filesystem`] and optional otherwise.
pub fn build_transport(
    config: ClientConfig,
    fs: Option<Arc<dyn FileSystem>>,
) -> ClientResult<Box<dyn Transport>> {
    config.validate()?;
    match config.transport {
        TransportKind::Websocket => {
            let client = WsClient::new(config);
            Ok(Box::new(match fs {
                Some(fs) => client.with_fallback(fs),
                None => client,
            }))
        }
        TransportKind::Filesystem => {
            let fs = fs.ok_or_else(|| {
                ClientError::Config("the filesystem transport needs a filesystem".to_string())
            })?;
            Ok(Box::new(FilesystemTransport::new(fs)))
        }
        TransportKind::Unsupported => Ok(Box::new(UnsupportedTransport::new(Fallback::from_option(fs)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::tests::RecordingFs;

    #[tokio::test]
    async fn builds_each_variant() {
        let ws = build_transport(ClientConfig::new("nas"), None).unwrap();
        assert!(ws.try_version().is_none());
        assert!(!ws.fallback().is_configured());

        let fs: Arc<dyn FileSystem> = Arc::new(RecordingFs::default());
        let files = build_transport(
            ClientConfig::default().with_transport(TransportKind::Filesystem),
            Some(fs),
        )
        .unwrap();
        assert!(files.fallback().is_configured());
        files.write_file("/tmp/x", b"1", 0o600).await.unwrap();
        assert!(files.exists("/tmp/x").await.unwrap());

        let stub = build_transport(
            ClientConfig::default().with_transport(TransportKind::Unsupported),
            None,
        )
        .unwrap();
        assert!(stub.call("system.info", Value::Null).await.unwrap_err().is_unsupported());
        assert!(stub.read_file("/etc/hostname").await.unwrap_err().is_unsupported());
    }

    #[test]
    fn filesystem_variant_requires_a_filesystem() {
        let result = build_transport(
            ClientConfig::default().with_transport(TransportKind::Filesystem),
            None,
        );
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn websocket_variant_requires_a_host() {
        let result = build_transport(ClientConfig::default(), None);
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    #[should_panic(expected = "before a successful connect")]
    fn version_before_connect_panics() {
        let transport = build_transport(ClientConfig::new("nas"), None).unwrap();
        let _ = transport.version();
    }
}
