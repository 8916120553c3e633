//! Transport backed only by an alternate filesystem implementation.

use std::sync::Arc;

use serde_json::Value;

use mwrpc_core::{BoxFuture, ClientError, ClientResult, FileSystem, Version};

use crate::fallback::Fallback;
use crate::subscriptions::Subscription;
use crate::transport::Transport;

/// Serves filesystem operations through an injected [`FileSystem`] and
/// rejects every RPC operation.
#[derive(Debug, Clone)]
pub struct FilesystemTransport {
    fallback: Fallback,
}

impl FilesystemTransport {
    /// Creates a transport over `fs`.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fallback: Fallback::new(fs),
        }
    }
}

impl Transport for FilesystemTransport {
    fn connect(&self) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_version(&self) -> Option<Version> {
        None
    }

    fn call<'a>(&'a self, _method: &'a str, _params: Value) -> BoxFuture<'a, ClientResult<Value>> {
        Box::pin(async { Err(ClientError::Unsupported("call")) })
    }

    fn call_and_wait<'a>(
        &'a self,
        _method: &'a str,
        _params: Value,
    ) -> BoxFuture<'a, ClientResult<Value>> {
        Box::pin(async { Err(ClientError::Unsupported("call_and_wait")) })
    }

    fn subscribe<'a>(
        &'a self,
        _collection: &'a str,
        _filter: Value,
    ) -> BoxFuture<'a, ClientResult<Subscription>> {
        Box::pin(async { Err(ClientError::Unsupported("subscribe")) })
    }

    fn close(&self) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn fallback(&self) -> &Fallback {
        &self.fallback
    }
}
