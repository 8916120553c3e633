//! Transport stub that supports no RPC operation.
//!
//! Useful where a [`Transport`] is required but no management server is
//! reachable. Filesystem operations still go through the fallback it was
//! built with, which is usually none.

use serde_json::Value;

use mwrpc_core::{BoxFuture, ClientError, ClientResult, Version};

use crate::fallback::Fallback;
use crate::subscriptions::Subscription;
use crate::transport::Transport;

/// Rejects every RPC operation with [`ClientError::Unsupported`].
#[derive(Debug, Clone, Default)]
pub struct UnsupportedTransport {
    fallback: Fallback,
}

impl UnsupportedTransport {
    /// Creates a stub with the given fallback.
    pub fn new(fallback: Fallback) -> Self {
        Self { fallback }
    }
}

impl Transport for UnsupportedTransport {
    fn connect(&self) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async { Err(ClientError::Unsupported("connect")) })
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
