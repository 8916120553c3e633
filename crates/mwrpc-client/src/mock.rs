//! Scripted transport for tests.
//!
//! [`MockTransport`] answers calls from a table of canned replies and
//! records every call it receives. Subscriptions are real: events are pushed
//! with [`MockTransport::push`] and reach subscribers through the same
//! registry the WebSocket client uses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use mwrpc_core::{BoxFuture, ClientError, ClientResult, FileSystem, JobError, Version};
use mwrpc_protocol::{JobState, RpcError, methods};

use crate::fallback::Fallback;
use crate::subscriptions::{Subscription, SubscriptionRegistry};
use crate::transport::Transport;

/// JSON-RPC code for an unknown method.
const METHOD_NOT_FOUND: i64 = -32601;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transport that replays canned answers.
///
/// ```ignore
/// let mock = MockTransport::new()
///     .with_reply("system.info", json!({"hostname": "nas"}))
///     .with_job_result("pool.scrub.run", json!(null));
/// mock.connect().await?;
/// assert_eq!(mock.call("system.info", json!([])).await?["hostname"], "nas");
/// ```
#[derive(Debug)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, ClientResult<Value>>>,
    jobs: Mutex<HashMap<String, ClientResult<Value>>>,
    calls: Mutex<Vec<(String, Value)>>,
    version: Version,
    connected: AtomicBool,
    closed: AtomicBool,
    subscriptions: SubscriptionRegistry,
    capacity: usize,
    fallback: Fallback,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a mock reporting version 25.4.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            version: Version::new(25, 4),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            subscriptions: SubscriptionRegistry::new(),
            capacity: 64,
            fallback: Fallback::none(),
        }
    }

    /// Builder: the version reported after connect.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Builder: answer `method` with `result`.
    pub fn with_reply(self, method: &str, result: Value) -> Self {
        lock(&self.replies).insert(method.to_string(), Ok(result));
        self
    }

    /// Builder: fail `method` with a server error.
    pub fn with_error(self, method: &str, error: RpcError) -> Self {
        lock(&self.replies).insert(method.to_string(), Err(ClientError::Rpc(error)));
        self
    }

    /// Builder: `method` starts a job that succeeds with `result`.
    pub fn with_job_result(self, method: &str, result: Value) -> Self {
        lock(&self.jobs).insert(method.to_string(), Ok(result));
        self
    }

    /// Builder: `method` starts a job that ends in `state` with `message`.
    pub fn with_job_failure(self, method: &str, state: JobState, message: &str) -> Self {
        let error = JobError {
            job_id: 1,
            state,
            message: Some(message.to_string()),
            exception: None,
            payload: Value::Null,
        };
        lock(&self.jobs).insert(method.to_string(), Err(ClientError::Job(error)));
        self
    }

    /// Builder: queue size of new subscriptions.
    pub fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder: route filesystem operations to `fs`.
    pub fn with_fallback(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fallback = Fallback::new(fs);
        self
    }

    /// Delivers `value` to every subscriber of `collection`.
    pub fn push(&self, collection: &str, value: Value) -> usize {
        self.subscriptions.deliver(collection, value)
    }

    /// Every call received so far, in order, as `(method, params)`.
    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.calls).clone()
    }

    /// Methods called so far, in order.
    pub fn methods(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|(m, _)| m.clone()).collect()
    }

    /// The registry behind [`Transport::subscribe`].
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    fn ready(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::closed("client closed"));
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    fn record(&self, method: &str, params: &Value) {
        lock(&self.calls).push((method.to_string(), params.clone()));
    }

    fn answer(&self, table: &Mutex<HashMap<String, ClientResult<Value>>>, method: &str) -> ClientResult<Value> {
        lock(table).get(method).cloned().unwrap_or_else(|| {
            Err(ClientError::Rpc(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Method {} not found", method),
            )))
        })
    }
}

impl Transport for MockTransport {
    fn connect(&self) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async move {
            if self.connected.swap(true, Ordering::AcqRel) {
                return Err(ClientError::AlreadyConnected);
            }
            Ok(())
        })
    }

    fn try_version(&self) -> Option<Version> {
        self.connected
            .load(Ordering::Acquire)
            .then_some(self.version)
    }

    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, ClientResult<Value>> {
        Box::pin(async move {
            self.ready()?;
            self.record(method, &params);
            self.answer(&self.replies, method)
        })
    }

    fn call_and_wait<'a>(
        &'a self,
        method: &'a str,
        params: Value,
    ) -> BoxFuture<'a, ClientResult<Value>> {
        Box::pin(async move {
            self.ready()?;
            self.record(method, &params);
            self.answer(&self.jobs, method)
        })
    }

    fn subscribe<'a>(
        &'a self,
        collection: &'a str,
        filter: Value,
    ) -> BoxFuture<'a, ClientResult<Subscription>> {
        Box::pin(async move {
            self.ready()?;
            self.record(methods::SUBSCRIBE, &filter);
            self.subscriptions.register(collection, self.capacity)
        })
    }

    fn close(&self) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::AcqRel) {
                self.subscriptions.close_all();
            }
            Ok(())
        })
    }

    fn fallback(&self) -> &Fallback {
        &self.fallback
    }
}
