//! WebSocket JSON-RPC client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use mwrpc_core::{BoxFuture, ClientError, ClientResult, FileSystem, Version};
use mwrpc_protocol::methods;

use crate::config::{ClientConfig, Credentials};
use crate::connection::{self, Connection};
use crate::correlator::CallKind;
use crate::fallback::Fallback;
use crate::subscriptions::{Subscription, is_subscribe_ack};
use crate::transport::Transport;

/// Client for the management API over one WebSocket connection.
///
/// Any number of calls, job waits and subscriptions may be in flight at once
/// from any number of tasks; they share the connection without interfering
/// with each other.
///
/// A client connects once. After the connection ends, every operation fails
/// with the cause; reconnecting means building a new client.
///
/// # Example
///
/// ```ignore
/// use mwrpc_client::{ClientConfig, WsClient};
/// use serde_json::json;
///
/// let client = WsClient::new(ClientConfig::new("nas.local").with_credentials("admin", "env::NAS_KEY"));
/// client.connect().await?;
/// println!("server {}", client.version());
///
/// let pools = client.call("pool.query", json!([])).await?;
/// let scrub = client.call_and_wait("pool.scrub.run", json!(["tank"])).await?;
///
/// let mut stats = client.subscribe("reporting.realtime", json!(null)).await?;
/// while let Some(fields) = stats.recv().await {
///     println!("{}", fields);
/// }
/// client.close().await?;
/// ```
pub struct WsClient {
    config: ClientConfig,
    fallback: Fallback,
    connection: OnceLock<Arc<Connection>>,
    version: OnceLock<Version>,
    connecting: AtomicBool,
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.config.url())
            .field("version", &self.version.get())
            .field("connected", &self.is_connected())
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl WsClient {
    /// Creates an unconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            fallback: Fallback::none(),
            connection: OnceLock::new(),
            version: OnceLock::new(),
            connecting: AtomicBool::new(false),
        }
    }

    /// Builder: route filesystem operations to `fs`.
    pub fn with_fallback(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fallback = Fallback::new(fs);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Opens the socket, logs in and detects the server version.
    ///
    /// Fails with [`ClientError::Authentication`] if the server rejects the
    /// credentials, and with [`ClientError::AlreadyConnected`] on a client
    /// that is connecting or has connected before.
    pub async fn connect(&self) -> ClientResult<()> {
        if self.connecting.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyConnected);
        }

        match self.establish().await {
            Ok((connection, version)) => {
                let _ = self.version.set(version);
                let _ = self.connection.set(connection);
                Ok(())
            }
            Err(e) => {
                self.connecting.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> ClientResult<(Arc<Connection>, Version)> {
        self.config.validate()?;
        let credentials = self.config.resolve_credentials()?;

        let stream = connection::open(&self.config).await?;
        let connection = Connection::start(stream, &self.config);

        let handshake = tokio::time::timeout(
            self.config.connect_timeout(),
            handshake(&connection, &credentials),
        )
        .await
        .unwrap_or_else(|_| Err(ClientError::timeout("login handshake")));

        match handshake {
            Ok(version) => {
                if let Some(interval) = self.config.ping_interval() {
                    connection.start_liveness(interval);
                }
                info!(url = %self.config.url(), version = %version, "connected");
                Ok((connection, version))
            }
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    /// The cached server version.
    ///
    /// # Panics
    ///
    /// Panics if called before a successful [`connect`](Self::connect).
    pub fn version(&self) -> Version {
        match self.try_version() {
            Some(version) => version,
            None => panic!("server version read before a successful connect"),
        }
    }

    /// The cached server version, or `None` before a successful connect.
    pub fn try_version(&self) -> Option<Version> {
        self.version.get().copied()
    }

    /// Issues a call and waits for its result.
    pub async fn call(&self, method: &str, params: Value) -> ClientResult<Value> {
        self.connection()?
            .call(method, params, CallKind::Plain, None)
            .await
    }

    /// Like [`call`](Self::call), but gives up with [`ClientError::Cancelled`]
    /// when `cancel` fires. Other calls are unaffected.
    pub async fn call_cancellable(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> ClientResult<Value> {
        self.connection()?
            .call(method, params, CallKind::Plain, Some(cancel))
            .await
    }

    /// Issues a job-producing call and waits until the job finishes.
    ///
    /// Returns the job's result on success, and [`ClientError::Job`] when it
    /// fails or is aborted.
    pub async fn call_and_wait(&self, method: &str, params: Value) -> ClientResult<Value> {
        let connection = self.connection()?;
        connection.ensure_job_stream().await?;
        connection.call(method, params, CallKind::Job, None).await
    }

    /// Like [`call_and_wait`](Self::call_and_wait), but stops waiting when
    /// `cancel` fires. The job itself keeps running on the server.
    pub async fn call_and_wait_cancellable(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> ClientResult<Value> {
        let connection = self.connection()?;
        connection.ensure_job_stream().await?;
        connection
            .call(method, params, CallKind::Job, Some(cancel))
            .await
    }

    /// Subscribes to change events of `collection`.
    ///
    /// `filter` is passed to the server unless it is null. The subscription
    /// receives the `fields` of each change.
    pub async fn subscribe(&self, collection: &str, filter: Value) -> ClientResult<Subscription> {
        let connection = self.connection()?;

        // Registered first so no event between the ack and the return is lost.
        let subscription = connection
            .subscriptions
            .register(collection, self.config.subscription_capacity)?;

        let params = if filter.is_null() {
            json!([collection])
        } else {
            json!([collection, filter])
        };
        let ack = connection
            .call(methods::SUBSCRIBE, params, CallKind::Plain, None)
            .await?;
        if !is_subscribe_ack(&ack) {
            return Err(ClientError::SubscriptionRejected {
                collection: collection.to_string(),
            });
        }

        debug!(collection = %collection, "subscribed");
        Ok(subscription)
    }

    /// Closes the connection. Idempotent.
    ///
    /// Outstanding calls fail with [`ClientError::ConnectionClosed`] and every
    /// subscription is closed.
    pub async fn close(&self) -> ClientResult<()> {
        if let Some(connection) = self.connection.get() {
            connection.close().await;
        }
        Ok(())
    }

    /// Returns true while the connection is up.
    pub fn is_connected(&self) -> bool {
        self.connection.get().is_some_and(|c| c.is_open())
    }

    /// Why the connection ended, once it has.
    pub fn close_reason(&self) -> Option<ClientError> {
        self.connection.get().and_then(|c| c.correlator.closed())
    }

    fn connection(&self) -> ClientResult<&Arc<Connection>> {
        self.connection.get().ok_or(ClientError::NotConnected)
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get() {
            connection.teardown(ClientError::closed("client dropped"));
        }
    }
}

/// Logs in and reads the server version.
async fn handshake(connection: &Connection, credentials: &Credentials) -> ClientResult<Version> {
    let params = json!([{
        "mechanism": methods::LOGIN_MECHANISM,
        "username": credentials.username,
        "api_key": credentials.api_key,
    }]);
    let reply = match connection
        .call(methods::LOGIN, params, CallKind::Plain, None)
        .await
    {
        Ok(reply) => reply,
        Err(ClientError::Rpc(e)) => return Err(ClientError::Authentication(e.to_string())),
        Err(e) => return Err(e),
    };

    let discriminator = reply
        .get("response_type")
        .and_then(Value::as_str)
        .unwrap_or("no response_type");
    if discriminator != methods::LOGIN_SUCCESS {
        return Err(ClientError::Authentication(format!(
            "server answered {}",
            discriminator
        )));
    }
    debug!(username = %credentials.username, "authenticated");

    let raw = connection
        .call(methods::SYSTEM_VERSION, Value::Null, CallKind::Plain, None)
        .await?;
    let text = raw
        .as_str()
        .ok_or_else(|| ClientError::Protocol(format!("unexpected version result {}", raw)))?;
    Version::parse(text)
        .ok_or_else(|| ClientError::Protocol(format!("no version number in {:?}", text)))
}

impl Transport for WsClient {
    fn connect(&self) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(WsClient::connect(self))
    }

    fn try_version(&self) -> Option<Version> {
        WsClient::try_version(self)
    }

    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, ClientResult<Value>> {
        Box::pin(WsClient::call(self, method, params))
    }

    fn call_and_wait<'a>(
        &'a self,
        method: &'a str,
        params: Value,
    ) -> BoxFuture<'a, ClientResult<Value>> {
        Box::pin(WsClient::call_and_wait(self, method, params))
    }

    fn subscribe<'a>(
        &'a self,
        collection: &'a str,
        filter: Value,
    ) -> BoxFuture<'a, ClientResult<Subscription>> {
        Box::pin(WsClient::subscribe(self, collection, filter))
    }

    fn close(&self) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(WsClient::close(self))
    }

    fn fallback(&self) -> &Fallback {
        &self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::future::join_all;
    use mwrpc_core::JobError;
    use mwrpc_protocol::{JobState, RpcError};

    use crate::testing::{MockServer, ServerOptions};

    async fn connected(server: &MockServer) -> WsClient {
        let client = WsClient::new(server.config());
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn connect_detects_version() {
        let server = MockServer::start().await;
        let client = connected(&server).await;

        assert!(client.is_connected());
        assert_eq!(client.version(), Version::new(25, 4));
        assert!(matches!(
            client.connect().await,
            Err(ClientError::AlreadyConnected)
        ));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_login_is_an_authentication_error() {
        let server = MockServer::start_with(ServerOptions {
            login_reply: json!({"response_type": "AUTH_ERR"}),
            ..Default::default()
        })
        .await;
        let client = WsClient::new(server.config());

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Authentication(ref m) if m.contains("AUTH_ERR")));
        assert!(client.try_version().is_none());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn unparseable_version_fails_connect() {
        let server = MockServer::start_with(ServerOptions {
            version: json!({"release": "unknown"}),
            ..Default::default()
        })
        .await;
        let client = WsClient::new(server.config());
        assert!(matches!(
            client.connect().await,
            Err(ClientError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn operations_before_connect() {
        let client = WsClient::new(ClientConfig::new("nas"));
        assert!(client.try_version().is_none());
        assert!(matches!(
            client.call("system.info", Value::Null).await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.subscribe("alert.list", Value::Null).await,
            Err(ClientError::NotConnected)
        ));
        client.close().await.unwrap();
    }

    #[test]
    #[should_panic(expected = "before a successful connect")]
    fn version_before_connect_panics() {
        let client = WsClient::new(ClientConfig::new("nas"));
        let _ = client.version();
    }

    #[tokio::test]
    async fn concurrent_calls_get_their_own_results() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;

        let calls = join_all((0..10u64).map(|i| client.call("pool.query", json!([i]))));
        let replies = async {
            let mut requests = Vec::new();
            for _ in 0..10 {
                requests.push(server.next_request().await);
            }
            for request in requests.iter().rev() {
                let n = request.params[0].as_u64().unwrap();
                server.reply(request.id, json!(n * 10));
            }
        };
        let (results, ()) = tokio::join!(calls, replies);

        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), json!(i as u64 * 10));
        }
    }

    #[tokio::test]
    async fn rpc_error_reaches_only_its_caller() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;

        let calls = async {
            tokio::join!(
                client.call("pool.get_instance", json!([404])),
                client.call("pool.get_instance", json!([1])),
            )
        };
        let replies = async {
            for _ in 0..2 {
                let request = server.next_request().await;
                if request.params[0] == json!(404) {
                    server.reply_error(request.id, RpcError::new(22, "[ENOENT] no such pool"));
                } else {
                    server.reply(request.id, json!({"name": "tank"}));
                }
            }
        };
        let ((failed, ok), ()) = tokio::join!(calls, replies);

        assert!(matches!(failed, Err(ClientError::Rpc(RpcError { code: 22, .. }))));
        assert_eq!(ok.unwrap()["name"], "tank");
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn call_and_wait_returns_job_result() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;

        let job = client.call_and_wait("pool.scrub.run", json!(["tank"]));
        let server_side = async {
            let request = server.next_request().await;
            assert_eq!(request.method, "pool.scrub.run");
            server.reply(request.id, json!(41));
            server.push_job(json!({
                "id": 41,
                "state": "RUNNING",
                "progress": {"percent": 50.0, "description": "scrubbing"}
            }));
            server.push_job(json!({"id": 41, "state": "SUCCESS", "result": "done"}));
        };
        let (result, ()) = tokio::join!(job, server_side);
        assert_eq!(result.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn job_finishing_before_its_id_arrives() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;

        let job = client.call_and_wait("app.start", json!(["plex"]));
        let server_side = async {
            let request = server.next_request().await;
            server.push_job(json!({"id": 7, "state": "SUCCESS", "result": true}));
            server.reply(request.id, json!(7));
        };
        let (result, ()) = tokio::join!(job, server_side);
        assert_eq!(result.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn failed_job_is_a_job_error() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;

        let job = client.call_and_wait("app.upgrade", json!(["plex"]));
        let server_side = async {
            let request = server.next_request().await;
            server.reply(request.id, json!(12));
            server.push_job(json!({
                "id": 12,
                "state": "FAILED",
                "error": "[EFAULT] image pull failed",
                "exception": "Traceback"
            }));
        };
        let (result, ()) = tokio::join!(job, server_side);

        match result {
            Err(ClientError::Job(JobError {
                job_id,
                state,
                message,
                ..
            })) => {
                assert_eq!(job_id, 12);
                assert_eq!(state, JobState::Failed);
                assert_eq!(message.as_deref(), Some("[EFAULT] image pull failed"));
            }
            other => panic!("expected a job error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_fields() {
        let server = MockServer::start().await;
        let client = connected(&server).await;

        let mut first = client.subscribe("reporting.realtime", Value::Null).await.unwrap();
        let mut second = client.subscribe("reporting.realtime", Value::Null).await.unwrap();

        let stats = json!({"cpu": {"average": {"usage": 12.5}}, "memory": {"free": 1024}});
        server.push("reporting.realtime", stats.clone());
        assert_eq!(first.recv().await, Some(stats.clone()));
        assert_eq!(second.recv().await, Some(stats));

        first.close();
        server.push("reporting.realtime", json!({"n": 2}));
        assert_eq!(second.recv().await, Some(json!({"n": 2})));
        assert_eq!(first.recv().await, None);
    }

    #[tokio::test]
    async fn job_events_never_reach_subscribers() {
        let server = MockServer::start().await;
        let client = connected(&server).await;

        let mut jobs = client.subscribe(methods::JOB_COLLECTION, Value::Null).await.unwrap();
        let mut alerts = client.subscribe("alert.list", Value::Null).await.unwrap();

        server.push_job(json!({"id": 3, "state": "SUCCESS", "result": null}));
        server.push("alert.list", json!({"level": "INFO"}));

        assert_eq!(alerts.recv().await, Some(json!({"level": "INFO"})));
        assert_eq!(jobs.try_recv(), None);
    }

    #[tokio::test]
    async fn rejected_subscription_is_deregistered() {
        let server = MockServer::start_with(ServerOptions {
            subscribe_ack: json!(false),
            ..Default::default()
        })
        .await;
        let client = connected(&server).await;

        let err = client.subscribe("alert.list", Value::Null).await.unwrap_err();
        assert!(matches!(err, ClientError::SubscriptionRejected { ref collection } if collection == "alert.list"));
        assert_eq!(client.connection().unwrap().subscriptions.total(), 0);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;

        let call = client.call("system.info", Value::Null);
        let server_side = async {
            let request = server.next_request().await;
            server.send_raw("not json");
            server.send_raw(r#"{"jsonrpc":"2.0","method":"notify_unknown","params":{}}"#);
            server.send_raw(r#"{"jsonrpc":"2.0","id":999999,"result":1}"#);
            server.reply(request.id, json!({"hostname": "nas"}));
        };
        let (result, ()) = tokio::join!(call, server_side);
        assert_eq!(result.unwrap()["hostname"], "nas");

        // A foreign version tag is logged, the response still resolves its call.
        let call = client.call("system.info", Value::Null);
        let server_side = async {
            let request = server.next_request().await;
            server.send_raw(&format!(
                r#"{{"jsonrpc":"1.0","id":{},"result":{{"hostname":"old"}}}}"#,
                request.id
            ));
        };
        let (result, ()) = tokio::join!(call, server_side);
        assert_eq!(result.unwrap()["hostname"], "old");
    }

    #[tokio::test]
    async fn cancelling_one_call_leaves_others() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;
        let token = CancellationToken::new();

        let cancelled = client.call_cancellable("pool.query", json!(["a"]), &token);
        let kept = client.call("pool.query", json!(["b"]));
        let server_side = async {
            let first = server.next_request().await;
            let second = server.next_request().await;
            token.cancel();
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.reply(first.id, json!("late"));
            server.reply(second.id, json!("late"));
        };
        let (cancelled, kept, ()) = tokio::join!(cancelled, kept, server_side);

        assert!(matches!(cancelled, Err(ClientError::Cancelled)));
        assert_eq!(kept.unwrap(), json!("late"));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn call_times_out() {
        let mut server = MockServer::start().await;
        let client = WsClient::new(server.config().with_request_timeout(Duration::from_secs(1)));
        client.connect().await.unwrap();

        let (result, _request) = tokio::join!(
            client.call("system.info", Value::Null),
            server.next_request()
        );
        assert!(matches!(result, Err(ClientError::Timeout { .. })));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn disconnect_fails_every_pending_operation() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;
        let mut sub = client.subscribe("alert.list", Value::Null).await.unwrap();

        let pending = client.call("pool.query", Value::Null);
        let job = client.call_and_wait("pool.scrub.run", json!(["tank"]));
        let server_side = async {
            let first = server.next_request().await;
            let second = server.next_request().await;
            let job_request = if first.method == "pool.scrub.run" { first } else { second };
            server.reply(job_request.id, json!(5));
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.disconnect();
        };
        let (pending, job, ()) = tokio::join!(pending, job, server_side);

        assert!(pending.unwrap_err().is_fatal());
        assert!(job.unwrap_err().is_fatal());
        assert_eq!(sub.recv().await, None);
        assert!(!client.is_connected());
        assert!(client.close_reason().is_some());
        assert!(client.call("pool.query", Value::Null).await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn server_close_frame_carries_reason() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;

        let pending = client.call("system.reboot", Value::Null);
        let server_side = async {
            server.next_request().await;
            server.close("going down for reboot");
        };
        let (pending, ()) = tokio::join!(pending, server_side);

        match pending {
            Err(ClientError::ConnectionClosed { reason }) => {
                assert!(reason.contains("going down for reboot"))
            }
            other => panic!("expected connection closed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_and_concurrent() {
        let mut server = MockServer::start().await;
        let client = connected(&server).await;
        let mut sub = client.subscribe("alert.list", Value::Null).await.unwrap();

        let pending = client.call("pool.query", Value::Null);
        let closer = async {
            server.next_request().await;
            tokio::join!(client.close(), client.close())
        };
        let (pending, (a, b)) = tokio::join!(pending, closer);

        a.unwrap();
        b.unwrap();
        assert!(pending.unwrap_err().is_connection_closed());
        assert_eq!(sub.recv().await, None);
        client.close().await.unwrap();
        assert!(matches!(
            client.close_reason(),
            Some(ClientError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn unanswered_ping_ends_the_connection() {
        let server = MockServer::start_with(ServerOptions {
            answer_pings: false,
            ..Default::default()
        })
        .await;
        let client = WsClient::new(server.config().with_ping_interval(Duration::from_secs(1)));
        client.connect().await.unwrap();
        let mut sub = client.subscribe("alert.list", Value::Null).await.unwrap();

        let ended = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await;
        assert_eq!(ended.unwrap(), None);

        match client.close_reason() {
            Some(ClientError::ConnectionClosed { reason }) => assert!(reason.contains("liveness")),
            other => panic!("expected a liveness failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn answered_pings_keep_the_connection() {
        let mut server = MockServer::start().await;
        let client = WsClient::new(server.config().with_ping_interval(Duration::from_secs(1)));
        client.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(client.is_connected());

        let (result, ()) = tokio::join!(client.call("system.info", Value::Null), async {
            let request = server.next_request().await;
            server.reply(request.id, json!({"hostname": "nas"}));
        });
        assert_eq!(result.unwrap()["hostname"], "nas");
    }
}
