//! The connection manager.
//!
//! Owns one WebSocket connection: a single read task decodes every inbound
//! frame and routes it, all writes go through one lock, and an optional
//! liveness task probes the server on an interval. When the connection ends,
//! for whatever reason, teardown runs once and fails every pending call and
//! job waiter with the same cause and closes every subscription.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use mwrpc_core::{ClientError, ClientResult};
use mwrpc_protocol::{Incoming, MAX_MESSAGE_SIZE, Request, decode_frame, encode_request, methods};

use crate::config::ClientConfig;
use crate::correlator::{CallKind, Correlator, PendingGuard};
use crate::subscriptions::{SubscriptionRegistry, is_subscribe_ack};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Opens the WebSocket described by `config`.
pub(crate) async fn open(config: &ClientConfig) -> ClientResult<WsStream> {
    let url = config.url();

    let connector = if config.use_tls && config.insecure_skip_verify {
        warn!(host = %config.host, "certificate validation is disabled");
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build TLS connector: {}", e)))?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    let ws_config = WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..Default::default()
    };

    debug!(url = %url, "connecting");
    let (stream, _response) = tokio::time::timeout(
        config.connect_timeout(),
        connect_async_tls_with_config(url.as_str(), Some(ws_config), false, connector),
    )
    .await
    .map_err(|_| ClientError::timeout(format!("connecting to {}", url)))?
    .map_err(|e| ClientError::Transport(format!("failed to connect to {}: {}", url, e)))?;

    Ok(stream)
}

/// Shared state of one live connection.
pub(crate) struct Connection {
    writer: Mutex<Option<WsSink>>,
    pub(crate) correlator: Correlator,
    pub(crate) subscriptions: SubscriptionRegistry,
    shutdown: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    job_stream: OnceCell<()>,
    request_timeout: Option<Duration>,
    write_timeout: Duration,
}

impl Connection {
    /// Takes ownership of an open socket and starts the read task.
    pub(crate) fn start(stream: WsStream, config: &ClientConfig) -> Arc<Self> {
        let (sink, source) = stream.split();
        let connection = Arc::new(Self {
            writer: Mutex::new(Some(sink)),
            correlator: Correlator::default(),
            subscriptions: SubscriptionRegistry::new(),
            shutdown: CancellationToken::new(),
            tasks: StdMutex::new(Vec::new()),
            job_stream: OnceCell::new(),
            request_timeout: config.request_timeout(),
            write_timeout: config.connect_timeout(),
        });

        let reader = tokio::spawn(connection.clone().read_loop(source));
        connection.track(reader);
        connection
    }

    /// Starts probing the server every `interval`.
    pub(crate) fn start_liveness(self: &Arc<Self>, interval: Duration) {
        let probe = tokio::spawn(self.clone().liveness_loop(interval));
        self.track(probe);
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    /// Issues a call and waits for it to resolve.
    ///
    /// Plain calls are bounded by the request timeout. Job calls wait for
    /// the job's terminal event, however long it takes, unless `cancel`
    /// fires first.
    pub(crate) async fn call(
        &self,
        method: &str,
        params: Value,
        kind: CallKind,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<Value> {
        let (id, receiver) = self.correlator.register(kind)?;
        let _guard = PendingGuard::new(&self.correlator, id);

        debug!(request_id = id, method = %method, "sending request");
        self.send(&Request::new(id, method, params)).await?;

        let response = async {
            receiver
                .await
                .unwrap_or_else(|_| Err(self.closed_error()))
        };
        let limit = match kind {
            CallKind::Plain => self.request_timeout,
            CallKind::Job => None,
        };
        let bounded = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, response)
                    .await
                    .unwrap_or_else(|_| Err(ClientError::timeout(format!("call {}", method)))),
                None => response.await,
            }
        };

        let result = match cancel {
            Some(token) => tokio::select! {
                result = bounded => result,
                _ = token.cancelled() => Err(ClientError::Cancelled),
            },
            None => bounded.await,
        };

        match &result {
            Ok(_) => trace!(request_id = id, method = %method, "call resolved"),
            Err(e) => debug!(request_id = id, method = %method, error = %e, "call failed"),
        }
        result
    }

    /// Makes sure the server streams job events to this connection.
    pub(crate) async fn ensure_job_stream(&self) -> ClientResult<()> {
        self.job_stream
            .get_or_try_init(|| async {
                let ack = self
                    .call(
                        methods::SUBSCRIBE,
                        json!([methods::JOB_COLLECTION]),
                        CallKind::Plain,
                        None,
                    )
                    .await?;
                if is_subscribe_ack(&ack) {
                    debug!("subscribed to job events");
                    Ok(())
                } else {
                    Err(ClientError::SubscriptionRejected {
                        collection: methods::JOB_COLLECTION.to_string(),
                    })
                }
            })
            .await
            .map(|_| ())
    }

    /// Writes one request frame.
    async fn send(&self, request: &Request) -> ClientResult<()> {
        let text = encode_request(request)?;

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(self.closed_error());
        };
        let result = tokio::time::timeout(self.write_timeout, sink.send(Message::Text(text))).await;
        drop(writer);

        let failure = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => ClientError::Transport(format!("write failed: {}", e)),
            Err(_) => ClientError::Transport("write timed out".to_string()),
        };
        self.teardown(failure.clone());
        Err(failure)
    }

    /// Sole consumer of inbound frames.
    async fn read_loop(self: Arc<Self>, mut source: WsSource) {
        let reason = loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => break None,
                message = source.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => self.dispatch(&text),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.dispatch(text),
                    Err(_) => warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) if !frame.reason.is_empty() => {
                            format!("server closed the connection: {}", frame.reason)
                        }
                        _ => "server closed the connection".to_string(),
                    };
                    break Some(ClientError::closed(reason));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(ClientError::Transport(e.to_string())),
                None => break Some(ClientError::closed("connection reset by server")),
            }
        };

        if let Some(reason) = reason {
            if reason.is_connection_closed() {
                info!(reason = %reason, "connection ended");
            } else {
                error!(error = %reason, "connection failed");
            }
            self.teardown(reason);
        }
        self.release_writer().await;
        debug!("read loop stopped");
    }

    /// Routes one decoded frame.
    fn dispatch(&self, text: &str) {
        match decode_frame(text) {
            Ok(Incoming::Response(response)) => {
                if !response.is_compatible() {
                    warn!(version = %response.jsonrpc, "unexpected jsonrpc version");
                }
                let id = response.id;
                if !self.correlator.resolve(response) {
                    debug!(request_id = id, "dropping response with no pending call");
                }
            }
            Ok(Incoming::Job(event)) => {
                trace!(job_id = event.id, state = %event.state, "job event");
                self.correlator.on_job_event(event);
            }
            Ok(Incoming::Collection(event)) => {
                let collection = event.collection.clone();
                let reached = self.subscriptions.deliver(&collection, event.into_payload());
                trace!(collection = %collection, subscribers = reached, "collection event");
            }
            Ok(Incoming::Unrecognized(frame)) => {
                trace!(frame = %frame, "ignoring unrecognized frame");
            }
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    async fn liveness_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let probe = self.call(
                methods::PING,
                Value::Null,
                CallKind::Plain,
                Some(&self.shutdown),
            );
            let failure = match tokio::time::timeout(interval, probe).await {
                Ok(Ok(Value::String(reply))) if reply == methods::PONG => {
                    trace!("liveness probe answered");
                    continue;
                }
                Ok(Ok(other)) => format!("unexpected reply {}", other),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no reply within {:?}", interval),
            };

            if self.shutdown.is_cancelled() {
                return;
            }
            error!(reason = %failure, "liveness probe failed");
            self.teardown(ClientError::closed(format!("liveness probe failed: {}", failure)));
            self.release_writer().await;
            return;
        }
    }

    /// Fails everything outstanding with `reason` and stops the tasks.
    /// Only the first call has an effect.
    pub(crate) fn teardown(&self, reason: ClientError) {
        if self.correlator.fail_all(reason) {
            self.subscriptions.close_all();
        }
        self.shutdown.cancel();
    }

    /// Sends a close frame and drops the write half.
    async fn release_writer(&self) {
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = tokio::time::timeout(self.write_timeout, sink.close()).await {
                debug!(error = %e, "timed out closing socket");
            }
        }
    }

    /// Closes the connection and waits for its tasks. Idempotent.
    pub(crate) async fn close(&self) {
        self.teardown(ClientError::closed("client closed"));
        self.release_writer().await;

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            let _ = task.await;
        }
    }

    /// The teardown cause, or a generic closed error.
    pub(crate) fn closed_error(&self) -> ClientError {
        self.correlator
            .closed()
            .unwrap_or_else(|| ClientError::closed("connection closed"))
    }

    pub(crate) fn is_open(&self) -> bool {
        self.correlator.closed().is_none()
    }
}
