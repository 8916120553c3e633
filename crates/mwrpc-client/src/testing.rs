//! In-process WebSocket server for client tests.
//!
//! Accepts a single connection and answers the handshake, pings and
//! subscribe calls on its own. Every other request is handed to the test,
//! which replies, pushes notifications or drops the connection at will.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

use mwrpc_protocol::{Request, Response, RpcError, methods};

use crate::config::ClientConfig;

/// How the server answers requests it handles itself.
#[derive(Debug, Clone)]
pub(crate) struct ServerOptions {
    pub login_reply: Value,
    pub version: Value,
    pub answer_pings: bool,
    pub subscribe_ack: Value,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            login_reply: json!({"response_type": methods::LOGIN_SUCCESS}),
            version: json!("TrueNAS-SCALE-25.04.1"),
            answer_pings: true,
            subscribe_ack: json!(true),
        }
    }
}

impl ServerOptions {
    /// The automatic answer to `request`, or `None` to forward it.
    fn auto_reply(&self, request: &Request) -> Option<Option<Value>> {
        match request.method.as_str() {
            methods::LOGIN => Some(Some(self.login_reply.clone())),
            methods::SYSTEM_VERSION => Some(Some(self.version.clone())),
            methods::PING => Some(self.answer_pings.then(|| json!(methods::PONG))),
            methods::SUBSCRIBE => Some(Some(self.subscribe_ack.clone())),
            _ => None,
        }
    }
}

enum Command {
    Send(String),
    Close(String),
    Disconnect,
}

pub(crate) struct MockServer {
    addr: SocketAddr,
    requests: mpsc::UnboundedReceiver<Request>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub(crate) async fn start() -> Self {
        Self::start_with(ServerOptions::default()).await
    }

    pub(crate) async fn start_with(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(tcp).await else {
                return;
            };
            serve(ws, options, request_tx, command_rx).await;
        });

        Self {
            addr,
            requests,
            commands,
            task,
        }
    }

    /// A plain-text configuration pointing at this server.
    pub(crate) fn config(&self) -> ClientConfig {
        ClientConfig::new(self.addr.ip().to_string())
            .with_port(self.addr.port())
            .with_tls(false)
            .with_credentials("root", "test-api-key")
            .with_ping_interval(Duration::ZERO)
            .with_request_timeout(Duration::from_secs(5))
    }

    /// Next request the server did not answer itself.
    pub(crate) async fn next_request(&mut self) -> Request {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("no request within 5s")
            .expect("server stopped")
    }

    pub(crate) fn reply(&self, id: u64, result: Value) {
        self.send_value(&Response::success(id, result));
    }

    pub(crate) fn reply_error(&self, id: u64, error: RpcError) {
        self.send_value(&Response::failure(id, error));
    }

    /// Pushes a `changed` event on `collection`.
    pub(crate) fn push(&self, collection: &str, fields: Value) {
        self.send_value(&json!({
            "jsonrpc": "2.0",
            "method": methods::COLLECTION_UPDATE,
            "params": {"msg": "changed", "collection": collection, "fields": fields},
        }));
    }

    /// Pushes a job event on the job stream.
    pub(crate) fn push_job(&self, fields: Value) {
        let id = fields["id"].clone();
        self.send_value(&json!({
            "jsonrpc": "2.0",
            "method": methods::COLLECTION_UPDATE,
            "params": {
                "msg": "changed",
                "collection": methods::JOB_COLLECTION,
                "id": id,
                "fields": fields,
            },
        }));
    }

    pub(crate) fn send_raw(&self, text: &str) {
        let _ = self.commands.send(Command::Send(text.to_string()));
    }

    /// Sends a close frame with `reason`.
    pub(crate) fn close(&self, reason: &str) {
        let _ = self.commands.send(Command::Close(reason.to_string()));
    }

    /// Drops the TCP connection without a close handshake.
    pub(crate) fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    fn send_value(&self, value: &impl serde::Serialize) {
        self.send_raw(&serde_json::to_string(value).unwrap());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut ws: WebSocketStream<TcpStream>,
    options: ServerOptions,
    requests: mpsc::UnboundedSender<Request>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(request) = serde_json::from_str::<Request>(&text) else {
                        continue;
                    };
                    match options.auto_reply(&request) {
                        Some(Some(result)) => {
                            let reply = serde_json::to_string(&Response::success(request.id, result)).unwrap();
                            let _ = ws.send(Message::Text(reply)).await;
                        }
                        Some(None) => {}
                        None => {
                            let _ = requests.send(request);
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    let _ = ws.send(Message::Text(text)).await;
                }
                Some(Command::Close(reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: Cow::Owned(reason),
                    };
                    let _ = ws.close(Some(frame)).await;
                }
                Some(Command::Disconnect) | None => return,
            },
        }
    }
}
