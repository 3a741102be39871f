//! WebSocket Mock Server for the Realtime API
//!
//! Accepts a single connection on a loopback port. Everything the client
//! sends is forwarded to the test as JSON; the test drives the server side
//! through [`MockAction`]s.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// What the mock server should do next.
#[derive(Debug)]
pub enum MockAction {
    /// Send a JSON event
    Event(Value),
    /// Send raw text as-is
    Raw(String),
    /// Close the connection
    Close,
}

/// Handshake details captured from the client.
#[derive(Debug, Default, Clone)]
pub struct HandshakeInfo {
    pub uri: String,
    pub authorization: Option<String>,
    pub openai_beta: Option<String>,
}

pub struct RealtimeMockServer {
    /// `ws://` endpoint to point the client at
    pub url: String,
    pub received: mpsc::UnboundedReceiver<Value>,
    actions: mpsc::UnboundedSender<MockAction>,
    handshake: Arc<Mutex<Option<HandshakeInfo>>>,
}

impl RealtimeMockServer {
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// A server that refuses the WebSocket upgrade with `status`.
    pub async fn start_rejecting(status: StatusCode) -> Self {
        Self::spawn(Some(status)).await
    }

    async fn spawn(reject_with: Option<StatusCode>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (actions, mut actions_rx) = mpsc::unbounded_channel::<MockAction>();
        let handshake = Arc::new(Mutex::new(None));

        let captured = handshake.clone();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let callback = |request: &Request,
                            response: Response|
             -> Result<Response, ErrorResponse> {
                let header = |name: &str| {
                    request
                        .headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                *captured.lock() = Some(HandshakeInfo {
                    uri: request.uri().to_string(),
                    authorization: header("authorization"),
                    openai_beta: header("openai-beta"),
                });
                if let Some(status) = reject_with {
                    let mut rejection = ErrorResponse::new(Some("rejected".to_string()));
                    *rejection.status_mut() = status;
                    return Err(rejection);
                }
                Ok(response)
            };
            let Ok(ws_stream) = accept_hdr_async(stream, callback).await else {
                return;
            };
            let (mut write, mut read) = ws_stream.split();

            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                let _ = received_tx.send(value);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    },
                    action = actions_rx.recv() => match action {
                        Some(MockAction::Event(value)) => {
                            if write.send(Message::Text(value.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(MockAction::Raw(text)) => {
                            if write.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(MockAction::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                }
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            received,
            actions,
            handshake,
        }
    }

    pub fn send_event(&self, value: Value) {
        let _ = self.actions.send(MockAction::Event(value));
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.actions.send(MockAction::Raw(text.into()));
    }

    pub fn close(&self) {
        let _ = self.actions.send(MockAction::Close);
    }

    pub fn handshake(&self) -> Option<HandshakeInfo> {
        self.handshake.lock().clone()
    }

    /// Next client message, or `None` after `timeout`.
    pub async fn next_received(&mut self, timeout: std::time::Duration) -> Option<Value> {
        tokio::time::timeout(timeout, self.received.recv())
            .await
            .ok()
            .flatten()
    }
}
