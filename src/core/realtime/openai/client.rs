//! Protocol session over the OpenAI Realtime WebSocket.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! A single pump task owns the socket. Outbound events flow through a
//! bounded channel; inbound events are forwarded on an unbounded channel
//! so a slow consumer can never stall the socket reader. When the socket
//! closes the inbound channel closes with it and the session is over:
//! there is no reconnection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http::{HeaderValue, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::Modality;
use super::messages::{ClientEvent, ConversationItem, ResponseConfig, ServerEvent};
use crate::core::realtime::base::{RealtimeConfig, RealtimeError, RealtimeResult};

/// Channel capacity for outbound client events.
pub const WS_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Session Handle
// =============================================================================

/// Cloneable sender half of a protocol session.
///
/// All methods are non-blocking with respect to the socket: they only
/// enqueue events for the pump task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<ClientEvent>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    /// Build a handle whose events land on the returned receiver instead of
    /// a socket.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
                shutdown: CancellationToken::new(),
            },
            rx,
        )
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Ask the pump to send a close frame and stop.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Enqueue an event, waiting for channel capacity.
    pub async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        if self.is_closed() {
            return Err(RealtimeError::SessionClosed);
        }
        self.tx
            .send(event)
            .await
            .map_err(|_| RealtimeError::SessionClosed)
    }

    /// Enqueue an event without waiting.
    pub fn try_send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        if self.is_closed() {
            return Err(RealtimeError::SessionClosed);
        }
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(ev) => RealtimeError::WebSocketError(format!(
                "outbound queue full, dropped {}",
                ev.event_type()
            )),
            mpsc::error::TrySendError::Closed(_) => RealtimeError::SessionClosed,
        })
    }

    /// Append captured PCM16 audio to the server input buffer.
    pub async fn send_audio(&self, pcm: &[u8]) -> RealtimeResult<()> {
        self.send_event(ClientEvent::audio_append(pcm)).await
    }

    /// Like [`send_audio`](Self::send_audio) but gives up after `timeout`
    /// so capture never waits on a congested socket.
    pub async fn send_audio_within(&self, pcm: &[u8], timeout: Duration) -> RealtimeResult<()> {
        match tokio::time::timeout(timeout, self.send_audio(pcm)).await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::Timeout(format!(
                "audio frame not queued within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Add a user text message to the conversation.
    pub async fn send_user_text(&self, text: &str) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await
    }

    /// Attach a function call result to the conversation.
    pub async fn submit_function_result(&self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_output(call_id, output),
        })
        .await
    }

    /// Request the next response, optionally restricting its modalities.
    pub async fn create_response(&self, modalities: Option<&[Modality]>) -> RealtimeResult<()> {
        let response = modalities.map(|m| ResponseConfig {
            modalities: Some(Modality::to_strings(m)),
            instructions: None,
        });
        self.send_event(ClientEvent::ResponseCreate { response }).await
    }

    /// Request cancellation of the in-flight response.
    ///
    /// Never waits; returns the `event_id` the server echoes on errors
    /// caused by this request. When the outbound queue is full the cancel
    /// is handed to a background send that gives up after `fallback_timeout`.
    pub fn cancel_response(
        &self,
        response_id: Option<&str>,
        fallback_timeout: Duration,
    ) -> RealtimeResult<String> {
        if self.is_closed() {
            return Err(RealtimeError::SessionClosed);
        }
        let event_id = format!("evt_{}", uuid::Uuid::new_v4().simple());
        let event = ClientEvent::ResponseCancel {
            event_id: Some(event_id.clone()),
            response_id: response_id.map(str::to_string),
        };

        match self.tx.try_send(event) {
            Ok(()) => Ok(event_id),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RealtimeError::SessionClosed),
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Outbound queue full, deferring response.cancel");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tokio::time::timeout(fallback_timeout, tx.send(event))
                        .await
                        .is_err()
                    {
                        warn!(
                            timeout_ms = fallback_timeout.as_millis() as u64,
                            "response.cancel could not be queued"
                        );
                    }
                });
                Ok(event_id)
            }
        }
    }
}

// =============================================================================
// Protocol Session
// =============================================================================

/// One connected realtime session.
pub struct ProtocolSession {
    handle: SessionHandle,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    pump: Option<JoinHandle<()>>,
}

impl ProtocolSession {
    /// Open the WebSocket, send the initial `session.update` and start the
    /// pump task.
    pub async fn connect(config: &RealtimeConfig) -> RealtimeResult<Self> {
        config.validate()?;
        let url = config.ws_url()?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key.as_str()))
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid API key: {e}")))?;
        request.headers_mut().insert("Authorization", bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_handshake_error)?;

        info!(model = %config.model, turn_mode = %config.turn_mode, "Connected to OpenAI Realtime API");

        let (mut ws_sink, ws_stream) = ws_stream.split();

        let update = ClientEvent::SessionUpdate {
            session: config.session_config(),
        };
        let json = serde_json::to_string(&update)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        ws_sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
        debug!("Sent initial session.update");

        let (handle, outbound) = SessionHandle::channel(WS_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(run_pump(
            ws_sink,
            ws_stream,
            outbound,
            inbound_tx,
            handle.shutdown.clone(),
            handle.closed.clone(),
        ));

        Ok(Self {
            handle,
            events: inbound_rx,
            pump: Some(pump),
        })
    }

    /// Assemble a session from in-memory channels.
    pub fn from_parts(handle: SessionHandle, events: mpsc::UnboundedReceiver<ServerEvent>) -> Self {
        Self {
            handle,
            events,
            pump: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Next server event, `None` once the transport has closed.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Separate the sender half from the event stream.
    pub fn split(self) -> (SessionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        // The pump runs detached; it ends with the socket or on close().
        drop(self.pump);
        (self.handle, self.events)
    }
}

fn map_handshake_error(err: tungstenite::Error) -> RealtimeError {
    match err {
        tungstenite::Error::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            RealtimeError::AuthenticationFailed(format!("handshake rejected: {}", response.status()))
        }
        tungstenite::Error::Http(response) => {
            RealtimeError::ConnectionFailed(format!("handshake rejected: {}", response.status()))
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

/// Best-effort `type` field of a raw event for logging.
fn peek_event_type(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_else(|| "<untyped>".to_string())
}

async fn run_pump<S, R>(
    mut sink: S,
    mut stream: R,
    mut outbound: mpsc::Receiver<ClientEvent>,
    inbound: mpsc::UnboundedSender<ServerEvent>,
    shutdown: CancellationToken,
    closed: Arc<AtomicBool>,
) where
    S: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
    R: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Closing realtime socket");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            event = outbound.recv() => {
                let Some(event) = event else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        error!("Failed to serialize {}: {}", event.event_type(), e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(ServerEvent::Unknown) => {
                                debug!(event_type = %peek_event_type(&text), "Ignoring unhandled server event");
                            }
                            Ok(event) => {
                                if inbound.send(event).is_err() {
                                    debug!("Event consumer dropped, stopping pump");
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Failed to parse server event: {} - {}", e, text);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "WebSocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    closed.store(true, Ordering::Release);
}

// =============================================================================
// Tests
// =============================================================================
