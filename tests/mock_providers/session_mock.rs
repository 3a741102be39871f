//! In-memory realtime session
//!
//! The test pushes [`ServerEvent`]s as the server would and inspects every
//! [`ClientEvent`] the engine queued, in order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use waav_duplex::core::realtime::{ClientEvent, ProtocolSession, ServerEvent, SessionHandle};

/// Outbound queue depth of the mock session.
const OUTBOUND_CAPACITY: usize = 512;

/// Everything the client sent, in order.
#[derive(Clone, Default)]
pub struct OutboundLog {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl OutboundLog {
    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type()).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn appends(&self) -> usize {
        self.count("input_audio_buffer.append")
    }

    /// `(event_id, response_id)` of every `response.cancel`.
    pub fn cancels(&self) -> Vec<(Option<String>, Option<String>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::ResponseCancel {
                    event_id,
                    response_id,
                } => Some((event_id.clone(), response_id.clone())),
                _ => None,
            })
            .collect()
    }

    /// `(call_id, output)` of every submitted function result.
    pub fn function_outputs(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::ConversationItemCreate { item }
                    if item.item_type == "function_call_output" =>
                {
                    Some((
                        item.call_id.clone().unwrap_or_default(),
                        item.output.clone().unwrap_or_default(),
                    ))
                }
                _ => None,
            })
            .collect()
    }

    /// Text of every user message item.
    pub fn user_texts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::ConversationItemCreate { item } if item.item_type == "message" => item
                    .content
                    .as_ref()
                    .and_then(|parts| parts.iter().find_map(|p| p.text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Modalities of every `response.create`, `None` when unrestricted.
    pub fn response_creates(&self) -> Vec<Option<Vec<String>>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::ResponseCreate { response } => {
                    Some(response.as_ref().and_then(|r| r.modalities.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Poll until `predicate` holds or `timeout` passes.
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&OutboundLog) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Server side of an in-memory session.
pub struct MockSession {
    server: Option<mpsc::UnboundedSender<ServerEvent>>,
    pub outbound: OutboundLog,
}

impl MockSession {
    /// Create the mock and the [`ProtocolSession`] to hand to the engine.
    pub fn new() -> (Self, ProtocolSession) {
        let (handle, mut outbound_rx) = SessionHandle::channel(OUTBOUND_CAPACITY);
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let outbound = OutboundLog::default();

        let log = outbound.clone();
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                log.events.lock().push(event);
            }
        });

        (
            Self {
                server: Some(server_tx),
                outbound,
            },
            ProtocolSession::from_parts(handle, server_rx),
        )
    }

    /// Deliver one server event.
    pub fn send(&self, event: ServerEvent) {
        if let Some(server) = &self.server {
            let _ = server.send(event);
        }
    }

    pub fn send_all<I>(&self, events: I)
    where
        I: IntoIterator<Item = ServerEvent>,
    {
        for event in events {
            self.send(event);
        }
    }

    /// Drop the server side as if the socket closed.
    pub fn disconnect(&mut self) {
        self.server = None;
    }
}
