//! In-memory doubles for connections and transports used by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::mpsc;

use crate::{
    connection::{ConnectionEvent, PersistentConnection},
    errors::ConnectionError,
    transport::{SendOutcome, Transport},
    types::{JsonRpcRequest, JsonRpcResponse, Payload, PayloadResponse},
};

/// Answers a single request, or stays silent when `None` is returned.
pub type Responder = Arc<dyn Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + Sync>;

/// Persistent connection double.
///
/// Records every frame sent, lets tests inject inbound events, and optionally answers
/// requests synchronously through a [`Responder`].
pub struct MockConnection {
    listeners: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
    sent: Mutex<Vec<Value>>,
    responder: Mutex<Option<Responder>>,
    connected: AtomicBool,
    closed: AtomicBool,
    reconnects: AtomicUsize,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
        }
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + Sync + 'static,
    {
        let connection = Self::new();
        connection.set_responder(responder);
        connection
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Arc::new(responder));
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn push_event(&self, event: ConnectionEvent) {
        self.listeners.lock().retain(|listener| listener.send(event.clone()).is_ok());
    }

    pub fn push_message<T: Serialize>(&self, message: T) {
        let text = serde_json::to_string(&message).unwrap();
        self.push_event(ConnectionEvent::Message(text));
    }

    /// Emits `Down`, marking the connection unwritable.
    pub fn go_down(&self) {
        self.set_connected(false);
        self.push_event(ConnectionEvent::Down);
    }

    /// Marks the connection writable again and emits `Reopen`.
    pub fn reopen(&self) {
        self.set_connected(true);
        self.push_event(ConnectionEvent::Reopen);
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// Methods of every request sent so far, batches flattened.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .flat_map(|frame| match frame {
                Value::Array(members) => members.clone(),
                other => vec![other.clone()],
            })
            .filter_map(|request| request.get("method").and_then(Value::as_str).map(String::from))
            .collect()
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn respond(&self, payload: &Payload) {
        let Some(responder) = self.responder.lock().clone() else { return };
        match payload {
            Payload::Single(request) => {
                if let Some(response) = responder(request) {
                    self.push_message(response);
                }
            }
            Payload::Batch(requests) => {
                let responses: Vec<_> = requests.iter().filter_map(|r| responder(r)).collect();
                if !responses.is_empty() {
                    self.push_message(responses);
                }
            }
        }
    }
}

impl PersistentConnection for MockConnection {
    fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::NotConnected);
        }
        let value: Value = serde_json::from_str(&text).unwrap();
        self.sent.lock().push(value);
        if let Ok(payload) = serde_json::from_str::<Payload>(&text) {
            self.respond(&payload);
        }
        Ok(())
    }

    fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.listeners.lock().clear();
    }

    fn listen(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }
}

type Handler = Box<dyn Fn(&Payload) -> SendOutcome + Send + Sync>;

/// Transport double answering every payload through a handler and recording calls.
pub struct MockTransport {
    handler: Handler,
    calls: Mutex<Vec<Payload>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Payload) -> SendOutcome + Send + Sync + 'static,
    {
        Self { handler: Box::new(handler), calls: Mutex::new(Vec::new()) }
    }

    /// Transport answering each request through `responder`, as a well-behaved node would.
    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&JsonRpcRequest) -> JsonRpcResponse + Send + Sync + 'static,
    {
        Self::new(move |payload| {
            SendOutcome::Success(match payload {
                Payload::Single(request) => PayloadResponse::Single(responder(request)),
                Payload::Batch(requests) => {
                    PayloadResponse::Batch(requests.iter().map(&responder).collect())
                }
            })
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<Payload> {
        self.calls.lock().clone()
    }

    /// Methods of every request sent so far, batches flattened.
    pub fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .flat_map(|payload| payload.requests().map(|r| r.method.clone()).collect::<Vec<_>>())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, payload: &Payload) -> SendOutcome {
        self.calls.lock().push(payload.clone());
        (self.handler)(payload)
    }
}
